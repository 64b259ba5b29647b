//! Integer frame geometry: points, polygon containment, and ROI extraction.
//!
//! All containment tests are exact (integer arithmetic only) and treat the
//! polygon boundary as inside, so a centroid that lands on an ROI edge is
//! counted.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Pixel coordinate. Persisted as a two-element `[x, y]` array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Truncates toward zero, like casting a float centroid to a pixel index.
    pub fn from_f32(x: f32, y: f32) -> Self {
        Self::new(x as i32, y as i32)
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset_by(&self, offset: Point) -> Point {
        Point::new(self.x + offset.x, self.y + offset.y)
    }
}

impl From<[i32; 2]> for Point {
    fn from(value: [i32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Point> for [i32; 2] {
    fn from(value: Point) -> Self {
        [value.x, value.y]
    }
}

impl From<(i32, i32)> for Point {
    fn from(value: (i32, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

/// Axis-aligned rectangle in frame coordinates. Always non-empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Exact polygon containment. Boundary points are inside.
///
/// Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (px, py) = (point.x as i64, point.y as i64);
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (ax, ay) = (polygon[j].x as i64, polygon[j].y as i64);
        let (bx, by) = (polygon[i].x as i64, polygon[i].y as i64);
        if on_segment(px, py, ax, ay, bx, by) {
            return true;
        }
        if (ay > py) != (by > py) {
            let dy = by - ay;
            let lhs = (px - ax) * dy;
            let rhs = (py - ay) * (bx - ax);
            if (dy > 0 && lhs < rhs) || (dy < 0 && lhs > rhs) {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(px: i64, py: i64, ax: i64, ay: i64, bx: i64, by: i64) -> bool {
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0
        && px >= ax.min(bx)
        && px <= ax.max(bx)
        && py >= ay.min(by)
        && py <= ay.max(by)
}

/// Inclusive bounding box of `polygon` intersected with a `width`x`height`
/// frame. A box spanning `min..=max` is `max - min + 1` pixels wide, so the
/// right and bottom boundary pixels are part of it.
///
/// Returns `None` for fewer than three vertices, a polygon with no extent on
/// either axis, or a box entirely off-frame.
pub fn clamped_bounds(polygon: &[Point], width: u32, height: u32) -> Option<Rect> {
    if polygon.len() < 3 {
        return None;
    }
    let min_x = polygon.iter().map(|p| p.x as i64).min()?;
    let max_x = polygon.iter().map(|p| p.x as i64).max()?;
    let min_y = polygon.iter().map(|p| p.y as i64).min()?;
    let max_y = polygon.iter().map(|p| p.y as i64).max()?;

    if max_x == min_x || max_y == min_y {
        return None;
    }

    let x0 = min_x.max(0);
    let y0 = min_y.max(0);
    let x1 = (max_x + 1).min(width as i64);
    let y1 = (max_y + 1).min(height as i64);
    if x1 - x0 <= 0 || y1 - y0 <= 0 {
        return None;
    }
    Some(Rect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

/// Visit every pixel of `bounds` that lies inside `polygon`.
pub fn for_each_pixel_inside(polygon: &[Point], bounds: Rect, mut f: impl FnMut(u32, u32)) {
    for y in bounds.y..bounds.bottom() {
        for x in bounds.x..bounds.right() {
            if point_in_polygon(Point::new(x as i32, y as i32), polygon) {
                f(x, y);
            }
        }
    }
}

/// Masked crop of one ROI.
pub struct Region {
    /// Crop of the bounding box; pixels outside the polygon are zeroed.
    pub image: RgbImage,
    /// Top-left of the crop in frame coordinates.
    pub offset: Point,
}

/// Extract the masked bounding crop of `polygon` from `frame`.
pub fn extract_region(frame: &Frame, polygon: &[Point]) -> Option<Region> {
    let bounds = clamped_bounds(polygon, frame.width(), frame.height())?;
    let source = frame.image();
    let mut crop = RgbImage::from_pixel(bounds.width, bounds.height, Rgb([0, 0, 0]));
    for_each_pixel_inside(polygon, bounds, |x, y| {
        crop.put_pixel(x - bounds.x, y - bounds.y, *source.get_pixel(x, y));
    });
    Some(Region {
        image: crop,
        offset: Point::new(bounds.x as i32, bounds.y as i32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ]
    }

    fn concave() -> Vec<Point> {
        vec![
            Point::new(0, 0),
            Point::new(20, 0),
            Point::new(20, 20),
            Point::new(10, 8),
            Point::new(0, 20),
        ]
    }

    #[test]
    fn boundary_and_interior_are_inside() {
        let poly = square();
        assert!(point_in_polygon(Point::new(5, 5), &poly));
        assert!(point_in_polygon(Point::new(0, 0), &poly));
        assert!(point_in_polygon(Point::new(10, 5), &poly));
        assert!(point_in_polygon(Point::new(5, 10), &poly));
        assert!(!point_in_polygon(Point::new(11, 5), &poly));
        assert!(!point_in_polygon(Point::new(-1, -1), &poly));
    }

    #[test]
    fn concave_notch_is_outside() {
        let poly = concave();
        assert!(point_in_polygon(Point::new(3, 3), &poly));
        assert!(!point_in_polygon(Point::new(10, 15), &poly));
        assert!(point_in_polygon(Point::new(10, 8), &poly));
    }

    #[test]
    fn containment_is_invariant_under_vertex_rotation() {
        for poly in [square(), concave()] {
            for shift in 0..poly.len() {
                let mut rotated = poly.clone();
                rotated.rotate_left(shift);
                for y in -2..=22 {
                    for x in -2..=22 {
                        let p = Point::new(x, y);
                        assert_eq!(
                            point_in_polygon(p, &poly),
                            point_in_polygon(p, &rotated),
                            "point {:?} rotation {}",
                            p,
                            shift
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        let line = vec![Point::new(0, 0), Point::new(10, 10)];
        assert!(!point_in_polygon(Point::new(5, 5), &line));
    }

    #[test]
    fn extraction_outside_frame_is_none() {
        let frame = Frame::blank(100, 100);
        let poly = vec![
            Point::new(200, 200),
            Point::new(250, 200),
            Point::new(250, 250),
        ];
        assert!(extract_region(&frame, &poly).is_none());
    }

    #[test]
    fn extraction_of_zero_area_box_is_none() {
        let frame = Frame::blank(100, 100);
        let flat = vec![Point::new(10, 20), Point::new(30, 20), Point::new(50, 20)];
        assert!(extract_region(&frame, &flat).is_none());
        let too_few = vec![Point::new(10, 20), Point::new(30, 40)];
        assert!(extract_region(&frame, &too_few).is_none());
    }

    #[test]
    fn extraction_masks_outside_pixels_and_reports_offset() {
        let image = RgbImage::from_pixel(40, 40, Rgb([200, 200, 200]));
        let frame = Frame::new(image);
        let triangle = vec![Point::new(10, 10), Point::new(30, 10), Point::new(10, 30)];
        let region = extract_region(&frame, &triangle).expect("region");
        assert_eq!(region.offset, Point::new(10, 10));
        assert_eq!(region.image.dimensions(), (21, 21));
        assert_eq!(region.image.get_pixel(1, 1), &Rgb([200, 200, 200]));
        assert_eq!(region.image.get_pixel(20, 0), &Rgb([200, 200, 200]));
        assert_eq!(region.image.get_pixel(19, 19), &Rgb([0, 0, 0]));
    }

    #[test]
    fn extraction_clamps_to_frame() {
        let frame = Frame::blank(50, 50);
        let poly = vec![Point::new(-10, -10), Point::new(30, -10), Point::new(30, 30)];
        let region = extract_region(&frame, &poly).expect("region");
        assert_eq!(region.offset, Point::new(0, 0));
        assert_eq!(region.image.dimensions(), (31, 31));
    }

    #[test]
    fn extraction_keeps_right_and_bottom_boundary() {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        image.put_pixel(10, 5, Rgb([255, 255, 255]));
        image.put_pixel(5, 10, Rgb([255, 255, 255]));
        image.put_pixel(10, 10, Rgb([255, 255, 255]));
        let frame = Frame::new(image);
        let poly = square();
        assert!(point_in_polygon(Point::new(10, 5), &poly));

        let region = extract_region(&frame, &poly).expect("region");
        assert_eq!(region.image.dimensions(), (11, 11));
        assert_eq!(region.image.get_pixel(10, 5), &Rgb([255, 255, 255]));
        assert_eq!(region.image.get_pixel(5, 10), &Rgb([255, 255, 255]));
        assert_eq!(region.image.get_pixel(10, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn bounds_stop_at_frame_edge() {
        let rect = clamped_bounds(&square(), 8, 8).expect("bounds");
        assert_eq!((rect.width, rect.height), (8, 8));
        let rect = clamped_bounds(&square(), 100, 100).expect("bounds");
        assert_eq!((rect.width, rect.height), (11, 11));
    }

    #[test]
    fn point_serializes_as_pair() -> anyhow::Result<()> {
        let json = serde_json::to_string(&Point::new(3, 4))?;
        assert_eq!(json, "[3,4]");
        let back: Point = serde_json::from_str("[7,8]")?;
        assert_eq!(back, Point::new(7, 8));
        Ok(())
    }
}
