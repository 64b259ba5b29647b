//! Model-agnostic pre/post-processing: letterboxing and non-max suppression.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::result::BoundingBox;

const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// Square model input plus the transform back to source pixels.
pub struct Letterbox {
    pub image: RgbImage,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    source_width: u32,
    source_height: u32,
}

/// Resize `image` to fit `size`x`size` keeping aspect, padding with grey.
pub fn letterbox(image: &RgbImage, size: u32) -> Letterbox {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w.max(1) as f32).min(size as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(size, size, LETTERBOX_FILL);
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Letterbox {
        image: canvas,
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        source_width: w,
        source_height: h,
    }
}

impl Letterbox {
    /// Map a box in model-input space back to the source image, clamped.
    pub fn unmap(&self, b: BoundingBox) -> BoundingBox {
        let max_x = self.source_width as f32;
        let max_y = self.source_height as f32;
        let fx = |x: f32| ((x - self.pad_x) / self.scale).clamp(0.0, max_x);
        let fy = |y: f32| ((y - self.pad_y) / self.scale).clamp(0.0, max_y);
        BoundingBox::new(fx(b.x1), fy(b.y1), fx(b.x2), fy(b.y2), b.confidence)
    }
}

pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy NMS: keep the highest-confidence box, drop overlaps above `threshold`.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_short_side() {
        let img = RgbImage::from_pixel(200, 100, Rgb([10, 10, 10]));
        let lb = letterbox(&img, 64);
        assert_eq!(lb.image.dimensions(), (64, 64));
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);
        assert_eq!(lb.image.get_pixel(0, 0), &LETTERBOX_FILL);
        assert_eq!(lb.image.get_pixel(32, 32), &Rgb([10, 10, 10]));
    }

    #[test]
    fn unmap_inverts_letterbox() {
        let img = RgbImage::new(200, 100);
        let lb = letterbox(&img, 64);
        let mapped = lb.unmap(BoundingBox::new(16.0, 24.0, 32.0, 40.0, 0.5));
        assert!((mapped.x1 - 50.0).abs() < 1e-3);
        assert!((mapped.y1 - 25.0).abs() < 1e-3);
        assert!((mapped.x2 - 100.0).abs() < 1e-3);
        assert!((mapped.y2 - 75.0).abs() < 1e-3);
    }

    #[test]
    fn nms_drops_overlaps_and_keeps_disjoint() {
        let boxes = vec![
            BoundingBox::new(0.0, 0.0, 10.0, 10.0, 0.6),
            BoundingBox::new(1.0, 1.0, 11.0, 11.0, 0.9),
            BoundingBox::new(50.0, 50.0, 60.0, 60.0, 0.3),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.3);
    }
}
