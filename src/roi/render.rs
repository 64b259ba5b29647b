//! ROI overlay rendering.

use image::{Rgb, RgbImage};

use crate::geometry::{Point, Rect};
use crate::overlay::{self, Overlay, WHITE};
use crate::roi::registry::{EditState, RoiRegistry};

const OVERFLOW_FILL: Rgb<u8> = Rgb([255, 0, 0]);
const DRAFT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const VERTEX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

const PROMPT_BANNER_HEIGHT: u32 = 60;
const PROMPT_TEXT_PX: f32 = 26.0;

const PANEL_OFFSET_RIGHT: u32 = 420;
const PANEL_Y: u32 = 20;
const PANEL_WIDTH: u32 = 400;
const PANEL_HEIGHT: u32 = 120;
const PANEL_TEXT_PX: f32 = 30.0;

/// Overflow fill alpha at wall-clock time `t`: 0.8 and 0.4, alternating every 0.5 s.
pub fn blink_alpha(t: f64) -> f32 {
    if (t * 2.0) % 2.0 > 1.0 {
        0.8
    } else {
        0.4
    }
}

/// Overflow fills, edit widgets, and the threshold prompt. The orchestrator
/// adds the info panel and the watermark on top.
pub fn render_regions(img: &mut RgbImage, registry: &RoiRegistry, counts: &[u32], t: f64, overlay: &Overlay) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }

    let alpha = blink_alpha(t);
    for (roi, &count) in registry.rois().iter().zip(counts) {
        if roi.polygon.len() >= 3 && count >= roi.threshold {
            overlay::fill_polygon_blend(img, &roi.polygon, OVERFLOW_FILL, alpha);
        }
    }

    if registry.edit_mode() {
        if let EditState::Drawing { points } = registry.state() {
            for (i, &p) in points.iter().enumerate() {
                overlay::draw_dot(img, p, 8, DRAFT_COLOR);
                if i > 0 {
                    overlay::draw_thick_line(img, points[i - 1], p, DRAFT_COLOR, 3);
                }
            }
            if let Some(&last) = points.last() {
                overlay::draw_thick_line(img, last, registry.cursor(), DRAFT_COLOR, 2);
            }
        }
        for roi in registry.rois() {
            overlay::draw_polyline(img, &roi.polygon, true, OUTLINE_COLOR, 2);
            for &p in &roi.polygon {
                overlay::draw_dot(img, p, 10, VERTEX_COLOR);
            }
        }
    }

    if let EditState::PendingThreshold { buffer, prompt, .. } = registry.state() {
        draw_prompt(img, &format!("{} {}", prompt, buffer), overlay);
    }
}

fn draw_prompt(img: &mut RgbImage, text: &str, overlay: &Overlay) {
    let h = img.height();
    let banner = Rect {
        x: 0,
        y: h.saturating_sub(PROMPT_BANNER_HEIGHT),
        width: img.width(),
        height: PROMPT_BANNER_HEIGHT.min(h),
    };
    overlay::shade_rect(img, banner, 0.7);
    overlay.draw_text(img, text, Point::new(20, h as i32 - 25), PROMPT_TEXT_PX, WHITE);
}

/// Top-right panel with the wall-clock time and the total count.
pub fn draw_info_panel(img: &mut RgbImage, time_str: &str, total: u32, overlay: &Overlay) {
    let panel = Rect {
        x: img.width().saturating_sub(PANEL_OFFSET_RIGHT),
        y: PANEL_Y,
        width: PANEL_WIDTH,
        height: PANEL_HEIGHT,
    };
    overlay::shade_rect(img, panel, 0.7);
    overlay::draw_border(img, panel, WHITE, 3);
    let x = panel.x as i32 + 20;
    let y = panel.y as i32;
    overlay.draw_text(img, &format!("TIME: {}", time_str), Point::new(x, y + 40), PANEL_TEXT_PX, WHITE);
    overlay.draw_text(
        img,
        &format!("TOTAL COUNT: {}", total),
        Point::new(x, y + 80),
        PANEL_TEXT_PX,
        WHITE,
    );
}
