//! Animated "reconnecting" frame shown while the live stream is down.

use image::Rgb;
use std::f32::consts::PI;

use crate::frame::Frame;
use crate::geometry::Point;
use crate::overlay::{self, Overlay, WHITE};

const DARKEN_ALPHA: f32 = 0.6;
const SPINNER_DOTS: usize = 12;
const SPINNER_RADIUS: f32 = 40.0;
const SPINNER_SPEED: f32 = 3.0;
const TEXT_PX: f32 = 36.0;

/// Text for animation time `t` (seconds): 0-3 trailing dots cycling at 2 Hz.
pub fn reconnecting_text(t: f32) -> String {
    let periods = ((t * 2.0).floor() as i64).rem_euclid(4) as usize;
    format!("Reconnecting{}", ".".repeat(periods))
}

/// Darken `base` and draw the spinner and status text at animation time `t`.
///
/// `base` is the last good frame, or a blank canvas when none arrived yet.
pub fn render_placeholder(base: &Frame, t: f32, overlay: &Overlay) -> Frame {
    let mut img = base.image().clone();
    if img.width() == 0 || img.height() == 0 {
        return base.with_image(img);
    }
    overlay::shade_all(&mut img, DARKEN_ALPHA);

    let cx = (img.width() / 2) as f32;
    let cy = (img.height() / 2) as f32 - 60.0;
    for i in 0..SPINNER_DOTS {
        let angle = 2.0 * PI * i as f32 / SPINNER_DOTS as f32 - t * SPINNER_SPEED;
        let phase = (angle + t * SPINNER_SPEED).sin();
        let center = Point::new(
            (cx + SPINNER_RADIUS * angle.cos()) as i32,
            (cy + SPINNER_RADIUS * angle.sin()) as i32,
        );
        let brightness = (128.0 + 127.0 * phase).clamp(0.0, 255.0) as u8;
        let radius = (3.0 + 3.0 * phase) as i32;
        if radius > 1 {
            overlay::draw_dot(
                &mut img,
                center,
                radius,
                Rgb([brightness, brightness, brightness]),
            );
        }
    }

    let text = reconnecting_text(t);
    let text_w = overlay.text_size(&text, TEXT_PX).map(|(w, _)| w).unwrap_or(0);
    let text_x = (img.width() as i32 - text_w as i32) / 2;
    let text_y = (img.height() / 2) as i32 + 60;
    overlay.draw_text(&mut img, &text, Point::new(text_x, text_y), TEXT_PX, WHITE);

    base.with_image(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn text_cycles_through_four_states() {
        assert_eq!(reconnecting_text(0.0), "Reconnecting");
        assert_eq!(reconnecting_text(0.5), "Reconnecting.");
        assert_eq!(reconnecting_text(1.0), "Reconnecting..");
        assert_eq!(reconnecting_text(1.5), "Reconnecting...");
        assert_eq!(reconnecting_text(2.0), "Reconnecting");
    }

    #[test]
    fn placeholder_darkens_and_keeps_size() {
        let base = Frame::new(RgbImage::from_pixel(320, 240, Rgb([200, 200, 200])));
        let out = render_placeholder(&base, 0.0, &Overlay::new());
        assert_eq!((out.width(), out.height()), (320, 240));
        assert_eq!(out.image().get_pixel(0, 0), &Rgb([80, 80, 80]));
    }

    #[test]
    fn placeholder_draws_spinner_on_black() {
        let base = Frame::blank(320, 240);
        let out = render_placeholder(&base, 0.25, &Overlay::new());
        assert!(out.image().pixels().any(|p| p.0[0] > 0));
    }

    #[test]
    fn empty_frame_passes_through() {
        let base = Frame::blank(0, 0);
        let out = render_placeholder(&base, 1.0, &Overlay::new());
        assert!(out.is_empty());
    }
}
