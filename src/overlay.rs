//! Raster drawing primitives shared by the ROI renderer, the reconnect
//! placeholder, and the orchestrator's info panel.
//!
//! Everything here draws in place on an `RgbImage` and clips silently at the
//! frame edge, so callers never need to pre-check geometry against the frame.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut, text_size};
use std::path::Path;

use crate::geometry::{clamped_bounds, for_each_pixel_inside, Point, Rect};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

pub const DEFAULT_LOGO_PATH: &str = "logo.jpeg";
/// DejaVu Sans, used when no font is configured or the configured one fails.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
const WATERMARK_SIZE: (u32, u32) = (250, 100);
const WATERMARK_MARGIN: u32 = 20;
const OPAQUE_WATERMARK_ALPHA: f32 = 0.8;

// ----------------------------------------------------------------------------
// Overlay assets
// ----------------------------------------------------------------------------

/// Font and optional watermark. `Overlay::new` carries neither; `load` always
/// ends up with a font, falling back to the bundled one.
#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<FontArc>,
    watermark: Option<Watermark>,
}

#[derive(Clone)]
struct Watermark {
    image: RgbaImage,
    has_alpha: bool,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load whichever assets exist. Failures are logged once, here.
    pub fn load(font_path: Option<&Path>, watermark_path: Option<&Path>) -> Self {
        let mut overlay = Self::new();
        let configured = font_path.and_then(|path| match load_font(path) {
            Ok(font) => {
                log::info!("overlay font loaded from {}", path.display());
                Some(font)
            }
            Err(e) => {
                log::warn!("overlay font unavailable, using bundled font: {:#}", e);
                None
            }
        });
        match configured.map_or_else(bundled_font, Ok) {
            Ok(font) => overlay = overlay.with_font(font),
            Err(e) => log::error!("no overlay font, text will not be drawn: {:#}", e),
        }
        if let Some(path) = watermark_path {
            if path.exists() {
                match image::open(path) {
                    Ok(logo) => {
                        log::info!("logo loaded from {}", path.display());
                        overlay = overlay.with_watermark(&logo);
                    }
                    Err(e) => log::error!("error loading logo {}: {}", path.display(), e),
                }
            } else {
                log::info!("logo file not found at {}", path.display());
            }
        }
        overlay
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_watermark(mut self, logo: &image::DynamicImage) -> Self {
        let has_alpha = logo.color().has_alpha();
        let image = image::imageops::resize(
            &logo.to_rgba8(),
            WATERMARK_SIZE.0,
            WATERMARK_SIZE.1,
            FilterType::Triangle,
        );
        self.watermark = Some(Watermark { image, has_alpha });
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn has_watermark(&self) -> bool {
        self.watermark.is_some()
    }

    /// Draw `text` with its baseline at `baseline`. No-op without a font.
    pub fn draw_text(&self, img: &mut RgbImage, text: &str, baseline: Point, px: f32, color: Rgb<u8>) {
        let Some(font) = self.font.as_ref() else {
            return;
        };
        let top = baseline.y - (px * 0.75) as i32;
        draw_text_mut(img, color, baseline.x, top, PxScale::from(px), font, text);
    }

    /// Rendered `(width, height)` of `text`, if a font is loaded.
    pub fn text_size(&self, text: &str, px: f32) -> Option<(u32, u32)> {
        self.font
            .as_ref()
            .map(|font| text_size(PxScale::from(px), font, text))
    }

    /// Composite the watermark at the bottom-right corner.
    ///
    /// Skipped when the frame is too small to hold it with the margin.
    pub fn apply_watermark(&self, img: &mut RgbImage) {
        let Some(mark) = self.watermark.as_ref() else {
            return;
        };
        let (logo_w, logo_h) = mark.image.dimensions();
        let (img_w, img_h) = img.dimensions();
        if img_w < logo_w + WATERMARK_MARGIN || img_h < logo_h + WATERMARK_MARGIN {
            return;
        }
        let x0 = img_w - logo_w - WATERMARK_MARGIN;
        let y0 = img_h - logo_h - WATERMARK_MARGIN;
        for (x, y, px) in mark.image.enumerate_pixels() {
            let Rgba([r, g, b, a]) = *px;
            let alpha = if mark.has_alpha {
                a as f32 / 255.0
            } else {
                OPAQUE_WATERMARK_ALPHA
            };
            blend_pixel(img.get_pixel_mut(x0 + x, y0 + y), Rgb([r, g, b]), alpha);
        }
    }
}

pub fn bundled_font() -> Result<FontArc> {
    FontArc::try_from_slice(BUNDLED_FONT).map_err(|e| anyhow!("invalid bundled font: {}", e))
}

fn load_font(path: &Path) -> Result<FontArc> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))
}

// ----------------------------------------------------------------------------
// Primitives
// ----------------------------------------------------------------------------

/// `dst = (1 - alpha) * dst + alpha * src`.
pub fn blend_pixel(dst: &mut Rgb<u8>, src: Rgb<u8>, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for c in 0..3 {
        let mixed = dst.0[c] as f32 * (1.0 - alpha) + src.0[c] as f32 * alpha;
        dst.0[c] = mixed.round().clamp(0.0, 255.0) as u8;
    }
}

/// Blend `color` over every pixel inside `polygon`.
pub fn fill_polygon_blend(img: &mut RgbImage, polygon: &[Point], color: Rgb<u8>, alpha: f32) {
    let Some(bounds) = clamped_bounds(polygon, img.width(), img.height()) else {
        return;
    };
    for_each_pixel_inside(polygon, bounds, |x, y| {
        blend_pixel(img.get_pixel_mut(x, y), color, alpha);
    });
}

/// Blend black over `rect` (clipped to the image).
pub fn shade_rect(img: &mut RgbImage, rect: Rect, alpha: f32) {
    let right = rect.right().min(img.width());
    let bottom = rect.bottom().min(img.height());
    for y in rect.y.min(bottom)..bottom {
        for x in rect.x.min(right)..right {
            blend_pixel(img.get_pixel_mut(x, y), BLACK, alpha);
        }
    }
}

/// Blend black over the whole image.
pub fn shade_all(img: &mut RgbImage, alpha: f32) {
    for px in img.pixels_mut() {
        blend_pixel(px, BLACK, alpha);
    }
}

pub fn draw_dot(img: &mut RgbImage, center: Point, radius: i32, color: Rgb<u8>) {
    draw_filled_circle_mut(img, (center.x, center.y), radius, color);
}

/// Line segment with a pixel thickness, built from parallel one-pixel lines.
pub fn draw_thick_line(img: &mut RgbImage, from: Point, to: Point, color: Rgb<u8>, thickness: u32) {
    let (fx, fy) = (from.x as f32, from.y as f32);
    let (tx, ty) = (to.x as f32, to.y as f32);
    let (dx, dy) = (tx - fx, ty - fy);
    let len = (dx * dx + dy * dy).sqrt();
    if thickness <= 1 || len == 0.0 {
        draw_line_segment_mut(img, (fx, fy), (tx, ty), color);
        return;
    }
    let (nx, ny) = (-dy / len, dx / len);
    let half = (thickness as f32 - 1.0) / 2.0;
    let mut offset = -half;
    while offset <= half + f32::EPSILON {
        let (ox, oy) = (nx * offset, ny * offset);
        draw_line_segment_mut(img, (fx + ox, fy + oy), (tx + ox, ty + oy), color);
        offset += 0.5;
    }
}

/// Connected segments through `points`, closing back to the start when `closed`.
pub fn draw_polyline(img: &mut RgbImage, points: &[Point], closed: bool, color: Rgb<u8>, thickness: u32) {
    for pair in points.windows(2) {
        draw_thick_line(img, pair[0], pair[1], color, thickness);
    }
    if closed && points.len() > 2 {
        if let (Some(&last), Some(&first)) = (points.last(), points.first()) {
            draw_thick_line(img, last, first, color, thickness);
        }
    }
}

/// Rectangle outline of the given thickness, drawn inward from `rect`.
pub fn draw_border(img: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    let right = rect.right().min(img.width());
    let bottom = rect.bottom().min(img.height());
    for y in rect.y.min(bottom)..bottom {
        for x in rect.x.min(right)..right {
            let edge = x < rect.x + thickness
                || y < rect.y + thickness
                || x + thickness >= rect.right()
                || y + thickness >= rect.bottom();
            if edge {
                img.put_pixel(x, y, color);
            }
        }
    }
}
