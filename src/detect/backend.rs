use anyhow::Result;
use image::RgbImage;

use crate::detect::result::BoundingBox;

/// Object detector.
///
/// `infer` returns person boxes in the pixel space of `image`, already
/// filtered by `confidence` and suppressed at `iou`. Implementations must not
/// retain the image beyond the call.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one (masked) ROI crop.
    fn infer(&mut self, image: &RgbImage, confidence: f32, iou: f32) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, image: &RgbImage, confidence: f32, iou: f32) -> Result<Vec<BoundingBox>> {
        (**self).infer(image, confidence, iou)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
