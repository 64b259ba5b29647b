use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::Detector;
use crate::detect::result::BoundingBox;

/// Stub detector for demos and tests.
///
/// Returns scripted boxes (in the coordinates of the crop it is handed),
/// filtered by the caller's confidence threshold.
pub struct StubDetector {
    mode: StubMode,
    calls: Arc<AtomicUsize>,
}

enum StubMode {
    /// Same boxes on every call.
    Fixed(Vec<BoundingBox>),
    /// One entry per call, then nothing.
    Scripted(VecDeque<Vec<BoundingBox>>),
    /// Every call errors.
    Failing,
}

impl StubDetector {
    /// Detector that never sees anything.
    pub fn new() -> Self {
        Self::fixed(Vec::new())
    }

    pub fn fixed(boxes: Vec<BoundingBox>) -> Self {
        Self::with_mode(StubMode::Fixed(boxes))
    }

    pub fn scripted(calls: impl IntoIterator<Item = Vec<BoundingBox>>) -> Self {
        Self::with_mode(StubMode::Scripted(calls.into_iter().collect()))
    }

    pub fn failing() -> Self {
        Self::with_mode(StubMode::Failing)
    }

    fn with_mode(mode: StubMode) -> Self {
        Self {
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, readable after the detector is moved away.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _image: &RgbImage, confidence: f32, _iou: f32) -> Result<Vec<BoundingBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let boxes = match &mut self.mode {
            StubMode::Fixed(boxes) => boxes.clone(),
            StubMode::Scripted(queue) => queue.pop_front().unwrap_or_default(),
            StubMode::Failing => return Err(anyhow!("stub detector failure")),
        };
        Ok(boxes
            .into_iter()
            .filter(|b| b.confidence >= confidence)
            .collect())
    }
}
