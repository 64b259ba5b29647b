//! Frame containers shared by the ingest, detection, and display paths.
//!
//! - `Frame`: owned RGB24 image plus capture instant. Cheap to move, cloned on read.
//! - `FrameSlot`: single-slot "latest frame" buffer. Writers replace, readers copy.
//! - `FrameSink`: capability the orchestrator pushes composed frames into.
//! - `PreviewWriter`: display consumer that mirrors a slot to a JPEG file.
//!
//! Slots never queue. A consumer that falls behind only ever sees the most
//! recent frame.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// JPEG quality used for evidence and preview images.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Owned RGB24 frame.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// All-black canvas.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb([0, 0, 0])))
    }

    /// Wrap a packed RGB24 buffer (as emitted by the decoder pipe).
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_frame_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Time since the frame was decoded.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Same capture instant, different pixels. Used when layering overlays.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            image,
            captured_at: self.captured_at,
        }
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(anyhow!("cannot encode an empty frame"));
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&self.image)
            .context("encode frame as JPEG")?;
        Ok(out)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("age", &self.age())
            .finish()
    }
}

/// Byte length of a packed RGB24 frame.
pub fn rgb_frame_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// FrameSlot / FrameSink
// ----------------------------------------------------------------------------

/// Capability that receives every frame the orchestrator emits.
pub trait FrameSink {
    fn accept(&mut self, frame: Frame);
}

/// Collecting sink, mostly useful in tests.
impl FrameSink for Vec<Frame> {
    fn accept(&mut self, frame: Frame) {
        self.push(frame);
    }
}

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    sequence: u64,
}

/// Single-writer, multi-reader latest-frame slot.
///
/// Cloning the slot clones the handle, not the frame.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.frame = Some(frame);
        state.sequence = state.sequence.wrapping_add(1);
    }

    /// Copy of the current frame, if any was ever published.
    pub fn latest(&self) -> Option<Frame> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.frame.clone()
    }

    /// Copy of the current frame only if it changed after `sequence`.
    pub fn latest_since(&self, sequence: u64) -> Option<(u64, Frame)> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.sequence == sequence {
            return None;
        }
        state.frame.clone().map(|frame| (state.sequence, frame))
    }

    pub fn sequence(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sequence
    }
}

impl FrameSink for FrameSlot {
    fn accept(&mut self, frame: Frame) {
        self.publish(frame);
    }
}

// ----------------------------------------------------------------------------
// PreviewWriter
// ----------------------------------------------------------------------------

/// Paced display consumer: re-encodes the latest slot frame to a JPEG file.
pub struct PreviewWriter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PreviewWriter {
    pub fn spawn(slot: FrameSlot, path: PathBuf, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut seen = 0u64;
            while !stop_flag.load(Ordering::SeqCst) {
                if let Some((sequence, frame)) = slot.latest_since(seen) {
                    seen = sequence;
                    if let Err(e) = write_preview(&path, &frame) {
                        log::warn!("preview write to {} failed: {:#}", path.display(), e);
                    }
                }
                std::thread::sleep(interval);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PreviewWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_preview(path: &Path, frame: &Frame) -> Result<()> {
    let bytes = frame.encode_jpeg(DEFAULT_JPEG_QUALITY)?;
    crate::evidence::write_atomic(path, &bytes)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2).is_ok());
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2).is_err());
    }

    #[test]
    fn slot_returns_latest_copy() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(Frame::blank(4, 4));
        let mut bright = Frame::blank(4, 4);
        bright.image_mut().put_pixel(0, 0, Rgb([255, 255, 255]));
        slot.publish(bright);

        let latest = slot.latest().expect("frame published");
        assert_eq!(latest.image().get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(slot.sequence(), 2);
    }

    #[test]
    fn latest_since_skips_unchanged_frames() {
        let slot = FrameSlot::new();
        slot.publish(Frame::blank(2, 2));
        let (seq, _) = slot.latest_since(0).expect("new frame");
        assert!(slot.latest_since(seq).is_none());
        slot.publish(Frame::blank(2, 2));
        assert!(slot.latest_since(seq).is_some());
    }

    #[test]
    fn slot_sink_overwrites() {
        let mut slot = FrameSlot::new();
        slot.accept(Frame::blank(2, 2));
        slot.accept(Frame::blank(3, 3));
        assert_eq!(slot.latest().map(|f| f.width()), Some(3));
    }

    #[test]
    fn encode_jpeg_produces_jpeg_magic() -> Result<()> {
        let bytes = Frame::blank(8, 8).encode_jpeg(DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
