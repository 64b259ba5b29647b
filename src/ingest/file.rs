//! Local file frame source.
//!
//! Files are decoded sequentially through the decoder pipe at the configured
//! output geometry. When the file ends the source reports `Exhausted`.
//! `stub://` paths generate synthetic frames instead, optionally capped with a
//! `frames=N` query parameter.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use super::decoder::{read_exact_frame, DecodeRequest, DecoderProcess, DecoderSpawner};
use super::{FrameSource, SourceFrame};
use crate::frame::{rgb_frame_len, Frame};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/sentinel/clip.mp4") or `stub://...`.
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: 1280,
            height: 720,
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub exhausted: bool,
    pub path: String,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Decoded(DecodedFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig, spawner: Arc<dyn DecoderSpawner>) -> Result<Self> {
        rgb_frame_len(config.width, config.height)?;
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("file source needs a non-zero frame size"));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)?),
            });
        }
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                config.path
            ));
        }
        if !Path::new(&config.path).is_file() {
            return Err(anyhow!("video file not found: {}", config.path));
        }
        Ok(Self {
            backend: FileBackend::Decoded(DecodedFileSource::open(config, spawner)?),
        })
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            FileBackend::Decoded(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<SourceFrame> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            FileBackend::Decoded(source) => source.next_frame(),
        }
    }

    fn stop(&mut self) {
        if let FileBackend::Decoded(source) = &mut self.backend {
            source.close();
        }
    }
}

// ----------------------------------------------------------------------------
// Decoder-backed source
// ----------------------------------------------------------------------------

struct DecodedFileSource {
    config: FileConfig,
    process: Option<Box<dyn DecoderProcess>>,
    pipe: Option<Box<dyn std::io::Read + Send>>,
    frame_count: u64,
    exhausted: bool,
}

impl DecodedFileSource {
    /// Start the decoder. Failing to spawn it is an initialization error.
    fn open(config: FileConfig, spawner: Arc<dyn DecoderSpawner>) -> Result<Self> {
        let request = DecodeRequest {
            source: config.path.clone(),
            width: config.width,
            height: config.height,
            fps: None,
        };
        let mut process = spawner
            .spawn(&request)
            .with_context(|| format!("open video file {}", config.path))?;
        let Some(pipe) = process.take_stdout() else {
            process.terminate();
            return Err(anyhow!("decoder for {} has no stdout pipe", config.path));
        };
        log::info!("FileSource: decoding {}", config.path);
        Ok(Self {
            config,
            process: Some(process),
            pipe: Some(pipe),
            frame_count: 0,
            exhausted: false,
        })
    }

    fn next_frame(&mut self) -> Result<SourceFrame> {
        if self.exhausted {
            return Ok(SourceFrame::Exhausted);
        }
        let frame_len = rgb_frame_len(self.config.width, self.config.height)?;
        let mut pixels = vec![0u8; frame_len];
        let read = match self.pipe.as_mut() {
            Some(pipe) => read_exact_frame(pipe.as_mut(), &mut pixels),
            None => Ok(false),
        };
        match read {
            Ok(true) => {
                self.frame_count += 1;
                let frame = Frame::from_rgb(pixels, self.config.width, self.config.height)?;
                Ok(SourceFrame::Live(frame))
            }
            Ok(false) => {
                log::info!(
                    "FileSource: {} ended after {} frames",
                    self.config.path,
                    self.frame_count
                );
                self.close();
                Ok(SourceFrame::Exhausted)
            }
            Err(e) => {
                log::warn!("FileSource: {} ended early: {:#}", self.config.path, e);
                self.close();
                Ok(SourceFrame::Exhausted)
            }
        }
    }

    fn close(&mut self) {
        self.exhausted = true;
        self.pipe = None;
        if let Some(mut process) = self.process.take() {
            process.terminate();
        }
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            exhausted: self.exhausted,
            path: self.config.path.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for demos and tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_limit: Option<u64>,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Result<Self> {
        let url = Url::parse(&config.path)
            .with_context(|| format!("invalid stub source {}", config.path))?;
        let frame_limit = url
            .query_pairs()
            .find(|(key, _)| key == "frames")
            .map(|(_, value)| {
                value
                    .parse::<u64>()
                    .with_context(|| format!("invalid frames= value in {}", config.path))
            })
            .transpose()?;
        log::info!("FileSource: connected to {} (synthetic)", config.path);
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn next_frame(&mut self) -> SourceFrame {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return SourceFrame::Exhausted;
        }
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let (count, scene) = (self.frame_count, self.scene_state as u64);
        let image = RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let v = ((x as u64 + y as u64 + count + scene) % 256) as u8;
            image::Rgb([v, v / 2, 255 - v])
        });
        SourceFrame::Live(Frame::new(image))
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            exhausted: self.frame_limit.is_some_and(|limit| self.frame_count >= limit),
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    struct BufferSpawner {
        bytes: Vec<u8>,
    }

    struct BufferProcess {
        pipe: Option<Cursor<Vec<u8>>>,
    }

    impl DecoderProcess for BufferProcess {
        fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
            self.pipe.take().map(|c| Box::new(c) as Box<dyn Read + Send>)
        }

        fn terminate(&mut self) {}
    }

    impl DecoderSpawner for BufferSpawner {
        fn spawn(&self, _request: &DecodeRequest) -> Result<Box<dyn DecoderProcess>> {
            Ok(Box::new(BufferProcess {
                pipe: Some(Cursor::new(self.bytes.clone())),
            }))
        }
    }

    fn config(path: &str) -> FileConfig {
        FileConfig {
            path: path.to_string(),
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn stub_source_honours_frame_limit() -> Result<()> {
        let spawner = Arc::new(BufferSpawner { bytes: Vec::new() });
        let mut source = FileSource::new(config("stub://demo?frames=2"), spawner)?;
        assert!(matches!(source.next_frame()?, SourceFrame::Live(_)));
        assert!(matches!(source.next_frame()?, SourceFrame::Live(_)));
        assert!(matches!(source.next_frame()?, SourceFrame::Exhausted));
        assert!(source.stats().exhausted);
        Ok(())
    }

    #[test]
    fn decoded_file_ends_in_exhausted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video")?;
        // Two whole frames plus a truncated tail.
        let spawner = Arc::new(BufferSpawner {
            bytes: vec![9u8; 4 * 2 * 3 * 2 + 5],
        });
        let mut source = FileSource::new(config(&path.to_string_lossy()), spawner)?;
        assert!(matches!(source.next_frame()?, SourceFrame::Live(_)));
        assert!(matches!(source.next_frame()?, SourceFrame::Live(_)));
        assert!(matches!(source.next_frame()?, SourceFrame::Exhausted));
        assert!(matches!(source.next_frame()?, SourceFrame::Exhausted));
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    struct BrokenSpawner;

    impl DecoderSpawner for BrokenSpawner {
        fn spawn(&self, _request: &DecodeRequest) -> Result<Box<dyn DecoderProcess>> {
            Err(anyhow!("ffmpeg: No such file or directory"))
        }
    }

    #[test]
    fn decoder_spawn_failure_is_an_init_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video")?;
        let err = FileSource::new(config(&path.to_string_lossy()), Arc::new(BrokenSpawner))
            .err()
            .expect("spawn failure must surface from new");
        assert!(format!("{:#}", err).contains("No such file"));
        Ok(())
    }

    #[test]
    fn missing_file_is_an_init_error() {
        let spawner = Arc::new(BufferSpawner { bytes: Vec::new() });
        assert!(FileSource::new(config("/nonexistent/clip.mp4"), spawner.clone()).is_err());
        assert!(FileSource::new(config("ftp://host/clip.mp4"), spawner).is_err());
    }
}
