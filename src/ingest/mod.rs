//! Frame ingestion sources.
//!
//! This module provides the two source families the orchestrator consumes:
//! - Live sources (RTSP/RTMP/HTTP URLs, webcam index) through `ResilientStream`
//! - Local video files (and `stub://` synthetic frames) through `FileSource`
//!
//! Both decode through a `DecoderSpawner` so the subprocess can be scripted in
//! tests. Sources never block the caller for long: live streams hand out a
//! placeholder during outages, file sources report `Exhausted` at the end.

pub mod decoder;
pub mod file;
pub mod placeholder;
pub mod stream;

use anyhow::Result;
use std::sync::Arc;
use url::Url;

use crate::frame::Frame;
use crate::overlay::Overlay;

pub use decoder::{DecodeRequest, DecoderProcess, DecoderSpawner, FfmpegSpawner};
pub use file::{FileConfig, FileSource, FileStats};
pub use stream::{ResilientStream, StreamConfig, StreamStats};

/// One pull from a source.
#[derive(Debug)]
pub enum SourceFrame {
    /// A freshly decoded frame.
    Live(Frame),
    /// Synthesized outage frame. Display only, never analysed.
    Placeholder(Frame),
    /// Nothing new yet; ask again.
    Pending,
    /// The source has no more frames.
    Exhausted,
}

/// Uniform "next frame" over live and file sources.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<SourceFrame>;

    /// Release the decoder. Idempotent.
    fn stop(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<SourceFrame> {
        (**self).next_frame()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Network streams and webcam indices are live; everything else is a file.
pub fn is_live_source(source: &str) -> bool {
    let source = source.trim();
    if !source.is_empty() && source.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    match Url::parse(source) {
        Ok(url) => matches!(url.scheme(), "rtsp" | "rtmp" | "http" | "https"),
        Err(_) => false,
    }
}

/// Either source family behind one type.
pub enum VideoSource {
    Stream(ResilientStream),
    File(FileSource),
}

impl VideoSource {
    /// Build and start the source for `stream.source`.
    ///
    /// Live sources start their reader thread here. File sources are checked
    /// for existence. Both failures are initialization errors.
    pub fn open(
        stream: &StreamConfig,
        spawner: Arc<dyn DecoderSpawner>,
        overlay: Overlay,
    ) -> Result<Self> {
        if is_live_source(&stream.source) {
            let mut source = ResilientStream::new(stream.clone(), spawner).with_overlay(overlay);
            source.start()?;
            Ok(Self::Stream(source))
        } else {
            let config = FileConfig {
                path: stream.source.clone(),
                width: stream.width,
                height: stream.height,
            };
            Ok(Self::File(FileSource::new(config, spawner)?))
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<SourceFrame> {
        match self {
            Self::Stream(source) => source.next_frame(),
            Self::File(source) => source.next_frame(),
        }
    }

    fn stop(&mut self) {
        match self {
            Self::Stream(source) => FrameSource::stop(source),
            Self::File(source) => source.stop(),
        }
    }
}
