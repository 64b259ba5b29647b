//! Decoder subprocess management.
//!
//! The stream and file sources never talk to `ffmpeg` directly. They ask a
//! `DecoderSpawner` for a `DecoderProcess` whose stdout carries packed RGB24
//! frames of a fixed size. Tests substitute a scripted spawner.

use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// What to decode and in which output geometry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeRequest {
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Output rate. `None` keeps the input's native rate.
    pub fps: Option<u32>,
}

/// A running decoder.
pub trait DecoderProcess: Send {
    /// Raw frame pipe. Returns `None` after the first call.
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Kill and reap the decoder. Idempotent.
    fn terminate(&mut self);
}

/// Factory for decoder processes.
pub trait DecoderSpawner: Send + Sync {
    fn spawn(&self, request: &DecodeRequest) -> Result<Box<dyn DecoderProcess>>;
}

// ----------------------------------------------------------------------------
// ffmpeg
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FfmpegSpawner {
    ffmpeg_path: PathBuf,
}

impl FfmpegSpawner {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_PATH)
    }
}

impl DecoderSpawner for FfmpegSpawner {
    fn spawn(&self, request: &DecodeRequest) -> Result<Box<dyn DecoderProcess>> {
        let args = ffmpeg_args(request);
        log::info!("starting ffmpeg for {}", request.source);
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.ffmpeg_path.display()))?;

        let stderr_logger = child.stderr.take().map(|stderr| {
            let source = request.source.clone();
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    log::warn!("ffmpeg [{}]: {}", source, line);
                }
            })
        });

        Ok(Box::new(FfmpegProcess {
            child,
            stderr_logger,
            reaped: false,
        }))
    }
}

/// Command line for a raw RGB24 pipe at the requested geometry.
pub fn ffmpeg_args(request: &DecodeRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    if request.source.starts_with("rtsp://") {
        args.extend(["-rtsp_transport".into(), "tcp".into()]);
    }
    match request.source.trim().parse::<u32>() {
        Ok(index) => {
            args.extend(["-f".into(), "v4l2".into()]);
            args.extend(["-i".into(), format!("/dev/video{}", index)]);
        }
        Err(_) => args.extend(["-i".into(), request.source.clone()]),
    }
    args.extend([
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", request.width, request.height),
    ]);
    if let Some(fps) = request.fps {
        args.extend(["-r".into(), fps.to_string()]);
    }
    args.push("-".into());
    args
}

struct FfmpegProcess {
    child: Child,
    stderr_logger: Option<JoinHandle<()>>,
    reaped: bool,
}

impl DecoderProcess for FfmpegProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as Box<dyn Read + Send>)
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        if let Err(e) = self.child.kill() {
            log::debug!("ffmpeg kill: {}", e);
        }
        match self.child.wait() {
            Ok(status) => log::info!("ffmpeg exited with {}", status),
            Err(e) => log::warn!("failed to reap ffmpeg: {}", e),
        }
        if let Some(handle) = self.stderr_logger.take() {
            if handle.join().is_err() {
                log::warn!("ffmpeg stderr logger panicked");
            }
        }
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Fill `buf` completely from `reader`, accumulating partial reads.
///
/// Returns `Ok(false)` on a clean EOF before any byte of the frame arrived.
pub fn read_exact_frame(reader: &mut dyn Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(anyhow!(
                    "decoder pipe closed mid-frame ({} of {} bytes)",
                    filled,
                    buf.len()
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read decoder pipe"),
        }
    }
    Ok(true)
}
