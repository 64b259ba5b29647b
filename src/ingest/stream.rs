//! Resilient live stream source.
//!
//! A reader thread supervises one decoder process at a time:
//! - every (re)launch marks the stream as reconnecting,
//! - a pump thread turns the decoder pipe into whole frames on a bounded channel,
//! - no whole frame within the stall timeout kills the decoder,
//! - after any exit the reader waits out the backoff and relaunches.
//!
//! `read()` only takes a short lock. During outages it synthesizes a
//! placeholder from the last good frame instead of blocking.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::decoder::{read_exact_frame, DecodeRequest, DecoderProcess, DecoderSpawner};
use super::placeholder::render_placeholder;
use super::{FrameSource, SourceFrame};
use crate::frame::{rgb_frame_len, Frame};
use crate::overlay::Overlay;

/// Configuration for a resilient stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// RTSP/RTMP/HTTP URL or webcam index.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// No whole frame for longer than this restarts the decoder.
    pub stall_timeout: Duration,
    /// Pause between decoder exit and relaunch.
    pub backoff: Duration,
    /// Granularity of the stall and stop checks.
    pub poll_interval: Duration,
    /// How long `next_frame` waits for a fresh frame before reporting `Pending`.
    pub frame_wait: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: "rtsp://localhost:554/stream".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            stall_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            frame_wait: Duration::from_millis(200),
        }
    }
}

/// Statistics for a resilient stream.
#[derive(Clone, Debug)]
pub struct StreamStats {
    pub frames_decoded: u64,
    pub launches: u64,
    pub reconnecting: bool,
    pub source: String,
}

struct HealthState {
    reconnecting: bool,
    last_frame: Option<Frame>,
    last_frame_at: Option<Instant>,
    sequence: u64,
    frames_decoded: u64,
    launches: u64,
}

impl HealthState {
    fn is_live(&self, stall_timeout: Duration) -> bool {
        !self.reconnecting
            && self.last_frame.is_some()
            && self
                .last_frame_at
                .is_some_and(|at| at.elapsed() <= stall_timeout)
    }
}

struct StreamShared {
    state: Mutex<HealthState>,
    changed: Condvar,
    running: AtomicBool,
}

impl StreamShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(HealthState {
                reconnecting: true,
                last_frame: None,
                last_frame_at: None,
                sequence: 0,
                frames_decoded: 0,
                launches: 0,
            }),
            changed: Condvar::new(),
            running: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        state.last_frame = Some(frame);
        state.last_frame_at = Some(Instant::now());
        state.reconnecting = false;
        state.sequence = state.sequence.wrapping_add(1);
        state.frames_decoded += 1;
        drop(state);
        self.changed.notify_all();
    }

    fn mark_reconnecting(&self) {
        self.lock().reconnecting = true;
        self.changed.notify_all();
    }

    fn note_launch(&self) {
        self.lock().launches += 1;
    }

    fn set_running(&self, running: bool) {
        let guard = self.lock();
        self.running.store(running, Ordering::SeqCst);
        drop(guard);
        self.changed.notify_all();
    }

    /// Sleep for `duration` unless stopped first.
    fn wait_unless_stopped(&self, duration: Duration) {
        let guard = self.lock();
        let _ = self
            .changed
            .wait_timeout_while(guard, duration, |_| self.is_running())
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Live stream source backed by a supervised decoder process.
pub struct ResilientStream {
    config: StreamConfig,
    spawner: Arc<dyn DecoderSpawner>,
    shared: Arc<StreamShared>,
    overlay: Overlay,
    reader: Option<JoinHandle<()>>,
    started_at: Instant,
    seen: u64,
}

impl ResilientStream {
    pub fn new(config: StreamConfig, spawner: Arc<dyn DecoderSpawner>) -> Self {
        Self {
            config,
            spawner,
            shared: Arc::new(StreamShared::new()),
            overlay: Overlay::new(),
            reader: None,
            started_at: Instant::now(),
            seen: 0,
        }
    }

    /// Font used for the reconnecting text.
    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Launch the reader thread. No-op when already running.
    pub fn start(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        rgb_frame_len(self.config.width, self.config.height)?;
        self.shared.set_running(true);
        let shared = Arc::clone(&self.shared);
        let spawner = Arc::clone(&self.spawner);
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("stream-reader".to_string())
            .spawn(move || reader_loop(&shared, spawner.as_ref(), &config))
            .context("spawn stream reader thread")?;
        self.reader = Some(handle);
        log::info!("stream reader started for {}", self.config.source);
        Ok(())
    }

    /// Stop the reader and terminate the decoder. Idempotent.
    pub fn stop(&mut self) {
        self.shared.set_running(false);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                log::error!("stream reader thread panicked");
            }
            log::info!("stream reader stopped for {}", self.config.source);
        }
    }

    /// Latest frame, or an animated placeholder with `false` during outages.
    pub fn read(&self) -> (bool, Frame) {
        let (live, last) = {
            let state = self.shared.lock();
            (
                state.is_live(self.config.stall_timeout),
                state.last_frame.clone(),
            )
        };
        match last {
            Some(frame) if live => (true, frame),
            last => {
                let base =
                    last.unwrap_or_else(|| Frame::blank(self.config.width, self.config.height));
                let t = self.started_at.elapsed().as_secs_f32();
                (false, render_placeholder(&base, t, &self.overlay))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.shared.lock().is_live(self.config.stall_timeout)
    }

    pub fn stats(&self) -> StreamStats {
        let state = self.shared.lock();
        StreamStats {
            frames_decoded: state.frames_decoded,
            launches: state.launches,
            reconnecting: state.reconnecting,
            source: self.config.source.clone(),
        }
    }
}

impl FrameSource for ResilientStream {
    fn next_frame(&mut self) -> Result<SourceFrame> {
        let seen = self.seen;
        let stall_timeout = self.config.stall_timeout;
        let shared = Arc::clone(&self.shared);
        let state = shared.lock();
        let (state, _) = shared
            .changed
            .wait_timeout_while(state, self.config.frame_wait, |s| {
                s.sequence == seen && !s.reconnecting && shared.is_running()
            })
            .unwrap_or_else(PoisonError::into_inner);

        let live = state.is_live(stall_timeout);
        if live && state.sequence != seen {
            if let Some(frame) = state.last_frame.clone() {
                self.seen = state.sequence;
                return Ok(SourceFrame::Live(frame));
            }
        }
        drop(state);
        if live {
            return Ok(SourceFrame::Pending);
        }
        let (_, placeholder) = self.read();
        Ok(SourceFrame::Placeholder(placeholder))
    }

    fn stop(&mut self) {
        ResilientStream::stop(self);
    }
}

impl Drop for ResilientStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Reader thread
// ----------------------------------------------------------------------------

fn reader_loop(shared: &StreamShared, spawner: &dyn DecoderSpawner, config: &StreamConfig) {
    let request = DecodeRequest {
        source: config.source.clone(),
        width: config.width,
        height: config.height,
        fps: Some(config.fps),
    };
    while shared.is_running() {
        shared.mark_reconnecting();
        match spawner.spawn(&request) {
            Ok(mut process) => {
                shared.note_launch();
                supervise(shared, process.as_mut(), config);
                process.terminate();
            }
            Err(e) => log::error!("failed to launch decoder for {}: {:#}", config.source, e),
        }
        shared.mark_reconnecting();
        if !shared.is_running() {
            break;
        }
        log::info!(
            "waiting {:?} before reconnecting to {}",
            config.backoff,
            config.source
        );
        shared.wait_unless_stopped(config.backoff);
    }
}

/// Feed frames from one decoder process until it exits, stalls, or we stop.
fn supervise(shared: &StreamShared, process: &mut dyn DecoderProcess, config: &StreamConfig) {
    let Some(stdout) = process.take_stdout() else {
        log::error!("decoder for {} has no stdout pipe", config.source);
        return;
    };
    let frame_len = match rgb_frame_len(config.width, config.height) {
        Ok(len) => len,
        Err(e) => {
            log::error!("invalid stream geometry: {:#}", e);
            return;
        }
    };

    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(1);
    let pump = std::thread::spawn(move || pump_frames(stdout, frame_len, tx));

    let mut last_frame_at = Instant::now();
    while shared.is_running() {
        match rx.recv_timeout(config.poll_interval) {
            Ok(pixels) => match Frame::from_rgb(pixels, config.width, config.height) {
                Ok(frame) => {
                    shared.publish(frame);
                    last_frame_at = Instant::now();
                }
                Err(e) => log::warn!("dropping malformed frame: {:#}", e),
            },
            Err(RecvTimeoutError::Timeout) => {
                if last_frame_at.elapsed() > config.stall_timeout {
                    log::warn!(
                        "stream {} stalled (>{:?} without a frame), restarting decoder",
                        config.source,
                        config.stall_timeout
                    );
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("decoder for {} ended", config.source);
                break;
            }
        }
    }

    process.terminate();
    drop(rx);
    if pump.join().is_err() {
        log::error!("decoder pump thread panicked");
    }
}

fn pump_frames(mut stdout: Box<dyn std::io::Read + Send>, frame_len: usize, tx: SyncSender<Vec<u8>>) {
    loop {
        let mut pixels = vec![0u8; frame_len];
        match read_exact_frame(stdout.as_mut(), &mut pixels) {
            Ok(true) => {
                if tx.send(pixels).is_err() {
                    return;
                }
            }
            Ok(false) => return,
            Err(e) => {
                log::warn!("decoder pipe: {:#}", e);
                return;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
