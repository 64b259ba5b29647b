//! Per-frame detection loop.
//!
//! One `step` pulls a frame from the source and, for analysed frames:
//! counts detections per ROI, composes the display frame, runs the alert
//! gate, records the total, and publishes the result to the sink. Per-frame
//! failures are logged and the loop continues; only construction can fail
//! fatally.

mod supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use image::Rgb;

use crate::alert::{AlertDispatcher, AlertTicket};
use crate::config::SentinelConfig;
use crate::detect::{Detector, FrameCounts};
use crate::frame::{Frame, FrameSink};
use crate::geometry::{extract_region, Point};
use crate::ingest::{FrameSource, SourceFrame};
use crate::overlay::{self, Overlay};
use crate::roi::{render, RoiRegistry, SharedRegistry};
use crate::store::{CountStore, MetadataStore};

pub use supervisor::{run_with_restart, sleep_unless_stopped, DEFAULT_RESTART_DELAY};

const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MARKER_RADIUS: i32 = 6;
const MARKER_ALPHA: f32 = 0.5;

pub const DEFAULT_PLACEHOLDER_INTERVAL: Duration = Duration::from_millis(100);

/// Where the loop is after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// The source has no more frames.
    Exhausted,
    /// The stop flag was raised.
    Stopped,
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub cam_id: String,
    /// Analyse every n-th decoded frame.
    pub skip_frames: u32,
    pub conf: f32,
    pub iou: f32,
    pub hide_markers: bool,
    pub metadata_interval: Duration,
    pub placeholder_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cam_id: "1".to_string(),
            skip_frames: 1,
            conf: 0.25,
            iou: 0.45,
            hide_markers: false,
            metadata_interval: Duration::from_secs(1),
            placeholder_interval: DEFAULT_PLACEHOLDER_INTERVAL,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &SentinelConfig) -> Self {
        Self {
            cam_id: cfg.cam_id.clone(),
            skip_frames: cfg.skip_frames.max(1),
            conf: cfg.detector.conf,
            iou: cfg.detector.iou,
            hide_markers: cfg.display.hide_markers,
            metadata_interval: cfg.alerts.metadata_interval,
            placeholder_interval: DEFAULT_PLACEHOLDER_INTERVAL,
        }
    }
}

/// Stores and alerting the loop reports to.
pub struct Collaborators {
    pub counts: Arc<dyn CountStore>,
    pub metadata: Arc<dyn MetadataStore>,
    /// Shared so the cooldown survives pipeline restarts.
    pub alerts: Arc<AlertDispatcher>,
}

/// Outcome of one analysed frame.
#[derive(Debug)]
pub struct FrameReport {
    pub frame_index: u64,
    pub counts: FrameCounts,
    /// Detection centres (frame coordinates) that fell inside their ROI.
    pub centers: Vec<Point>,
    pub alert_fired: bool,
    pub elapsed: Duration,
}

pub struct Orchestrator<S, D, K> {
    source: S,
    detector: D,
    sink: K,
    registry: SharedRegistry,
    overlay: Overlay,
    settings: PipelineSettings,
    collaborators: Collaborators,
    stop: Arc<AtomicBool>,
    decoded: u64,
    last_heartbeat: Option<Instant>,
    in_flight: Vec<AlertTicket>,
}

impl<S: FrameSource, D: Detector, K: FrameSink> Orchestrator<S, D, K> {
    pub fn new(
        source: S,
        detector: D,
        sink: K,
        registry: SharedRegistry,
        overlay: Overlay,
        settings: PipelineSettings,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            source,
            detector,
            sink,
            registry,
            overlay,
            settings,
            collaborators,
            stop: Arc::new(AtomicBool::new(false)),
            decoded: 0,
            last_heartbeat: None,
            in_flight: Vec::new(),
        }
    }

    /// Share an externally owned stop flag (e.g. set from a signal handler).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run until the source is exhausted or the stop flag is raised.
    pub fn run(&mut self) -> LoopState {
        log::info!("starting detection loop for camera {}", self.settings.cam_id);
        let state = loop {
            match self.step() {
                LoopState::Running => continue,
                other => break other,
            }
        };
        self.source.stop();
        match state {
            LoopState::Exhausted => log::info!("source exhausted; detection loop finished"),
            _ => log::info!("detection loop stopped"),
        }
        state
    }

    /// Pull and handle one frame.
    pub fn step(&mut self) -> LoopState {
        if self.stop.load(Ordering::SeqCst) {
            return LoopState::Stopped;
        }
        match self.source.next_frame() {
            Ok(SourceFrame::Exhausted) => LoopState::Exhausted,
            Ok(SourceFrame::Pending) => LoopState::Running,
            Ok(SourceFrame::Placeholder(frame)) => {
                self.sink.accept(frame);
                sleep_unless_stopped(self.settings.placeholder_interval, &self.stop);
                LoopState::Running
            }
            Ok(SourceFrame::Live(frame)) => {
                self.decoded += 1;
                if self.decoded % u64::from(self.settings.skip_frames.max(1)) != 0 {
                    return LoopState::Running;
                }
                if let Err(e) = self.process_frame(frame, Instant::now()) {
                    log::error!("error processing frame {}: {:#}", self.decoded, e);
                }
                LoopState::Running
            }
            Err(e) => {
                log::error!("frame source error: {:#}", e);
                sleep_unless_stopped(self.settings.placeholder_interval, &self.stop);
                LoopState::Running
            }
        }
    }

    /// Analyse one frame as if it arrived at `now`.
    pub fn process_frame(&mut self, frame: Frame, now: Instant) -> Result<FrameReport> {
        let started = Instant::now();
        let registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let (roi_counts, centers) = self.count_rois(&frame, &registry);
        let counts = FrameCounts::classify(roi_counts, &registry.thresholds());

        let display = self.compose(&frame, &registry, &counts, &centers);

        let alert_fired = match self.collaborators.alerts.evaluate(&counts, &display, now) {
            Some(ticket) => {
                self.in_flight.retain(|t| !t.is_finished());
                self.in_flight.push(ticket);
                true
            }
            None => false,
        };

        self.record(&counts, now)?;
        self.sink.accept(display);

        let elapsed = started.elapsed();
        let statuses: Vec<&str> = counts.statuses.iter().map(|s| s.as_str()).collect();
        log::info!(
            "frame {} ({:.1}ms) total={} threshold={} counts={:?} status={:?}",
            self.decoded,
            elapsed.as_secs_f64() * 1000.0,
            counts.total,
            counts.total_threshold,
            counts.roi_counts,
            statuses
        );

        Ok(FrameReport {
            frame_index: self.decoded,
            counts,
            centers,
            alert_fired,
            elapsed,
        })
    }

    /// Block until the background work of every fired alert is done, then
    /// hand back the sink.
    pub fn finish(self) -> K {
        for ticket in self.in_flight {
            ticket.wait();
        }
        self.sink
    }

    fn count_rois(&mut self, frame: &Frame, registry: &RoiRegistry) -> (Vec<u32>, Vec<Point>) {
        let mut counts = Vec::with_capacity(registry.len());
        let mut centers = Vec::new();
        for (idx, roi) in registry.rois().iter().enumerate() {
            let Some(region) = extract_region(frame, &roi.polygon) else {
                counts.push(0);
                continue;
            };
            let boxes = match self
                .detector
                .infer(&region.image, self.settings.conf, self.settings.iou)
            {
                Ok(boxes) => boxes,
                Err(e) => {
                    log::warn!("detector failed on ROI #{}: {:#}", idx + 1, e);
                    Vec::new()
                }
            };
            let mut count = 0;
            for b in boxes {
                let (cx, cy) = b.center();
                let center = Point::from_f32(cx, cy).offset_by(region.offset);
                if roi.contains(center) {
                    count += 1;
                    centers.push(center);
                }
            }
            counts.push(count);
        }
        (counts, centers)
    }

    /// Markers, then ROI overlay, then info panel, then watermark.
    fn compose(
        &self,
        frame: &Frame,
        registry: &RoiRegistry,
        counts: &FrameCounts,
        centers: &[Point],
    ) -> Frame {
        let mut img = frame.image().clone();
        if !self.settings.hide_markers && !centers.is_empty() {
            let mut marked = img.clone();
            for &c in centers {
                overlay::draw_dot(&mut marked, c, MARKER_RADIUS, MARKER_COLOR);
            }
            for (dst, src) in img.pixels_mut().zip(marked.pixels()) {
                overlay::blend_pixel(dst, *src, MARKER_ALPHA);
            }
        }

        let wall = Local::now();
        let t = wall.timestamp_millis() as f64 / 1000.0;
        render::render_regions(&mut img, registry, &counts.roi_counts, t, &self.overlay);
        render::draw_info_panel(
            &mut img,
            &wall.format("%H:%M:%S").to_string(),
            counts.total,
            &self.overlay,
        );
        self.overlay.apply_watermark(&mut img);
        frame.with_image(img)
    }

    fn record(&mut self, counts: &FrameCounts, now: Instant) -> Result<()> {
        let ts = crate::now_s()?;
        let cam_id = self.settings.cam_id.as_str();
        if let Err(e) = self.collaborators.counts.record_count(cam_id, counts.total, ts) {
            log::warn!("failed to record crowd count for {}: {:#}", cam_id, e);
        }

        let due = match self.last_heartbeat {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) > self.settings.metadata_interval,
        };
        if due {
            if let Err(e) = self
                .collaborators
                .metadata
                .upsert_heartbeat(cam_id, counts.total, ts)
            {
                log::warn!("failed to update heartbeat for {}: {:#}", cam_id, e);
            }
            self.last_heartbeat = Some(now);
        }
        Ok(())
    }
}
