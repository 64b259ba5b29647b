use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crowd_sentinel::alert::{AlertDispatcher, AlertTarget, DEFAULT_ALERT_COOLDOWN};
use crowd_sentinel::detect::{BoundingBox, RoiStatus, StubDetector};
use crowd_sentinel::evidence::{EvidenceConfig, LocalEvidenceStore};
use crowd_sentinel::geometry::Point;
use crowd_sentinel::ingest::{
    DecodeRequest, DecoderProcess, DecoderSpawner, FfmpegSpawner, StreamConfig, VideoSource,
};
use crowd_sentinel::notify::{AlertNotice, Notifier};
use crowd_sentinel::overlay::Overlay;
use crowd_sentinel::pipeline::{
    run_with_restart, Collaborators, LoopState, Orchestrator, PipelineSettings,
};
use crowd_sentinel::roi::RoiRegistry;
use crowd_sentinel::store::InMemoryStore;
use crowd_sentinel::{Frame, FrameSource};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<AlertNotice>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, notice: &AlertNotice, _sender: &str, recipients: &[String]) -> Result<()> {
        if !recipients.is_empty() {
            self.sent.lock().unwrap().push(notice.clone());
        }
        Ok(())
    }
}

struct Harness {
    store: InMemoryStore,
    notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
    evidence_dir: std::path::PathBuf,
}

impl Harness {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let evidence_dir = dir.path().join("screenshots");
        Ok(Self {
            store: InMemoryStore::new(),
            notifier: Arc::new(RecordingNotifier::default()),
            _dir: dir,
            evidence_dir,
        })
    }

    fn orchestrator<S: FrameSource>(
        &self,
        source: S,
        detector: StubDetector,
        rois: &[(Vec<Point>, u32)],
    ) -> Result<Orchestrator<S, StubDetector, Vec<Frame>>> {
        let mut registry = RoiRegistry::new();
        for (polygon, threshold) in rois {
            registry.push(polygon.clone(), *threshold)?;
        }
        let alerts = AlertDispatcher::new(
            AlertTarget {
                cam_id: "1".into(),
                location: "Main Square".into(),
                sender: "sentinel@example.com".into(),
                recipients: vec!["ops@example.com".into()],
            },
            DEFAULT_ALERT_COOLDOWN,
            Arc::new(LocalEvidenceStore::new(EvidenceConfig {
                local_dir: self.evidence_dir.clone(),
                upload_endpoint: None,
            })?),
            Arc::new(self.store.clone()),
            self.notifier.clone(),
        );
        Ok(Orchestrator::new(
            source,
            detector,
            Vec::new(),
            registry.into_shared(),
            Overlay::new(),
            PipelineSettings::default(),
            Collaborators {
                counts: Arc::new(self.store.clone()),
                metadata: Arc::new(self.store.clone()),
                alerts: Arc::new(alerts),
            },
        ))
    }

    fn notices(&self) -> usize {
        self.notifier.sent.lock().unwrap().len()
    }
}

fn square(x: i32, y: i32, side: i32) -> Vec<Point> {
    vec![
        Point::new(x, y),
        Point::new(x + side, y),
        Point::new(x + side, y + side),
        Point::new(x, y + side),
    ]
}

/// Box centred on `(cx, cy)` in crop coordinates.
fn person(cx: f32, cy: f32) -> BoundingBox {
    BoundingBox::new(cx - 3.0, cy - 6.0, cx + 3.0, cy + 6.0, 0.8)
}

fn four_people() -> StubDetector {
    StubDetector::fixed(vec![
        person(20.0, 20.0),
        person(40.0, 40.0),
        person(60.0, 60.0),
        person(80.0, 80.0),
    ])
}

fn stub_source(frames: u32) -> Result<VideoSource> {
    let stream = StreamConfig {
        source: format!("stub://scenario?frames={}", frames),
        width: 160,
        height: 120,
        ..StreamConfig::default()
    };
    VideoSource::open(&stream, Arc::new(FfmpegSpawner::default()), Overlay::new())
}

fn no_source() -> Result<VideoSource> {
    stub_source(0)
}

#[test]
fn overflowing_roi_raises_exactly_one_alert() -> Result<()> {
    let harness = Harness::new()?;
    let mut orch = harness.orchestrator(no_source()?, four_people(), &[(square(10, 10, 100), 3)])?;

    let t0 = Instant::now();
    let report = orch.process_frame(Frame::blank(160, 120), t0)?;
    assert_eq!(report.counts.roi_counts, vec![4]);
    assert_eq!(report.counts.statuses, vec![RoiStatus::Overflow]);
    assert_eq!(report.counts.total, 4);
    assert_eq!(report.counts.total_threshold, 3);
    assert!(report.alert_fired);

    // Still overflowing, but inside the cooldown window.
    for secs in [1, 30, 119] {
        let report = orch.process_frame(Frame::blank(160, 120), t0 + Duration::from_secs(secs))?;
        assert_eq!(report.counts.statuses, vec![RoiStatus::Overflow]);
        assert!(!report.alert_fired);
    }

    let frames = orch.finish();
    assert_eq!(frames.len(), 4);

    let alerts = harness.store.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].count, 4);
    assert_eq!(alerts[0].threshold, 3);
    assert_eq!(alerts[0].message, "High crowd density detected at Main Square");
    assert_eq!(alerts[0].level, "critical");
    assert_eq!(harness.notices(), 1);

    let saved: Vec<_> = std::fs::read_dir(&harness.evidence_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].starts_with("alert_cam_1_") && saved[0].ends_with(".jpg"));
    Ok(())
}

#[test]
fn roi_under_threshold_stays_ok() -> Result<()> {
    let harness = Harness::new()?;
    let mut orch = harness.orchestrator(no_source()?, four_people(), &[(square(10, 10, 100), 5)])?;

    let report = orch.process_frame(Frame::blank(160, 120), Instant::now())?;
    assert_eq!(report.counts.statuses, vec![RoiStatus::Ok]);
    assert_eq!(report.counts.total, 4);
    assert_eq!(report.counts.total_threshold, 5);
    assert!(!report.alert_fired);

    orch.finish();
    assert!(harness.store.alerts().is_empty());
    assert_eq!(harness.notices(), 0);
    Ok(())
}

#[test]
fn alerting_is_gated_on_the_global_sum() -> Result<()> {
    let harness = Harness::new()?;
    let detector = StubDetector::fixed(vec![person(20.0, 20.0)]);
    let rois = [(square(10, 10, 50), 2), (square(90, 10, 50), 3)];
    let mut orch = harness.orchestrator(no_source()?, detector, &rois)?;

    let report = orch.process_frame(Frame::blank(160, 120), Instant::now())?;
    assert_eq!(report.counts.roi_counts, vec![1, 1]);
    assert_eq!(report.counts.statuses, vec![RoiStatus::Ok, RoiStatus::Ok]);
    assert_eq!(report.counts.total, 2);
    assert_eq!(report.counts.total_threshold, 5);
    assert!(!report.alert_fired);

    orch.finish();
    assert!(harness.store.alerts().is_empty());
    Ok(())
}

#[test]
fn file_source_runs_to_exhaustion() -> Result<()> {
    let harness = Harness::new()?;
    let mut orch = harness.orchestrator(stub_source(5)?, four_people(), &[(square(10, 10, 100), 3)])?;

    assert_eq!(orch.run(), LoopState::Exhausted);
    let frames = orch.finish();

    assert_eq!(frames.len(), 5);
    assert_eq!(harness.store.counts("1"), vec![4; 5]);
    assert_eq!(harness.store.alerts().len(), 1);
    assert!(harness.store.heartbeat("1").is_some());
    Ok(())
}

#[test]
fn missing_file_source_is_an_initialization_error() {
    let stream = StreamConfig {
        source: "/nonexistent/clip.mp4".to_string(),
        ..StreamConfig::default()
    };
    assert!(VideoSource::open(&stream, Arc::new(FfmpegSpawner::default()), Overlay::new()).is_err());
}

#[test]
fn empty_registry_counts_nothing() -> Result<()> {
    let harness = Harness::new()?;
    let mut orch = harness.orchestrator(no_source()?, four_people(), &[])?;
    let report = orch.process_frame(Frame::blank(160, 120), Instant::now())?;
    assert!(report.counts.roi_counts.is_empty());
    assert_eq!(report.counts.total, 0);
    assert!(!report.alert_fired);
    Ok(())
}

struct MissingFfmpeg;

impl DecoderSpawner for MissingFfmpeg {
    fn spawn(&self, _request: &DecodeRequest) -> Result<Box<dyn DecoderProcess>> {
        Err(anyhow!("failed to launch ffmpeg"))
    }
}

#[test]
fn undecodable_file_source_stops_after_one_attempt() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let clip = dir.path().join("clip.mp4");
    std::fs::write(&clip, b"not a video")?;
    let stream = StreamConfig {
        source: clip.to_string_lossy().into_owned(),
        ..StreamConfig::default()
    };
    let spawner: Arc<dyn DecoderSpawner> = Arc::new(MissingFfmpeg);

    let attempts = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let outcome = run_with_restart(false, Duration::from_millis(1), &stop, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        VideoSource::open(&stream, Arc::clone(&spawner), Overlay::new())?;
        Ok(LoopState::Exhausted)
    });

    assert!(outcome.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    Ok(())
}
