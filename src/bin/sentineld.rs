//! sentineld - crowd density monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (defaults, JSON file, environment, flags)
//! 2. Hydrates the ROI registry from disk
//! 3. Reads frames from a live stream (with reconnect) or a file
//! 4. Counts detections per ROI and composes the display frame
//! 5. Raises cooldown-gated alerts with screenshot evidence
//! 6. Records occupancy and heartbeats in the local store

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crowd_sentinel::{
    alert::{AlertDispatcher, AlertTarget},
    build_detector,
    config::{ConfigOverrides, SentinelConfig},
    evidence::{EvidenceConfig, EvidenceStore, LocalEvidenceStore},
    ingest::{is_live_source, DecoderSpawner, FfmpegSpawner, VideoSource},
    notify::{LogNotifier, MailRelayNotifier, Notifier},
    overlay::Overlay,
    pipeline::{run_with_restart, Collaborators, Orchestrator, PipelineSettings, DEFAULT_RESTART_DELAY},
    roi::{LoadOutcome, RoiRegistry},
    store::{AlertQueue, MqttAlertQueue, SqliteStore},
    FrameSlot, PreviewWriter,
};

const PREVIEW_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    overrides: ConfigOverrides,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SentinelConfig::load_with(&args.overrides)?;

    log::info!(
        "sentineld starting: camera {} ({}) source {}",
        cfg.cam_id,
        cfg.location_name,
        cfg.source
    );

    std::fs::create_dir_all(&cfg.alerts.screenshot_dir).with_context(|| {
        format!(
            "create screenshot directory {}",
            cfg.alerts.screenshot_dir.display()
        )
    })?;

    let mut registry = RoiRegistry::new();
    match registry.load(&cfg.roi_config_path) {
        Ok(LoadOutcome::Missing) => {}
        Ok(LoadOutcome::Loaded { rois }) | Ok(LoadOutcome::ThresholdsReset { rois }) => {
            log::info!("monitoring {} ROI(s)", rois)
        }
        Err(e) => log::error!("ROI config not loaded, starting with no ROIs: {:#}", e),
    }
    let registry = registry.into_shared();

    let overlay = Overlay::load(
        cfg.display.font_path.as_deref(),
        cfg.display.watermark_path.as_deref(),
    );

    let store = Arc::new(SqliteStore::open_with_retention(
        &cfg.store.db_path,
        cfg.store.retention,
    )?);
    log::info!("occupancy store at {}", cfg.store.db_path.display());

    let queue: Arc<dyn AlertQueue> = match &cfg.mqtt {
        Some(mqtt) => Arc::new(MqttAlertQueue::connect(
            &mqtt.endpoint,
            &mqtt.client_id,
            &mqtt.topic,
        )?),
        None => store.clone(),
    };
    let evidence: Arc<dyn EvidenceStore> = Arc::new(LocalEvidenceStore::new(EvidenceConfig {
        local_dir: cfg.alerts.screenshot_dir.clone(),
        upload_endpoint: cfg.alerts.upload_endpoint.clone(),
    })?);
    let notifier: Arc<dyn Notifier> = match &cfg.alerts.mail_relay {
        Some(relay) => Arc::new(MailRelayNotifier::new(relay.clone())?),
        None => {
            if !cfg.alerts.recipients.is_empty() {
                log::warn!("email recipients configured without a mail relay; alerts are only logged");
            }
            Arc::new(LogNotifier)
        }
    };
    let alerts = Arc::new(AlertDispatcher::new(
        AlertTarget {
            cam_id: cfg.cam_id.clone(),
            location: cfg.location_name.clone(),
            sender: cfg.alerts.sender.clone(),
            recipients: cfg.alerts.recipients.clone(),
        },
        cfg.alerts.cooldown,
        evidence,
        queue,
        notifier,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let slot = FrameSlot::new();
    let mut preview = cfg.display.preview_path.clone().map(|path| {
        log::info!("writing preview frames to {}", path.display());
        PreviewWriter::spawn(slot.clone(), path, PREVIEW_INTERVAL)
    });

    let spawner: Arc<dyn DecoderSpawner> =
        Arc::new(FfmpegSpawner::new(cfg.stream.ffmpeg_path.clone()));
    let live = is_live_source(&cfg.source);
    let settings = PipelineSettings::from_config(&cfg);

    let outcome = run_with_restart(live, DEFAULT_RESTART_DELAY, &stop, || {
        let detector = build_detector(&cfg.detector)?;
        let source = VideoSource::open(&cfg.stream_config(), Arc::clone(&spawner), overlay.clone())?;
        let mut orchestrator = Orchestrator::new(
            source,
            detector,
            slot.clone(),
            Arc::clone(&registry),
            overlay.clone(),
            settings.clone(),
            Collaborators {
                counts: store.clone(),
                metadata: store.clone(),
                alerts: Arc::clone(&alerts),
            },
        )
        .with_stop_flag(Arc::clone(&stop));
        let state = orchestrator.run();
        orchestrator.finish();
        Ok(state)
    });

    if let Some(preview) = preview.as_mut() {
        preview.stop();
    }
    let state = outcome?;
    log::info!("sentineld exiting ({:?})", state);
    Ok(())
}
