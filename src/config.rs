use anyhow::{anyhow, Result};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::DEFAULT_ALERT_COOLDOWN;
use crate::evidence::DEFAULT_SCREENSHOT_DIR;
use crate::ingest::decoder::DEFAULT_FFMPEG_PATH;
use crate::ingest::StreamConfig;
use crate::overlay::DEFAULT_LOGO_PATH;
use crate::roi::DEFAULT_ROI_CONFIG_PATH;
use crate::store::{MqttEndpoint, Retention, DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECS};

const DEFAULT_SOURCE: &str = "stub://front_camera";
const DEFAULT_CAM_ID: &str = "1";
const DEFAULT_LOCATION: &str = "Default Location";
const DEFAULT_DB_PATH: &str = "sentinel.db";
const DEFAULT_STREAM_WIDTH: u32 = 1280;
const DEFAULT_STREAM_HEIGHT: u32 = 720;
const DEFAULT_STREAM_FPS: u32 = 30;
const DEFAULT_STALL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BACKOFF_SECS: u64 = 5;
const DEFAULT_METADATA_INTERVAL_SECS: u64 = 1;
const DEFAULT_SENDER: &str = "alerts@crowd-sentinel.local";
const DEFAULT_MQTT_TOPIC: &str = "crowd-sentinel/alerts";
const DEFAULT_MQTT_CLIENT_ID: &str = "crowd-sentinel";

// ----------------------------------------------------------------------------
// File schema
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    source: Option<String>,
    cam_id: Option<String>,
    location_name: Option<String>,
    skip_frames: Option<u32>,
    roi_config_path: Option<PathBuf>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    alerts: Option<AlertConfigFile>,
    store: Option<StoreConfigFile>,
    mqtt: Option<MqttConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    stall_timeout_secs: Option<u64>,
    backoff_secs: Option<u64>,
    ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    weights: Option<PathBuf>,
    img_size: Option<u32>,
    conf: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    metadata_interval_secs: Option<u64>,
    screenshot_dir: Option<PathBuf>,
    upload_endpoint: Option<String>,
    mail_relay: Option<String>,
    sender: Option<String>,
    recipients: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    db_path: Option<PathBuf>,
    max_entries: Option<usize>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    font_path: Option<PathBuf>,
    watermark_path: Option<PathBuf>,
    hide_markers: Option<bool>,
    preview_path: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Resolved configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub source: String,
    pub cam_id: String,
    pub location_name: String,
    pub skip_frames: u32,
    pub roi_config_path: PathBuf,
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub alerts: AlertSettings,
    pub store: StoreSettings,
    pub mqtt: Option<MqttSettings>,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub stall_timeout: Duration,
    pub backoff: Duration,
    pub ffmpeg_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub weights: Option<PathBuf>,
    pub img_size: u32,
    pub conf: f32,
    pub iou: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: "stub".to_string(),
            weights: None,
            img_size: 640,
            conf: 0.25,
            iou: 0.45,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub metadata_interval: Duration,
    pub screenshot_dir: PathBuf,
    pub upload_endpoint: Option<String>,
    pub mail_relay: Option<String>,
    pub sender: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub db_path: PathBuf,
    pub retention: Retention,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub topic: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub font_path: Option<PathBuf>,
    pub watermark_path: Option<PathBuf>,
    pub hide_markers: bool,
    pub preview_path: Option<PathBuf>,
}

/// Command-line overrides, applied after the file and the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// JSON config file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Video source: RTSP/RTMP/HTTP URL, webcam index, file, or stub://
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub cam_id: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub skip_frames: Option<u32>,
    #[arg(long)]
    pub roi_config: Option<PathBuf>,
    /// Detector backend (stub, tract).
    #[arg(long)]
    pub backend: Option<String>,
    #[arg(long)]
    pub weights: Option<PathBuf>,
    #[arg(long)]
    pub img_size: Option<u32>,
    #[arg(long)]
    pub conf: Option<f32>,
    #[arg(long)]
    pub iou: Option<f32>,
    #[arg(long)]
    pub db_path: Option<PathBuf>,
    /// Do not draw detection markers.
    #[arg(long)]
    pub hide_markers: bool,
    /// Write the composed output to this JPEG for external viewers.
    #[arg(long)]
    pub preview_path: Option<PathBuf>,
}

impl SentinelConfig {
    /// Defaults, then `SENTINEL_CONFIG`, then the environment.
    pub fn load() -> Result<Self> {
        Self::load_with(&ConfigOverrides::default())
    }

    /// Defaults, then the config file, then the environment, then `overrides`.
    pub fn load_with(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config
            .clone()
            .or_else(|| std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Stream reader settings for the configured source.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            source: self.source.clone(),
            width: self.stream.width,
            height: self.stream.height,
            fps: self.stream.fps,
            stall_timeout: self.stream.stall_timeout,
            backoff: self.stream.backoff,
            ..StreamConfig::default()
        }
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            width: stream_file.width.unwrap_or(DEFAULT_STREAM_WIDTH),
            height: stream_file.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
            fps: stream_file.fps.unwrap_or(DEFAULT_STREAM_FPS),
            stall_timeout: Duration::from_secs(
                stream_file
                    .stall_timeout_secs
                    .unwrap_or(DEFAULT_STALL_TIMEOUT_SECS),
            ),
            backoff: Duration::from_secs(stream_file.backoff_secs.unwrap_or(DEFAULT_BACKOFF_SECS)),
            ffmpeg_path: stream_file
                .ffmpeg_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_PATH)),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.backend),
            weights: detector_file.weights,
            img_size: detector_file.img_size.unwrap_or(defaults.img_size),
            conf: detector_file.conf.unwrap_or(defaults.conf),
            iou: detector_file.iou.unwrap_or(defaults.iou),
        };

        let alert_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            cooldown: alert_file
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ALERT_COOLDOWN),
            metadata_interval: Duration::from_secs(
                alert_file
                    .metadata_interval_secs
                    .unwrap_or(DEFAULT_METADATA_INTERVAL_SECS),
            ),
            screenshot_dir: alert_file
                .screenshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            upload_endpoint: non_blank(alert_file.upload_endpoint),
            mail_relay: non_blank(alert_file.mail_relay),
            sender: alert_file
                .sender
                .unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            recipients: alert_file.recipients.unwrap_or_default(),
        };

        let store_file = file.store.unwrap_or_default();
        let store = StoreSettings {
            db_path: store_file
                .db_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            retention: Retention {
                max_entries: store_file.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
                ttl_secs: store_file.ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
            },
        };

        let mqtt = match file.mqtt {
            Some(mqtt) => match non_blank(mqtt.broker) {
                Some(broker) => Some(MqttSettings {
                    endpoint: MqttEndpoint::parse(&broker)?,
                    topic: mqtt.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                    client_id: mqtt
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                }),
                None => None,
            },
            None => None,
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            font_path: display_file.font_path,
            watermark_path: Some(
                display_file
                    .watermark_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOGO_PATH)),
            ),
            hide_markers: display_file.hide_markers.unwrap_or(false),
            preview_path: display_file.preview_path,
        };

        Ok(Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            cam_id: file.cam_id.unwrap_or_else(|| DEFAULT_CAM_ID.to_string()),
            location_name: file
                .location_name
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            skip_frames: file.skip_frames.unwrap_or(1),
            roi_config_path: file
                .roi_config_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROI_CONFIG_PATH)),
            stream,
            detector,
            alerts,
            store,
            mqtt,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_non_blank("SENTINEL_SOURCE") {
            self.source = source;
        }
        if let Some(cam_id) = env_non_blank("SENTINEL_CAM_ID") {
            self.cam_id = cam_id;
        }
        if let Some(location) = env_non_blank("SENTINEL_LOCATION") {
            self.location_name = location;
        }
        if let Some(skip) = env_non_blank("SENTINEL_SKIP_FRAMES") {
            self.skip_frames = skip
                .parse()
                .map_err(|_| anyhow!("SENTINEL_SKIP_FRAMES must be a positive integer"))?;
        }
        if let Some(path) = env_non_blank("SENTINEL_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(endpoint) = env_non_blank("SENTINEL_UPLOAD_ENDPOINT") {
            self.alerts.upload_endpoint = Some(endpoint);
        }
        if let Ok(recipients) = std::env::var("SENTINEL_EMAIL_RECIPIENTS") {
            let parsed = split_csv(&recipients);
            if !parsed.is_empty() {
                self.alerts.recipients = parsed;
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(source) = &overrides.source {
            self.source = source.clone();
        }
        if let Some(cam_id) = &overrides.cam_id {
            self.cam_id = cam_id.clone();
        }
        if let Some(location) = &overrides.location {
            self.location_name = location.clone();
        }
        if let Some(skip) = overrides.skip_frames {
            self.skip_frames = skip;
        }
        if let Some(path) = &overrides.roi_config {
            self.roi_config_path = path.clone();
        }
        if let Some(backend) = &overrides.backend {
            self.detector.backend = backend.clone();
        }
        if let Some(weights) = &overrides.weights {
            self.detector.weights = Some(weights.clone());
        }
        if let Some(size) = overrides.img_size {
            self.detector.img_size = size;
        }
        if let Some(conf) = overrides.conf {
            self.detector.conf = conf;
        }
        if let Some(iou) = overrides.iou {
            self.detector.iou = iou;
        }
        if let Some(path) = &overrides.db_path {
            self.store.db_path = path.clone();
        }
        if overrides.hide_markers {
            self.display.hide_markers = true;
        }
        if let Some(path) = &overrides.preview_path {
            self.display.preview_path = Some(path.clone());
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if self.skip_frames == 0 {
            return Err(anyhow!("skip_frames must be at least 1"));
        }
        let (w, h) = (self.stream.width, self.stream.height);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(anyhow!(
                "stream size must be non-zero and even, got {}x{}",
                w,
                h
            ));
        }
        if self.stream.fps == 0 {
            return Err(anyhow!("stream fps must be greater than zero"));
        }
        for (name, value) in [("conf", self.detector.conf), ("iou", self.detector.iou)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must be within [0, 1], got {}", name, value));
            }
        }
        if self.detector.img_size == 0 {
            return Err(anyhow!("detector img_size must be greater than zero"));
        }
        if self.alerts.cooldown.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        if self.store.retention.max_entries == 0 {
            return Err(anyhow!("store max_entries must be greater than zero"));
        }
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_non_blank(key: &str) -> Option<String> {
    non_blank(std::env::var(key).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
