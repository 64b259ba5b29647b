use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use crowd_sentinel::config::{ConfigOverrides, SentinelConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_SOURCE",
        "SENTINEL_CAM_ID",
        "SENTINEL_LOCATION",
        "SENTINEL_SKIP_FRAMES",
        "SENTINEL_DB_PATH",
        "SENTINEL_UPLOAD_ENDPOINT",
        "SENTINEL_EMAIL_RECIPIENTS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "source": "rtsp://admin:pw@10.0.0.5:554/ch1/stream1",
            "cam_id": "7",
            "location_name": "North Gate",
            "skip_frames": 2,
            "roi_config_path": "gate_rois.json",
            "stream": {
                "width": 640,
                "height": 360,
                "stall_timeout_secs": 4
            },
            "detector": {
                "backend": "Stub",
                "img_size": 416,
                "conf": 0.3,
                "iou": 0.5
            },
            "alerts": {
                "cooldown_secs": 300,
                "upload_endpoint": "http://evidence.local:8000/upload/",
                "mail_relay": "http://relay.local/send",
                "sender": "sentinel@example.com",
                "recipients": ["ops@example.com"]
            },
            "store": {
                "db_path": "gate.db",
                "max_entries": 100
            },
            "mqtt": {
                "broker": "mqtt://broker.local:1883"
            }
        }"#,
    );

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_LOCATION", "North Gate (east)");
    std::env::set_var("SENTINEL_SKIP_FRAMES", "3");
    std::env::set_var("SENTINEL_EMAIL_RECIPIENTS", "a@example.com, b@example.com");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.source, "rtsp://admin:pw@10.0.0.5:554/ch1/stream1");
    assert_eq!(cfg.cam_id, "7");
    assert_eq!(cfg.location_name, "North Gate (east)");
    assert_eq!(cfg.skip_frames, 3);
    assert_eq!(cfg.roi_config_path, PathBuf::from("gate_rois.json"));
    assert_eq!(cfg.stream.width, 640);
    assert_eq!(cfg.stream.height, 360);
    assert_eq!(cfg.stream.stall_timeout, Duration::from_secs(4));
    assert_eq!(cfg.stream.backoff, Duration::from_secs(5));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.img_size, 416);
    assert_eq!(cfg.alerts.cooldown, Duration::from_secs(300));
    assert_eq!(
        cfg.alerts.upload_endpoint.as_deref(),
        Some("http://evidence.local:8000/upload/")
    );
    assert_eq!(cfg.alerts.recipients, vec!["a@example.com", "b@example.com"]);
    assert_eq!(cfg.store.db_path, PathBuf::from("gate.db"));
    assert_eq!(cfg.store.retention.max_entries, 100);
    assert_eq!(cfg.store.retention.ttl_secs, 12_000);
    let mqtt = cfg.mqtt.expect("mqtt configured");
    assert_eq!(mqtt.endpoint.host, "broker.local");
    assert_eq!(mqtt.topic, "crowd-sentinel/alerts");

    clear_env();
}

#[test]
fn flags_override_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_SOURCE", "clips/env.mp4");
    std::env::set_var("SENTINEL_DB_PATH", "env.db");

    let overrides = ConfigOverrides {
        source: Some("clips/flag.mp4".to_string()),
        conf: Some(0.6),
        hide_markers: true,
        ..ConfigOverrides::default()
    };
    let cfg = SentinelConfig::load_with(&overrides).expect("load config");

    assert_eq!(cfg.source, "clips/flag.mp4");
    assert_eq!(cfg.store.db_path, PathBuf::from("env.db"));
    assert_eq!(cfg.detector.conf, 0.6);
    assert!(cfg.display.hide_markers);

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.skip_frames, 1);
    assert_eq!(cfg.alerts.cooldown, Duration::from_secs(120));
    assert_eq!(cfg.alerts.metadata_interval, Duration::from_secs(1));
    assert!(cfg.alerts.recipients.is_empty());
    assert!(cfg.mqtt.is_none());
    assert_eq!(cfg.stream.width, 1280);
    assert_eq!(cfg.stream.height, 720);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_SKIP_FRAMES", "0");
    assert!(SentinelConfig::load().is_err());

    std::env::set_var("SENTINEL_SKIP_FRAMES", "two");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{"stream": {"width": 0}}"#);
    std::env::set_var("SENTINEL_CONFIG", file.path());
    assert!(SentinelConfig::load().is_err());

    let file = write_config(r#"{"alerts": {"cooldown_secs": 0}}"#);
    std::env::set_var("SENTINEL_CONFIG", file.path());
    assert!(SentinelConfig::load().is_err());

    let file = write_config("{ not json");
    std::env::set_var("SENTINEL_CONFIG", file.path());
    assert!(SentinelConfig::load().is_err());

    clear_env();
}
