//! Cooldown-gated alert decision and background dispatch of its side effects.
//!
//! The frame loop only pays for the gate check and, when an alert fires, a
//! frame clone plus thread spawns. Encoding, local save, upload, queueing and
//! email all happen off the frame path.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::detect::FrameCounts;
use crate::evidence::EvidenceStore;
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};
use crate::notify::{AlertNotice, Notifier};
use crate::store::AlertQueue;

pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(120);
pub const ALERT_LEVEL_CRITICAL: &str = "critical";

// ----------------------------------------------------------------------------
// Cooldown gate
// ----------------------------------------------------------------------------

/// Process-lifetime record of the last fired alert.
///
/// Check-and-set happens under one lock, so two callers can never both fire
/// inside the same window.
pub struct AlertGate {
    cooldown: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: Mutex::new(None),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Fire iff the total is positive, the total threshold is positive, the
    /// total meets it, and strictly more than the cooldown has elapsed since
    /// the previous firing. Firing records `now`.
    pub fn should_fire(&self, total: u32, total_threshold: u32, now: Instant) -> bool {
        if total == 0 || total_threshold == 0 || total < total_threshold {
            return false;
        }
        let mut last = self
            .last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cooled = match *last {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) > self.cooldown,
        };
        if cooled {
            *last = Some(now);
        }
        cooled
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_COOLDOWN)
    }
}

// ----------------------------------------------------------------------------
// Alert record
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub cam_id: String,
    #[serde(rename = "cam_name")]
    pub location: String,
    pub count: u32,
    pub threshold: u32,
    pub message: String,
    pub level: String,
    #[serde(rename = "screenshot_path", default, skip_serializing_if = "Option::is_none")]
    pub evidence_url: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl AlertRecord {
    pub fn new(
        cam_id: &str,
        location: &str,
        count: u32,
        threshold: u32,
        evidence_url: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            cam_id: cam_id.to_string(),
            location: location.to_string(),
            count,
            threshold,
            message: format!("High crowd density detected at {}", location),
            level: ALERT_LEVEL_CRITICAL.to_string(),
            evidence_url,
            timestamp,
        }
    }
}

/// Evidence file name for an alert raised by `cam_id` at `stamp`
/// (`YYYY_MM_DD_HH_MM_SS`).
pub fn evidence_filename(cam_id: &str, stamp: &str) -> String {
    format!("alert_cam_{}_{}.jpg", cam_id, stamp)
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Who is alerted about what.
#[derive(Clone, Debug, Default)]
pub struct AlertTarget {
    pub cam_id: String,
    pub location: String,
    pub sender: String,
    pub recipients: Vec<String>,
}

/// Handles of the background work started for one alert.
pub struct AlertTicket {
    pub record: AlertRecord,
    pub evidence_name: String,
    handles: Vec<JoinHandle<()>>,
}

impl AlertTicket {
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }

    /// Block until every side effect of this alert has finished.
    pub fn wait(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

pub struct AlertDispatcher {
    gate: AlertGate,
    target: Arc<AlertTarget>,
    evidence: Arc<dyn EvidenceStore>,
    queue: Arc<dyn AlertQueue>,
    notifier: Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(
        target: AlertTarget,
        cooldown: Duration,
        evidence: Arc<dyn EvidenceStore>,
        queue: Arc<dyn AlertQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gate: AlertGate::new(cooldown),
            target: Arc::new(target),
            evidence,
            queue,
            notifier,
        }
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    /// Decide on an alert for this frame and, if it fires, hand the composed
    /// `display` frame and the alert record to background threads.
    pub fn evaluate(
        &self,
        counts: &FrameCounts,
        display: &Frame,
        now: Instant,
    ) -> Option<AlertTicket> {
        if !self
            .gate
            .should_fire(counts.total, counts.total_threshold, now)
        {
            return None;
        }
        log::warn!(
            "system-wide overflow: total count {} reached threshold {}; alerting",
            counts.total,
            counts.total_threshold
        );

        let wall = Local::now();
        let evidence_name = evidence_filename(
            &self.target.cam_id,
            &wall.format("%Y_%m_%d_%H_%M_%S").to_string(),
        );
        let record = AlertRecord::new(
            &self.target.cam_id,
            &self.target.location,
            counts.total,
            counts.total_threshold,
            self.evidence.evidence_url(&evidence_name),
            wall.timestamp().max(0) as u64,
        );
        let notice = AlertNotice {
            location: self.target.location.clone(),
            threshold: counts.total_threshold,
            count: counts.total,
            timestamp: wall.format("%Y-%m-%d %H:%M:%S").to_string(),
            evidence_path: PathBuf::new(),
        };

        let handles = vec![
            self.spawn_evidence(display.clone(), evidence_name.clone(), notice),
            self.spawn_enqueue(record.clone()),
        ];
        Some(AlertTicket {
            record,
            evidence_name,
            handles,
        })
    }

    /// Encode, save locally, start the email once the file exists, then upload.
    fn spawn_evidence(&self, frame: Frame, name: String, mut notice: AlertNotice) -> JoinHandle<()> {
        let evidence = Arc::clone(&self.evidence);
        let notifier = Arc::clone(&self.notifier);
        let target = Arc::clone(&self.target);
        std::thread::spawn(move || {
            let bytes = match frame.encode_jpeg(DEFAULT_JPEG_QUALITY) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("failed to encode alert evidence {}: {:#}", name, e);
                    return;
                }
            };

            let email = match evidence.save_local(&bytes, &name) {
                Ok(path) => {
                    log::info!("alert evidence saved at {}", path.display());
                    notice.evidence_path = path;
                    Some(std::thread::spawn(move || {
                        if let Err(e) = notifier.send(&notice, &target.sender, &target.recipients) {
                            log::error!("alert email failed: {:#}", e);
                        }
                    }))
                }
                Err(e) => {
                    log::error!("failed to save alert evidence {}: {:#}", name, e);
                    None
                }
            };

            match evidence.upload(&bytes, &name) {
                Ok(true) => log::info!("alert evidence {} uploaded", name),
                Ok(false) => log::debug!("alert evidence {} not uploaded", name),
                Err(e) => log::error!("alert evidence upload failed: {:#}", e),
            }

            if let Some(handle) = email {
                let _ = handle.join();
            }
        })
    }

    fn spawn_enqueue(&self, record: AlertRecord) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        std::thread::spawn(move || match queue.enqueue(&record) {
            Ok(id) => log::warn!(
                "alert {} queued: {} (count {}, threshold {})",
                id,
                record.message,
                record.count,
                record.threshold
            ),
            Err(e) => log::error!("failed to queue alert for {}: {:#}", record.cam_id, e),
        })
    }
}
