//! Crowd Sentinel
//!
//! ROI occupancy counting and rate-limited crowd-density alerting for a single
//! camera stream.
//!
//! # Architecture
//!
//! - `ingest`: resilient live-stream reader (supervised ffmpeg, stall
//!   detection, reconnecting placeholder) and sequential file source
//! - `roi`: polygon registry with its interactive edit state machine,
//!   persistence, and overlay rendering
//! - `geometry`: point-in-polygon and masked region extraction
//! - `detect`: detector backends and per-frame count aggregation
//! - `pipeline`: the per-frame orchestration loop and restart supervisor
//! - `alert`: cooldown gate and background dispatch of evidence, alert
//!   records, and notifications
//! - `store`, `evidence`, `notify`: collaborator adapters
//! - `config`: defaults, JSON file, environment, and flag merging

use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod config;
pub mod detect;
pub mod evidence;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod notify;
pub mod overlay;
pub mod pipeline;
pub mod roi;
pub mod store;

pub use alert::{AlertDispatcher, AlertGate, AlertRecord, AlertTarget};
pub use config::{ConfigOverrides, SentinelConfig};
pub use detect::{build_detector, BoundingBox, Detector, FrameCounts, RoiStatus};
pub use frame::{Frame, FrameSink, FrameSlot, PreviewWriter};
pub use geometry::{extract_region, point_in_polygon, Point, Region};
pub use ingest::{FrameSource, SourceFrame, VideoSource};
pub use pipeline::{Collaborators, LoopState, Orchestrator, PipelineSettings};
pub use roi::{RoiRegistry, SharedRegistry};
pub use store::{AlertQueue, CountStore, InMemoryStore, MetadataStore, SqliteStore};

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
