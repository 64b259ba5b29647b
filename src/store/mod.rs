//! Persistence collaborators: occupancy time series, heartbeat metadata, and
//! the alert queue.
//!
//! All three take `&self` so a single store can be shared between the frame
//! loop and the background alert threads behind an `Arc`.

mod memory;
mod mqtt;
mod sqlite;

use anyhow::Result;

use crate::alert::AlertRecord;

pub use memory::InMemoryStore;
pub use mqtt::{MqttAlertQueue, MqttEndpoint};
pub use sqlite::SqliteStore;

/// Entries kept per source in the time series.
pub const DEFAULT_MAX_ENTRIES: usize = 6000;
/// Time-series entries older than this many seconds are dropped.
pub const DEFAULT_TTL_SECS: u64 = 12_000;

/// Append-only, bounded occupancy history.
pub trait CountStore: Send + Sync {
    fn record_count(&self, source_id: &str, count: u32, timestamp: u64) -> Result<()>;
}

/// Latest-value metadata for a source.
pub trait MetadataStore: Send + Sync {
    fn upsert_heartbeat(&self, source_id: &str, count: u32, timestamp: u64) -> Result<()>;
}

/// At-least-once sink for alert records. Returns the queue-assigned id.
pub trait AlertQueue: Send + Sync {
    fn enqueue(&self, record: &AlertRecord) -> Result<u64>;
}

/// Retention policy applied by the time-series adapters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retention {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl Retention {
    /// Oldest timestamp still retained when `now` is the newest.
    pub fn cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.ttl_secs)
    }
}
