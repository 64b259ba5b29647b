use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};

use crate::alert::AlertRecord;
use crate::store::{AlertQueue, CountStore, MetadataStore, Retention};

#[derive(Default)]
struct Inner {
    counts: HashMap<String, VecDeque<(u64, u32)>>,
    heartbeats: HashMap<String, (u32, u64)>,
    alerts: Vec<AlertRecord>,
    heartbeat_calls: usize,
    fail_writes: bool,
}

/// Process-local store. Clones share the same state so tests can hand one
/// copy to the pipeline and inspect another.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    retention: Retention,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            inner: Arc::default(),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every write fail, for exercising error paths.
    pub fn set_failing(&self, failing: bool) {
        self.lock().fail_writes = failing;
    }

    pub fn counts(&self, source_id: &str) -> Vec<u32> {
        self.lock()
            .counts
            .get(source_id)
            .map(|entries| entries.iter().map(|&(_, c)| c).collect())
            .unwrap_or_default()
    }

    pub fn heartbeat(&self, source_id: &str) -> Option<(u32, u64)> {
        self.lock().heartbeats.get(source_id).copied()
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.lock().heartbeat_calls
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.lock().alerts.clone()
    }
}

impl CountStore for InMemoryStore {
    fn record_count(&self, source_id: &str, count: u32, timestamp: u64) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(anyhow!("in-memory store configured to fail"));
        }
        let cutoff = self.retention.cutoff(timestamp);
        let entries = inner.counts.entry(source_id.to_string()).or_default();
        entries.push_back((timestamp, count));
        entries.retain(|&(ts, _)| ts >= cutoff);
        while entries.len() > self.retention.max_entries {
            entries.pop_front();
        }
        Ok(())
    }
}

impl MetadataStore for InMemoryStore {
    fn upsert_heartbeat(&self, source_id: &str, count: u32, timestamp: u64) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(anyhow!("in-memory store configured to fail"));
        }
        inner.heartbeat_calls += 1;
        inner
            .heartbeats
            .insert(source_id.to_string(), (count, timestamp));
        Ok(())
    }
}

impl AlertQueue for InMemoryStore {
    fn enqueue(&self, record: &AlertRecord) -> Result<u64> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(anyhow!("in-memory store configured to fail"));
        }
        inner.alerts.push(record.clone());
        Ok(inner.alerts.len() as u64)
    }
}
