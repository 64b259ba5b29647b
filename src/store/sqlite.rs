use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::alert::AlertRecord;
use crate::store::{AlertQueue, CountStore, MetadataStore, Retention};

/// SQLite-backed time series, heartbeat table, and alert queue.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    retention: Retention,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::open_with_retention(db_path, Retention::default())
    }

    pub fn open_with_retention<P: AsRef<Path>>(db_path: P, retention: Retention) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("open database {}", db_path.display()))?;
        Self::from_connection(conn, retention)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Retention::default())
    }

    fn from_connection(conn: Connection, retention: Retention) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            retention,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS crowd_counts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              source_id TEXT NOT NULL,
              count INTEGER NOT NULL,
              recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS heartbeats (
              source_id TEXT PRIMARY KEY,
              count INTEGER NOT NULL,
              last_seen INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              cam_id TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_counts_source ON crowd_counts(source_id, id);
            "#,
        )?;
        Ok(())
    }

    /// Number of retained time-series entries for `source_id`.
    pub fn count_entries(&self, source_id: &str) -> Result<usize> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM crowd_counts WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Most recent heartbeat as `(count, last_seen)`.
    pub fn heartbeat(&self, source_id: &str) -> Result<Option<(u32, u64)>> {
        let row = self
            .conn()
            .query_row(
                "SELECT count, last_seen FROM heartbeats WHERE source_id = ?1",
                params![source_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(count, seen)| (count as u32, seen as u64)))
    }

    pub fn alert(&self, id: u64) -> Result<Option<AlertRecord>> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload_json FROM alerts WHERE id = ?1",
                params![id as i64],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|json| serde_json::from_str(&json).context("decode stored alert"))
            .transpose()
    }
}

impl CountStore for SqliteStore {
    fn record_count(&self, source_id: &str, count: u32, timestamp: u64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO crowd_counts(source_id, count, recorded_at) VALUES (?1, ?2, ?3)",
            params![source_id, count as i64, timestamp as i64],
        )?;
        tx.execute(
            "DELETE FROM crowd_counts WHERE source_id = ?1 AND recorded_at < ?2",
            params![source_id, self.retention.cutoff(timestamp) as i64],
        )?;
        tx.execute(
            "DELETE FROM crowd_counts WHERE source_id = ?1 AND id NOT IN (
               SELECT id FROM crowd_counts WHERE source_id = ?1 ORDER BY id DESC LIMIT ?2
             )",
            params![source_id, self.retention.max_entries as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl MetadataStore for SqliteStore {
    fn upsert_heartbeat(&self, source_id: &str, count: u32, timestamp: u64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO heartbeats(source_id, count, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_id) DO UPDATE SET count = excluded.count, last_seen = excluded.last_seen",
            params![source_id, count as i64, timestamp as i64],
        )?;
        Ok(())
    }
}

impl AlertQueue for SqliteStore {
    fn enqueue(&self, record: &AlertRecord) -> Result<u64> {
        let payload = serde_json::to_string(record)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO alerts(cam_id, created_at, payload_json) VALUES (?1, ?2, ?3)",
            params![record.cam_id, record.timestamp as i64, payload],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }
}
