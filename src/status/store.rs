//! Sync run persistence

use super::types::{RunStatus, SyncRun};
use crate::error::{Error, Result};
use crate::types::SyncMode;
use crate::value::{format_timestamp, parse_timestamp_str};
use async_trait::async_trait;
use duckdb::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Storage for sync runs
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert a run; returns its assigned id
    async fn insert(&self, run: &SyncRun) -> Result<i64>;

    /// Overwrite a run by id
    async fn update(&self, run: &SyncRun) -> Result<()>;

    /// Most recently started `in_progress` run
    async fn latest_in_progress(&self, object_type: &str) -> Result<Option<SyncRun>>;

    /// Successful run with the greatest watermark
    async fn last_successful(&self, object_type: &str) -> Result<Option<SyncRun>>;

    /// Most recently started run
    async fn last(&self, object_type: &str) -> Result<Option<SyncRun>>;

    /// Most recent runs, newest first
    async fn recent(&self, object_type: Option<&str>, limit: usize) -> Result<Vec<SyncRun>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store keeping runs in memory
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    runs: Mutex<Vec<SyncRun>>,
}

impl MemoryStatusStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored run, in insertion order
    pub fn all(&self) -> Vec<SyncRun> {
        self.runs().clone()
    }

    fn runs(&self) -> MutexGuard<'_, Vec<SyncRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn newest(&self, object_type: &str, status: Option<RunStatus>) -> Option<SyncRun> {
        self.runs()
            .iter()
            .filter(|r| r.object_type == object_type)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .max_by_key(|r| (r.started_at, r.id))
            .cloned()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert(&self, run: &SyncRun) -> Result<i64> {
        let mut runs = self.runs();
        let id = runs.len() as i64 + 1;
        runs.push(SyncRun { id, ..run.clone() });
        Ok(id)
    }

    async fn update(&self, run: &SyncRun) -> Result<()> {
        let mut runs = self.runs();
        let existing = runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| Error::status(format!("No sync run with id {}", run.id)))?;
        *existing = run.clone();
        Ok(())
    }

    async fn latest_in_progress(&self, object_type: &str) -> Result<Option<SyncRun>> {
        Ok(self.newest(object_type, Some(RunStatus::InProgress)))
    }

    async fn last_successful(&self, object_type: &str) -> Result<Option<SyncRun>> {
        Ok(self
            .runs()
            .iter()
            .filter(|r| r.object_type == object_type && r.status == RunStatus::Success)
            .max_by_key(|r| (r.high_watermark.is_some(), r.high_watermark, r.completed_at, r.id))
            .cloned())
    }

    async fn last(&self, object_type: &str) -> Result<Option<SyncRun>> {
        Ok(self.newest(object_type, None))
    }

    async fn recent(&self, object_type: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        let mut runs: Vec<SyncRun> = self
            .runs()
            .iter()
            .filter(|r| object_type.map_or(true, |o| r.object_type == o))
            .cloned()
            .collect();
        runs.sort_by(|a, b| (b.started_at, b.id).cmp(&(a.started_at, a.id)));
        runs.truncate(limit);
        Ok(runs)
    }
}

// ============================================================================
// DuckDB store
// ============================================================================

const RUN_COLUMNS: &str = "id, object_type, mode, status, started_at, completed_at, \
                           records_processed, high_watermark, error_detail";

/// Store persisting runs in a DuckDB table
///
/// Timestamps are stored as fixed-width RFC 3339 text, which sorts
/// chronologically.
pub struct DuckDbStatusStore {
    conn: Mutex<Connection>,
}

impl DuckDbStatusStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::status(format!(
                "Failed to open status database '{}': {e}",
                path.display()
            ))
        })?;
        Self::init(conn)
    }

    /// Open a transient in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::status(format!("Failed to create DuckDB connection: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE SEQUENCE IF NOT EXISTS sync_runs_id_seq START 1;
             CREATE TABLE IF NOT EXISTS sync_runs (
                 id BIGINT DEFAULT nextval('sync_runs_id_seq'),
                 object_type VARCHAR NOT NULL,
                 mode VARCHAR NOT NULL,
                 status VARCHAR NOT NULL,
                 started_at VARCHAR NOT NULL,
                 completed_at VARCHAR,
                 records_processed BIGINT NOT NULL DEFAULT 0,
                 high_watermark VARCHAR,
                 error_detail VARCHAR
             );",
        )
        .map_err(|e| Error::status(format!("Failed to initialize status store: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query(&self, filter: &str, order: &str, args: &[&str], limit: usize) -> Result<Vec<SyncRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs {filter} ORDER BY {order} LIMIT {limit}");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(duckdb::params_from_iter(args.iter()), RawRun::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawRun::into_run).collect()
    }

    fn first(&self, filter: &str, order: &str, args: &[&str]) -> Result<Option<SyncRun>> {
        Ok(self.query(filter, order, args, 1)?.into_iter().next())
    }
}

impl std::fmt::Debug for DuckDbStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStatusStore").finish_non_exhaustive()
    }
}

/// Row as stored, before parsing
struct RawRun {
    id: i64,
    object_type: String,
    mode: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    records_processed: i64,
    high_watermark: Option<String>,
    error_detail: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            object_type: row.get(1)?,
            mode: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            records_processed: row.get(6)?,
            high_watermark: row.get(7)?,
            error_detail: row.get(8)?,
        })
    }

    fn into_run(self) -> Result<SyncRun> {
        let timestamp = |s: &str| {
            parse_timestamp_str(s)
                .ok_or_else(|| Error::status(format!("Invalid stored timestamp '{s}'")))
        };

        Ok(SyncRun {
            id: self.id,
            mode: SyncMode::parse(&self.mode)
                .ok_or_else(|| Error::status(format!("Invalid stored mode '{}'", self.mode)))?,
            status: RunStatus::parse(&self.status)
                .ok_or_else(|| Error::status(format!("Invalid stored status '{}'", self.status)))?,
            started_at: timestamp(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(timestamp).transpose()?,
            records_processed: self.records_processed.max(0) as u64,
            high_watermark: self.high_watermark.as_deref().map(timestamp).transpose()?,
            error_detail: self.error_detail,
            object_type: self.object_type,
        })
    }
}

#[async_trait]
impl StatusStore for DuckDbStatusStore {
    async fn insert(&self, run: &SyncRun) -> Result<i64> {
        let id = self.conn().query_row(
            "INSERT INTO sync_runs (object_type, mode, status, started_at, completed_at,
                                    records_processed, high_watermark, error_detail)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
            params![
                run.object_type,
                run.mode.as_str(),
                run.status.as_str(),
                format_timestamp(&run.started_at),
                run.completed_at.as_ref().map(format_timestamp),
                run.records_processed as i64,
                run.high_watermark.as_ref().map(format_timestamp),
                run.error_detail,
            ],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(id)
    }

    async fn update(&self, run: &SyncRun) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE sync_runs SET mode = ?, status = ?, started_at = ?, completed_at = ?,
                                  records_processed = ?, high_watermark = ?, error_detail = ?
             WHERE id = ?",
            params![
                run.mode.as_str(),
                run.status.as_str(),
                format_timestamp(&run.started_at),
                run.completed_at.as_ref().map(format_timestamp),
                run.records_processed as i64,
                run.high_watermark.as_ref().map(format_timestamp),
                run.error_detail,
                run.id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::status(format!("No sync run with id {}", run.id)));
        }
        Ok(())
    }

    async fn latest_in_progress(&self, object_type: &str) -> Result<Option<SyncRun>> {
        self.first(
            "WHERE object_type = ? AND status = 'in_progress'",
            "started_at DESC, id DESC",
            &[object_type],
        )
    }

    async fn last_successful(&self, object_type: &str) -> Result<Option<SyncRun>> {
        self.first(
            "WHERE object_type = ? AND status = 'success'",
            "high_watermark DESC NULLS LAST, completed_at DESC, id DESC",
            &[object_type],
        )
    }

    async fn last(&self, object_type: &str) -> Result<Option<SyncRun>> {
        self.first("WHERE object_type = ?", "started_at DESC, id DESC", &[object_type])
    }

    async fn recent(&self, object_type: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        match object_type {
            Some(o) => self.query("WHERE object_type = ?", "started_at DESC, id DESC", &[o], limit),
            None => self.query("", "started_at DESC, id DESC", &[], limit),
        }
    }
}
