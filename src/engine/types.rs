//! Engine types
//!
//! Configuration and per-object reports for sync runs.

use crate::fetch::FetchConfig;
use crate::flatten::FlattenRules;
use crate::status::RunStatus;
use crate::types::SyncMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for sync runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pagination settings
    pub fetch: FetchConfig,
    /// Naming and flattening rules
    pub flatten: FlattenRules,
    /// Flattened records buffered before a staged load
    pub load_batch_size: usize,
    /// Pre-declare columns from the source's property definitions
    pub declare_properties: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            flatten: FlattenRules::default(),
            load_batch_size: 500,
            declare_properties: true,
        }
    }
}

/// Outcome of syncing one object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub object_type: String,
    /// Destination table
    pub table: String,
    pub mode: SyncMode,
    pub status: RunStatus,
    /// Raw records yielded by the fetch
    pub records_fetched: usize,
    /// Rows merged into the destination
    pub rows_loaded: usize,
    /// Records or rows that could not be loaded
    pub rows_skipped: usize,
    /// Dotted paths of fields added to the destination
    pub fields_added: Vec<String>,
    pub pages: u32,
    /// Search windows opened
    pub windows: u32,
    /// Non-fatal errors, then the fatal one if the run failed
    pub errors: Vec<String>,
    /// Latest modification time observed
    pub high_watermark: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// Empty report for a starting run
    pub fn new(object_type: impl Into<String>, table: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            object_type: object_type.into(),
            table: table.into(),
            mode,
            status: RunStatus::InProgress,
            records_fetched: 0,
            rows_loaded: 0,
            rows_skipped: 0,
            fields_added: Vec::new(),
            pages: 0,
            windows: 0,
            errors: Vec::new(),
            high_watermark: None,
            duration_ms: 0,
        }
    }

    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Per object type, in processing order
    pub reports: Vec<SyncReport>,
    /// Requested object types missing from the catalog
    pub unknown: Vec<String>,
}

impl RunSummary {
    /// Number of successful object types
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed object types
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    /// Total rows merged
    pub fn rows_loaded(&self) -> usize {
        self.reports.iter().map(|r| r.rows_loaded).sum()
    }
}
