//! Sync run records

use crate::types::SyncMode;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Success,
    Error,
}

impl RunStatus {
    /// Stored name
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    /// Parse a stored name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(RunStatus::InProgress),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }

    /// Whether the run has finished
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How starting a run treats an existing `in_progress` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Reuse the latest `in_progress` record for the object type
    #[default]
    FindOrCreate,
    /// Always insert a new record
    AlwaysInsert,
}

/// One sync attempt for an object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Store-assigned identifier
    pub id: i64,
    pub object_type: String,
    pub mode: SyncMode,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    /// Latest modification time observed
    pub high_watermark: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl SyncRun {
    /// A new `in_progress` run starting now
    pub fn start(object_type: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            id: 0,
            object_type: object_type.into(),
            mode,
            status: RunStatus::InProgress,
            started_at: now(),
            completed_at: None,
            records_processed: 0,
            high_watermark: None,
            error_detail: None,
        }
    }

    /// Mark the run successful
    pub fn succeed(&mut self, records: u64, high_watermark: Option<DateTime<Utc>>) {
        self.status = RunStatus::Success;
        self.completed_at = Some(now());
        self.records_processed = records;
        self.high_watermark = high_watermark;
        self.error_detail = None;
    }

    /// Mark the run failed
    pub fn fail(&mut self, records: u64, detail: impl Into<String>) {
        self.status = RunStatus::Error;
        self.completed_at = Some(now());
        self.records_processed = records;
        self.error_detail = Some(detail.into());
    }
}

/// Current time at the precision runs are stored with
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
