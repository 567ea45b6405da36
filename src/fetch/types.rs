//! Fetch configuration and reporting types

use crate::types::JsonValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Paginated fetch settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Hard ceiling on results from one search
    pub ceiling: usize,
    /// Results per window after which the search is restarted
    pub restart_threshold: usize,
    /// Consecutive failures of one page request before giving up
    pub max_consecutive_page_failures: u32,
    /// Stop after this many pages; 0 means unlimited
    pub max_pages: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ceiling: 10_000,
            restart_threshold: 9_000,
            max_consecutive_page_failures: 3,
            max_pages: 0,
        }
    }
}

impl FetchConfig {
    /// Set the restart threshold
    #[must_use]
    pub fn with_restart_threshold(mut self, threshold: usize) -> Self {
        self.restart_threshold = threshold;
        self
    }

    /// Set the page cap
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the failure budget per page
    #[must_use]
    pub fn with_max_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_page_failures = failures;
        self
    }
}

/// One fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Raw records, after any client-side incremental filtering
    pub records: Vec<JsonValue>,
    /// 1-based page number across the whole fetch
    pub page_number: u32,
    /// 1-based search window the page belongs to
    pub window: u32,
}

/// Counters for a fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchReport {
    /// Pages successfully fetched
    pub pages: u32,
    /// Search windows opened
    pub windows: u32,
    /// Records yielded downstream
    pub records: usize,
    /// Records dropped by client-side incremental filtering
    pub filtered_out: usize,
    /// Page errors that were recovered from
    pub errors: Vec<String>,
    /// Latest modification time seen
    pub high_watermark: Option<DateTime<Utc>>,
}

/// Records plus their report
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// All records in fetch order
    pub records: Vec<JsonValue>,
    /// Counters
    pub report: FetchReport,
}
