//! Paginated fetch orchestration
//!
//! Search endpoints stop paging after a fixed number of results per search.
//! Once a window reaches the restart threshold, the stream captures the
//! modification time of the last record, drops the cursor, and opens a new
//! search filtered to records modified strictly after it. Records sharing
//! that exact timestamp but not yet returned are not revisited.

use super::types::{FetchConfig, FetchOutcome, FetchReport, FetchedPage};
use crate::error::{Error, Result};
use crate::source::{EndpointKind, ObjectSpec, SourceClient, SourcePage};
use crate::types::{JsonValue, SyncMode};
use crate::value::extract_modified_at;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Lazily paged record stream for one object type
pub struct RecordStream<'a> {
    source: &'a dyn SourceClient,
    spec: &'a ObjectSpec,
    config: FetchConfig,
    /// Client-side filter for endpoints that cannot filter on the server
    client_filter: Option<DateTime<Utc>>,
    /// Server-side filter of the current search window
    window_after: Option<DateTime<Utc>>,
    cursor: Option<String>,
    window_count: usize,
    finished: bool,
    report: FetchReport,
}

impl<'a> RecordStream<'a> {
    /// Start a stream
    ///
    /// `watermark` only applies in incremental mode and only for object
    /// types that support it; otherwise everything is fetched.
    pub fn new(
        source: &'a dyn SourceClient,
        spec: &'a ObjectSpec,
        mode: SyncMode,
        watermark: Option<DateTime<Utc>>,
        config: FetchConfig,
    ) -> Self {
        let effective = match mode {
            SyncMode::Incremental if spec.supports_incremental => watermark,
            _ => None,
        };
        let (window_after, client_filter) = if spec.filters_server_side() {
            (effective, None)
        } else {
            (None, effective)
        };

        Self {
            source,
            spec,
            config,
            client_filter,
            window_after,
            cursor: None,
            window_count: 0,
            finished: false,
            report: FetchReport::default(),
        }
    }

    /// Counters so far
    pub fn report(&self) -> &FetchReport {
        &self.report
    }

    /// Consume the stream, returning its report
    pub fn into_report(self) -> FetchReport {
        self.report
    }

    /// Fetch the next non-empty page; `None` when the stream is exhausted
    pub async fn next_page(&mut self) -> Result<Option<FetchedPage>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.config.max_pages > 0 && self.report.pages >= self.config.max_pages {
                info!(
                    object_type = %self.spec.name,
                    max_pages = self.config.max_pages,
                    "Page cap reached, stopping"
                );
                self.finished = true;
                return Ok(None);
            }

            let page = self.fetch_with_retries().await?;
            self.report.pages += 1;
            if self.report.windows == 0 {
                self.report.windows = 1;
            }

            if page.records.is_empty() {
                self.finished = true;
                return Ok(None);
            }

            let window = self.report.windows;
            let raw_count = page.records.len();
            let last_modified = page
                .records
                .last()
                .and_then(|r| extract_modified_at(r, &self.spec.modified_fields));
            self.advance(page.next_cursor, raw_count, last_modified);

            let records = self.apply_client_filter(page.records);
            self.track(&records);

            debug!(
                object_type = %self.spec.name,
                page = self.report.pages,
                window,
                records = records.len(),
                "Fetched page"
            );

            if records.is_empty() {
                // Everything on this page was filtered out; keep paging
                continue;
            }

            return Ok(Some(FetchedPage {
                records,
                page_number: self.report.pages,
                window,
            }));
        }
    }

    /// Drain the stream
    pub async fn collect_all(mut self) -> Result<FetchOutcome> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page.records);
        }
        Ok(FetchOutcome {
            records,
            report: self.report,
        })
    }

    async fn fetch_once(&self) -> Result<SourcePage> {
        let limit = self.spec.batch_size.max(1);
        match self.spec.endpoint {
            EndpointKind::Search => {
                self.source
                    .search(self.spec, self.cursor.as_deref(), self.window_after, limit)
                    .await
            }
            EndpointKind::List | EndpointKind::Legacy => {
                self.source
                    .list(self.spec, self.cursor.as_deref(), limit)
                    .await
            }
            EndpointKind::Single => Ok(SourcePage::new(
                self.source.fetch_single(self.spec).await?,
                None,
            )),
        }
    }

    /// Fetch the current page, retrying the same cursor on failure
    async fn fetch_with_retries(&mut self) -> Result<SourcePage> {
        let mut failures = 0u32;
        loop {
            match self.fetch_once().await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    failures += 1;
                    let message = format!("page {}: {e}", self.report.pages + 1);
                    warn!(
                        object_type = %self.spec.name,
                        attempt = failures,
                        "Page fetch failed: {e}"
                    );
                    self.report.errors.push(message);

                    if failures >= self.config.max_consecutive_page_failures.max(1) {
                        return Err(Error::FetchStalled {
                            object_type: self.spec.name.clone(),
                            failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Decide where the next page comes from
    fn advance(
        &mut self,
        next_cursor: Option<String>,
        raw_count: usize,
        last_modified: Option<DateTime<Utc>>,
    ) {
        self.window_count += raw_count;

        let Some(next) = next_cursor else {
            self.finished = true;
            return;
        };

        if self.cursor.as_deref() == Some(next.as_str()) {
            warn!(
                object_type = %self.spec.name,
                cursor = %next,
                "Source returned the same cursor twice, stopping"
            );
            self.finished = true;
            return;
        }

        let restart = self.spec.endpoint == EndpointKind::Search
            && self.window_count >= self.config.restart_threshold;

        match (restart, last_modified) {
            (true, Some(ts)) => {
                info!(
                    object_type = %self.spec.name,
                    window = self.report.windows,
                    results = self.window_count,
                    after = %ts,
                    "Search window threshold reached, restarting"
                );
                self.window_after = Some(ts);
                self.cursor = None;
                self.window_count = 0;
                self.report.windows += 1;
            }
            (true, None) => {
                warn!(
                    object_type = %self.spec.name,
                    results = self.window_count,
                    "Last record has no modification time, continuing without restart"
                );
                self.cursor = Some(next);
            }
            (false, _) => self.cursor = Some(next),
        }
    }

    fn apply_client_filter(&mut self, records: Vec<JsonValue>) -> Vec<JsonValue> {
        let Some(after) = self.client_filter else {
            return records;
        };

        let before = records.len();
        let kept: Vec<JsonValue> = records
            .into_iter()
            .filter(|r| {
                extract_modified_at(r, &self.spec.modified_fields).map_or(true, |ts| ts > after)
            })
            .collect();
        self.report.filtered_out += before - kept.len();
        kept
    }

    fn track(&mut self, records: &[JsonValue]) {
        self.report.records += records.len();
        let page_max = records
            .iter()
            .filter_map(|r| extract_modified_at(r, &self.spec.modified_fields))
            .max();
        if page_max > self.report.high_watermark {
            self.report.high_watermark = page_max;
        }
    }
}

/// Fetch every record of an object type
pub async fn fetch_all(
    source: &dyn SourceClient,
    spec: &ObjectSpec,
    mode: SyncMode,
    watermark: Option<DateTime<Utc>>,
    config: FetchConfig,
) -> Result<FetchOutcome> {
    let outcome = RecordStream::new(source, spec, mode, watermark, config)
        .collect_all()
        .await?;

    info!(
        object_type = %spec.name,
        records = outcome.report.records,
        pages = outcome.report.pages,
        windows = outcome.report.windows,
        errors = outcome.report.errors.len(),
        "Fetch complete"
    );
    Ok(outcome)
}
