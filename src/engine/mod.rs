//! Sync engine
//!
//! Runs the per-object pipeline and records the outcome of every run.
//!
//! # Pipeline
//!
//! For each object type:
//! 1. Read the watermark of the last successful run (incremental mode)
//! 2. Open an `in_progress` run
//! 3. Create the destination table if missing and pre-declare columns from
//!    property metadata
//! 4. Stream pages, flatten them, and buffer rows
//! 5. On each full buffer: add missing columns, then stage and merge
//! 6. Close the run with its row count and watermark, or with the error
//!
//! In batch mode a failing object type does not stop the others.

mod types;

pub use types::{EngineConfig, RunSummary, SyncReport};

use crate::error::{Error, Result};
use crate::fetch::RecordStream;
use crate::flatten::{Flattener, PendingBatch};
use crate::schema::{fields_from_properties, FieldSchema, SchemaChange, SchemaManager, TableSchema};
use crate::source::{default_catalog, ObjectSpec, SourceClient};
use crate::status::{RunStatus, SyncStatusTracker};
use crate::types::SyncMode;
use crate::upsert::{BulkLoader, LoadReport};
use crate::warehouse::Warehouse;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Orchestrates fetch, schema evolution, load and status tracking
pub struct SyncEngine {
    source: Arc<dyn SourceClient>,
    warehouse: Arc<dyn Warehouse>,
    tracker: SyncStatusTracker,
    catalog: Vec<ObjectSpec>,
    config: EngineConfig,
    schema: SchemaManager,
    loader: BulkLoader,
}

impl SyncEngine {
    /// Create an engine over the built-in catalog
    pub fn new(
        source: Arc<dyn SourceClient>,
        warehouse: Arc<dyn Warehouse>,
        tracker: SyncStatusTracker,
    ) -> Self {
        let config = EngineConfig::default();
        Self {
            schema: SchemaManager::new(Arc::clone(&warehouse))
                .with_synced_at_field(config.flatten.synced_at_field.clone()),
            loader: BulkLoader::new(Arc::clone(&warehouse)),
            source,
            warehouse,
            tracker,
            catalog: default_catalog(),
            config,
        }
    }

    /// Replace the object catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: Vec<ObjectSpec>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set engine configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.schema = SchemaManager::new(Arc::clone(&self.warehouse))
            .with_synced_at_field(config.flatten.synced_at_field.clone());
        self.config = config;
        self
    }

    /// Object types in processing order
    pub fn catalog(&self) -> &[ObjectSpec] {
        &self.catalog
    }

    /// Look up an object type
    pub fn object(&self, name: &str) -> Option<&ObjectSpec> {
        self.catalog.iter().find(|spec| spec.name == name)
    }

    /// Status tracker
    pub fn tracker(&self) -> &SyncStatusTracker {
        &self.tracker
    }

    /// Destination warehouse
    pub fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.warehouse
    }

    /// Schema manager for the destination
    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sync one object type, or every catalogued type when `None`
    ///
    /// A named object type must exist and its failure is returned as an
    /// error. Without a name every type is attempted and failures are only
    /// reported in the summary.
    pub async fn run(&self, object_type: Option<&str>, full_sync: bool) -> Result<RunSummary> {
        let mode = SyncMode::from_full_flag(full_sync);

        let Some(name) = object_type else {
            let names: Vec<String> = self.catalog.iter().map(|s| s.name.clone()).collect();
            return Ok(self.run_selected(&names, full_sync).await);
        };

        let spec = self.object(name).ok_or_else(|| Error::unknown_object(name))?;
        let (report, outcome) = self.run_object(spec, mode).await;
        outcome?;
        Ok(RunSummary {
            reports: vec![report],
            unknown: Vec::new(),
        })
    }

    /// Sync the named object types in order, isolating failures
    ///
    /// Unknown names are logged and skipped.
    pub async fn run_selected(&self, names: &[String], full_sync: bool) -> RunSummary {
        let mode = SyncMode::from_full_flag(full_sync);
        let started = Instant::now();
        let mut summary = RunSummary::default();

        for name in names {
            let Some(spec) = self.object(name) else {
                warn!(object_type = %name, "Unknown object type, skipping");
                summary.unknown.push(name.clone());
                continue;
            };

            let (report, outcome) = self.run_object(spec, mode).await;
            if let Err(e) = outcome {
                error!(object_type = %name, "Sync failed, continuing with next object: {e}");
            }
            summary.reports.push(report);
        }

        info!(
            mode = %mode,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            unknown = summary.unknown.len(),
            rows = summary.rows_loaded(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync run finished"
        );
        summary
    }

    /// Sync one object type, returning its report
    pub async fn sync_object(&self, object_type: &str, mode: SyncMode) -> Result<SyncReport> {
        let spec = self
            .object(object_type)
            .ok_or_else(|| Error::unknown_object(object_type))?;
        let (report, outcome) = self.run_object(spec, mode).await;
        outcome.map(|()| report)
    }

    /// Re-fetch a single record by key and upsert it
    ///
    /// Does not open a run or move the watermark. Returns `None` when the
    /// source has no such record.
    pub async fn sync_record(&self, object_type: &str, id: &str) -> Result<Option<LoadReport>> {
        let spec = self
            .object(object_type)
            .ok_or_else(|| Error::unknown_object(object_type))?;

        let Some(record) = self.source.get_by_id(spec, id).await? else {
            info!(object_type = %object_type, id = %id, "Record not found in source");
            return Ok(None);
        };

        let table = spec.table_name();
        let schema = self.schema.ensure_table(&table, &spec.key_field).await?;

        let flat = self.flattener(spec, &schema).flatten(&record)?;
        self.schema.reconcile(&table, &flat.fragment.to_fields()).await?;
        let load = self
            .loader
            .load(&[flat.values], &table, &spec.key_field)
            .await?;

        info!(object_type = %object_type, id = %id, "Record refreshed");
        Ok(Some(load))
    }

    /// Destination fields the source's property metadata would declare
    pub async fn property_fields(&self, object_type: &str) -> Result<Vec<FieldSchema>> {
        let spec = self
            .object(object_type)
            .ok_or_else(|| Error::unknown_object(object_type))?;
        if spec.property_object.is_none() {
            return Ok(Vec::new());
        }
        let definitions = self.source.get_property_definitions(spec).await?;
        Ok(fields_from_properties(
            &definitions,
            self.config.flatten.max_name_len,
            &self.config.flatten.synced_at_field,
        ))
    }

    /// Create the destination if missing and declare every known property
    pub async fn declare_schema(&self, object_type: &str) -> Result<SchemaChange> {
        let spec = self
            .object(object_type)
            .ok_or_else(|| Error::unknown_object(object_type))?;
        let table = spec.table_name();
        self.schema.ensure_table(&table, &spec.key_field).await?;

        if spec.property_object.is_none() {
            return Ok(SchemaChange::default());
        }
        let definitions = self.source.get_property_definitions(spec).await?;
        self.schema
            .declare_from_properties(&table, &definitions, self.config.flatten.max_name_len)
            .await
    }

    /// Run the pipeline and record the outcome
    async fn run_object(&self, spec: &ObjectSpec, mode: SyncMode) -> (SyncReport, Result<()>) {
        let started = Instant::now();
        let mut report = SyncReport::new(&spec.name, spec.table_name(), mode);
        info!(object_type = %spec.name, mode = %mode, table = %report.table, "Starting sync");

        let mut outcome = self.execute(spec, mode, &mut report).await;

        let closed = match &outcome {
            Ok(()) => {
                self.tracker
                    .complete_success(
                        &spec.name,
                        mode,
                        report.rows_loaded as u64,
                        report.high_watermark,
                    )
                    .await
            }
            Err(e) => {
                report.errors.push(e.to_string());
                self.tracker
                    .complete_error(&spec.name, mode, report.rows_loaded as u64, &e.to_string())
                    .await
            }
        };

        match closed {
            Ok(run) => {
                report.status = run.status;
                report.high_watermark = run.high_watermark;
            }
            Err(e) => {
                error!(object_type = %spec.name, "Failed to record sync status: {e}");
                report.status = RunStatus::Error;
                report.errors.push(format!("status: {e}"));
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            object_type = %spec.name,
            status = %report.status,
            fetched = report.records_fetched,
            loaded = report.rows_loaded,
            skipped = report.rows_skipped,
            fields_added = report.fields_added.len(),
            duration_ms = report.duration_ms,
            "Sync finished"
        );
        (report, outcome)
    }

    async fn execute(
        &self,
        spec: &ObjectSpec,
        mode: SyncMode,
        report: &mut SyncReport,
    ) -> Result<()> {
        let watermark = match mode {
            SyncMode::Incremental => self.tracker.last_successful_sync(&spec.name).await?,
            SyncMode::Full => None,
        };
        debug!(object_type = %spec.name, watermark = ?watermark, "Resolved watermark");

        self.tracker.start(&spec.name, mode).await?;

        let table = report.table.clone();
        self.schema.ensure_table(&table, &spec.key_field).await?;
        self.declare_properties(spec, &table, report).await?;

        let mut stream = RecordStream::new(
            self.source.as_ref(),
            spec,
            mode,
            watermark,
            self.config.fetch,
        );
        let streamed = self.drain(spec, &table, &mut stream, report).await;

        let fetch = stream.into_report();
        report.pages = fetch.pages;
        report.windows = fetch.windows;
        report.high_watermark = fetch.high_watermark;
        report.errors.extend(fetch.errors);

        streamed
    }

    async fn drain(
        &self,
        spec: &ObjectSpec,
        table: &str,
        stream: &mut RecordStream<'_>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut flattener = self.live_flattener(spec, table).await?;
        let mut pending = PendingBatch::new(self.config.load_batch_size);

        while let Some(page) = stream.next_page().await? {
            report.records_fetched += page.records.len();
            let batch = flattener.flatten_batch(&page.records);
            report.rows_skipped += batch.report.skipped;
            report.errors.extend(batch.report.errors.iter().cloned());
            pending.extend(batch);

            if pending.is_full() && self.flush(spec, table, &mut pending, report).await? {
                flattener = self.live_flattener(spec, table).await?;
            }
        }

        if !pending.is_empty() {
            self.flush(spec, table, &mut pending, report).await?;
        }
        Ok(())
    }

    /// Add missing columns for the buffered rows, then upsert them
    ///
    /// Returns whether the destination gained columns.
    async fn flush(
        &self,
        spec: &ObjectSpec,
        table: &str,
        pending: &mut PendingBatch,
        report: &mut SyncReport,
    ) -> Result<bool> {
        let batch = pending.take();
        let change = self
            .schema
            .reconcile(table, &batch.fragment().to_fields())
            .await?;
        let evolved = !change.added.is_empty();
        report.fields_added.extend(change.added);

        let load = self.loader.load(&batch.rows(), table, &spec.key_field).await?;
        report.rows_loaded += load.staged;
        report.rows_skipped += load.skipped;
        if !load.dropped_columns.is_empty() {
            warn!(
                object_type = %spec.name,
                columns = ?load.dropped_columns,
                "Row fields without a destination column were dropped"
            );
        }
        Ok(evolved)
    }

    /// Declare columns from property metadata ahead of the first load
    ///
    /// A metadata failure falls back to inferring columns from records.
    async fn declare_properties(
        &self,
        spec: &ObjectSpec,
        table: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        if !self.config.declare_properties || spec.property_object.is_none() {
            return Ok(());
        }

        let definitions = match self.source.get_property_definitions(spec).await {
            Ok(definitions) => definitions,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(object_type = %spec.name, "Property metadata unavailable, inferring from records: {e}");
                report.errors.push(format!("properties: {e}"));
                return Ok(());
            }
        };
        if definitions.is_empty() {
            return Ok(());
        }

        let change = self
            .schema
            .declare_from_properties(table, &definitions, self.config.flatten.max_name_len)
            .await?;
        report.fields_added.extend(change.added);
        Ok(())
    }

    /// Flattener keeping the destination's structured columns intact
    fn flattener(&self, spec: &ObjectSpec, schema: &TableSchema) -> Flattener {
        let rules = self.config.flatten.clone().with_structured_columns(schema);
        Flattener::new(rules).with_modified_fields(&spec.modified_fields)
    }

    async fn live_flattener(&self, spec: &ObjectSpec, table: &str) -> Result<Flattener> {
        let schema = self
            .warehouse
            .get_table(table)
            .await?
            .ok_or_else(|| Error::table_not_found(table))?;
        Ok(self.flattener(spec, &schema))
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("objects", &self.catalog.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
