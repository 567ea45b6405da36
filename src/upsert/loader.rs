//! Stage-then-merge bulk loader

use super::coerce::{coerce, Coerced};
use super::merge::MergePlan;
use crate::error::{Error, Result};
use crate::schema::{FieldSchema, TableSchema};
use crate::value::FieldValue;
use crate::warehouse::{Row, Warehouse};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Outcome of one load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows merged into the destination (after dedup)
    pub staged: usize,
    /// Rows skipped for a missing key
    pub skipped: usize,
    /// Values converted to the declared column type
    pub coerced: usize,
    /// Values that could not be converted and were written as NULL
    pub nulled: usize,
    /// Row fields the destination has no column for
    pub dropped_columns: Vec<String>,
    /// Staging table used, if any rows were staged
    pub staging_table: Option<String>,
}

/// Upserts batches of rows through a temporary staging table
pub struct BulkLoader {
    warehouse: Arc<dyn Warehouse>,
}

impl BulkLoader {
    /// Create a loader
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Upsert rows into `table` on `key_field`
    ///
    /// Rows are staged into a fresh table shaped like the destination, then
    /// merged in one statement. The staging table is always dropped.
    pub async fn load(&self, rows: &[Row], table: &str, key_field: &str) -> Result<LoadReport> {
        let schema = self
            .warehouse
            .get_table(table)
            .await?
            .ok_or_else(|| Error::table_not_found(table))?;
        let key_column = schema
            .field(key_field)
            .map(|f| f.name.clone())
            .ok_or_else(|| Error::warehouse(format!("'{table}' has no key column '{key_field}'")))?;

        let mut report = LoadReport::default();
        let prepared = prepare_rows(rows, &schema, &key_column, &mut report);
        if prepared.is_empty() {
            debug!(table = %table, skipped = report.skipped, "Nothing to load");
            return Ok(report);
        }

        let columns: Vec<String> = schema
            .fields
            .iter()
            .filter(|f| f.name == key_column || prepared.iter().any(|r| r.contains_key(&f.name)))
            .map(|f| f.name.clone())
            .collect();
        let staging_schema = TableSchema::new(
            schema
                .fields
                .iter()
                .filter(|f| columns.contains(&f.name))
                .cloned()
                .collect(),
        );

        let staging = staging_table_name(table);
        report.staging_table = Some(staging.clone());
        self.warehouse.create_table(&staging, &staging_schema).await?;

        let result = self
            .stage_and_merge(&prepared, table, &staging, &key_column, columns)
            .await;

        if let Err(e) = self.warehouse.delete_table(&staging).await {
            warn!(staging = %staging, "Failed to drop staging table: {e}");
        }

        result?;
        report.staged = prepared.len();
        info!(
            table = %table,
            staged = report.staged,
            skipped = report.skipped,
            coerced = report.coerced,
            "Merged batch"
        );
        Ok(report)
    }

    async fn stage_and_merge(
        &self,
        rows: &[Row],
        table: &str,
        staging: &str,
        key_column: &str,
        columns: Vec<String>,
    ) -> Result<()> {
        if let Err(e) = self.warehouse.bulk_load(staging, rows).await {
            error!(table = %table, staging = %staging, "Staging load failed: {e}");
            return Err(match e {
                e @ Error::StagingLoad { .. } => e,
                other => Error::StagingLoad {
                    table: staging.to_string(),
                    message: other.to_string(),
                },
            });
        }

        let plan = MergePlan::new(table, staging, key_column, columns);
        self.warehouse.merge(&plan).await.map_err(|e| {
            error!(table = %table, "Merge failed: {e}");
            match e {
                e @ Error::Merge { .. } => e,
                other => Error::Merge {
                    table: table.to_string(),
                    message: other.to_string(),
                },
            }
        })
    }
}

impl std::fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoader").finish_non_exhaustive()
    }
}

/// Unique staging table name for a destination
pub fn staging_table_name(table: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{table}__stage_{nanos:x}_{counter}")
}

/// Align rows with the destination schema, dropping keyless rows and
/// collapsing duplicate keys (last wins)
fn prepare_rows(
    rows: &[Row],
    schema: &TableSchema,
    key_column: &str,
    report: &mut LoadReport,
) -> Vec<Row> {
    let columns: HashMap<String, &FieldSchema> = schema
        .fields
        .iter()
        .map(|f| (f.name.to_ascii_lowercase(), f))
        .collect();

    let mut prepared: Vec<Row> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let aligned = align_row(row, &columns, report);

        let Some(key) = aligned.get(key_column).and_then(FieldValue::to_text) else {
            report.skipped += 1;
            continue;
        };

        match positions.get(&key) {
            Some(&i) => prepared[i] = aligned,
            None => {
                positions.insert(key, prepared.len());
                prepared.push(aligned);
            }
        }
    }

    if prepared.len() + report.skipped < rows.len() {
        debug!(
            duplicates = rows.len() - prepared.len() - report.skipped,
            "Collapsed duplicate keys"
        );
    }
    prepared
}

fn align_row(row: &Row, columns: &HashMap<String, &FieldSchema>, report: &mut LoadReport) -> Row {
    let mut aligned = Row::new();
    let mut nested: BTreeMap<String, BTreeMap<String, FieldValue>> = BTreeMap::new();

    for (name, value) in row {
        let (head, rest) = match name.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name.as_str(), None),
        };

        let column = columns
            .get(&head.to_ascii_lowercase())
            .filter(|c| rest.is_none() || c.is_nested());
        let Some(column) = column else {
            if !report.dropped_columns.contains(name) {
                warn!(field = %name, "Destination has no column for field, dropped");
                report.dropped_columns.push(name.clone());
            }
            continue;
        };

        if let Some(path) = rest {
            insert_nested(nested.entry(column.name.clone()).or_default(), path, value.clone());
            continue;
        }

        match coerce(value.clone(), column.column_type) {
            Coerced::Unchanged(v) => {
                aligned.insert(column.name.clone(), v);
            }
            Coerced::Converted(v) => {
                report.coerced += 1;
                aligned.insert(column.name.clone(), v);
            }
            Coerced::Nulled => {
                warn!(
                    field = %name,
                    column_type = %column.column_type,
                    "Value does not fit column type, written as NULL"
                );
                report.nulled += 1;
                aligned.insert(column.name.clone(), FieldValue::Null);
            }
        }
    }

    for (column, children) in nested {
        aligned.insert(column, FieldValue::Map(children));
    }
    aligned
}

fn insert_nested(map: &mut BTreeMap<String, FieldValue>, path: &str, value: FieldValue) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| FieldValue::Map(BTreeMap::new()));
            if let FieldValue::Map(children) = entry {
                insert_nested(children, rest, value);
            }
        }
    }
}
