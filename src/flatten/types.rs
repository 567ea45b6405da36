//! Flattener types

use crate::schema::{ColumnType, SchemaFragment, TableSchema};
use crate::value::FieldValue;
use crate::warehouse::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How nested records map onto flat rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenRules {
    /// Property bags whose children are lifted to the top level unprefixed
    pub container_keys: Vec<String>,
    /// Joins nested path segments; `.` yields nested record fields
    pub separator: String,
    /// Containers whose children keep the container name as a `_` prefix
    pub prefixed_containers: Vec<String>,
    /// Longest allowed field name; longer fields are dropped
    pub max_name_len: usize,
    /// Field receiving the synchronization timestamp
    pub synced_at_field: String,
    /// Name suffix forcing a TIMESTAMP column
    pub timestamp_suffix: String,
    /// Fields whose string values are parsed as timestamps
    pub timestamp_fields: Vec<String>,
    /// Fields kept as native structured values instead of JSON text
    pub passthrough_fields: Vec<String>,
}

impl Default for FlattenRules {
    fn default() -> Self {
        Self {
            container_keys: vec!["properties".to_string()],
            separator: "_".to_string(),
            prefixed_containers: Vec::new(),
            max_name_len: 128,
            synced_at_field: "synced_at".to_string(),
            timestamp_suffix: crate::schema::TIMESTAMP_SUFFIX.to_string(),
            timestamp_fields: vec!["createdAt".to_string(), "updatedAt".to_string()],
            passthrough_fields: Vec::new(),
        }
    }
}

impl FlattenRules {
    /// Set the path separator
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Set the container keys
    #[must_use]
    pub fn with_container_keys(mut self, keys: &[&str]) -> Self {
        self.container_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Add a prefixed container
    #[must_use]
    pub fn with_prefixed_container(mut self, key: impl Into<String>) -> Self {
        self.prefixed_containers.push(key.into());
        self
    }

    /// Add a passthrough field
    #[must_use]
    pub fn with_passthrough(mut self, field: impl Into<String>) -> Self {
        self.passthrough_fields.push(field.into());
        self
    }

    /// Pass through every structured column the destination declares
    ///
    /// JSON columns always qualify. NESTED columns qualify only when paths
    /// are joined flat; with `.` they keep growing through dotted children.
    #[must_use]
    pub fn with_structured_columns(mut self, schema: &TableSchema) -> Self {
        for path in schema.field_paths() {
            let structured = match schema.lookup(&path).map(|f| f.column_type) {
                Some(ColumnType::Json) => true,
                Some(ColumnType::Nested) => !self.nests(),
                _ => false,
            };
            let known = self
                .passthrough_fields
                .iter()
                .any(|f| f.eq_ignore_ascii_case(&path));
            if structured && !known {
                self.passthrough_fields.push(path);
            }
        }
        self
    }

    /// Set the name length cap
    #[must_use]
    pub fn with_max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// Whether nested paths become nested record fields
    pub fn nests(&self) -> bool {
        self.separator == "."
    }
}

/// One flattened record
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    /// Field values keyed by sanitized (possibly dotted) name
    pub values: Row,
    /// Types observed in this record
    pub fragment: SchemaFragment,
    /// Modification time of the source record
    pub modified_at: Option<DateTime<Utc>>,
    /// Fields dropped because their names exceed the cap
    pub dropped: Vec<String>,
    /// Container properties shadowed by a top-level field of the same name
    pub collisions: Vec<String>,
}

impl FlatRecord {
    /// Value of a field
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Key value as text, `None` when missing or null
    pub fn key(&self, key_field: &str) -> Option<String> {
        self.values.get(key_field).and_then(FieldValue::to_text)
    }
}

/// Counters for one flattened batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenReport {
    /// Records flattened
    pub processed: usize,
    /// Records that could not be flattened
    pub skipped: usize,
    /// Why records were skipped
    pub errors: Vec<String>,
    /// Distinct field names dropped for length
    pub dropped_fields: Vec<String>,
}

/// A flattened batch with its merged schema fragment
#[derive(Debug, Clone, Default)]
pub struct FlattenedBatch {
    /// Flattened records, in input order
    pub records: Vec<FlatRecord>,
    /// Types observed across the batch
    pub fragment: SchemaFragment,
    /// Counters
    pub report: FlattenReport,
}

/// Flattened records awaiting a staged load
///
/// Bounded by a record limit; the engine flushes it to the loader when full
/// and once more at the end of a stream.
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    records: Vec<FlatRecord>,
    fragment: SchemaFragment,
    limit: usize,
}

impl PendingBatch {
    /// Create an empty batch; a limit of 0 never fills
    pub fn new(limit: usize) -> Self {
        Self {
            records: Vec::new(),
            fragment: SchemaFragment::new(),
            limit,
        }
    }

    /// Add a record
    pub fn push(&mut self, record: FlatRecord) {
        self.fragment.merge(&record.fragment);
        self.records.push(record);
    }

    /// Add every record of a flattened batch
    pub fn extend(&mut self, batch: FlattenedBatch) {
        self.fragment.merge(&batch.fragment);
        self.records.extend(batch.records);
    }

    /// Whether the batch reached its limit
    pub fn is_full(&self) -> bool {
        self.limit > 0 && self.records.len() >= self.limit
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Types observed across the batch
    pub fn fragment(&self) -> &SchemaFragment {
        &self.fragment
    }

    /// Row values, in insertion order
    pub fn rows(&self) -> Vec<Row> {
        self.records.iter().map(|r| r.values.clone()).collect()
    }

    /// Latest modification time in the batch
    pub fn high_watermark(&self) -> Option<DateTime<Utc>> {
        self.records.iter().filter_map(|r| r.modified_at).max()
    }

    /// Take the contents, leaving an empty batch with the same limit
    pub fn take(&mut self) -> PendingBatch {
        let limit = self.limit;
        std::mem::replace(self, PendingBatch::new(limit))
    }
}
