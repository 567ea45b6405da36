//! Record flattener

use super::types::{FlatRecord, FlattenRules, FlattenedBatch};
use crate::error::{Error, Result};
use crate::schema::{infer_type, sanitize_field_name, ColumnType, SchemaFragment};
use crate::types::{JsonObject, JsonValue};
use crate::value::{extract_modified_at, parse_timestamp, FieldValue};
use crate::warehouse::Row;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Turns nested source records into flat rows
#[derive(Debug, Clone)]
pub struct Flattener {
    rules: FlattenRules,
    modified_fields: Vec<String>,
    synced_at: DateTime<Utc>,
}

/// Per-record accumulator
struct Builder<'r> {
    rules: &'r FlattenRules,
    values: Row,
    fragment: SchemaFragment,
    dropped: Vec<String>,
}

impl Flattener {
    /// Create a flattener stamping rows with the current time
    pub fn new(rules: FlattenRules) -> Self {
        Self {
            rules,
            modified_fields: Vec::new(),
            synced_at: Utc::now(),
        }
    }

    /// Paths consulted for the record's modification time
    #[must_use]
    pub fn with_modified_fields(mut self, fields: &[String]) -> Self {
        self.modified_fields = fields.to_vec();
        self
    }

    /// Fix the synchronization timestamp
    #[must_use]
    pub fn with_synced_at(mut self, synced_at: DateTime<Utc>) -> Self {
        self.synced_at = synced_at;
        self
    }

    /// Rules in use
    pub fn rules(&self) -> &FlattenRules {
        &self.rules
    }

    /// Flatten one record
    pub fn flatten(&self, record: &JsonValue) -> Result<FlatRecord> {
        let object = record
            .as_object()
            .ok_or_else(|| Error::unexpected(format!("record is not an object: {record}")))?;

        let mut builder = Builder {
            rules: &self.rules,
            values: Row::new(),
            fragment: SchemaFragment::new(),
            dropped: Vec::new(),
        };

        // Top-level fields first so they win over container properties
        for (key, value) in object {
            if self.container(key, value).is_some() {
                continue;
            }
            builder.walk(vec![key.clone()], value);
        }

        let mut collisions = Vec::new();
        for key in &self.rules.container_keys {
            let Some(properties) = object.get(key).and_then(JsonValue::as_object) else {
                continue;
            };
            for (name, value) in properties {
                if builder.shadows(name) {
                    debug!(field = %name, container = %key, "Container property shadowed");
                    collisions.push(name.clone());
                    continue;
                }
                builder.walk(vec![name.clone()], value);
            }
        }

        let synced_at = self.rules.synced_at_field.clone();
        builder
            .fragment
            .observe(&synced_at, ColumnType::Timestamp, false);
        builder
            .values
            .insert(synced_at, FieldValue::Timestamp(self.synced_at));

        Ok(FlatRecord {
            values: builder.values,
            fragment: builder.fragment,
            modified_at: extract_modified_at(record, &self.modified_fields),
            dropped: builder.dropped,
            collisions,
        })
    }

    /// Flatten a batch, collecting failures instead of aborting
    pub fn flatten_batch(&self, records: &[JsonValue]) -> FlattenedBatch {
        let mut batch = FlattenedBatch::default();

        for (index, record) in records.iter().enumerate() {
            match self.flatten(record) {
                Ok(flat) => {
                    batch.fragment.merge(&flat.fragment);
                    for name in &flat.dropped {
                        if !batch.report.dropped_fields.contains(name) {
                            batch.report.dropped_fields.push(name.clone());
                        }
                    }
                    batch.report.processed += 1;
                    batch.records.push(flat);
                }
                Err(e) => {
                    warn!(index, "Skipping record: {e}");
                    batch.report.skipped += 1;
                    batch.report.errors.push(format!("record {index}: {e}"));
                }
            }
        }

        batch
    }

    fn container<'v>(&self, key: &str, value: &'v JsonValue) -> Option<&'v JsonObject> {
        if self.rules.container_keys.iter().any(|k| k == key) {
            value.as_object()
        } else {
            None
        }
    }
}

impl Builder<'_> {
    fn shadows(&self, name: &str) -> bool {
        sanitize_field_name(name, self.rules.max_name_len)
            .is_some_and(|clean| self.values.contains_key(&clean))
    }

    fn walk(&mut self, segments: Vec<String>, value: &JsonValue) {
        let Some(name) = self.field_name(&segments) else {
            let raw = segments.join(&self.rules.separator);
            warn!(field = %raw, max = self.rules.max_name_len, "Field name too long, dropped");
            self.dropped.push(raw);
            return;
        };

        if self.is_passthrough(&name) && (value.is_object() || value.is_array()) {
            self.insert(name, FieldValue::from_json(value), ColumnType::Json);
            return;
        }

        match value {
            JsonValue::Object(children) => {
                let prefixed = segments
                    .last()
                    .is_some_and(|last| self.rules.prefixed_containers.contains(last));
                for (key, child) in children {
                    let mut path = segments.clone();
                    if prefixed {
                        if let Some(last) = path.last_mut() {
                            *last = format!("{last}_{key}");
                        }
                    } else {
                        path.push(key.clone());
                    }
                    self.walk(path, child);
                }
            }
            JsonValue::Array(items) => {
                let text = if items.is_empty() {
                    "[]".to_string()
                } else {
                    value.to_string()
                };
                self.insert(name, FieldValue::String(text), ColumnType::String);
            }
            _ => self.scalar(name, value),
        }
    }

    fn scalar(&mut self, name: String, value: &JsonValue) {
        let wants_timestamp = name.ends_with(&self.rules.timestamp_suffix)
            || self.rules.timestamp_fields.iter().any(|f| *f == name);

        if wants_timestamp {
            if let Some(ts) = parse_timestamp(value) {
                self.insert(name, FieldValue::Timestamp(ts), ColumnType::Timestamp);
                return;
            }
        }

        let field_value = FieldValue::from_json(value);
        let column_type = if name.ends_with(&self.rules.timestamp_suffix) {
            ColumnType::Timestamp
        } else {
            infer_type(&field_value, &name)
        };
        self.insert(name, field_value, column_type);
    }

    fn insert(&mut self, name: String, value: FieldValue, column_type: ColumnType) {
        self.fragment.observe(&name, column_type, value.is_null());
        self.values.insert(name, value);
    }

    fn field_name(&self, segments: &[String]) -> Option<String> {
        let max = self.rules.max_name_len;
        if self.rules.nests() {
            let parts = segments
                .iter()
                .map(|s| sanitize_field_name(s, max))
                .collect::<Option<Vec<_>>>()?;
            Some(parts.join("."))
        } else {
            sanitize_field_name(&segments.join(&self.rules.separator), max)
        }
    }

    fn is_passthrough(&self, name: &str) -> bool {
        self.rules
            .passthrough_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
    }
}
