//! Destination schema types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Column type in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// Semi-structured value stored as-is
    Json,
    /// Record with typed child fields
    Nested,
}

impl ColumnType {
    /// Canonical upper-case name
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Json => "JSON",
            ColumnType::Nested => "NESTED",
        }
    }

    /// Parse a canonical name (case-insensitive); `RECORD` is accepted for `NESTED`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => Some(ColumnType::String),
            "INTEGER" => Some(ColumnType::Integer),
            "FLOAT" => Some(ColumnType::Float),
            "BOOLEAN" => Some(ColumnType::Boolean),
            "TIMESTAMP" => Some(ColumnType::Timestamp),
            "JSON" => Some(ColumnType::Json),
            "NESTED" | "RECORD" => Some(ColumnType::Nested),
            _ => None,
        }
    }

    /// Whether values of this type are passed through without stringifying
    pub fn is_structured(self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Nested)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field nullability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
}

/// A destination field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Sanitized field name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Nullability
    #[serde(default)]
    pub mode: FieldMode,
    /// Children of a `NESTED` field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    /// Create a nullable field
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode: FieldMode::Nullable,
            fields: Vec::new(),
        }
    }

    /// Create a nested field with children
    pub fn nested(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Nested,
            mode: FieldMode::Nullable,
            fields,
        }
    }

    /// Mark the field as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.mode = FieldMode::Required;
        self
    }

    /// Whether this field holds child fields
    pub fn is_nested(&self) -> bool {
        self.column_type == ColumnType::Nested
    }

    /// Case-insensitive child lookup
    pub fn child(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// A destination table's schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Top-level fields, in declaration order
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Create a schema from fields
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Initial schema for a new destination table
    pub fn initial(key_field: &str, synced_at_field: &str) -> Self {
        Self::new(vec![
            FieldSchema::new(key_field, ColumnType::String).required(),
            FieldSchema::new(synced_at_field, ColumnType::Timestamp),
        ])
    }

    /// Case-insensitive top-level lookup
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive lookup of a dotted path
    pub fn lookup(&self, path: &str) -> Option<&FieldSchema> {
        let mut parts = path.split('.');
        let first = self.field(parts.next()?)?;
        parts.try_fold(first, |field, part| field.child(part))
    }

    /// Every field path, dotted for nested fields, depth first
    pub fn field_paths(&self) -> Vec<String> {
        fn walk(fields: &[FieldSchema], prefix: Option<&str>, out: &mut Vec<String>) {
            for field in fields {
                let path = match prefix {
                    Some(p) => format!("{p}.{}", field.name),
                    None => field.name.clone(),
                };
                out.push(path.clone());
                if field.is_nested() {
                    walk(&field.fields, Some(&path), out);
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.fields, None, &mut out);
        out
    }

    /// Top-level column names, in order
    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Number of fields including nested children
    pub fn len(&self) -> usize {
        self.field_paths().len()
    }

    /// Whether the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Observed field types, merged across records
///
/// Keeps first-seen order. A type seen only on null values is weak and
/// yields to any later non-null observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaFragment {
    entries: Vec<FragmentEntry>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct FragmentEntry {
    name: String,
    column_type: ColumnType,
    from_null: bool,
}

impl SchemaFragment {
    /// Create an empty fragment
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation
    pub fn observe(&mut self, name: &str, column_type: ColumnType, from_null: bool) {
        match self.index.get(name) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                entry.column_type =
                    merge_types(entry.column_type, entry.from_null, column_type, from_null);
                entry.from_null = entry.from_null && from_null;
            }
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(FragmentEntry {
                    name: name.to_string(),
                    column_type,
                    from_null,
                });
            }
        }
    }

    /// Merge another fragment into this one
    pub fn merge(&mut self, other: &SchemaFragment) {
        for entry in &other.entries {
            self.observe(&entry.name, entry.column_type, entry.from_null);
        }
    }

    /// Type observed for a field
    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.index.get(name).map(|&i| self.entries[i].column_type)
    }

    /// Observed names in first-seen order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of observed fields
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was observed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to destination fields
    ///
    /// Dotted names (`initial_params.utm_source`) become `NESTED` fields with
    /// typed children.
    pub fn to_fields(&self) -> Vec<FieldSchema> {
        let mut fields: Vec<FieldSchema> = Vec::new();
        for entry in &self.entries {
            let parts: Vec<&str> = entry.name.split('.').collect();
            insert_path(&mut fields, &parts, entry.column_type);
        }
        fields
    }
}

fn insert_path(fields: &mut Vec<FieldSchema>, parts: &[&str], column_type: ColumnType) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };

    if rest.is_empty() {
        if !fields.iter().any(|f| f.name == *head) {
            fields.push(FieldSchema::new(*head, column_type));
        }
        return;
    }

    let idx = match fields.iter().position(|f| f.name == *head) {
        Some(i) => i,
        None => {
            fields.push(FieldSchema::nested(*head, Vec::new()));
            fields.len() - 1
        }
    };

    // A scalar already declared under this name cannot also hold children
    if fields[idx].is_nested() {
        insert_path(&mut fields[idx].fields, rest, column_type);
    }
}

/// Merge two observed types for one field
pub fn merge_types(
    existing: ColumnType,
    existing_from_null: bool,
    incoming: ColumnType,
    incoming_from_null: bool,
) -> ColumnType {
    if existing == incoming {
        return existing;
    }
    if existing_from_null && !incoming_from_null {
        return incoming;
    }
    if incoming_from_null {
        return existing;
    }
    match (existing, incoming) {
        (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
            ColumnType::Float
        }
        _ => existing,
    }
}
