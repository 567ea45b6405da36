//! Column type inference and field-name sanitization

use super::types::ColumnType;
use crate::value::FieldValue;
use once_cell::sync::Lazy;
use regex::Regex;

/// Suffix marking a field as a timestamp regardless of its value
pub const TIMESTAMP_SUFFIX: &str = "_ts";

static INVALID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());

/// Sanitize a field name for the destination
///
/// Invalid characters become `_`, and a leading `_` is added unless the name
/// starts with a letter or underscore. Returns `None` when the result exceeds
/// `max_len`; such fields are dropped, never truncated.
pub fn sanitize_field_name(name: &str, max_len: usize) -> Option<String> {
    let mut sanitized = INVALID_CHARS.replace_all(name, "_").into_owned();

    let starts_ok = sanitized
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        sanitized.insert(0, '_');
    }

    (sanitized.len() <= max_len).then_some(sanitized)
}

/// Infer a column type from a value and its field name
///
/// Priority: timestamp suffix, booleans, integers, floats, timestamps,
/// arrays (by first element, empty is STRING), then STRING.
pub fn infer_type(value: &FieldValue, field_name: &str) -> ColumnType {
    if field_name.ends_with(TIMESTAMP_SUFFIX) {
        return ColumnType::Timestamp;
    }

    match value {
        FieldValue::Bool(_) => ColumnType::Boolean,
        FieldValue::Int(_) => ColumnType::Integer,
        FieldValue::Float(_) => ColumnType::Float,
        FieldValue::Timestamp(_) => ColumnType::Timestamp,
        FieldValue::Array(items) => items
            .first()
            .map_or(ColumnType::String, |first| infer_type(first, "")),
        FieldValue::Null | FieldValue::String(_) | FieldValue::Map(_) => ColumnType::String,
    }
}

/// Map a source property type name to a column type
///
/// Names ending in `_ts` or `date`, or containing `_date_`, are timestamps.
/// Numeric properties named like identifiers or counts map to INTEGER.
pub fn map_source_type(source_type: &str, field_name: &str) -> ColumnType {
    let name = field_name.to_ascii_lowercase();
    if name.ends_with(TIMESTAMP_SUFFIX) || name.ends_with("date") || name.contains("_date_") {
        return ColumnType::Timestamp;
    }

    match source_type.to_ascii_lowercase().as_str() {
        "number" | "numeric" | "float" | "double" => {
            if name.ends_with("id") || name.ends_with("count") {
                ColumnType::Integer
            } else {
                ColumnType::Float
            }
        }
        "integer" | "int" => ColumnType::Integer,
        "date" | "datetime" | "timestamp" => ColumnType::Timestamp,
        "bool" | "boolean" | "booleancheckbox" => ColumnType::Boolean,
        "json" | "object" => ColumnType::Json,
        _ => ColumnType::String,
    }
}
