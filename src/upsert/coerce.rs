//! Value coercion to declared column types

use crate::schema::ColumnType;
use crate::value::{format_timestamp, FieldValue};

/// Outcome of coercing one value
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// Already the right type
    Unchanged(FieldValue),
    /// Converted without loss
    Converted(FieldValue),
    /// Could not be represented; written as NULL
    Nulled,
}

impl Coerced {
    /// The value to write
    pub fn into_value(self) -> FieldValue {
        match self {
            Coerced::Unchanged(v) | Coerced::Converted(v) => v,
            Coerced::Nulled => FieldValue::Null,
        }
    }
}

/// Coerce a value to a column type
pub fn coerce(value: FieldValue, column_type: ColumnType) -> Coerced {
    use FieldValue as V;

    match (column_type, value) {
        (_, V::Null) => Coerced::Unchanged(V::Null),

        (ColumnType::String, v @ V::String(_)) => Coerced::Unchanged(v),
        (ColumnType::String, V::Timestamp(ts)) => Coerced::Converted(V::String(format_timestamp(&ts))),
        (ColumnType::String, v) => match v.to_text() {
            Some(text) => Coerced::Converted(V::String(text)),
            None => Coerced::Nulled,
        },

        (ColumnType::Integer, v @ V::Int(_)) => Coerced::Unchanged(v),
        (ColumnType::Integer, V::Float(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
            Coerced::Converted(V::Int(f as i64))
        }
        (ColumnType::Integer, V::String(s)) => parse_integer(s.trim()),

        (ColumnType::Float, v @ V::Float(_)) => Coerced::Unchanged(v),
        (ColumnType::Float, V::Int(i)) => Coerced::Converted(V::Float(i as f64)),
        (ColumnType::Float, V::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map_or(Coerced::Nulled, |f| Coerced::Converted(V::Float(f))),

        (ColumnType::Boolean, v @ V::Bool(_)) => Coerced::Unchanged(v),
        (ColumnType::Boolean, V::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Coerced::Converted(V::Bool(true)),
            "false" => Coerced::Converted(V::Bool(false)),
            _ => Coerced::Nulled,
        },
        (ColumnType::Boolean, V::Int(i)) if i == 0 || i == 1 => Coerced::Converted(V::Bool(i == 1)),

        (ColumnType::Timestamp, v @ V::Timestamp(_)) => Coerced::Unchanged(v),
        (ColumnType::Timestamp, v @ (V::String(_) | V::Int(_) | V::Float(_))) => v
            .as_timestamp()
            .map_or(Coerced::Nulled, |ts| Coerced::Converted(V::Timestamp(ts))),

        (ColumnType::Json | ColumnType::Nested, v) => Coerced::Unchanged(v),

        _ => Coerced::Nulled,
    }
}

fn parse_integer(s: &str) -> Coerced {
    if let Ok(i) = s.parse::<i64>() {
        return Coerced::Converted(FieldValue::Int(i));
    }
    match s.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Coerced::Converted(FieldValue::Int(f as i64)),
        _ => Coerced::Nulled,
    }
}
