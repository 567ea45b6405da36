//! Destination schema module
//!
//! Types, inference, and additive evolution of destination tables.
//!
//! # Features
//!
//! - **Type Inference**: Column types from flattened values and field names
//! - **Source Mapping**: Column types from source property definitions
//! - **Name Sanitization**: Destination-safe field names with a length cap
//! - **Additive Evolution**: Missing fields are added, nothing is retyped

mod evolution;
mod inference;
mod types;

pub use evolution::{
    fields_from_properties, plan_additions, standard_fields, SchemaAddition, SchemaChange,
    SchemaConflict, SchemaManager, SchemaPlan,
};
pub use inference::{infer_type, map_source_type, sanitize_field_name, TIMESTAMP_SUFFIX};
pub use types::{merge_types, ColumnType, FieldMode, FieldSchema, SchemaFragment, TableSchema};

#[cfg(test)]
mod tests;
