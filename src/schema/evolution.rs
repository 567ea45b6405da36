//! Additive schema evolution
//!
//! The destination schema only grows: missing fields are added, existing
//! fields keep their declared type forever. Planning is pure; the
//! [`SchemaManager`] reads the live schema, plans, and patches.

use super::inference::{map_source_type, sanitize_field_name};
use super::types::{ColumnType, FieldSchema, TableSchema};
use crate::error::{Error, Result};
use crate::source::PropertyDefinition;
use crate::warehouse::Warehouse;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A field to add, optionally under an existing nested field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaAddition {
    /// Dotted path of the existing parent, `None` for top level
    pub parent_path: Option<String>,
    /// The new field, with any children
    pub field: FieldSchema,
}

impl SchemaAddition {
    /// Full dotted path of the added field
    pub fn path(&self) -> String {
        match &self.parent_path {
            Some(parent) => format!("{parent}.{}", self.field.name),
            None => self.field.name.clone(),
        }
    }
}

/// An observed field that cannot be reconciled additively
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaConflict {
    /// Dotted path of the conflicting field
    pub path: String,
    /// Declared type in the destination
    pub existing: ColumnType,
    /// Observed type
    pub observed: ColumnType,
}

/// Result of planning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    /// Fields to add
    pub additions: Vec<SchemaAddition>,
    /// Fields skipped because of a nesting conflict
    pub conflicts: Vec<SchemaConflict>,
}

impl SchemaPlan {
    /// Whether there is nothing to patch
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
    }
}

/// Outcome of a reconcile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaChange {
    /// Dotted paths of added fields
    pub added: Vec<String>,
    /// Conflicts that were skipped
    pub conflicts: Vec<SchemaConflict>,
}

/// Plan the additive patch turning `existing` into a superset of `observed`
///
/// Names are compared case-insensitively.
pub fn plan_additions(existing: &TableSchema, observed: &[FieldSchema]) -> SchemaPlan {
    let mut plan = SchemaPlan::default();
    plan_level(&existing.fields, observed, None, &mut plan);
    plan
}

fn plan_level(
    existing: &[FieldSchema],
    observed: &[FieldSchema],
    parent: Option<&str>,
    plan: &mut SchemaPlan,
) {
    let mut seen = HashSet::new();

    for field in observed {
        if !seen.insert(field.name.to_ascii_lowercase()) {
            continue;
        }

        let path = match parent {
            Some(p) => format!("{p}.{}", field.name),
            None => field.name.clone(),
        };

        let current = existing
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(&field.name));

        match current {
            None => plan.additions.push(SchemaAddition {
                parent_path: parent.map(String::from),
                field: field.clone(),
            }),
            Some(current) if current.is_nested() && field.is_nested() => {
                plan_level(&current.fields, &field.fields, Some(&path), plan);
            }
            Some(current) if current.is_nested() != field.is_nested() => {
                plan.conflicts.push(SchemaConflict {
                    path,
                    existing: current.column_type,
                    observed: field.column_type,
                });
            }
            Some(_) => {}
        }
    }
}

/// Standard fields declared for every property-backed object type
pub fn standard_fields(synced_at_field: &str) -> Vec<FieldSchema> {
    vec![
        FieldSchema::new("id", ColumnType::String),
        FieldSchema::new("createdAt", ColumnType::Timestamp),
        FieldSchema::new("updatedAt", ColumnType::Timestamp),
        FieldSchema::new("archived", ColumnType::Boolean),
        FieldSchema::new(synced_at_field, ColumnType::Timestamp),
    ]
}

/// Destination fields for a set of property definitions
///
/// Hidden properties are skipped unless prefixed `hs_`; names that do not
/// fit the length cap are skipped.
pub fn fields_from_properties(
    definitions: &[PropertyDefinition],
    max_name_len: usize,
    synced_at_field: &str,
) -> Vec<FieldSchema> {
    let mut fields = standard_fields(synced_at_field);

    for def in definitions {
        if def.hidden && !def.name.starts_with("hs_") {
            continue;
        }
        let Some(name) = sanitize_field_name(&def.name, max_name_len) else {
            warn!(property = %def.name, "Property name too long, not declared");
            continue;
        };
        let column_type = map_source_type(&def.type_name, &name);
        fields.push(FieldSchema::new(name, column_type));
    }

    fields
}

/// Applies additive patches against a live warehouse
pub struct SchemaManager {
    warehouse: Arc<dyn Warehouse>,
    synced_at_field: String,
}

impl SchemaManager {
    /// Create a manager
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse,
            synced_at_field: "synced_at".to_string(),
        }
    }

    /// Set the synchronization timestamp field name
    #[must_use]
    pub fn with_synced_at_field(mut self, field: impl Into<String>) -> Self {
        self.synced_at_field = field.into();
        self
    }

    /// Create the destination if missing; returns its current schema
    pub async fn ensure_table(&self, table: &str, key_field: &str) -> Result<TableSchema> {
        if let Some(schema) = self.warehouse.get_table(table).await? {
            return Ok(schema);
        }

        info!(table = %table, "Creating destination table");
        let schema = TableSchema::initial(key_field, &self.synced_at_field);
        self.warehouse.create_table(table, &schema).await?;
        Ok(schema)
    }

    /// Add every observed field missing from the destination
    pub async fn reconcile(&self, table: &str, observed: &[FieldSchema]) -> Result<SchemaChange> {
        let plan = self.plan(table, observed).await?;
        if plan.is_empty() {
            debug!(table = %table, "Schema up to date");
            return Ok(SchemaChange {
                added: Vec::new(),
                conflicts: plan.conflicts,
            });
        }

        match self.warehouse.patch_schema(table, &plan.additions).await {
            Ok(()) => Ok(Self::applied(table, plan)),
            Err(first) => {
                // Another writer may have added some of the fields; re-plan once
                warn!(table = %table, "Schema patch failed, re-reading schema: {first}");
                let retry = self.plan(table, observed).await?;
                if retry.is_empty() {
                    return Ok(SchemaChange {
                        added: Vec::new(),
                        conflicts: retry.conflicts,
                    });
                }
                self.warehouse
                    .patch_schema(table, &retry.additions)
                    .await
                    .map_err(|e| Error::SchemaPatch {
                        table: table.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Self::applied(table, retry))
            }
        }
    }

    /// Pre-declare columns from the source's property definitions
    pub async fn declare_from_properties(
        &self,
        table: &str,
        definitions: &[PropertyDefinition],
        max_name_len: usize,
    ) -> Result<SchemaChange> {
        let fields = fields_from_properties(definitions, max_name_len, &self.synced_at_field);
        self.reconcile(table, &fields).await
    }

    async fn plan(&self, table: &str, observed: &[FieldSchema]) -> Result<SchemaPlan> {
        let existing = self
            .warehouse
            .get_table(table)
            .await?
            .ok_or_else(|| Error::table_not_found(table))?;

        let plan = plan_additions(&existing, observed);
        for conflict in &plan.conflicts {
            error!(
                table = %table,
                path = %conflict.path,
                existing = %conflict.existing,
                observed = %conflict.observed,
                "Schema conflict, field skipped"
            );
        }
        Ok(plan)
    }

    fn applied(table: &str, plan: SchemaPlan) -> SchemaChange {
        let added: Vec<String> = plan.additions.iter().map(SchemaAddition::path).collect();
        info!(table = %table, count = added.len(), fields = ?added, "Added fields");
        SchemaChange {
            added,
            conflicts: plan.conflicts,
        }
    }
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("synced_at_field", &self.synced_at_field)
            .finish_non_exhaustive()
    }
}
