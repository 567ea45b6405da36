//! In-process warehouse

use super::{Row, SqlDialect, Warehouse};
use crate::error::{Error, Result};
use crate::schema::{FieldSchema, SchemaAddition, TableSchema};
use crate::upsert::MergePlan;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    statements: Vec<String>,
}

/// Warehouse holding tables in memory
///
/// Merges are applied natively; other statements are recorded but not
/// executed. Failures can be injected per operation.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    dialect: SqlDialect,
    state: Mutex<MemoryState>,
    fail_loads: AtomicUsize,
    fail_merges: AtomicUsize,
    fail_patches: AtomicUsize,
}

impl MemoryWarehouse {
    /// Create an empty warehouse
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dialect used to render recorded merge statements
    #[must_use]
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Rows currently in a table
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Names of existing tables
    pub fn table_names(&self) -> Vec<String> {
        self.state().tables.keys().cloned().collect()
    }

    /// Statements passed to `run_sql` or rendered for merges
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Fail the next `count` bulk loads
    pub fn fail_next_loads(&self, count: usize) {
        self.fail_loads.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` merges
    pub fn fail_next_merges(&self, count: usize) {
        self.fail_merges.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` schema patches
    pub fn fail_next_patches(&self, count: usize) {
        self.fail_patches.store(count, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn nested_fields_mut<'a>(
    fields: &'a mut Vec<FieldSchema>,
    path: &str,
) -> Option<&'a mut Vec<FieldSchema>> {
    let mut current = fields;
    for part in path.split('.') {
        let field = current
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(part))?;
        if !field.is_nested() {
            return None;
        }
        current = &mut field.fields;
    }
    Some(current)
}

fn key_text(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.to_text())
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn get_table(&self, table: &str) -> Result<Option<TableSchema>> {
        Ok(self.state().tables.get(table).map(|t| t.schema.clone()))
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let mut state = self.state();
        if state.tables.contains_key(table) {
            return Err(Error::warehouse(format!("Table '{table}' already exists")));
        }
        state.tables.insert(
            table.to_string(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn patch_schema(&self, table: &str, additions: &[SchemaAddition]) -> Result<()> {
        if take_failure(&self.fail_patches) {
            return Err(Error::SchemaPatch {
                table: table.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let mut state = self.state();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;

        // Validate everything first so a failed patch changes nothing
        let mut patched = target.schema.clone();
        for addition in additions {
            let fields = match &addition.parent_path {
                Some(parent) => nested_fields_mut(&mut patched.fields, parent).ok_or_else(|| {
                    Error::SchemaPatch {
                        table: table.to_string(),
                        message: format!("'{parent}' is not a nested field"),
                    }
                })?,
                None => &mut patched.fields,
            };
            if fields
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&addition.field.name))
            {
                return Err(Error::SchemaPatch {
                    table: table.to_string(),
                    message: format!("field '{}' already exists", addition.path()),
                });
            }
            fields.push(addition.field.clone());
        }

        target.schema = patched;
        Ok(())
    }

    async fn bulk_load(&self, table: &str, rows: &[Row]) -> Result<u64> {
        if take_failure(&self.fail_loads) {
            return Err(Error::StagingLoad {
                table: table.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let mut state = self.state();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;

        for row in rows {
            if let Some(unknown) = row.keys().find(|c| target.schema.field(c).is_none()) {
                return Err(Error::StagingLoad {
                    table: table.to_string(),
                    message: format!("no such column '{unknown}'"),
                });
            }
        }
        target.rows.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn run_sql(&self, sql: &str) -> Result<()> {
        self.state().statements.push(sql.to_string());
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.state().tables.remove(table);
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| Error::table_not_found(table))
    }

    async fn merge(&self, plan: &MergePlan) -> Result<()> {
        if take_failure(&self.fail_merges) {
            return Err(Error::Merge {
                table: plan.target.clone(),
                message: "injected failure".to_string(),
            });
        }

        let mut state = self.state();
        state.statements.push(plan.render(self.dialect));

        let staged = state
            .tables
            .get(&plan.staging)
            .ok_or_else(|| Error::table_not_found(&plan.staging))?
            .rows
            .clone();
        let target = state
            .tables
            .get_mut(&plan.target)
            .ok_or_else(|| Error::table_not_found(&plan.target))?;

        for source in staged {
            let Some(key) = key_text(&source, &plan.key) else {
                continue;
            };
            let existing = target
                .rows
                .iter_mut()
                .find(|r| key_text(r, &plan.key).as_deref() == Some(key.as_str()));

            match existing {
                Some(row) => {
                    for column in plan.update_columns() {
                        let value = source.get(column).cloned().unwrap_or_default();
                        row.insert(column.clone(), value);
                    }
                }
                None => {
                    let row: Row = plan
                        .columns
                        .iter()
                        .map(|c| (c.clone(), source.get(c).cloned().unwrap_or_default()))
                        .collect();
                    target.rows.push(row);
                }
            }
        }

        Ok(())
    }
}
