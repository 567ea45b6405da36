//! Destination warehouse module
//!
//! The engine talks to the destination through the [`Warehouse`] trait:
//! table metadata, additive schema patches, bulk loads into staging tables,
//! and keyed merges.
//!
//! # Backends
//!
//! - [`DuckDbWarehouse`]: embedded DuckDB database, file or in-memory
//! - [`MemoryWarehouse`]: in-process tables used by tests and dry runs

mod duckdb;
mod memory;

pub use self::duckdb::DuckDbWarehouse;
pub use memory::MemoryWarehouse;

use crate::error::Result;
use crate::schema::{SchemaAddition, TableSchema};
use crate::upsert::MergePlan;
use crate::value::FieldValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One row keyed by top-level column name
pub type Row = BTreeMap<String, FieldValue>;

/// SQL dialect used to render merge statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    /// `MERGE INTO ... WHEN MATCHED ... WHEN NOT MATCHED`
    #[default]
    Standard,
    /// `UPDATE ... FROM` followed by `INSERT ... WHERE NOT EXISTS`
    DuckDb,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Standard => f.write_str("standard"),
            SqlDialect::DuckDb => f.write_str("duckdb"),
        }
    }
}

/// Quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Destination operations used by the engine
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Dialect for rendered statements
    fn dialect(&self) -> SqlDialect;

    /// Current schema of a table, `None` if it does not exist
    async fn get_table(&self, table: &str) -> Result<Option<TableSchema>>;

    /// Create a table with the given schema
    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()>;

    /// Add fields to an existing table
    async fn patch_schema(&self, table: &str, additions: &[SchemaAddition]) -> Result<()>;

    /// Append rows to a table; returns the number written
    async fn bulk_load(&self, table: &str, rows: &[Row]) -> Result<u64>;

    /// Execute a statement
    async fn run_sql(&self, sql: &str) -> Result<()>;

    /// Drop a table if it exists
    async fn delete_table(&self, table: &str) -> Result<()>;

    /// Number of rows in a table
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Upsert the staging table into the target on the key column
    async fn merge(&self, plan: &MergePlan) -> Result<()> {
        let sql = plan.render(self.dialect());
        self.run_sql(&sql).await
    }
}
