//! DuckDB warehouse
//!
//! Tables live in an embedded DuckDB database. DuckDB has no native type for
//! a record whose children grow over time, so NESTED and JSON columns are
//! stored physically as VARCHAR holding JSON text, and the logical schema
//! (including nested children) is kept in a catalog table next to the data.

use super::{quote_ident, Row, SqlDialect, Warehouse};
use crate::error::{Error, Result};
use crate::schema::{ColumnType, FieldMode, FieldSchema, SchemaAddition, TableSchema};
use crate::upsert::MergePlan;
use crate::value::FieldValue;
use async_trait::async_trait;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const CATALOG_TABLE: &str = "_hubsync_columns";

/// Warehouse backed by an embedded DuckDB database
pub struct DuckDbWarehouse {
    conn: Mutex<Connection>,
    dataset: String,
}

impl DuckDbWarehouse {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, dataset: &str) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::warehouse(format!(
                "Failed to open DuckDB database '{}': {e}",
                path.display()
            ))
        })?;
        Self::init(conn, dataset)
    }

    /// Open a transient in-memory database
    pub fn in_memory(dataset: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::warehouse(format!("Failed to create DuckDB connection: {e}")))?;
        Self::init(conn, dataset)
    }

    fn init(conn: Connection, dataset: &str) -> Result<Self> {
        let dataset = if dataset.is_empty() { "main" } else { dataset };
        conn.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             SET schema = '{literal}';
             CREATE TABLE IF NOT EXISTS {catalog} (
                 table_name VARCHAR NOT NULL,
                 path VARCHAR NOT NULL,
                 column_type VARCHAR NOT NULL,
                 mode VARCHAR NOT NULL,
                 position INTEGER NOT NULL
             );",
            schema = quote_ident(dataset),
            literal = dataset.replace('\'', "''"),
            catalog = quote_ident(CATALOG_TABLE),
        ))
        .map_err(|e| Error::warehouse(format!("Failed to initialize warehouse: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            dataset: dataset.to_string(),
        })
    }

    /// Dataset (DuckDB schema) holding the tables
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Run a query and return its first column as text
    ///
    /// Non-text columns must be cast to VARCHAR in the query.
    pub fn query_strings(&self, sql: &str) -> Result<Vec<Option<String>>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, Option<String>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DuckDbWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbWarehouse")
            .field("dataset", &self.dataset)
            .finish_non_exhaustive()
    }
}

fn physical_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::String | ColumnType::Json | ColumnType::Nested => "VARCHAR",
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

/// Logical type of a column created outside this warehouse
fn logical_type(data_type: &str) -> ColumnType {
    let upper = data_type.to_ascii_uppercase();
    match upper.as_str() {
        "BIGINT" | "INTEGER" | "SMALLINT" | "TINYINT" | "HUGEINT" | "UBIGINT" | "UINTEGER" => {
            ColumnType::Integer
        }
        "DOUBLE" | "FLOAT" | "REAL" => ColumnType::Float,
        "BOOLEAN" => ColumnType::Boolean,
        "JSON" => ColumnType::Json,
        _ if upper.starts_with("DECIMAL") => ColumnType::Float,
        _ if upper.starts_with("TIMESTAMP") || upper == "DATE" => ColumnType::Timestamp,
        _ if upper.starts_with("STRUCT") => ColumnType::Nested,
        _ => ColumnType::String,
    }
}

fn mode_str(mode: FieldMode) -> &'static str {
    match mode {
        FieldMode::Nullable => "NULLABLE",
        FieldMode::Required => "REQUIRED",
    }
}

fn column_ddl(field: &FieldSchema) -> String {
    let not_null = if field.mode == FieldMode::Required {
        " NOT NULL"
    } else {
        ""
    };
    format!(
        "{} {}{not_null}",
        quote_ident(&field.name),
        physical_type(field.column_type)
    )
}

/// Flatten a field and its children into catalog entries
fn catalog_entries(
    parent: Option<&str>,
    field: &FieldSchema,
    out: &mut Vec<(String, ColumnType, FieldMode)>,
) {
    let path = match parent {
        Some(p) => format!("{p}.{}", field.name),
        None => field.name.clone(),
    };
    out.push((path.clone(), field.column_type, field.mode));
    for child in &field.fields {
        catalog_entries(Some(&path), child, out);
    }
}

/// Rebuild a schema from catalog entries in declaration order
fn schema_from_entries(entries: Vec<(String, ColumnType, FieldMode)>) -> TableSchema {
    let mut schema = TableSchema::default();
    for (path, column_type, mode) in entries {
        let parts: Vec<&str> = path.split('.').collect();
        let Some((name, parents)) = parts.split_last() else {
            continue;
        };

        let mut fields = &mut schema.fields;
        let mut found = true;
        for parent in parents {
            match fields.iter().position(|f| f.name == *parent) {
                Some(i) => fields = &mut fields[i].fields,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            let mut field = FieldSchema::new(*name, column_type);
            field.mode = mode;
            fields.push(field);
        }
    }
    schema
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Boolean(*b),
        FieldValue::Int(i) => Value::BigInt(*i),
        FieldValue::Float(f) => Value::Double(*f),
        FieldValue::Timestamp(ts) => Value::Text(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        FieldValue::String(s) => Value::Text(s.clone()),
        FieldValue::Array(_) | FieldValue::Map(_) => {
            value.to_text().map_or(Value::Null, Value::Text)
        }
    }
}

fn read_schema(conn: &Connection, table: &str) -> Result<Option<TableSchema>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT path, column_type, mode FROM {} WHERE table_name = ? ORDER BY position",
        quote_ident(CATALOG_TABLE)
    ))?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !rows.is_empty() {
        let entries = rows
            .into_iter()
            .map(|(path, column_type, mode)| {
                let column_type = ColumnType::parse(&column_type).unwrap_or_default();
                let mode = if mode == "REQUIRED" {
                    FieldMode::Required
                } else {
                    FieldMode::Nullable
                };
                (path, column_type, mode)
            })
            .collect();
        return Ok(Some(schema_from_entries(entries)));
    }

    // Tables created outside this warehouse have no catalog entries
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns
         WHERE table_schema = current_schema() AND table_name = ?
         ORDER BY ordinal_position",
    )?;
    let columns = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Ok(None);
    }

    let fields = columns
        .into_iter()
        .map(|(name, data_type, nullable)| {
            let mut field = FieldSchema::new(name, logical_type(&data_type));
            if nullable == "NO" {
                field.mode = FieldMode::Required;
            }
            field
        })
        .collect();
    Ok(Some(TableSchema::new(fields)))
}

fn next_position(conn: &Connection, table: &str) -> Result<i64> {
    let position = conn.query_row(
        &format!(
            "SELECT CAST(COALESCE(MAX(position), -1) + 1 AS BIGINT) FROM {} WHERE table_name = ?",
            quote_ident(CATALOG_TABLE)
        ),
        params![table],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(position)
}

fn write_catalog(
    conn: &Connection,
    table: &str,
    entries: &[(String, ColumnType, FieldMode)],
) -> Result<()> {
    let mut position = next_position(conn, table)?;
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (table_name, path, column_type, mode, position) VALUES (?, ?, ?, ?, ?)",
        quote_ident(CATALOG_TABLE)
    ))?;
    for (path, column_type, mode) in entries {
        stmt.execute(params![
            table,
            path,
            column_type.as_str(),
            mode_str(*mode),
            position
        ])?;
        position += 1;
    }
    Ok(())
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::DuckDb
    }

    async fn get_table(&self, table: &str) -> Result<Option<TableSchema>> {
        read_schema(&self.conn(), table)
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let columns: Vec<String> = schema.fields.iter().map(column_ddl).collect();
        let ddl = format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "));
        debug!(table = %table, "Executing: {ddl}");

        let mut entries = Vec::new();
        for field in &schema.fields {
            catalog_entries(None, field, &mut entries);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute_batch(&ddl)
            .map_err(|e| Error::warehouse(format!("Failed to create table '{table}': {e}")))?;
        write_catalog(&tx, table, &entries)?;
        tx.commit()?;
        Ok(())
    }

    async fn patch_schema(&self, table: &str, additions: &[SchemaAddition]) -> Result<()> {
        let patch_error = |message: String| Error::SchemaPatch {
            table: table.to_string(),
            message,
        };

        let mut conn = self.conn();
        let current = read_schema(&conn, table)?.ok_or_else(|| Error::table_not_found(table))?;

        let tx = conn.transaction()?;
        for addition in additions {
            if current.lookup(&addition.path()).is_some() {
                return Err(patch_error(format!(
                    "field '{}' already exists",
                    addition.path()
                )));
            }

            match &addition.parent_path {
                None => {
                    let ddl = format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        quote_ident(table),
                        column_ddl(&FieldSchema {
                            mode: FieldMode::Nullable,
                            ..addition.field.clone()
                        })
                    );
                    tx.execute_batch(&ddl)
                        .map_err(|e| patch_error(format!("{ddl}: {e}")))?;
                }
                Some(parent) => {
                    // Children of a nested column live inside its JSON text
                    if !current.lookup(parent).is_some_and(FieldSchema::is_nested) {
                        return Err(patch_error(format!("'{parent}' is not a nested field")));
                    }
                }
            }

            let mut entries = Vec::new();
            catalog_entries(addition.parent_path.as_deref(), &addition.field, &mut entries);
            write_catalog(&tx, table, &entries)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn bulk_load(&self, table: &str, rows: &[Row]) -> Result<u64> {
        let load_error = |message: String| Error::StagingLoad {
            table: table.to_string(),
            message,
        };

        let mut conn = self.conn();
        let schema = read_schema(&conn, table)?.ok_or_else(|| Error::table_not_found(table))?;

        for row in rows {
            if let Some(unknown) = row.keys().find(|c| schema.field(c).is_none()) {
                return Err(load_error(format!("no such column '{unknown}'")));
            }
        }

        let columns: Vec<&str> = schema
            .column_names()
            .into_iter()
            .filter(|c| rows.iter().any(|r| r.contains_key(*c)))
            .collect();
        if columns.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql).map_err(|e| load_error(e.to_string()))?;
            for row in rows {
                let values = columns
                    .iter()
                    .map(|c| row.get(*c).map_or(Value::Null, to_sql_value));
                stmt.execute(params_from_iter(values))
                    .map_err(|e| load_error(e.to_string()))?;
            }
        }
        tx.commit().map_err(|e| load_error(e.to_string()))?;
        Ok(rows.len() as u64)
    }

    async fn run_sql(&self, sql: &str) -> Result<()> {
        debug!("Executing: {sql}");
        self.conn()
            .execute_batch(sql)
            .map_err(|e| Error::warehouse(format!("Statement failed: {e}")))
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE table_name = ?",
                quote_ident(CATALOG_TABLE)
            ),
            params![table],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let count = self
            .conn()
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|_| Error::table_not_found(table))?;
        Ok(count as u64)
    }

    async fn merge(&self, plan: &MergePlan) -> Result<()> {
        let merge_error = |e: duckdb::Error| Error::Merge {
            table: plan.target.clone(),
            message: e.to_string(),
        };

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(merge_error)?;
        if let Some(update) = plan.update_statement() {
            debug!(table = %plan.target, "Executing: {update}");
            tx.execute_batch(&update).map_err(merge_error)?;
        }
        let insert = plan.insert_missing_statement();
        debug!(table = %plan.target, "Executing: {insert}");
        tx.execute_batch(&insert).map_err(merge_error)?;
        tx.commit().map_err(merge_error)?;
        Ok(())
    }
}
