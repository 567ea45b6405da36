//! Keyed merge statements

use crate::warehouse::{quote_ident, SqlDialect};
use serde::Serialize;

/// Upsert of a staging table into its target on a single key column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    /// Destination table
    pub target: String,
    /// Staging table holding the batch
    pub staging: String,
    /// Key column
    pub key: String,
    /// Columns written, key included
    pub columns: Vec<String>,
}

impl MergePlan {
    /// Create a plan; the key is added to `columns` if missing
    pub fn new(
        target: impl Into<String>,
        staging: impl Into<String>,
        key: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        let key = key.into();
        let mut columns = columns;
        if !columns.contains(&key) {
            columns.insert(0, key.clone());
        }
        Self {
            target: target.into(),
            staging: staging.into(),
            key,
            columns,
        }
    }

    /// Columns overwritten on a key match
    pub fn update_columns(&self) -> impl Iterator<Item = &String> {
        self.columns.iter().filter(move |c| **c != self.key)
    }

    /// Render the merge for a dialect
    pub fn render(&self, dialect: SqlDialect) -> String {
        match dialect {
            SqlDialect::Standard => self.merge_statement(),
            SqlDialect::DuckDb => {
                let mut parts = vec!["BEGIN TRANSACTION".to_string()];
                parts.extend(self.update_statement());
                parts.push(self.insert_missing_statement());
                parts.push("COMMIT".to_string());
                parts.join(";\n") + ";"
            }
        }
    }

    /// Single `MERGE` statement
    pub fn merge_statement(&self) -> String {
        let key = quote_ident(&self.key);
        let mut sql = format!(
            "MERGE INTO {} AS t USING {} AS s ON t.{key} = s.{key}",
            quote_ident(&self.target),
            quote_ident(&self.staging),
        );

        let assignments: Vec<String> = self
            .update_columns()
            .map(|c| format!("{0} = s.{0}", quote_ident(c)))
            .collect();
        if !assignments.is_empty() {
            sql.push_str(&format!(
                "\nWHEN MATCHED THEN UPDATE SET {}",
                assignments.join(", ")
            ));
        }

        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let values: Vec<String> = columns.iter().map(|c| format!("s.{c}")).collect();
        sql.push_str(&format!(
            "\nWHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            columns.join(", "),
            values.join(", ")
        ));
        sql
    }

    /// `UPDATE ... FROM` for matched keys; `None` when only the key is written
    pub fn update_statement(&self) -> Option<String> {
        let target = quote_ident(&self.target);
        let staging = quote_ident(&self.staging);
        let key = quote_ident(&self.key);

        let assignments: Vec<String> = self
            .update_columns()
            .map(|c| format!("{0} = {staging}.{0}", quote_ident(c)))
            .collect();
        if assignments.is_empty() {
            return None;
        }

        Some(format!(
            "UPDATE {target} SET {} FROM {staging} WHERE {target}.{key} = {staging}.{key}",
            assignments.join(", ")
        ))
    }

    /// `INSERT ... SELECT` of staged keys absent from the target
    pub fn insert_missing_statement(&self) -> String {
        let target = quote_ident(&self.target);
        let staging = quote_ident(&self.staging);
        let key = quote_ident(&self.key);

        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let selected: Vec<String> = columns.iter().map(|c| format!("{staging}.{c}")).collect();

        format!(
            "INSERT INTO {target} ({}) SELECT {} FROM {staging} \
             WHERE NOT EXISTS (SELECT 1 FROM {target} WHERE {target}.{key} = {staging}.{key})",
            columns.join(", "),
            selected.join(", ")
        )
    }
}
