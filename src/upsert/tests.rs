//! Upsert loader tests

use super::*;
use crate::error::Error;
use crate::schema::{ColumnType, FieldSchema, TableSchema};
use crate::value::FieldValue;
use crate::warehouse::{DuckDbWarehouse, MemoryWarehouse, Row, SqlDialect, Warehouse};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn row(pairs: &[(&str, FieldValue)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn schema() -> TableSchema {
    let mut schema = TableSchema::initial("id", "synced_at");
    schema.fields.push(FieldSchema::new("email", ColumnType::String));
    schema.fields.push(FieldSchema::new("score", ColumnType::Integer));
    schema
}

async fn memory() -> Arc<MemoryWarehouse> {
    let warehouse = Arc::new(MemoryWarehouse::new());
    warehouse.create_table("contacts", &schema()).await.unwrap();
    warehouse
}

// ============================================================================
// Merge statements
// ============================================================================

#[test]
fn test_merge_statement_standard() {
    let plan = MergePlan::new(
        "contacts",
        "stage",
        "id",
        vec!["email".to_string(), "score".to_string()],
    );

    assert_eq!(plan.columns, vec!["id", "email", "score"]);
    assert_eq!(
        plan.render(SqlDialect::Standard),
        "MERGE INTO \"contacts\" AS t USING \"stage\" AS s ON t.\"id\" = s.\"id\"\n\
         WHEN MATCHED THEN UPDATE SET \"email\" = s.\"email\", \"score\" = s.\"score\"\n\
         WHEN NOT MATCHED THEN INSERT (\"id\", \"email\", \"score\") VALUES (s.\"id\", s.\"email\", s.\"score\")"
    );
}

#[test]
fn test_merge_statement_duckdb() {
    let plan = MergePlan::new("contacts", "stage", "id", vec!["id".to_string(), "email".to_string()]);
    let sql = plan.render(SqlDialect::DuckDb);

    assert!(sql.starts_with("BEGIN TRANSACTION;\nUPDATE \"contacts\" SET \"email\" = \"stage\".\"email\" FROM \"stage\""));
    assert!(sql.contains("WHERE NOT EXISTS (SELECT 1 FROM \"contacts\" WHERE \"contacts\".\"id\" = \"stage\".\"id\")"));
    assert!(sql.ends_with("COMMIT;"));
}

#[test]
fn test_merge_key_only_has_no_update() {
    let plan = MergePlan::new("t", "s", "id", vec![]);
    assert!(plan.update_statement().is_none());
    assert!(!plan.render(SqlDialect::Standard).contains("WHEN MATCHED"));
}

#[test]
fn test_staging_names_are_unique() {
    let a = staging_table_name("hubspot_contacts");
    let b = staging_table_name("hubspot_contacts");
    assert_ne!(a, b);
    assert!(a.starts_with("hubspot_contacts__stage_"));
}

// ============================================================================
// Loader
// ============================================================================

#[tokio::test]
async fn test_load_inserts_and_updates() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());

    loader
        .load(
            &[row(&[("id", "1".into()), ("email", "a@x.com".into())])],
            "contacts",
            "id",
        )
        .await
        .unwrap();
    let report = loader
        .load(
            &[
                row(&[("id", "1".into()), ("email", "b@x.com".into())]),
                row(&[("id", "2".into()), ("email", "c@x.com".into())]),
            ],
            "contacts",
            "id",
        )
        .await
        .unwrap();

    assert_eq!(report.staged, 2);
    let rows = warehouse.rows("contacts");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["email"], FieldValue::from("b@x.com"));
}

#[tokio::test]
async fn test_load_is_idempotent() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());
    let batch = vec![
        row(&[("id", "1".into()), ("score", FieldValue::Int(3))]),
        row(&[("id", "2".into()), ("score", FieldValue::Int(4))]),
    ];

    loader.load(&batch, "contacts", "id").await.unwrap();
    let once = warehouse.rows("contacts");
    loader.load(&batch, "contacts", "id").await.unwrap();

    assert_eq!(warehouse.rows("contacts"), once);
}

#[tokio::test]
async fn test_duplicate_keys_last_wins() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());

    let report = loader
        .load(
            &[
                row(&[("id", "1".into()), ("email", "first".into())]),
                row(&[("id", "1".into()), ("email", "last".into())]),
            ],
            "contacts",
            "id",
        )
        .await
        .unwrap();

    assert_eq!(report.staged, 1);
    let rows = warehouse.rows("contacts");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], FieldValue::from("last"));
}

#[tokio::test]
async fn test_keyless_rows_skipped() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());

    let report = loader
        .load(
            &[
                row(&[("email", "nokey".into())]),
                row(&[("id", FieldValue::Null), ("email", "nullkey".into())]),
            ],
            "contacts",
            "id",
        )
        .await
        .unwrap();

    assert_eq!(report.skipped, 2);
    assert_eq!(report.staged, 0);
    assert_eq!(report.staging_table, None);
    assert_eq!(warehouse.table_names(), vec!["contacts"]);
}

#[tokio::test]
async fn test_rows_coerced_to_declared_types() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());

    let report = loader
        .load(
            &[
                row(&[
                    ("ID", FieldValue::Int(10)),
                    ("score", "12".into()),
                    ("email", FieldValue::Array(vec![FieldValue::from("a")])),
                    ("unknown", "x".into()),
                ]),
                row(&[("id", "11".into()), ("score", "n/a".into())]),
            ],
            "contacts",
            "id",
        )
        .await
        .unwrap();

    assert_eq!(report.coerced, 3);
    assert_eq!(report.nulled, 1);
    assert_eq!(report.dropped_columns, vec!["unknown"]);

    let rows = warehouse.rows("contacts");
    assert_eq!(rows[0]["id"], FieldValue::from("10"));
    assert_eq!(rows[0]["score"], FieldValue::Int(12));
    assert_eq!(rows[0]["email"], FieldValue::from(r#"["a"]"#));
    assert_eq!(rows[1]["score"], FieldValue::Null);
}

#[tokio::test]
async fn test_staging_failure_leaves_destination_untouched() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());
    warehouse.fail_next_loads(1);

    let err = loader
        .load(&[row(&[("id", "1".into())])], "contacts", "id")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StagingLoad { .. }));
    assert!(warehouse.rows("contacts").is_empty());
    assert_eq!(warehouse.table_names(), vec!["contacts"]);
}

#[tokio::test]
async fn test_merge_failure_drops_staging() {
    let warehouse = memory().await;
    let loader = BulkLoader::new(warehouse.clone());
    warehouse.fail_next_merges(1);

    let err = loader
        .load(&[row(&[("id", "1".into())])], "contacts", "id")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Merge { .. }));
    assert_eq!(warehouse.table_names(), vec!["contacts"]);
}

#[tokio::test]
async fn test_missing_destination() {
    let loader = BulkLoader::new(Arc::new(MemoryWarehouse::new()));
    let err = loader
        .load(&[row(&[("id", "1".into())])], "nope", "id")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TableNotFound { .. }));
}

#[tokio::test]
async fn test_duckdb_load_with_nested_column() {
    let warehouse = Arc::new(DuckDbWarehouse::in_memory("main").unwrap());
    let mut schema = schema();
    schema.fields.push(FieldSchema::nested(
        "device",
        vec![FieldSchema::new("os", ColumnType::String)],
    ));
    warehouse.create_table("events", &schema).await.unwrap();
    let loader = BulkLoader::new(warehouse.clone());

    let batch = vec![row(&[
        ("id", "e1".into()),
        ("device.os", "linux".into()),
        ("score", "5".into()),
    ])];
    loader.load(&batch, "events", "id").await.unwrap();
    loader.load(&batch, "events", "id").await.unwrap();

    assert_eq!(warehouse.row_count("events").await.unwrap(), 1);
    assert_eq!(
        warehouse.query_strings("SELECT device FROM events").unwrap(),
        vec![Some(r#"{"os":"linux"}"#.to_string())]
    );
    assert!(warehouse
        .query_strings("SELECT table_name FROM information_schema.tables WHERE table_name LIKE '%__stage_%'")
        .unwrap()
        .is_empty());
}
