//! DuckDB integration tests
//!
//! Schema growth, nested columns, and run history persisted across reopened
//! database files.

use hubsync::engine::{EngineConfig, SyncEngine};
use hubsync::flatten::FlattenRules;
use hubsync::source::{EndpointKind, ObjectSpec, StaticSource};
use hubsync::status::{DuckDbStatusStore, SyncStatusTracker};
use hubsync::warehouse::{DuckDbWarehouse, Warehouse};
use hubsync::SyncMode;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

fn widgets_spec() -> ObjectSpec {
    ObjectSpec::new("widgets", EndpointKind::List).with_table("widgets")
}

fn engine(dir: &Path, records: Vec<Value>, config: EngineConfig) -> SyncEngine {
    let warehouse = DuckDbWarehouse::open(dir.join("warehouse.duckdb"), "crm").unwrap();
    let store = DuckDbStatusStore::open(dir.join("status.duckdb")).unwrap();
    SyncEngine::new(
        Arc::new(StaticSource::new().with_records("widgets", records)),
        Arc::new(warehouse),
        SyncStatusTracker::new(Arc::new(store)),
    )
    .with_catalog(vec![widgets_spec()])
    .with_config(config)
}

#[tokio::test]
async fn test_schema_grows_across_runs() {
    let dir = tempfile::tempdir().unwrap();

    engine(
        dir.path(),
        vec![json!({"id": "1", "color": "red"})],
        EngineConfig::default(),
    )
    .sync_object("widgets", SyncMode::Full)
    .await
    .unwrap();

    let report = engine(
        dir.path(),
        vec![json!({"id": "2", "color": "blue", "weight": 1.5})],
        EngineConfig::default(),
    )
    .sync_object("widgets", SyncMode::Full)
    .await
    .unwrap();
    assert_eq!(report.fields_added, vec!["weight".to_string()]);

    let warehouse = DuckDbWarehouse::open(dir.path().join("warehouse.duckdb"), "crm").unwrap();
    let schema = warehouse.get_table("widgets").await.unwrap().unwrap();
    assert_eq!(
        schema.column_names(),
        vec!["id", "synced_at", "color", "weight"]
    );

    let weights = warehouse
        .query_strings("SELECT CAST(weight AS VARCHAR) FROM widgets ORDER BY id")
        .unwrap();
    assert_eq!(weights, vec![None, Some("1.5".to_string())]);
}

#[tokio::test]
async fn test_existing_column_type_is_kept() {
    let dir = tempfile::tempdir().unwrap();

    engine(
        dir.path(),
        vec![json!({"id": "1", "size": 10})],
        EngineConfig::default(),
    )
    .sync_object("widgets", SyncMode::Full)
    .await
    .unwrap();

    let report = engine(
        dir.path(),
        vec![json!({"id": "2", "size": "large"})],
        EngineConfig::default(),
    )
    .sync_object("widgets", SyncMode::Full)
    .await
    .unwrap();
    assert!(report.fields_added.is_empty());

    let warehouse = DuckDbWarehouse::open(dir.path().join("warehouse.duckdb"), "crm").unwrap();
    let schema = warehouse.get_table("widgets").await.unwrap().unwrap();
    assert_eq!(
        schema.field("size").map(|f| f.column_type.as_str()),
        Some("INTEGER")
    );
    // the unconvertible value is loaded as NULL
    let sizes = warehouse
        .query_strings("SELECT CAST(size AS VARCHAR) FROM widgets ORDER BY id")
        .unwrap();
    assert_eq!(sizes, vec![Some("10".to_string()), None]);
}

#[tokio::test]
async fn test_nested_fields_with_dot_separator() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        flatten: FlattenRules::default().with_separator("."),
        ..EngineConfig::default()
    };

    engine(
        dir.path(),
        vec![json!({"id": "1", "initial_params": {"utm_source": "newsletter"}})],
        config.clone(),
    )
    .sync_object("widgets", SyncMode::Full)
    .await
    .unwrap();

    let report = engine(
        dir.path(),
        vec![json!({"id": "2", "initial_params": {"utm_medium": "email"}})],
        config,
    )
    .sync_object("widgets", SyncMode::Full)
    .await
    .unwrap();
    assert_eq!(
        report.fields_added,
        vec!["initial_params.utm_medium".to_string()]
    );

    let warehouse = DuckDbWarehouse::open(dir.path().join("warehouse.duckdb"), "crm").unwrap();
    let schema = warehouse.get_table("widgets").await.unwrap().unwrap();
    assert!(schema.lookup("initial_params.utm_source").is_some());
    assert!(schema.lookup("initial_params.utm_medium").is_some());

    let params = warehouse
        .query_strings("SELECT initial_params FROM widgets ORDER BY id")
        .unwrap();
    assert_eq!(
        params,
        vec![
            Some(r#"{"utm_source":"newsletter"}"#.to_string()),
            Some(r#"{"utm_medium":"email"}"#.to_string())
        ]
    );
}

#[tokio::test]
async fn test_run_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let records = vec![json!({"id": "1", "updatedAt": "2024-05-01T10:00:00Z"})];

    let first = engine(dir.path(), records.clone(), EngineConfig::default());
    first.run(Some("widgets"), false).await.unwrap();
    drop(first);

    let second = engine(dir.path(), records, EngineConfig::default());
    let watermark = second
        .tracker()
        .last_successful_sync("widgets")
        .await
        .unwrap();
    assert_eq!(
        watermark.map(|t| t.to_rfc3339()),
        Some("2024-05-01T10:00:00+00:00".to_string())
    );

    let runs = second.tracker().recent(None, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].records_processed, 1);
}
