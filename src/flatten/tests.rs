//! Flattener tests

use super::*;
use crate::schema::{ColumnType, FieldSchema, TableSchema};
use crate::value::FieldValue;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

fn flattener() -> Flattener {
    Flattener::new(FlattenRules::default())
        .with_synced_at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
}

#[test]
fn test_properties_lifted_to_top_level() {
    let record = json!({"id": "42", "properties": {"email": "a@b.com", "score": 7}});

    let flat = flattener().flatten(&record).unwrap();

    let names: Vec<&str> = flat.values.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["email", "id", "score", "synced_at"]);
    assert_eq!(flat.get("id"), Some(&FieldValue::from("42")));
    assert_eq!(flat.get("score"), Some(&FieldValue::Int(7)));
    assert_eq!(
        flat.get("synced_at"),
        Some(&FieldValue::Timestamp(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        ))
    );
    assert_eq!(flat.fragment.get("email"), Some(ColumnType::String));
    assert_eq!(flat.fragment.get("score"), Some(ColumnType::Integer));
    assert_eq!(flat.fragment.get("synced_at"), Some(ColumnType::Timestamp));
}

#[test]
fn test_flatten_is_deterministic() {
    let record = json!({
        "id": "1",
        "properties": {"a": 1, "b": [1, 2]},
        "nested": {"x": {"y": true}}
    });
    let flattener = flattener();

    assert_eq!(
        flattener.flatten(&record).unwrap(),
        flattener.flatten(&record).unwrap()
    );
}

#[test]
fn test_top_level_wins_over_container_property() {
    let record = json!({"id": "1", "email": "top@x.com", "properties": {"email": "bag@x.com"}});

    let flat = flattener().flatten(&record).unwrap();

    assert_eq!(flat.get("email"), Some(&FieldValue::from("top@x.com")));
    assert_eq!(flat.collisions, vec!["email"]);
}

#[test]
fn test_nested_objects_join_with_separator() {
    let record = json!({"id": "1", "associations": {"companies": {"count": 2}}});

    let flat = flattener().flatten(&record).unwrap();

    assert_eq!(
        flat.get("associations_companies_count"),
        Some(&FieldValue::Int(2))
    );
}

#[test]
fn test_dotted_separator_builds_nested_fields() {
    let rules = FlattenRules::default()
        .with_separator(".")
        .with_container_keys(&["properties", "event_data"]);
    let record = json!({
        "uuid": "e1",
        "event_data": {"page": "/home"},
        "device": {"os": "linux", "screen-size": "1080p"}
    });

    let flat = Flattener::new(rules).flatten(&record).unwrap();

    assert_eq!(flat.get("page"), Some(&FieldValue::from("/home")));
    assert_eq!(flat.get("device.os"), Some(&FieldValue::from("linux")));
    assert!(flat.get("device.screen_size").is_some());

    let fields = flat.fragment.to_fields();
    let device = fields.iter().find(|f| f.name == "device").unwrap();
    assert!(device.is_nested());
    assert_eq!(device.fields.len(), 2);
}

#[test]
fn test_prefixed_containers_keep_their_name() {
    let rules = FlattenRules::default()
        .with_separator(".")
        .with_prefixed_container("initial_params");
    let record = json!({"id": "p1", "initial_params": {"utm_source": "ads"}});

    let flat = Flattener::new(rules).flatten(&record).unwrap();

    assert_eq!(
        flat.get("initial_params_utm_source"),
        Some(&FieldValue::from("ads"))
    );
}

#[test]
fn test_arrays_become_json_text() {
    let record = json!({"id": "1", "tags": ["a", "b"], "empty": [], "properties": {"ids": [1]}});

    let flat = flattener().flatten(&record).unwrap();

    assert_eq!(flat.get("tags"), Some(&FieldValue::from(r#"["a","b"]"#)));
    assert_eq!(flat.get("empty"), Some(&FieldValue::from("[]")));
    assert_eq!(flat.get("ids"), Some(&FieldValue::from("[1]")));
    assert_eq!(flat.fragment.get("ids"), Some(ColumnType::String));
}

#[test]
fn test_passthrough_fields_stay_structured() {
    let rules = FlattenRules::default().with_passthrough("payload");
    let record = json!({"id": "1", "payload": {"a": [1, 2]}});

    let flat = Flattener::new(rules).flatten(&record).unwrap();

    assert!(matches!(flat.get("payload"), Some(FieldValue::Map(_))));
    assert_eq!(flat.fragment.get("payload"), Some(ColumnType::Json));
}

#[test]
fn test_structured_destination_columns_pass_through() {
    let schema = TableSchema::new(vec![
        FieldSchema::new("id", ColumnType::String),
        FieldSchema::new("payload", ColumnType::Json),
        FieldSchema::nested("address", vec![FieldSchema::new("city", ColumnType::String)]),
    ]);
    let record = json!({
        "id": "1",
        "address": {"city": "Oslo"},
        "properties": {"payload": {"a": 1, "b": "x"}, "extra": {"c": true}}
    });

    let rules = FlattenRules::default().with_structured_columns(&schema);
    let flat = Flattener::new(rules).flatten(&record).unwrap();

    assert!(matches!(flat.get("payload"), Some(FieldValue::Map(_))));
    assert!(matches!(flat.get("address"), Some(FieldValue::Map(_))));
    assert!(flat.get("payload_a").is_none());
    assert_eq!(flat.get("extra_c"), Some(&FieldValue::Bool(true)));

    // dotted paths keep walking into nested columns
    let nested = FlattenRules::default()
        .with_separator(".")
        .with_structured_columns(&schema);
    assert_eq!(nested.passthrough_fields, vec!["payload".to_string()]);
}

#[test]
fn test_timestamps_parsed_for_known_fields() {
    let record = json!({
        "id": "1",
        "createdAt": "2024-01-02T03:04:05.000Z",
        "properties": {"closed_ts": 1_704_164_645_000_i64, "note_ts": "not a date"}
    });

    let flat = flattener().flatten(&record).unwrap();
    let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    assert_eq!(flat.get("createdAt"), Some(&FieldValue::Timestamp(expected)));
    assert_eq!(flat.get("closed_ts"), Some(&FieldValue::Timestamp(expected)));
    assert_eq!(flat.get("note_ts"), Some(&FieldValue::from("not a date")));
    assert_eq!(flat.fragment.get("note_ts"), Some(ColumnType::Timestamp));
}

#[test]
fn test_overlong_names_dropped() {
    let long = "x".repeat(140);
    let mut properties = serde_json::Map::new();
    properties.insert(long.clone(), json!("v"));
    properties.insert("ok".to_string(), json!("v"));
    let record = json!({"id": "1", "properties": properties});

    let flat = flattener().flatten(&record).unwrap();

    assert!(flat.get("ok").is_some());
    assert_eq!(flat.dropped, vec![long]);
    assert!(flat.values.keys().all(|k| k.len() <= 128));
}

#[test]
fn test_modified_at_extracted() {
    let record = json!({"id": "1", "updatedAt": "2024-02-01T00:00:00Z"});

    let flat = flattener()
        .with_modified_fields(&["updatedAt".to_string()])
        .flatten(&record)
        .unwrap();

    assert_eq!(
        flat.modified_at,
        Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(flat.key("id"), Some("1".to_string()));
}

#[test]
fn test_batch_collects_failures_and_merges_fragments() {
    let records = vec![
        json!({"id": "1", "properties": {"amount": null}}),
        json!("not an object"),
        json!({"id": "2", "properties": {"amount": 2.5}}),
    ];

    let batch = flattener().flatten_batch(&records);

    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.report.processed, 2);
    assert_eq!(batch.report.skipped, 1);
    assert!(batch.report.errors[0].starts_with("record 1"));
    assert_eq!(batch.fragment.get("amount"), Some(ColumnType::Float));
}

#[test]
fn test_pending_batch_fills_and_takes() {
    let flattener = flattener().with_modified_fields(&["updatedAt".to_string()]);
    let mut pending = PendingBatch::new(2);

    pending.push(
        flattener
            .flatten(&json!({"id": "1", "updatedAt": "2024-01-01T00:00:00Z"}))
            .unwrap(),
    );
    assert!(!pending.is_full());
    pending.extend(flattener.flatten_batch(&[json!({"id": "2", "properties": {"n": 1}})]));
    assert!(pending.is_full());

    let taken = pending.take();
    assert!(pending.is_empty());
    assert_eq!(taken.len(), 2);
    assert_eq!(taken.rows()[1]["n"], FieldValue::Int(1));
    assert_eq!(taken.fragment().get("n"), Some(ColumnType::Integer));
    assert_eq!(
        taken.high_watermark(),
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert!(!PendingBatch::new(0).is_full());
}
