//! Schema tests

use super::*;
use crate::source::PropertyDefinition;
use crate::value::FieldValue;
use crate::warehouse::{MemoryWarehouse, Warehouse};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use test_case::test_case;

// ============================================================================
// Name sanitization
// ============================================================================

#[test_case("email", Some("email") ; "plain")]
#[test_case("first name", Some("first_name") ; "space")]
#[test_case("hs-analytics.source", Some("hs_analytics_source") ; "punctuation")]
#[test_case("2nd_owner", Some("_2nd_owner") ; "leading digit")]
#[test_case("_private", Some("_private") ; "leading underscore")]
#[test_case("", Some("_") ; "empty")]
fn test_sanitize_field_name(input: &str, expected: Option<&str>) {
    assert_eq!(
        sanitize_field_name(input, 128).as_deref(),
        expected
    );
}

#[test]
fn test_sanitize_drops_overlong_names() {
    let long = "a".repeat(129);
    assert_eq!(sanitize_field_name(&long, 128), None);
    assert_eq!(sanitize_field_name(&"a".repeat(128), 128).map(|s| s.len()), Some(128));
    // the added prefix counts toward the cap
    assert_eq!(sanitize_field_name(&"1".repeat(128), 128), None);
}

#[test]
fn test_sanitized_names_are_valid_identifiers() {
    let re = regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    for name in ["a b", "ünïcode", "9lives", "x.y.z", "-", "ok_name", "$$"] {
        let sanitized = sanitize_field_name(name, 128).unwrap();
        assert!(re.is_match(&sanitized), "{name} -> {sanitized}");
    }
}

// ============================================================================
// Type inference
// ============================================================================

#[test_case(FieldValue::Bool(true), "flag", ColumnType::Boolean ; "bool")]
#[test_case(FieldValue::Int(7), "score", ColumnType::Integer ; "int")]
#[test_case(FieldValue::Float(1.5), "ratio", ColumnType::Float ; "float")]
#[test_case(FieldValue::from("a@b.com"), "email", ColumnType::String ; "string")]
#[test_case(FieldValue::Null, "missing", ColumnType::String ; "null")]
#[test_case(FieldValue::from("whatever"), "closed_ts", ColumnType::Timestamp ; "ts suffix wins")]
#[test_case(FieldValue::Int(1), "created_ts", ColumnType::Timestamp ; "ts suffix over int")]
#[test_case(FieldValue::Array(vec![]), "tags", ColumnType::String ; "empty array")]
#[test_case(FieldValue::Array(vec![FieldValue::Int(1)]), "ids", ColumnType::Integer ; "array of ints")]
fn test_infer_type(value: FieldValue, name: &str, expected: ColumnType) {
    assert_eq!(infer_type(&value, name), expected);
}

#[test]
fn test_infer_timestamp_value() {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(
        infer_type(&FieldValue::Timestamp(ts), "closed"),
        ColumnType::Timestamp
    );
}

#[test_case("number", "amount", ColumnType::Float ; "number")]
#[test_case("number", "hs_object_id", ColumnType::Integer ; "number id")]
#[test_case("number", "num_associated_count", ColumnType::Integer ; "number count")]
#[test_case("string", "closedate", ColumnType::Timestamp ; "date suffix")]
#[test_case("string", "hs_date_entered_x", ColumnType::Timestamp ; "date infix")]
#[test_case("datetime", "lastmodified", ColumnType::Timestamp ; "datetime")]
#[test_case("bool", "is_active", ColumnType::Boolean ; "bool")]
#[test_case("booleancheckbox", "opted_in", ColumnType::Boolean ; "checkbox")]
#[test_case("enumeration", "lifecyclestage", ColumnType::String ; "enumeration")]
#[test_case("json", "payload", ColumnType::Json ; "json")]
fn test_map_source_type(source_type: &str, name: &str, expected: ColumnType) {
    assert_eq!(map_source_type(source_type, name), expected);
}

// ============================================================================
// Fragments
// ============================================================================

#[test]
fn test_fragment_null_yields_to_later_observation() {
    let mut fragment = SchemaFragment::new();
    fragment.observe("score", ColumnType::String, true);
    fragment.observe("score", ColumnType::Integer, false);
    fragment.observe("score", ColumnType::String, true);

    assert_eq!(fragment.get("score"), Some(ColumnType::Integer));
}

#[test]
fn test_fragment_widens_integer_to_float() {
    let mut a = SchemaFragment::new();
    a.observe("amount", ColumnType::Integer, false);
    let mut b = SchemaFragment::new();
    b.observe("amount", ColumnType::Float, false);
    b.observe("name", ColumnType::String, false);

    a.merge(&b);

    assert_eq!(a.get("amount"), Some(ColumnType::Float));
    assert_eq!(a.names().collect::<Vec<_>>(), vec!["amount", "name"]);
}

#[test]
fn test_fragment_first_type_wins_on_conflict() {
    assert_eq!(
        merge_types(ColumnType::Boolean, false, ColumnType::String, false),
        ColumnType::Boolean
    );
}

#[test]
fn test_fragment_dotted_names_become_nested() {
    let mut fragment = SchemaFragment::new();
    fragment.observe("id", ColumnType::String, false);
    fragment.observe("initial.utm_source", ColumnType::String, false);
    fragment.observe("initial.visits", ColumnType::Integer, false);

    let fields = fragment.to_fields();

    assert_eq!(fields.len(), 2);
    assert!(fields[1].is_nested());
    assert_eq!(
        fields[1].fields,
        vec![
            FieldSchema::new("utm_source", ColumnType::String),
            FieldSchema::new("visits", ColumnType::Integer),
        ]
    );
}

// ============================================================================
// Planning
// ============================================================================

fn existing() -> TableSchema {
    TableSchema::new(vec![
        FieldSchema::new("id", ColumnType::String).required(),
        FieldSchema::new("email", ColumnType::String),
        FieldSchema::nested(
            "address",
            vec![FieldSchema::new("city", ColumnType::String)],
        ),
    ])
}

#[test]
fn test_plan_adds_only_missing_fields() {
    let observed = vec![
        FieldSchema::new("EMAIL", ColumnType::Integer),
        FieldSchema::new("phone", ColumnType::String),
    ];

    let plan = plan_additions(&existing(), &observed);

    assert_eq!(plan.additions.len(), 1);
    assert_eq!(plan.additions[0].path(), "phone");
    assert!(plan.conflicts.is_empty());
}

#[test]
fn test_plan_recurses_into_nested_fields() {
    let observed = vec![FieldSchema::nested(
        "Address",
        vec![
            FieldSchema::new("city", ColumnType::String),
            FieldSchema::new("zip", ColumnType::String),
        ],
    )];

    let plan = plan_additions(&existing(), &observed);

    assert_eq!(plan.additions.len(), 1);
    assert_eq!(plan.additions[0].parent_path.as_deref(), Some("Address"));
    assert_eq!(plan.additions[0].path(), "Address.zip");
}

#[test]
fn test_plan_reports_nesting_conflicts() {
    let observed = vec![FieldSchema::nested(
        "email",
        vec![FieldSchema::new("domain", ColumnType::String)],
    )];

    let plan = plan_additions(&existing(), &observed);

    assert!(plan.is_empty());
    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].path, "email");
    assert_eq!(plan.conflicts[0].existing, ColumnType::String);
}

#[test]
fn test_plan_is_monotonic() {
    let observed = vec![
        FieldSchema::new("phone", ColumnType::String),
        FieldSchema::new("score", ColumnType::Integer),
    ];
    let plan = plan_additions(&existing(), &observed);

    let mut patched = existing();
    patched
        .fields
        .extend(plan.additions.iter().map(|a| a.field.clone()));

    for path in existing().field_paths() {
        assert!(patched.lookup(&path).is_some());
    }
    assert!(plan_additions(&patched, &observed).is_empty());
}

#[test]
fn test_fields_from_properties() {
    let defs = vec![
        PropertyDefinition::new("email", "string"),
        PropertyDefinition::new("amount", "number"),
        PropertyDefinition {
            hidden: true,
            ..PropertyDefinition::new("internal_flag", "bool")
        },
        PropertyDefinition {
            hidden: true,
            ..PropertyDefinition::new("hs_object_id", "number")
        },
        PropertyDefinition::new(&"x".repeat(200), "string"),
    ];

    let fields = fields_from_properties(&defs, 128, "synced_at");
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "id",
            "createdAt",
            "updatedAt",
            "archived",
            "synced_at",
            "email",
            "amount",
            "hs_object_id"
        ]
    );
    assert_eq!(fields[6].column_type, ColumnType::Float);
    assert_eq!(fields[7].column_type, ColumnType::Integer);
}

// ============================================================================
// Manager
// ============================================================================

#[tokio::test]
async fn test_manager_ensure_table_is_idempotent() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let manager = SchemaManager::new(warehouse.clone());

    let created = manager.ensure_table("hubspot_lists", "listId").await.unwrap();
    let again = manager.ensure_table("hubspot_lists", "listId").await.unwrap();

    assert_eq!(created, again);
    assert_eq!(created.column_names(), vec!["listId", "synced_at"]);
    assert_eq!(created.fields[0].mode, FieldMode::Required);
    assert_eq!(warehouse.table_names(), vec!["hubspot_lists"]);
}

#[tokio::test]
async fn test_manager_reconcile_adds_and_is_idempotent() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let manager = SchemaManager::new(warehouse.clone());
    manager.ensure_table("hubspot_contacts", "id").await.unwrap();

    let observed = vec![
        FieldSchema::new("email", ColumnType::String),
        FieldSchema::new("score", ColumnType::Integer),
    ];
    let first = manager.reconcile("hubspot_contacts", &observed).await.unwrap();
    let second = manager.reconcile("hubspot_contacts", &observed).await.unwrap();

    assert_eq!(first.added, vec!["email", "score"]);
    assert!(second.added.is_empty());
}

#[tokio::test]
async fn test_manager_replans_after_failed_patch() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let manager = SchemaManager::new(warehouse.clone());
    manager.ensure_table("hubspot_contacts", "id").await.unwrap();
    warehouse.fail_next_patches(1);

    let change = manager
        .reconcile(
            "hubspot_contacts",
            &[FieldSchema::new("email", ColumnType::String)],
        )
        .await
        .unwrap();

    assert_eq!(change.added, vec!["email"]);
    let schema = warehouse.get_table("hubspot_contacts").await.unwrap().unwrap();
    assert!(schema.field("email").is_some());
}

#[tokio::test]
async fn test_manager_gives_up_after_second_failure() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let manager = SchemaManager::new(warehouse.clone());
    manager.ensure_table("hubspot_contacts", "id").await.unwrap();
    warehouse.fail_next_patches(2);

    let err = manager
        .reconcile(
            "hubspot_contacts",
            &[FieldSchema::new("email", ColumnType::String)],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, crate::error::Error::SchemaPatch { .. }));
}

#[tokio::test]
async fn test_manager_reconcile_missing_table() {
    let manager = SchemaManager::new(Arc::new(MemoryWarehouse::new()));
    let err = manager
        .reconcile("nope", &[FieldSchema::new("a", ColumnType::String)])
        .await
        .unwrap_err();
    assert!(matches!(err, crate::error::Error::TableNotFound { .. }));
}

#[tokio::test]
async fn test_manager_declares_properties() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let manager = SchemaManager::new(warehouse.clone());
    manager.ensure_table("hubspot_deals", "id").await.unwrap();

    let change = manager
        .declare_from_properties(
            "hubspot_deals",
            &[
                PropertyDefinition::new("amount", "number"),
                PropertyDefinition::new("closedate", "datetime"),
            ],
            128,
        )
        .await
        .unwrap();

    assert_eq!(
        change.added,
        vec!["createdAt", "updatedAt", "archived", "amount", "closedate"]
    );
    let schema = warehouse.get_table("hubspot_deals").await.unwrap().unwrap();
    assert_eq!(
        schema.field("closedate").map(|f| f.column_type),
        Some(ColumnType::Timestamp)
    );
}
