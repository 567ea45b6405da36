//! Integration tests using a mock HubSpot API
//!
//! Tests the full flow: settings → HTTP search → flatten → DuckDB upsert → run history

use hubsync::cli::open_engine;
use hubsync::config::{Settings, ENV_ACCESS_TOKEN};
use hubsync::source::{EndpointKind, ObjectSpec};
use hubsync::status::RunStatus;
use hubsync::warehouse::{DuckDbWarehouse, Warehouse};
use hubsync::Error;
use serde_json::{json, Value};
use std::path::Path;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer, dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.apply_env(|name| (name == ENV_ACCESS_TOKEN).then(|| "pat-test".to_string()));
    settings.source.base_url = server.uri();
    settings.source.max_attempts = 1;
    settings.source.initial_backoff_ms = 1;
    settings.source.max_backoff_ms = 1;
    settings.warehouse.path = Some(dir.join("warehouse.duckdb"));
    settings.status.path = Some(dir.join("status.duckdb"));
    settings.validate().unwrap();
    settings
}

fn contact(id: &str, email: &str, modified: &str) -> Value {
    json!({
        "id": id,
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": modified,
        "archived": false,
        "properties": {
            "email": email,
            "hs_object_id": id,
            "lastmodifieddate": modified,
            "num_notes": "3"
        }
    })
}

async fn mount_properties(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/crm/v3/properties/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"name": "email", "type": "string"},
                {"name": "hs_object_id", "type": "number"},
                {"name": "lastmodifieddate", "type": "datetime"},
                {"name": "num_notes", "type": "number"}
            ]
        })))
        .mount(server)
        .await;
}

// ============================================================================
// End-to-end sync
// ============================================================================

#[tokio::test]
async fn test_contacts_sync_into_duckdb() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_properties(&server).await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .and(header("Authorization", "Bearer pat-test"))
        .and(body_partial_json(json!({"after": "2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [contact("3", "c@example.com", "2024-02-03T00:00:00Z")]
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                contact("1", "a@example.com", "2024-02-01T00:00:00Z"),
                contact("2", "b@example.com", "2024-02-02T00:00:00Z")
            ],
            "paging": {"next": {"after": "2"}}
        })))
        .mount(&server)
        .await;

    let settings = settings(&server, dir.path());
    let engine = open_engine(&settings).unwrap();

    let summary = engine.run(Some("contacts"), false).await.unwrap();
    let report = &summary.reports[0];
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.pages, 2);
    assert_eq!(report.rows_loaded, 3);
    assert_eq!(
        report.high_watermark.map(|t| t.to_rfc3339()),
        Some("2024-02-03T00:00:00+00:00".to_string())
    );
    assert_eq!(
        engine.warehouse().row_count("hubspot_contacts").await.unwrap(),
        3
    );
    drop(engine);

    let warehouse = DuckDbWarehouse::open(dir.path().join("warehouse.duckdb"), "hubspot").unwrap();
    let schema = warehouse.get_table("hubspot_contacts").await.unwrap().unwrap();
    assert_eq!(
        schema.field("num_notes").map(|f| f.column_type.as_str()),
        Some("FLOAT")
    );
    assert_eq!(
        schema.field("hs_object_id").map(|f| f.column_type.as_str()),
        Some("INTEGER")
    );
    let emails = warehouse
        .query_strings("SELECT email FROM hubspot_contacts ORDER BY id")
        .unwrap();
    assert_eq!(
        emails,
        vec![
            Some("a@example.com".to_string()),
            Some("b@example.com".to_string()),
            Some("c@example.com".to_string())
        ]
    );
}

#[tokio::test]
async fn test_second_run_searches_after_watermark() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_properties(&server).await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [contact("1", "a@example.com", "2024-02-01T00:00:00Z")]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // 2024-02-01T00:00:00Z in epoch milliseconds
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .and(body_partial_json(json!({
            "filterGroups": [{"filters": [{
                "propertyName": "lastmodifieddate",
                "operator": "GT",
                "value": "1706745600000"
            }]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [contact("1", "a2@example.com", "2024-02-05T00:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings(&server, dir.path());
    open_engine(&settings)
        .unwrap()
        .run(Some("contacts"), false)
        .await
        .unwrap();

    let engine = open_engine(&settings).unwrap();
    let summary = engine.run(Some("contacts"), false).await.unwrap();
    assert_eq!(summary.reports[0].rows_loaded, 1);

    let warehouse = engine.warehouse();
    assert_eq!(warehouse.row_count("hubspot_contacts").await.unwrap(), 1);

    let runs = engine.tracker().recent(Some("contacts"), 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(
        runs[0].high_watermark.map(|t| t.to_rfc3339()),
        Some("2024-02-05T00:00:00+00:00".to_string())
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failing_object_does_not_stop_the_batch() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_properties(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/owners"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [contact("1", "a@example.com", "2024-02-01T00:00:00Z")]
        })))
        .mount(&server)
        .await;

    let mut settings = settings(&server, dir.path());
    settings.objects = vec![
        ObjectSpec::new("owners", EndpointKind::List).with_path("/crm/v3/owners"),
        hubsync::source::default_catalog()
            .into_iter()
            .find(|s| s.name == "contacts")
            .unwrap(),
    ];
    let engine = open_engine(&settings).unwrap();

    let summary = engine.run(None, false).await.unwrap();

    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.succeeded(), 1);
    let owners = engine.tracker().last_sync("owners").await.unwrap().unwrap();
    assert_eq!(owners.status, RunStatus::Error);
    assert!(owners.error_detail.unwrap().contains("owners"));
    assert_eq!(
        engine.warehouse().row_count("hubspot_contacts").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_missing_token_fails_before_any_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(&server, dir.path());
    settings.source.access_token = None;

    let err = open_engine(&settings).unwrap_err();

    assert!(matches!(err, Error::MissingCredentials { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}
