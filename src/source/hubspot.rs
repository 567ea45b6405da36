//! HubSpot CRM client
//!
//! Search endpoints: `POST /crm/v3/objects/{object}/search`, cursor paged,
//! 10,000 results per search at most.
//! List endpoints: `GET /crm/v3/...` with `after` cursors.
//! Legacy endpoints: `GET` with `offset` / `hasMore` paging.

use super::types::{EndpointKind, ObjectSpec, PropertyDefinition, SourcePage};
use super::SourceClient;
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, RequestConfig};
use crate::types::{EndpointClass, JsonObject, JsonValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// HubSpot client over the shared HTTP client
pub struct HubspotClient {
    http: HttpClient,
    /// Property names per object type, requested explicitly on search
    search_properties: RwLock<HashMap<String, Vec<String>>>,
}

impl HubspotClient {
    /// Wrap an HTTP client
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            search_properties: RwLock::new(HashMap::new()),
        }
    }

    /// Build from an HTTP config
    pub fn from_config(config: HttpClientConfig) -> Result<Self> {
        Ok(Self::new(HttpClient::with_config(config)?))
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    fn list_path(spec: &ObjectSpec) -> String {
        spec.path
            .clone()
            .unwrap_or_else(|| format!("/crm/v3/objects/{}", spec.api_object()))
    }

    async fn fetch_property_catalog(&self, object: &str) -> Result<Vec<JsonValue>> {
        let body: JsonValue = self
            .http
            .get_json(&format!("/crm/v3/properties/{object}"), RequestConfig::new())
            .await?;
        records_from(&body, "results")
    }
}

#[async_trait]
impl SourceClient for HubspotClient {
    async fn search(
        &self,
        spec: &ObjectSpec,
        cursor: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<SourcePage> {
        let properties = self
            .search_properties
            .read()
            .await
            .get(&spec.name)
            .cloned()
            .unwrap_or_default();

        let body = search_body(spec, cursor, modified_after, limit, &properties);
        debug!(object_type = %spec.name, ?cursor, ?modified_after, "Searching");

        let response: JsonValue = self
            .http
            .post_json(
                &format!("/crm/v3/objects/{}/search", spec.api_object()),
                RequestConfig::new().json(body).class(EndpointClass::Search),
            )
            .await?;

        parse_page(spec, &response)
    }

    async fn list(
        &self,
        spec: &ObjectSpec,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<SourcePage> {
        let mut request = RequestConfig::new()
            .query("limit", limit.to_string())
            .class(EndpointClass::BulkList);

        if let Some(cursor) = cursor {
            let param = if spec.endpoint == EndpointKind::Legacy {
                "offset"
            } else {
                "after"
            };
            request = request.query(param, cursor);
        }

        debug!(object_type = %spec.name, ?cursor, "Listing");
        let response: JsonValue = self.http.get_json(&Self::list_path(spec), request).await?;
        parse_page(spec, &response)
    }

    async fn fetch_single(&self, spec: &ObjectSpec) -> Result<Vec<JsonValue>> {
        if !spec.property_groups.is_empty() {
            let mut all = Vec::new();
            for group in &spec.property_groups {
                for mut property in self.fetch_property_catalog(group).await? {
                    if let Some(obj) = property.as_object_mut() {
                        let name = obj
                            .get("name")
                            .and_then(JsonValue::as_str)
                            .unwrap_or_default()
                            .to_string();
                        obj.insert("object_type".to_string(), json!(group));
                        obj.insert("id".to_string(), json!(format!("{group}.{name}")));
                    }
                    all.push(property);
                }
            }
            return Ok(all);
        }

        let response: JsonValue = self
            .http
            .get_json(&Self::list_path(spec), RequestConfig::new())
            .await?;
        let records = parse_page(spec, &response)?.records;

        match spec.explode_key.as_deref() {
            Some(key) => Ok(explode(&records, key)),
            None => Ok(records),
        }
    }

    async fn get_property_definitions(
        &self,
        spec: &ObjectSpec,
    ) -> Result<Vec<PropertyDefinition>> {
        let Some(object) = spec.property_object.as_deref() else {
            return Ok(Vec::new());
        };

        let definitions: Vec<PropertyDefinition> = self
            .fetch_property_catalog(object)
            .await?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;

        self.search_properties.write().await.insert(
            spec.name.clone(),
            definitions.iter().map(|d| d.name.clone()).collect(),
        );

        Ok(definitions)
    }

    async fn get_by_id(&self, spec: &ObjectSpec, id: &str) -> Result<Option<JsonValue>> {
        let path = format!("/crm/v3/objects/{}/{id}", spec.api_object());
        match self.http.get_json(&path, RequestConfig::new()).await {
            Ok(record) => Ok(Some(record)),
            Err(Error::HttpStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for HubspotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubspotClient")
            .field("http", &self.http)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Request / response shaping
// ============================================================================

/// Build a search request body
pub(crate) fn search_body(
    spec: &ObjectSpec,
    cursor: Option<&str>,
    modified_after: Option<DateTime<Utc>>,
    limit: u32,
    properties: &[String],
) -> JsonValue {
    let mut body = JsonObject::new();
    body.insert("limit".to_string(), json!(limit));

    if let Some(property) = spec.modified_property.as_deref() {
        body.insert(
            "sorts".to_string(),
            json!([{"propertyName": property, "direction": "ASCENDING"}]),
        );
        if let Some(after) = modified_after {
            body.insert(
                "filterGroups".to_string(),
                json!([{
                    "filters": [{
                        "propertyName": property,
                        "operator": "GT",
                        "value": after.timestamp_millis().to_string(),
                    }]
                }]),
            );
        }
    }

    if let Some(cursor) = cursor {
        body.insert("after".to_string(), json!(cursor));
    }
    if !properties.is_empty() {
        body.insert("properties".to_string(), json!(properties));
    }

    JsonValue::Object(body)
}

/// Parse records and the next cursor out of a page response
pub(crate) fn parse_page(spec: &ObjectSpec, body: &JsonValue) -> Result<SourcePage> {
    let mut records = records_from(body, spec.records_key())?;

    if let Some(key) = spec.unwrap_key.as_deref() {
        for record in &mut records {
            lift_nested(record, key);
        }
    }

    Ok(SourcePage::new(records, next_cursor(body)))
}

fn records_from(body: &JsonValue, key: &str) -> Result<Vec<JsonValue>> {
    match body {
        JsonValue::Array(items) => Ok(items.clone()),
        JsonValue::Object(obj) => match obj.get(key) {
            Some(JsonValue::Array(items)) => Ok(items.clone()),
            Some(JsonValue::Null) | None => Ok(Vec::new()),
            Some(other) => Err(Error::unexpected(format!(
                "'{key}' is not an array: {other}"
            ))),
        },
        other => Err(Error::unexpected(format!(
            "expected an object or array, got {other}"
        ))),
    }
}

fn next_cursor(body: &JsonValue) -> Option<String> {
    if let Some(after) = body.pointer("/paging/next/after") {
        return scalar_string(after);
    }

    let has_more = ["hasMore", "has-more"]
        .iter()
        .filter_map(|k| body.get(*k))
        .any(|v| v.as_bool() == Some(true));
    if !has_more {
        return None;
    }

    ["offset", "vid-offset"]
        .iter()
        .filter_map(|k| body.get(*k))
        .find_map(scalar_string)
}

fn scalar_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Move the fields of `record[key]` to the top level; existing keys win
fn lift_nested(record: &mut JsonValue, key: &str) {
    let Some(obj) = record.as_object_mut() else {
        return;
    };
    if let Some(JsonValue::Object(inner)) = obj.remove(key) {
        for (k, v) in inner {
            obj.entry(k).or_insert(v);
        }
    }
}

/// Emit each parent's child array entries as records, tagged with `parent_id`
fn explode(parents: &[JsonValue], key: &str) -> Vec<JsonValue> {
    parents
        .iter()
        .flat_map(|parent| {
            let parent_id = parent.get("id").cloned().unwrap_or(JsonValue::Null);
            parent
                .get(key)
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(move |mut child| {
                    if let Some(obj) = child.as_object_mut() {
                        obj.entry("parent_id").or_insert_with(|| parent_id.clone());
                    }
                    child
                })
        })
        .collect()
}
