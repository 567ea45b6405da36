//! Source object catalog and page types

use crate::types::JsonValue;
use serde::{Deserialize, Serialize};

/// How an object type is fetched from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Cursor-paged search with a server-side modification filter and a
    /// hard result ceiling per search
    #[default]
    Search,
    /// Cursor-paged list, no server-side filter
    List,
    /// Offset-paged legacy endpoint, no server-side filter
    Legacy,
    /// Everything in one call
    Single,
}

/// Definition of one syncable object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// Object type name (`contacts`, `engagements`, ...)
    pub name: String,

    /// Destination table; defaults to `hubspot_<name>`
    #[serde(default)]
    pub table: Option<String>,

    /// Stable identifier field
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Page size
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Fetch style
    #[serde(default)]
    pub endpoint: EndpointKind,

    /// Whether incremental runs filter by modification time
    #[serde(default)]
    pub supports_incremental: bool,

    /// Candidate paths for the modification timestamp, in priority order
    #[serde(default = "default_modified_fields")]
    pub modified_fields: Vec<String>,

    /// Property used for search filtering and sorting
    #[serde(default)]
    pub modified_property: Option<String>,

    /// Object name for the property-definitions endpoint
    #[serde(default)]
    pub property_object: Option<String>,

    /// Object name in API paths when it differs from `name`
    #[serde(default)]
    pub api_name: Option<String>,

    /// Explicit endpoint path for list, legacy and single endpoints
    #[serde(default)]
    pub path: Option<String>,

    /// Response key holding the records
    #[serde(default)]
    pub results_key: Option<String>,

    /// Nested object whose fields are lifted to the top level of each record
    #[serde(default)]
    pub unwrap_key: Option<String>,

    /// Child array emitted as the records of a single-batch endpoint
    #[serde(default)]
    pub explode_key: Option<String>,

    /// Object types whose property catalogs make up this object's records
    #[serde(default)]
    pub property_groups: Vec<String>,
}

fn default_key_field() -> String {
    "id".to_string()
}

fn default_batch_size() -> u32 {
    100
}

fn default_modified_fields() -> Vec<String> {
    vec![
        "updatedAt".to_string(),
        "updated_at".to_string(),
        "lastUpdated".to_string(),
    ]
}

impl ObjectSpec {
    /// Create a spec with defaults for the given endpoint kind
    pub fn new(name: impl Into<String>, endpoint: EndpointKind) -> Self {
        Self {
            name: name.into(),
            table: None,
            key_field: default_key_field(),
            batch_size: default_batch_size(),
            endpoint,
            supports_incremental: false,
            modified_fields: default_modified_fields(),
            modified_property: None,
            property_object: None,
            api_name: None,
            path: None,
            results_key: None,
            unwrap_key: None,
            explode_key: None,
            property_groups: Vec::new(),
        }
    }

    /// Set the key field
    #[must_use]
    pub fn with_key_field(mut self, key: impl Into<String>) -> Self {
        self.key_field = key.into();
        self
    }

    /// Set the page size
    #[must_use]
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Enable incremental sync, filtering on the given search property
    #[must_use]
    pub fn incremental(mut self, modified_property: Option<&str>) -> Self {
        self.supports_incremental = true;
        self.modified_property = modified_property.map(String::from);
        self
    }

    /// Set modification timestamp candidates
    #[must_use]
    pub fn with_modified_fields(mut self, fields: &[&str]) -> Self {
        self.modified_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Set the property-definitions object
    #[must_use]
    pub fn with_property_object(mut self, object: impl Into<String>) -> Self {
        self.property_object = Some(object.into());
        self
    }

    /// Set the API object name
    #[must_use]
    pub fn with_api_name(mut self, name: impl Into<String>) -> Self {
        self.api_name = Some(name.into());
        self
    }

    /// Set the endpoint path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the response key holding records
    #[must_use]
    pub fn with_results_key(mut self, key: impl Into<String>) -> Self {
        self.results_key = Some(key.into());
        self
    }

    /// Set the destination table
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Destination table name
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| format!("hubspot_{}", self.name))
    }

    /// Object name used in API paths
    pub fn api_object(&self) -> &str {
        self.api_name.as_deref().unwrap_or(&self.name)
    }

    /// Key holding records in a response
    pub fn records_key(&self) -> &str {
        self.results_key.as_deref().unwrap_or("results")
    }

    /// Whether incremental runs can filter on the server
    pub fn filters_server_side(&self) -> bool {
        self.endpoint == EndpointKind::Search
    }
}

/// Built-in HubSpot object catalog
pub fn default_catalog() -> Vec<ObjectSpec> {
    let crm = |name: &str, modified: &str| {
        let property_path = format!("properties.{modified}");
        ObjectSpec::new(name, EndpointKind::Search)
            .incremental(Some(modified))
            .with_modified_fields(&[property_path.as_str(), "updatedAt"])
            .with_property_object(name)
    };

    vec![
        crm("contacts", "lastmodifieddate"),
        crm("companies", "hs_lastmodifieddate"),
        crm("deals", "hs_lastmodifieddate"),
        crm("tickets", "hs_lastmodifieddate"),
        ObjectSpec::new("owners", EndpointKind::List).with_path("/crm/v3/owners"),
        {
            let mut spec = ObjectSpec::new("engagements", EndpointKind::Legacy)
                .incremental(None)
                .with_modified_fields(&["lastUpdated", "updated_at", "updatedAt"])
                .with_path("/engagements/v1/engagements/paged");
            spec.unwrap_key = Some("engagement".to_string());
            spec
        },
        ObjectSpec::new("deal_pipelines", EndpointKind::Single)
            .with_path("/crm/v3/pipelines/deals"),
        {
            let mut spec = ObjectSpec::new("deal_stages", EndpointKind::Single)
                .with_path("/crm/v3/pipelines/deals");
            spec.explode_key = Some("stages".to_string());
            spec
        },
        ObjectSpec::new("workflows", EndpointKind::Legacy)
            .with_batch_size(50)
            .with_path("/automation/v3/workflows")
            .with_results_key("workflows"),
        {
            let mut spec = ObjectSpec::new("properties", EndpointKind::Single);
            spec.property_groups = ["contacts", "companies", "deals", "tickets"]
                .iter()
                .map(|g| (*g).to_string())
                .collect();
            spec
        },
        ObjectSpec::new("lists", EndpointKind::Legacy)
            .with_key_field("listId")
            .with_batch_size(30)
            .with_path("/contacts/v1/lists")
            .with_results_key("lists"),
        crm("call_records", "hs_lastmodifieddate")
            .with_batch_size(40)
            .with_api_name("calls")
            .with_property_object("calls"),
        crm("meetings", "hs_lastmodifieddate").with_batch_size(50),
    ]
}

/// One page of raw records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    /// Raw nested records
    pub records: Vec<JsonValue>,
    /// Cursor for the next page, `None` at the end
    pub next_cursor: Option<String>,
}

impl SourcePage {
    /// Create a page
    pub fn new(records: Vec<JsonValue>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            next_cursor,
        }
    }
}

/// A property definition from the source's metadata API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Property name
    pub name: String,
    /// Source type name (`string`, `number`, `datetime`, ...)
    #[serde(rename = "type", default)]
    pub type_name: String,
    /// Whether the source hides this property
    #[serde(default)]
    pub hidden: bool,
}

impl PropertyDefinition {
    /// Create a visible definition
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            hidden: false,
        }
    }
}
