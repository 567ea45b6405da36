//! Source API clients
//!
//! The engine consumes the upstream API only through [`SourceClient`]:
//! paginated search with a modification filter, plain listing, single-batch
//! catalogs, property metadata, and lookup by id.
//!
//! - `HubspotClient` - HubSpot CRM over HTTP
//! - `StaticSource` - in-memory records, used for fixtures and tests

mod hubspot;
mod memory;
mod types;

pub use hubspot::HubspotClient;
pub use memory::StaticSource;
pub use types::{default_catalog, EndpointKind, ObjectSpec, PropertyDefinition, SourcePage};

use crate::error::Result;
use crate::types::JsonValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Interface to an upstream record API
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// One page of a search, sorted ascending by modification time and
    /// filtered to records modified strictly after `modified_after`
    async fn search(
        &self,
        spec: &ObjectSpec,
        cursor: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<SourcePage>;

    /// One page of an unfiltered listing (list or legacy endpoints)
    async fn list(&self, spec: &ObjectSpec, cursor: Option<&str>, limit: u32)
        -> Result<SourcePage>;

    /// All records of a single-batch endpoint
    async fn fetch_single(&self, spec: &ObjectSpec) -> Result<Vec<JsonValue>>;

    /// Property definitions for the object type
    async fn get_property_definitions(&self, spec: &ObjectSpec)
        -> Result<Vec<PropertyDefinition>>;

    /// A single record, `None` when it does not exist
    async fn get_by_id(&self, spec: &ObjectSpec, id: &str) -> Result<Option<JsonValue>>;
}
