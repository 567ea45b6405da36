//! In-memory source
//!
//! Serves fixed records per object type with the same paging rules as the
//! remote API, including the hard search ceiling. Failures can be injected.

use super::types::{ObjectSpec, PropertyDefinition, SourcePage};
use super::SourceClient;
use crate::error::{Error, Result};
use crate::types::JsonValue;
use crate::value::{extract_modified_at, lookup_path};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory [`SourceClient`]
#[derive(Debug)]
pub struct StaticSource {
    records: HashMap<String, Vec<JsonValue>>,
    properties: HashMap<String, Vec<PropertyDefinition>>,
    search_ceiling: usize,
    failures: Mutex<VecDeque<Error>>,
    calls: AtomicUsize,
}

impl Default for StaticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticSource {
    /// Create an empty source with a 10,000 result search ceiling
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            properties: HashMap::new(),
            search_ceiling: 10_000,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the records for an object type
    #[must_use]
    pub fn with_records(mut self, object_type: impl Into<String>, records: Vec<JsonValue>) -> Self {
        self.records.insert(object_type.into(), records);
        self
    }

    /// Set property definitions for an object type
    #[must_use]
    pub fn with_properties(
        mut self,
        object_type: impl Into<String>,
        properties: Vec<PropertyDefinition>,
    ) -> Self {
        self.properties.insert(object_type.into(), properties);
        self
    }

    /// Set the maximum results one search can page through
    #[must_use]
    pub fn with_search_ceiling(mut self, ceiling: usize) -> Self {
        self.search_ceiling = ceiling;
        self
    }

    /// Make the next calls fail with the given errors, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = Error>) {
        if let Ok(mut queue) = self.failures.lock() {
            queue.extend(errors);
        }
    }

    /// Number of page-level calls served (including failures)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .lock()
            .map_err(|_| Error::Other("failure queue poisoned".to_string()))?
            .pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn records_for(&self, spec: &ObjectSpec) -> &[JsonValue] {
        self.records.get(&spec.name).map_or(&[], Vec::as_slice)
    }
}

fn parse_offset(cursor: Option<&str>) -> Result<usize> {
    cursor.map_or(Ok(0), |c| {
        c.parse()
            .map_err(|_| Error::http_status(400, format!("invalid cursor '{c}'")))
    })
}

fn page_of(records: &[JsonValue], offset: usize, limit: usize, end: usize) -> SourcePage {
    let start = offset.min(records.len());
    let stop = (start + limit).min(records.len()).min(end.max(start));
    let page = records[start..stop].to_vec();
    let next = (stop < records.len() && !page.is_empty()).then(|| stop.to_string());
    SourcePage::new(page, next)
}

#[async_trait]
impl SourceClient for StaticSource {
    async fn search(
        &self,
        spec: &ObjectSpec,
        cursor: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<SourcePage> {
        self.begin_call()?;
        let offset = parse_offset(cursor)?;
        if offset >= self.search_ceiling {
            return Err(Error::http_status(
                400,
                format!("search results beyond {} are not available", self.search_ceiling),
            ));
        }

        let mut matching: Vec<(Option<DateTime<Utc>>, &JsonValue)> = self
            .records_for(spec)
            .iter()
            .map(|r| (extract_modified_at(r, &spec.modified_fields), r))
            .filter(|(ts, _)| match (modified_after, ts) {
                (Some(after), Some(ts)) => *ts > after,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        matching.sort_by_key(|(ts, _)| *ts);

        let ordered: Vec<JsonValue> = matching.into_iter().map(|(_, r)| r.clone()).collect();
        Ok(page_of(&ordered, offset, limit as usize, self.search_ceiling))
    }

    async fn list(
        &self,
        spec: &ObjectSpec,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<SourcePage> {
        self.begin_call()?;
        let offset = parse_offset(cursor)?;
        let records = self.records_for(spec);
        Ok(page_of(records, offset, limit as usize, records.len()))
    }

    async fn fetch_single(&self, spec: &ObjectSpec) -> Result<Vec<JsonValue>> {
        self.begin_call()?;
        Ok(self.records_for(spec).to_vec())
    }

    async fn get_property_definitions(
        &self,
        spec: &ObjectSpec,
    ) -> Result<Vec<PropertyDefinition>> {
        Ok(self.properties.get(&spec.name).cloned().unwrap_or_default())
    }

    async fn get_by_id(&self, spec: &ObjectSpec, id: &str) -> Result<Option<JsonValue>> {
        Ok(self
            .records_for(spec)
            .iter()
            .find(|r| {
                lookup_path(r, &spec.key_field).is_some_and(|v| match v {
                    JsonValue::String(s) => s == id,
                    other => other.to_string() == id,
                })
            })
            .cloned())
    }
}
