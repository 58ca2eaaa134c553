//! Response types of the search API.
//!
//! Every field is defaulted: the checks only rely on a handful of them and an
//! older or newer cluster must not fail decoding because of the rest.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::SearchDocument;

/// The result of a search.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResult {
    /// Point-in-time id; the backend may rotate it on every page.
    pub pit_id: String,
    pub took: u64,
    pub timed_out: bool,
    #[serde(rename = "_shards")]
    pub shards: ShardStats,
    pub hits: Hits,
    pub error: Option<BackendError>,
    pub status: u16,
    pub aggregations: HashMap<String, Value>,
}

impl SearchResult {
    /// Number of hits on this page.
    pub fn hit_count(&self) -> usize {
        self.hits.hits.len()
    }

    /// Sort values of the last hit, used as `search_after` for the next page.
    pub fn last_sort(&self) -> Option<&[Value]> {
        self.hits.hits.last().map(|h| h.sort.as_slice())
    }

    /// The `fields` of the first hit, if any.
    pub fn first_fields(&self) -> Option<&SearchDocument> {
        self.hits.hits.first().map(|h| &h.fields)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShardStats {
    pub total: u32,
    pub successful: u32,
    pub skipped: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hits {
    pub total: HitTotal,
    pub max_score: Option<f64>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HitTotal {
    pub value: u64,
    pub relation: String,
}

/// A matching document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: Option<f64>,
    #[serde(rename = "_source")]
    pub source: SearchDocument,
    pub fields: SearchDocument,
    pub sort: Vec<Value>,
}

/// Error body returned by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendError {
    pub root_cause: Vec<BackendRootCause>,
    pub reason: String,
    pub resource: BackendErrorResource,
    pub index: String,
    pub index_uuid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendRootCause {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub resource: BackendErrorResource,
    pub index: String,
    pub index_uuid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendErrorResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}
