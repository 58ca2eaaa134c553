//! Elasticsearch access.
//!
//! The checks only talk to the backend through the [`SearchClient`] trait:
//!
//! ```text
//!   PoolCheck / ThroughputCheck        PaginatedSearch
//!               │                            │
//!               └────────────┬───────────────┘
//!                            │
//!                    ┌───────▼───────┐
//!                    │ SearchClient  │ (trait)
//!                    └───────┬───────┘
//!                  ┌─────────┴─────────┐
//!           ┌──────▼──────┐     ┌──────▼──────────┐
//!           │ElasticClient│     │MockSearchClient │
//!           │ (reqwest)   │     │ (tests)         │
//!           └─────────────┘     └─────────────────┘
//! ```

mod document;
mod http;
pub mod mock;
mod pagination;
mod pit;
mod result;

pub use document::SearchDocument;
pub use http::ElasticClient;
pub use pagination::{
    CursorState, DEFAULT_PAGE_SIZE, PAGINATION_PLACEHOLDER, PaginatedSearch, collect_all,
};
pub use pit::{close_pit, keep_alive, open_pit};
pub use result::{
    BackendError, BackendErrorResource, BackendRootCause, Hit, HitTotal, Hits, SearchResult,
    ShardStats,
};

use std::fmt;
use std::time::Duration;

/// Error type for backend access.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchError {
    /// Backend unreachable, TLS or authentication failure.
    Connection(String),
    /// Backend answered with an error status.
    Backend { status: u16, reason: String },
    /// Response body could not be decoded.
    Decode(String),
    /// Request rejected before reaching the backend.
    InvalidRequest(String),
    /// `next()` called after the last page.
    Exhausted,
    /// Cursor used after `close()`.
    Closed,
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Connection(msg) => write!(f, "Elasticsearch connection error: {}", msg),
            SearchError::Backend { status, reason } => {
                write!(f, "Elasticsearch error (status {}): {}", status, reason)
            }
            SearchError::Decode(msg) => write!(f, "Failed to decode Elasticsearch response: {}", msg),
            SearchError::InvalidRequest(msg) => write!(f, "Invalid search request: {}", msg),
            SearchError::Exhausted => write!(f, "Tried to continue after end of search"),
            SearchError::Closed => write!(f, "Paginated search is already closed"),
        }
    }
}

impl std::error::Error for SearchError {}

/// Minimal interface to the search backend.
///
/// Implemented by [`ElasticClient`] for real clusters and by
/// [`mock::MockSearchClient`] for tests.
pub trait SearchClient {
    /// Runs `query` against `index`. An empty index searches `/_search`,
    /// which is required when the query carries a point in time.
    fn search(&self, index: &str, query: &str) -> Result<SearchResult, SearchError>;

    /// POSTs a JSON body to `endpoint` and returns the decoded response.
    fn post_json(&self, endpoint: &str, body: &[u8]) -> Result<serde_json::Value, SearchError>;

    /// Sends a DELETE with a JSON body to `endpoint`.
    fn delete_json(&self, endpoint: &str, body: &[u8]) -> Result<serde_json::Value, SearchError>;

    /// Request timeout, reused as point-in-time keep-alive.
    fn timeout(&self) -> Duration;
}
