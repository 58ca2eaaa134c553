//! In-memory scripted backend for testing checks and pagination without a cluster.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{Value, json};

use super::{Hit, HitTotal, Hits, SearchClient, SearchDocument, SearchError, SearchResult};

/// Scripted [`SearchClient`].
///
/// Search results and PIT ids are handed out in the order they were queued.
/// Once the search queue runs dry every further search returns an empty page.
#[derive(Debug, Default)]
pub struct MockSearchClient {
    results: RefCell<VecDeque<Result<SearchResult, SearchError>>>,
    pit_ids: RefCell<VecDeque<String>>,
    queries: RefCell<Vec<(String, String)>>,
    posted: RefCell<Vec<String>>,
    deleted: RefCell<Vec<String>>,
    delete_error: Option<SearchError>,
    timeout: Duration,
}

impl MockSearchClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Queues a successful search result.
    pub fn with_result(self, result: SearchResult) -> Self {
        self.results.borrow_mut().push_back(Ok(result));
        self
    }

    /// Queues a failing search.
    pub fn with_error(self, err: SearchError) -> Self {
        self.results.borrow_mut().push_back(Err(err));
        self
    }

    /// Ids returned by successive PIT requests.
    pub fn with_pit_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pit_ids
            .borrow_mut()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Makes every PIT deletion fail with `err`.
    pub fn with_delete_error(mut self, err: SearchError) -> Self {
        self.delete_error = Some(err);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `(index, query)` of every search issued so far.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.borrow().clone()
    }

    /// Endpoints of every POST issued so far.
    pub fn posted_endpoints(&self) -> Vec<String> {
        self.posted.borrow().clone()
    }

    /// PIT ids of every deletion attempt, including failed ones.
    pub fn deleted_pits(&self) -> Vec<String> {
        self.deleted.borrow().clone()
    }

    /// Builds a page of `count` hits whose sort keys are `[start + i, "doc-<start + i>"]`.
    pub fn page(pit_id: &str, start: u64, count: u64, total: u64) -> SearchResult {
        let hits = (start..start + count)
            .map(|n| Hit {
                id: format!("doc-{}", n),
                sort: vec![json!(n), json!(format!("doc-{}", n))],
                ..Hit::default()
            })
            .collect();
        SearchResult {
            pit_id: pit_id.to_string(),
            hits: Hits {
                total: HitTotal {
                    value: total,
                    relation: "eq".to_string(),
                },
                max_score: None,
                hits,
            },
            ..SearchResult::default()
        }
    }

    /// Builds a single-hit result carrying `fields`.
    pub fn document(fields: SearchDocument) -> SearchResult {
        SearchResult {
            hits: Hits {
                total: HitTotal {
                    value: 1,
                    relation: "eq".to_string(),
                },
                max_score: None,
                hits: vec![Hit {
                    id: "doc-0".to_string(),
                    fields,
                    ..Hit::default()
                }],
            },
            ..SearchResult::default()
        }
    }
}

impl SearchClient for MockSearchClient {
    fn search(&self, index: &str, query: &str) -> Result<SearchResult, SearchError> {
        self.queries
            .borrow_mut()
            .push((index.to_string(), query.to_string()));
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchResult::default()))
    }

    fn post_json(&self, endpoint: &str, _body: &[u8]) -> Result<Value, SearchError> {
        self.posted.borrow_mut().push(endpoint.to_string());
        match self.pit_ids.borrow_mut().pop_front() {
            Some(id) => Ok(json!({ "id": id })),
            None => Ok(json!({})),
        }
    }

    fn delete_json(&self, _endpoint: &str, body: &[u8]) -> Result<Value, SearchError> {
        let id = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        self.deleted.borrow_mut().push(id);
        match &self.delete_error {
            Some(err) => Err(err.clone()),
            None => Ok(json!({ "succeeded": true, "num_freed": 1 })),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
