//! Paginated search with point in time and `search_after`.
//!
//! The query template must contain the placeholder `_PAGINATION_` inside its
//! top-level object, e.g.
//!
//! ```text
//! {_PAGINATION_, "sort": [{"@timestamp": "asc"}, {"_shard_doc": "asc"}], "query": {...}}
//! ```
//!
//! For every page the placeholder is replaced by the pagination members:
//!
//! ```text
//! first:  "pit":{"id":"<pit>"},"size":1000
//! next:   "pit":{"id":"<pit>","keep_alive":"120s"},"search_after":[...],"size":1000
//! ```
//!
//! State machine:
//!
//! ```text
//!   Unstarted ──start()──► Active ──next()──► Active
//!       │                    │  └──next() with 0 hits──► Exhausted
//!       │                    │
//!       └──── close() ───────┴──────────────────────────► Closed
//! ```
//!
//! Pages are ordered by the sort keys of the query. They must form a total
//! order (e.g. end with `_shard_doc` or a unique id); with ties across a page
//! boundary documents can be skipped or returned twice.

use serde_json::{Map, Value, json};
use tracing::{debug, trace, warn};

use super::pit::{close_pit, keep_alive, open_pit};
use super::{SearchClient, SearchError, SearchResult};

/// Placeholder replaced by pagination data in the query template.
pub const PAGINATION_PLACEHOLDER: &str = "_PAGINATION_";

/// Default number of hits per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unstarted,
    Active,
    Exhausted,
    Closed,
}

/// A search spread over several pages of one consistent index view.
///
/// The point in time is released by [`close`](Self::close), or on drop if the
/// caller never closed the cursor.
pub struct PaginatedSearch<'a, C: SearchClient + ?Sized> {
    client: &'a C,
    index: String,
    query: String,
    page_size: usize,
    keep_alive: String,
    pit_id: Option<String>,
    search_after: Vec<Value>,
    results: Vec<SearchResult>,
    state: CursorState,
}

impl<'a, C: SearchClient + ?Sized> PaginatedSearch<'a, C> {
    pub fn new(client: &'a C, index: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            query: query.into(),
            page_size: DEFAULT_PAGE_SIZE,
            keep_alive: keep_alive(client.timeout()),
            pit_id: None,
            search_after: Vec::new(),
            results: Vec::new(),
            state: CursorState::Unstarted,
        }
    }

    /// Sets the page size. Zero is raised to one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn pit_id(&self) -> Option<&str> {
        self.pit_id.as_deref()
    }

    /// Sort keys of the last hit seen; empty once exhausted.
    pub fn search_after(&self) -> &[Value] {
        &self.search_after
    }

    /// Every page fetched so far, in order.
    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    /// Moves the accumulated pages out, leaving the cursor state untouched.
    pub fn take_results(&mut self) -> Vec<SearchResult> {
        std::mem::take(&mut self.results)
    }

    /// Total hits over all pages fetched so far.
    pub fn hit_count(&self) -> usize {
        self.results.iter().map(SearchResult::hit_count).sum()
    }

    /// Acquires a point in time and fetches the first page.
    pub fn start(&mut self) -> Result<(), SearchError> {
        match self.state {
            CursorState::Unstarted => {}
            CursorState::Closed => return Err(SearchError::Closed),
            _ => {
                return Err(SearchError::InvalidRequest(
                    "paginated search already started".to_string(),
                ));
            }
        }

        let placeholders = self.query.matches(PAGINATION_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(SearchError::InvalidRequest(format!(
                "query must contain exactly one {} placeholder, found {}",
                PAGINATION_PLACEHOLDER, placeholders
            )));
        }

        // A failed first page leaves the cursor Unstarted with its PIT open;
        // a retry reuses it so only one PIT is ever held.
        let pit = match self.pit_id.clone() {
            Some(pit) => pit,
            None => {
                let pit = open_pit(self.client, &self.index, &self.keep_alive)?;
                self.pit_id = Some(pit.clone());
                pit
            }
        };

        let query = self.render(&pit, None, &[]);
        debug!(index = %self.index, query = %query, "First paginated search");
        let result = self.client.search("", &query)?;
        self.absorb(result);
        Ok(())
    }

    /// Fetches the next page.
    ///
    /// Fails with [`SearchError::Exhausted`] once a page came back empty; the
    /// cursor is left unchanged in that case.
    pub fn next(&mut self) -> Result<(), SearchError> {
        match self.state {
            CursorState::Active => {}
            CursorState::Closed => return Err(SearchError::Closed),
            CursorState::Unstarted => {
                return Err(SearchError::InvalidRequest(
                    "paginated search not started".to_string(),
                ));
            }
            CursorState::Exhausted => {
                warn!(index = %self.index, "Tried to continue after end of search");
                return Err(SearchError::Exhausted);
            }
        }
        let Some(pit) = self.pit_id.clone() else {
            return Err(SearchError::Closed);
        };
        if self.search_after.is_empty() {
            return Err(SearchError::Exhausted);
        }

        let query = self.render(&pit, Some(self.keep_alive.as_str()), &self.search_after);
        debug!(
            index = %self.index,
            page = self.results.len(),
            query = %query,
            "Paginated search"
        );
        let result = self.client.search("", &query)?;
        self.absorb(result);
        Ok(())
    }

    /// Releases the point in time. Safe to call more than once.
    ///
    /// Release failures are logged only; the PIT expires after its keep-alive.
    pub fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        if let Some(pit) = self.pit_id.take()
            && let Err(e) = close_pit(self.client, &pit)
        {
            warn!(pit = %pit, error = %e, "Could not release point in time, leaving it to expire");
        }
        self.search_after.clear();
        self.state = CursorState::Closed;
    }

    fn absorb(&mut self, result: SearchResult) {
        let old_pit = self.pit_id.clone().unwrap_or_default();
        if !result.pit_id.is_empty() {
            self.pit_id = Some(result.pit_id.clone());
        }
        self.search_after = result
            .last_sort()
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        self.state = if self.search_after.is_empty() {
            CursorState::Exhausted
        } else {
            CursorState::Active
        };
        trace!(
            old_pit = %old_pit,
            new_pit = %result.pit_id,
            hits = result.hit_count(),
            state = ?self.state,
            "Page complete"
        );
        self.results.push(result);
    }

    fn render(&self, pit: &str, keep_alive: Option<&str>, search_after: &[Value]) -> String {
        let members = pagination_members(pit, keep_alive, search_after, self.page_size);
        self.query.replacen(PAGINATION_PLACEHOLDER, &members, 1)
    }
}

impl<C: SearchClient + ?Sized> Drop for PaginatedSearch<'_, C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pagination object members without the surrounding braces.
fn pagination_members(
    pit: &str,
    keep_alive: Option<&str>,
    search_after: &[Value],
    size: usize,
) -> String {
    let mut pit_obj = Map::new();
    pit_obj.insert("id".to_string(), json!(pit));
    if let Some(keep_alive) = keep_alive {
        pit_obj.insert("keep_alive".to_string(), json!(keep_alive));
    }

    // Keys are emitted in sorted order: pit, search_after, size.
    let mut obj = Map::new();
    obj.insert("pit".to_string(), Value::Object(pit_obj));
    if !search_after.is_empty() {
        obj.insert(
            "search_after".to_string(),
            Value::Array(search_after.to_vec()),
        );
    }
    obj.insert("size".to_string(), json!(size));

    let text = Value::Object(obj).to_string();
    text[1..text.len() - 1].to_string()
}

/// Runs a paginated search to exhaustion and returns every page.
///
/// The point in time is released on success and on failure.
pub fn collect_all<C: SearchClient + ?Sized>(
    client: &C,
    index: &str,
    query: &str,
    page_size: usize,
) -> Result<Vec<SearchResult>, SearchError> {
    let mut search = PaginatedSearch::new(client, index, query).with_page_size(page_size);
    let outcome = drive(&mut search);
    search.close();
    outcome.map(|_| search.take_results())
}

fn drive<C: SearchClient + ?Sized>(search: &mut PaginatedSearch<'_, C>) -> Result<(), SearchError> {
    search.start()?;
    while search.state() == CursorState::Active {
        search.next()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::mock::MockSearchClient;

    const TEMPLATE: &str =
        r#"{_PAGINATION_,"sort":[{"@timestamp":"asc"},{"_shard_doc":"asc"}],"query":{"match_all":{}}}"#;

    fn three_pages() -> MockSearchClient {
        MockSearchClient::new()
            .with_pit_ids(["pit-0"])
            .with_result(MockSearchClient::page("pit-1", 0, 1000, 2042))
            .with_result(MockSearchClient::page("pit-2", 1000, 1000, 2042))
            .with_result(MockSearchClient::page("pit-3", 2000, 42, 2042))
            .with_result(MockSearchClient::page("pit-3", 2042, 0, 2042))
    }

    #[test]
    fn test_pages_sum_to_total() {
        let client = three_pages();
        let pages = collect_all(&client, "f5_telemetry", TEMPLATE, 1000).unwrap();

        let counts: Vec<usize> = pages.iter().map(SearchResult::hit_count).collect();
        assert_eq!(counts, vec![1000, 1000, 42, 0]);
        let total: usize = counts.iter().sum();
        assert_eq!(total as u64, pages[0].hits.total.value);
        assert_eq!(client.deleted_pits(), vec!["pit-3".to_string()]);
    }

    #[test]
    fn test_query_substitution() {
        let client = three_pages();
        let mut search = PaginatedSearch::new(&client, "f5_telemetry", TEMPLATE);
        search.start().unwrap();
        search.next().unwrap();

        let queries = client.queries();
        assert_eq!(queries[0].0, "");
        assert_eq!(
            queries[0].1,
            r#"{"pit":{"id":"pit-0"},"size":1000,"sort":[{"@timestamp":"asc"},{"_shard_doc":"asc"}],"query":{"match_all":{}}}"#
        );
        assert_eq!(
            queries[1].1,
            r#"{"pit":{"id":"pit-1","keep_alive":"120s"},"search_after":[999,"doc-999"],"size":1000,"sort":[{"@timestamp":"asc"},{"_shard_doc":"asc"}],"query":{"match_all":{}}}"#
        );
        assert_eq!(search.pit_id(), Some("pit-2"));
        assert_eq!(client.posted_endpoints(), vec!["/f5_telemetry/_pit?keep_alive=120s".to_string()]);
    }

    #[test]
    fn test_next_after_exhaustion_leaves_state() {
        let client = MockSearchClient::new()
            .with_pit_ids(["pit-0"])
            .with_result(MockSearchClient::page("pit-1", 0, 3, 3))
            .with_result(MockSearchClient::page("pit-1", 3, 0, 3));
        let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE).with_page_size(3);
        search.start().unwrap();
        assert_eq!(search.state(), CursorState::Active);
        search.next().unwrap();
        assert_eq!(search.state(), CursorState::Exhausted);

        let pages_before = search.results().len();
        let queries_before = client.queries().len();
        assert_eq!(search.next(), Err(SearchError::Exhausted));
        assert_eq!(search.state(), CursorState::Exhausted);
        assert_eq!(search.results().len(), pages_before);
        assert_eq!(client.queries().len(), queries_before);
        assert!(search.search_after().is_empty());
        assert_eq!(search.pit_id(), Some("pit-1"));
    }

    #[test]
    fn test_empty_first_page_is_exhausted() {
        let client = MockSearchClient::new().with_pit_ids(["pit-0"]);
        let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE);
        search.start().unwrap();
        assert_eq!(search.state(), CursorState::Exhausted);
        assert_eq!(search.hit_count(), 0);
        // Backend did not return a new id, the previous one is kept.
        assert_eq!(search.pit_id(), Some("pit-0"));
    }

    #[test]
    fn test_close_twice() {
        let client = three_pages();
        let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE);
        search.start().unwrap();
        search.close();
        search.close();
        assert_eq!(search.state(), CursorState::Closed);
        assert_eq!(client.deleted_pits().len(), 1);
        assert_eq!(search.next(), Err(SearchError::Closed));
        drop(search);
        assert_eq!(client.deleted_pits().len(), 1);
    }

    #[test]
    fn test_close_failure_is_not_fatal() {
        let client = three_pages().with_delete_error(SearchError::Connection("refused".into()));
        let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE);
        search.start().unwrap();
        search.close();
        assert_eq!(search.state(), CursorState::Closed);
        assert_eq!(client.deleted_pits(), vec!["pit-1".to_string()]);
    }

    #[test]
    fn test_pit_released_after_mid_pagination_error() {
        let client = MockSearchClient::new()
            .with_pit_ids(["pit-0"])
            .with_result(MockSearchClient::page("pit-1", 0, 2, 4))
            .with_error(SearchError::Backend {
                status: 500,
                reason: "boom".into(),
            });
        let err = collect_all(&client, "idx", TEMPLATE, 2).unwrap_err();
        assert!(matches!(err, SearchError::Backend { status: 500, .. }));
        assert_eq!(client.deleted_pits(), vec!["pit-1".to_string()]);
    }

    #[test]
    fn test_pit_released_on_drop_after_failed_start() {
        let client = MockSearchClient::new()
            .with_pit_ids(["pit-0"])
            .with_error(SearchError::Connection("reset".into()));
        {
            let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE);
            assert!(search.start().is_err());
            assert_eq!(search.state(), CursorState::Unstarted);
        }
        assert_eq!(client.deleted_pits(), vec!["pit-0".to_string()]);
    }

    #[test]
    fn test_retried_start_reuses_open_pit() {
        let client = MockSearchClient::new()
            .with_pit_ids(["pit-A", "pit-B"])
            .with_error(SearchError::Connection("reset".into()))
            .with_result(MockSearchClient::page("pit-A2", 0, 2, 2));
        let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE);
        assert!(search.start().is_err());
        search.start().unwrap();

        assert_eq!(client.posted_endpoints().len(), 1);
        assert!(client.queries()[1].1.contains(r#""pit":{"id":"pit-A"}"#));
        search.close();
        assert_eq!(client.deleted_pits(), vec!["pit-A2".to_string()]);
    }

    #[test]
    fn test_template_without_placeholder() {
        let client = MockSearchClient::new().with_pit_ids(["pit-0"]);
        let mut search = PaginatedSearch::new(&client, "idx", r#"{"query":{}}"#);
        assert!(matches!(search.start(), Err(SearchError::InvalidRequest(_))));
        assert!(client.posted_endpoints().is_empty());
    }

    #[test]
    fn test_next_before_start() {
        let client = MockSearchClient::new();
        let mut search = PaginatedSearch::new(&client, "idx", TEMPLATE);
        assert!(matches!(search.next(), Err(SearchError::InvalidRequest(_))));
    }
}
