//! Health checks on F5 telemetry documents.
//!
//! ```text
//!   SearchClient ──► newest document ──► SearchDocument
//!                                            │
//!                        ┌───────────────────┴──────────────────┐
//!                        ▼                                      ▼
//!             gather_pool_state()                 gather_throughput_snapshot()
//!                        │                                      │ + previous snapshot
//!                        ▼                                      ▼
//!                   PoolState                           ThroughputRates
//!                        │                                      │
//!                        └──────────► ThresholdRanges ◄─────────┘
//!                                          │
//!                                          ▼
//!                                     CheckReport ──► text + exit code
//! ```
//!
//! Every `execute()` records its own failure as an UNKNOWN verdict before
//! returning the error, so the caller only has to render the report.

pub mod pool;
pub mod report;
pub mod throughput;

pub use pool::{PoolCheck, PoolMemberState, PoolState, gather_pool_state};
pub use report::{CheckReport, PerfDatum, Status};
pub use throughput::{
    CRITICAL_FIELDS, METRIC_FIELDS, ThroughputCheck, ThroughputRates, ThroughputSnapshot,
    ThroughputState, gather_throughput_snapshot,
};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::json;
use tracing::{debug, error};

use crate::config::Thresholds;
use crate::range::Range;
use crate::search::{SearchClient, SearchDocument, SearchError};
use crate::storage::SnapshotError;

/// Format of `@timestamp` in telemetry documents.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Error type for check execution.
#[derive(Debug)]
pub enum CheckError {
    /// Search backend failed.
    Search(SearchError),
    /// Query matched no document, or the document carries no fields.
    NoData(String),
    /// A required field is absent from the document.
    MissingField { field: String, scope: String },
    /// `@timestamp` missing or not in [`TIMESTAMP_FORMAT`].
    Timestamp { value: String, reason: String },
    /// Snapshot history could not be read or written.
    Snapshot(SnapshotError),
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::Search(e) => write!(f, "{}", e),
            CheckError::NoData(scope) => write!(f, "No data for {}", scope),
            CheckError::MissingField { field, scope } => {
                write!(f, "Field {} is missing for {}", field, scope)
            }
            CheckError::Timestamp { value, reason } => {
                write!(f, "Could not parse @timestamp '{}': {}", value, reason)
            }
            CheckError::Snapshot(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CheckError {}

impl From<SearchError> for CheckError {
    fn from(e: SearchError) -> Self {
        CheckError::Search(e)
    }
}

impl From<SnapshotError> for CheckError {
    fn from(e: SnapshotError) -> Self {
        CheckError::Snapshot(e)
    }
}

/// Warning and critical ranges parsed once per check run.
///
/// A tier whose expression fails to parse records an UNKNOWN verdict and
/// never fires. The other tier still evaluates.
#[derive(Debug, Clone, Default)]
pub struct ThresholdRanges {
    pub warning: Option<Range>,
    pub critical: Option<Range>,
}

impl ThresholdRanges {
    pub fn parse(thresholds: &Thresholds, report: &mut CheckReport) -> Self {
        Self {
            warning: parse_tier(&thresholds.warning, "warning", report),
            critical: parse_tier(&thresholds.critical, "critical", report),
        }
    }

    pub fn critical_fires(&self, value: f64) -> bool {
        self.critical.as_ref().is_some_and(|r| r.matches(value))
    }

    pub fn warning_fires(&self, value: f64) -> bool {
        self.warning.as_ref().is_some_and(|r| r.matches(value))
    }
}

fn parse_tier(expr: &str, label: &str, report: &mut CheckReport) -> Option<Range> {
    if expr.is_empty() {
        return None;
    }
    match Range::parse(expr) {
        Ok(range) => Some(range),
        Err(e) => {
            error!(field = label, range = expr, error = %e, "Error parsing range");
            report.add_result(
                Status::Unknown,
                format!("error parsing {} range {}", label, expr),
            );
            None
        }
    }
}

/// Parses a telemetry `@timestamp` such as `2026-10-17T08:15:00.000Z`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CheckError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|ts| ts.and_utc())
        .map_err(|e| CheckError::Timestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Reads and parses `@timestamp` from a document.
pub(crate) fn document_timestamp(doc: &SearchDocument) -> Result<DateTime<Utc>, CheckError> {
    let value = doc
        .get_string("@timestamp")
        .ok_or_else(|| CheckError::Timestamp {
            value: String::new(),
            reason: "field is missing".to_string(),
        })?;
    parse_timestamp(&value)
}

/// Query for the newest document, returning only `fields`.
pub fn latest_document_query(fields: &[&str]) -> String {
    json!({
        "size": 1,
        "sort": { "@timestamp": "desc" },
        "query": { "match_all": {} },
        "fields": fields,
        "_source": false,
    })
    .to_string()
}

/// Runs `query` and returns the `fields` of the first hit.
pub(crate) fn fetch_latest<C: SearchClient + ?Sized>(
    client: &C,
    index: &str,
    query: &str,
    scope: &str,
) -> Result<SearchDocument, CheckError> {
    let result = client.search(index, query)?;
    if let Some(err) = &result.error {
        return Err(CheckError::Search(SearchError::Backend {
            status: result.status,
            reason: err.reason.clone(),
        }));
    }
    match result.first_fields() {
        Some(doc) if !doc.is_empty() => {
            debug!(index, fields = doc.len(), "Fetched latest document");
            Ok(doc.clone())
        }
        _ => Err(CheckError::NoData(scope.to_string())),
    }
}

/// Compares the document age with the age thresholds and emits `data_age`.
///
/// Timestamps in the future count as age zero.
pub fn check_age(
    report: &mut CheckReport,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) {
    let age = (now - timestamp).to_std().unwrap_or(Duration::ZERO);
    let age = Duration::from_secs(age.as_secs());
    debug!(timestamp = %timestamp, age_secs = age.as_secs(), "Data age");

    let exceeds = |limit: Option<Duration>| limit.is_some_and(|l| age > l);
    if exceeds(thresholds.age_critical) {
        report.add_result(
            Status::Critical,
            format!("Data is {} old", humantime::format_duration(age)),
        );
    } else if exceeds(thresholds.age_warning) {
        report.add_result(
            Status::Warning,
            format!("Data is {} old", humantime::format_duration(age)),
        );
    }

    let secs = |limit: Option<Duration>| {
        limit
            .map(|l| l.as_secs().to_string())
            .unwrap_or_default()
    };
    report.add_perf_datum(
        PerfDatum::new("data_age", "s", age.as_secs() as f64)
            .with_thresholds(&secs(thresholds.age_warning), &secs(thresholds.age_critical))
            .with_min(0.0),
    );
}
