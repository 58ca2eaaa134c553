//! System throughput derived from two counter snapshots.
//!
//! The LTM reports cumulative counters under
//! `system.throughputPerformance.<field>.current`. A rate needs the counters
//! of the previous run, which are kept in a [`SnapshotStore`]:
//!
//! ```text
//!   previous (store) ──┐
//!                      ├──► delta / elapsed ──► rates ──► thresholds
//!   current (search) ──┘
//!          │
//!          └──► store (next run)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::report::format_number;
use super::{
    CheckError, CheckReport, PerfDatum, Status, ThresholdRanges, check_age, document_timestamp,
    fetch_latest, latest_document_query,
};
use crate::config::ThroughputCheckConfig;
use crate::search::{SearchClient, SearchDocument};
use crate::storage::SnapshotStore;

/// Counters read from every document.
pub const METRIC_FIELDS: [&str; 12] = [
    "serverIn",
    "serverOut",
    "serverBitsIn",
    "serverBitsOut",
    "clientIn",
    "clientOut",
    "clientBitsIn",
    "clientBitsOut",
    "inPackets",
    "outPackets",
    "inBits",
    "outBits",
];

/// Counters without which the combined rates cannot be derived.
pub const CRITICAL_FIELDS: [&str; 4] = [
    "clientBitsIn",
    "clientBitsOut",
    "serverBitsIn",
    "serverBitsOut",
];

const IN_FIELDS: [&str; 2] = ["clientBitsIn", "clientBitsOut"];
const OUT_FIELDS: [&str; 2] = ["serverBitsIn", "serverBitsOut"];

const SCOPE: &str = "throughput check";

/// Counter values at one point in time. This is what the history file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSnapshot {
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Fields", default)]
    pub fields: BTreeMap<String, f64>,
}

impl ThroughputSnapshot {
    /// Critical fields absent from this snapshot.
    pub fn missing_critical_fields(&self) -> Vec<&'static str> {
        CRITICAL_FIELDS
            .into_iter()
            .filter(|f| !self.fields.contains_key(*f))
            .collect()
    }
}

/// Rates derived from the current and the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThroughputRates {
    pub elapsed_secs: f64,
    pub delta: BTreeMap<String, f64>,
    pub per_second: BTreeMap<String, f64>,
    pub throughput_in: f64,
    pub throughput_out: f64,
}

impl ThroughputRates {
    /// Derives per-field deltas and rates.
    ///
    /// Without a previous snapshot, or when no time has passed, every rate is
    /// zero. Fields missing from the previous snapshot count as zero; fields
    /// missing from the current one get no delta at all.
    pub fn compute(current: &ThroughputSnapshot, previous: Option<&ThroughputSnapshot>) -> Self {
        let elapsed_secs = previous
            .map(|p| (current.timestamp - p.timestamp).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let mut rates = Self {
            elapsed_secs,
            ..Self::default()
        };
        for (field, value) in &current.fields {
            let old = previous
                .and_then(|p| p.fields.get(field))
                .copied()
                .unwrap_or(0.0);
            let delta = value - old;
            let rate = if elapsed_secs > 0.0 {
                delta / elapsed_secs
            } else {
                0.0
            };
            rates.delta.insert(field.clone(), delta);
            rates.per_second.insert(field.clone(), rate);
        }

        let sum = |fields: &[&str]| -> f64 {
            fields
                .iter()
                .filter_map(|f| rates.per_second.get(*f))
                .sum()
        };
        let (throughput_in, throughput_out) = (sum(&IN_FIELDS), sum(&OUT_FIELDS));
        rates.throughput_in = throughput_in;
        rates.throughput_out = throughput_out;
        rates
    }
}

/// Builds the current snapshot from a document.
///
/// Only an unusable `@timestamp` fails. Missing counters are left out of the
/// snapshot; see [`ThroughputSnapshot::missing_critical_fields`] for the ones
/// the rates cannot do without.
pub fn gather_throughput_snapshot(doc: &SearchDocument) -> Result<ThroughputSnapshot, CheckError> {
    let timestamp = document_timestamp(doc)?;
    let mut fields = BTreeMap::new();
    for field in METRIC_FIELDS {
        match doc.get_f64(&format!("system.throughputPerformance.{}.current", field)) {
            Some(value) => {
                fields.insert(field.to_string(), value);
            }
            None => warn!(field, "Field is missing"),
        }
    }
    Ok(ThroughputSnapshot { timestamp, fields })
}

/// Outcome of [`ThroughputCheck::execute`].
#[derive(Debug, Clone)]
pub struct ThroughputState {
    pub current: ThroughputSnapshot,
    pub previous: Option<ThroughputSnapshot>,
    pub rates: ThroughputRates,
}

/// Throughput check against one search backend and one history store.
pub struct ThroughputCheck<'a, C: SearchClient + ?Sized, S: SnapshotStore + ?Sized> {
    client: &'a C,
    store: &'a S,
    config: &'a ThroughputCheckConfig,
}

impl<'a, C, S> ThroughputCheck<'a, C, S>
where
    C: SearchClient + ?Sized,
    S: SnapshotStore + ?Sized,
{
    pub fn new(client: &'a C, store: &'a S, config: &'a ThroughputCheckConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn query(&self) -> String {
        latest_document_query(&["@timestamp", "system.throughputPerformance.*.current"])
    }

    /// Loads the previous snapshot, fetches the current one, derives rates
    /// and stores the current snapshot for the next run.
    ///
    /// Failures are recorded in `report` as UNKNOWN before being returned.
    pub fn execute(&self, report: &mut CheckReport) -> Result<ThroughputState, CheckError> {
        let previous = self.store.load().map_err(|e| {
            error!(error = %e, "Could not read historic data");
            report.add_result(Status::Unknown, format!("{}. Could not read historic data", e));
            CheckError::Snapshot(e)
        })?;

        let query = self.query();
        let doc = match fetch_latest(self.client, &self.config.index, &query, SCOPE) {
            Ok(doc) => doc,
            Err(CheckError::Search(e)) => {
                error!(index = %self.config.index, query = %query, error = %e, "Could not run search");
                report.add_result(
                    Status::Unknown,
                    format!("{}. Could not run search on index {}", e, self.config.index),
                );
                return Err(CheckError::Search(e));
            }
            Err(e) => {
                error!(error = %e, "No data for throughput check");
                report.add_result(Status::Unknown, e.to_string());
                return Err(e);
            }
        };

        let current = gather_throughput_snapshot(&doc).map_err(|e| {
            error!(error = %e, "Could not read throughput data");
            report.add_result(Status::Unknown, e.to_string());
            e
        })?;

        let missing = current.missing_critical_fields();
        if let Some(first) = missing.first() {
            for field in &missing {
                error!(field, "Critical field is missing");
                report.add_result(Status::Unknown, format!("Critical field {} is missing", field));
            }
            return Err(CheckError::MissingField {
                field: first.to_string(),
                scope: SCOPE.to_string(),
            });
        }

        let rates = ThroughputRates::compute(&current, previous.as_ref());
        debug!(
            elapsed_secs = rates.elapsed_secs,
            throughput_in = rates.throughput_in,
            throughput_out = rates.throughput_out,
            "Calculated throughput"
        );

        self.store.save(&current).map_err(|e| {
            error!(error = %e, "Could not write historic data");
            report.add_result(Status::Unknown, format!("{}. Could not write historic data", e));
            CheckError::Snapshot(e)
        })?;

        Ok(ThroughputState {
            current,
            previous,
            rates,
        })
    }

    /// Evaluates the combined rates and data age.
    pub fn check(&self, state: &ThroughputState, report: &mut CheckReport, now: DateTime<Utc>) {
        let thresholds = &self.config.thresholds;
        let ranges = ThresholdRanges::parse(thresholds, report);
        let rates = &state.rates;
        let directions = [("In", rates.throughput_in), ("Out", rates.throughput_out)];

        let mut fired = false;
        for (name, value) in directions {
            if ranges.critical_fires(value) {
                report.add_result(
                    Status::Critical,
                    format!(
                        "Throughput {} {} is above critical threshold {}",
                        name,
                        format_number(value),
                        thresholds.critical
                    ),
                );
                fired = true;
            }
        }
        for (name, value) in directions {
            if ranges.warning_fires(value) {
                report.add_result(
                    Status::Warning,
                    format!(
                        "Throughput {} {} is above warning threshold {}",
                        name,
                        format_number(value),
                        thresholds.warning
                    ),
                );
                fired = true;
            }
        }
        if !fired {
            report.add_result(
                Status::Ok,
                format!(
                    "Throughput In {} and Out {} are within thresholds {}/{}",
                    format_number(rates.throughput_in),
                    format_number(rates.throughput_out),
                    thresholds.warning,
                    thresholds.critical
                ),
            );
        }

        add_perfdata(state, report, &thresholds.warning, &thresholds.critical);
        check_age(report, state.current.timestamp, now, thresholds);
        info!(
            throughput_in = rates.throughput_in,
            throughput_out = rates.throughput_out,
            status = %report.status(),
            "Throughput check finished"
        );
    }

    /// [`execute`](Self::execute) followed by [`check`](Self::check).
    pub fn run(
        &self,
        report: &mut CheckReport,
        now: DateTime<Utc>,
    ) -> Result<ThroughputState, CheckError> {
        let state = self.execute(report)?;
        self.check(&state, report, now);
        Ok(state)
    }
}

fn add_perfdata(state: &ThroughputState, report: &mut CheckReport, warn: &str, crit: &str) {
    let rates = &state.rates;
    for field in METRIC_FIELDS {
        let Some(value) = state.current.fields.get(field) else {
            continue;
        };
        let rate = rates.per_second.get(field).copied().unwrap_or(0.0);
        let delta = rates.delta.get(field).copied().unwrap_or(0.0);
        report.add_perf(&format!("throughput_{}", field), "", rate);
        report.add_perf(&format!("delta_{}", field), "", delta);
        report.add_perf(field, "c", *value);
    }
    report.add_perf_datum(
        PerfDatum::new("throughput_in", "", rates.throughput_in).with_thresholds(warn, crit),
    );
    report.add_perf_datum(
        PerfDatum::new("throughput_out", "", rates.throughput_out).with_thresholds(warn, crit),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::search::mock::MockSearchClient;
    use crate::storage::{SnapshotError, YamlSnapshotFile};
    use chrono::TimeZone;
    use serde_json::{Map, Value, json};
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn snapshot(at: DateTime<Utc>, fields: &[(&str, f64)]) -> ThroughputSnapshot {
        ThroughputSnapshot {
            timestamp: at,
            fields: fields.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn document(timestamp: &str, fields: &[(&str, f64)]) -> SearchDocument {
        let mut map = Map::new();
        map.insert("@timestamp".to_string(), json!([timestamp]));
        for (field, value) in fields {
            map.insert(
                format!("system.throughputPerformance.{}.current", field),
                json!([value]),
            );
        }
        SearchDocument::new(map)
    }

    fn critical_counters(value: f64) -> Vec<(&'static str, f64)> {
        CRITICAL_FIELDS.iter().map(|f| (*f, value)).collect()
    }

    fn config(dir: &TempDir, warning: &str, critical: &str) -> ThroughputCheckConfig {
        ThroughputCheckConfig {
            index: "f5_telemetry".to_string(),
            history_file: dir.path().join("throughput.yaml"),
            thresholds: Thresholds {
                warning: warning.to_string(),
                critical: critical.to_string(),
                ..Thresholds::default()
            },
        }
    }

    #[test]
    fn test_rate_over_sixty_seconds() {
        let previous = snapshot(ts(-60), &[("inBits", 0.0)]);
        let current = snapshot(ts(0), &[("inBits", 1200.0)]);
        let rates = ThroughputRates::compute(&current, Some(&previous));
        assert_eq!(rates.elapsed_secs, 60.0);
        assert_eq!(rates.delta["inBits"], 1200.0);
        assert_eq!(rates.per_second["inBits"], 20.0);
    }

    #[test]
    fn test_zero_elapsed_gives_zero_rates() {
        let current = snapshot(ts(0), &[("inBits", 1200.0), ("clientBitsIn", 50.0)]);
        let same_time = snapshot(ts(0), &[("inBits", 100.0)]);

        for previous in [None, Some(&same_time)] {
            let rates = ThroughputRates::compute(&current, previous);
            for rate in rates.per_second.values() {
                assert_eq!(*rate, 0.0);
                assert!(rate.is_finite());
            }
            assert_eq!(rates.throughput_in, 0.0);
            assert_eq!(rates.throughput_out, 0.0);
        }
    }

    #[test]
    fn test_negative_elapsed_gives_zero_rates() {
        let previous = snapshot(ts(60), &[("inBits", 0.0)]);
        let current = snapshot(ts(0), &[("inBits", 1200.0)]);
        let rates = ThroughputRates::compute(&current, Some(&previous));
        assert_eq!(rates.per_second["inBits"], 0.0);
    }

    #[test]
    fn test_combined_rates() {
        let previous = snapshot(ts(-10), &critical_counters(0.0));
        let current = snapshot(
            ts(0),
            &[
                ("clientBitsIn", 100.0),
                ("clientBitsOut", 200.0),
                ("serverBitsIn", 1000.0),
                ("serverBitsOut", 2000.0),
            ],
        );
        let rates = ThroughputRates::compute(&current, Some(&previous));
        assert_eq!(rates.throughput_in, 30.0);
        assert_eq!(rates.throughput_out, 300.0);
    }

    #[test]
    fn test_gather_skips_missing_optional_fields() {
        let mut fields = critical_counters(5.0);
        fields.push(("inPackets", 7.0));
        let snap = gather_throughput_snapshot(&document("2026-10-17T09:00:00.000Z", &fields)).unwrap();
        assert_eq!(snap.fields.len(), 5);
        assert_eq!(snap.fields["inPackets"], 7.0);
        assert!(!snap.fields.contains_key("outPackets"));
    }

    #[test]
    fn test_gather_reports_missing_critical_fields() {
        let doc = document("2026-10-17T09:00:00.000Z", &[("clientBitsIn", 1.0)]);
        let snap = gather_throughput_snapshot(&doc).unwrap();
        assert_eq!(
            snap.missing_critical_fields(),
            vec!["clientBitsOut", "serverBitsIn", "serverBitsOut"]
        );
    }

    #[test]
    fn test_gather_bad_timestamp() {
        let doc = document("17.10.2026", &critical_counters(1.0));
        assert!(matches!(
            gather_throughput_snapshot(&doc),
            Err(CheckError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_first_run_then_second_run() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "", "");
        let store = YamlSnapshotFile::new(&config.history_file);

        let client = MockSearchClient::new()
            .with_result(MockSearchClient::document(document(
                "2026-10-17T09:00:00.000Z",
                &critical_counters(0.0),
            )))
            .with_result(MockSearchClient::document(document(
                "2026-10-17T09:01:00.000Z",
                &critical_counters(1200.0),
            )));
        let check = ThroughputCheck::new(&client, &store, &config);

        let mut report = CheckReport::new();
        let first = check.run(&mut report, ts(60)).unwrap();
        assert!(first.previous.is_none());
        assert_eq!(first.rates.throughput_in, 0.0);
        assert_eq!(report.status(), Status::Ok);
        assert!(config.history_file.exists());

        let mut report = CheckReport::new();
        let second = check.run(&mut report, ts(60)).unwrap();
        assert_eq!(second.previous.as_ref(), Some(&first.current));
        assert_eq!(second.rates.per_second["clientBitsIn"], 20.0);
        assert_eq!(second.rates.throughput_in, 40.0);
        assert_eq!(second.rates.throughput_out, 40.0);

        let (text, code) = report.render();
        assert_eq!(code, 0);
        assert!(text.starts_with("OK: Throughput In 40 and Out 40 are within thresholds /"));
        assert!(text.contains("throughput_clientBitsIn=20 delta_clientBitsIn=1200 clientBitsIn=1200c"));
        assert!(text.contains("throughput_in=40 throughput_out=40"));

        assert_eq!(store.load().unwrap(), Some(second.current));
    }

    #[test]
    fn test_thresholds() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "30", "100");
        let store = YamlSnapshotFile::new(&config.history_file);
        store.save(&snapshot(ts(-10), &critical_counters(0.0))).unwrap();

        let client = MockSearchClient::new().with_result(MockSearchClient::document(document(
            "2026-10-17T09:00:00.000Z",
            &[
                ("clientBitsIn", 1000.0),
                ("clientBitsOut", 1000.0),
                ("serverBitsIn", 200.0),
                ("serverBitsOut", 200.0),
            ],
        )));
        let mut report = CheckReport::new();
        ThroughputCheck::new(&client, &store, &config)
            .run(&mut report, ts(0))
            .unwrap();

        let results = report.results();
        assert!(results.contains(&(
            Status::Critical,
            "Throughput In 200 is above critical threshold 100".to_string()
        )));
        assert!(results.contains(&(
            Status::Warning,
            "Throughput In 200 is above warning threshold 30".to_string()
        )));
        assert!(results.contains(&(
            Status::Warning,
            "Throughput Out 40 is above warning threshold 30".to_string()
        )));
        assert_eq!(report.count(Status::Ok), 0);
        assert_eq!(report.render().1, 2);
    }

    #[test]
    fn test_malformed_range_keeps_output() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "1:2:3", "100");
        let store = YamlSnapshotFile::new(&config.history_file);
        store.save(&snapshot(ts(-10), &critical_counters(0.0))).unwrap();
        let client = MockSearchClient::new().with_result(MockSearchClient::document(document(
            "2026-10-17T09:00:00.000Z",
            &critical_counters(1000.0),
        )));

        let mut report = CheckReport::new();
        ThroughputCheck::new(&client, &store, &config)
            .run(&mut report, ts(0))
            .unwrap();

        let (text, code) = report.render();
        assert_eq!(code, 3);
        assert!(text.starts_with("UNKNOWN: error parsing warning range 1:2:3 | "));
        assert!(text.contains("CRITICAL: Throughput In 200 is above critical threshold 100"));
        assert!(text.contains("throughput_in=200;1:2:3;100"));
        assert_eq!(report.count(Status::Warning), 0);
    }

    #[test]
    fn test_missing_critical_fields_are_unknown_and_not_saved() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "", "");
        let store = YamlSnapshotFile::new(&config.history_file);
        let client = MockSearchClient::new().with_result(MockSearchClient::document(document(
            "2026-10-17T09:00:00.000Z",
            &[("clientBitsIn", 1.0), ("serverBitsIn", 1.0)],
        )));

        let mut report = CheckReport::new();
        let err = ThroughputCheck::new(&client, &store, &config)
            .execute(&mut report)
            .unwrap_err();

        assert!(matches!(err, CheckError::MissingField { .. }));
        let unknown: Vec<&str> = report.results().iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(
            unknown,
            vec![
                "Critical field clientBitsOut is missing",
                "Critical field serverBitsOut is missing"
            ]
        );
        assert_eq!(report.render().1, 3);
        assert!(!config.history_file.exists());
    }

    #[test]
    fn test_malformed_history_is_unknown() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "", "");
        std::fs::write(&config.history_file, "Fields: [1, 2\n").unwrap();
        let store = YamlSnapshotFile::new(&config.history_file);
        let client = MockSearchClient::new();

        let mut report = CheckReport::new();
        let err = ThroughputCheck::new(&client, &store, &config)
            .execute(&mut report)
            .unwrap_err();

        assert!(matches!(err, CheckError::Snapshot(SnapshotError::Parse(_))));
        assert_eq!(report.status(), Status::Unknown);
        assert!(client.queries().is_empty());
    }

    #[test]
    fn test_no_data() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "", "");
        let store = YamlSnapshotFile::new(&config.history_file);
        let client = MockSearchClient::new().with_result(MockSearchClient::document(
            SearchDocument::new(Map::<String, Value>::new()),
        ));

        let mut report = CheckReport::new();
        let err = ThroughputCheck::new(&client, &store, &config)
            .execute(&mut report)
            .unwrap_err();
        assert!(matches!(err, CheckError::NoData(_)));
        assert_eq!(report.render().0, "UNKNOWN: No data for throughput check");
    }
}
