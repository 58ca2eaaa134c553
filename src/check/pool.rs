//! F5 pool health.
//!
//! The newest telemetry document carries one pool under `pools.<pool>.`:
//!
//! ```text
//! pools.<pool>.availabilityState.keyword           ["available"]
//! pools.<pool>.activeMemberCnt                     [2]
//! pools.<pool>.serverside.{curConns,maxConns,pktsIn,pktsOut,bitsIn,bitsOut}
//! pools.<pool>.members.<id>.enabledState.keyword   ["enabled"]
//! pools.<pool>.members.<id>.availabilityState.keyword
//! ```
//!
//! Member ids are not known in advance and may contain dots
//! (`/Common/10.0.0.1:80`), so members are discovered from the document keys.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::{
    CheckError, CheckReport, PerfDatum, Status, ThresholdRanges, check_age, document_timestamp,
    fetch_latest, latest_document_query,
};
use crate::config::PoolCheckConfig;
use crate::search::{SearchClient, SearchDocument};

/// State of one pool member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMemberState {
    pub enabled_state: String,
    pub availability_state: String,
}

impl PoolMemberState {
    pub fn is_enabled(&self) -> bool {
        self.enabled_state == "enabled"
    }

    pub fn is_available(&self) -> bool {
        self.availability_state == "available"
    }

    /// Whether the member counts against the pool.
    ///
    /// With `ignore_disabled` any member that is down or disabled counts.
    /// Without it only enabled members that are down count, since a disabled
    /// member was taken out of service on purpose.
    pub fn is_unavailable(&self, ignore_disabled: bool) -> bool {
        if ignore_disabled {
            !self.is_available() || !self.is_enabled()
        } else {
            self.is_enabled() && !self.is_available()
        }
    }
}

/// Pool snapshot built from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolState {
    pub availability_state: String,
    pub timestamp: DateTime<Utc>,
    pub current_connections: f64,
    pub max_connections: f64,
    pub packets_in: f64,
    pub packets_out: f64,
    pub bits_in: f64,
    pub bits_out: f64,
    pub active_member_count: u64,
    pub members: BTreeMap<String, PoolMemberState>,
    pub down_member_count: u64,
    pub disabled_member_count: u64,
    pub unavailable_member_count: u64,
    pub total_members: u64,
    /// Member fields absent from the document. Such members are left out of
    /// `members` and of every count.
    pub missing_member_fields: Vec<String>,
}

/// Builds the pool snapshot from a document.
///
/// Every pool-level field is required; the first missing one is reported as
/// [`CheckError::MissingField`]. A member missing one of its states is kept
/// in [`PoolState::missing_member_fields`] instead, so the other members
/// are still evaluated. A pool without members is valid.
pub fn gather_pool_state(
    doc: &SearchDocument,
    pool: &str,
    ignore_disabled: bool,
) -> Result<PoolState, CheckError> {
    let prefix = format!("pools.{}.", pool);
    let scope = format!("pool {}", pool);
    let missing = |field: &str| CheckError::MissingField {
        field: format!("{}{}", prefix, field),
        scope: scope.clone(),
    };
    let number = |field: &str| {
        doc.get_f64(&format!("{}{}", prefix, field))
            .ok_or_else(|| missing(field))
    };

    let availability_state = keyword(doc, &format!("{}availabilityState", prefix))
        .ok_or_else(|| missing("availabilityState"))?;
    let timestamp = document_timestamp(doc)?;

    let mut state = PoolState {
        availability_state,
        timestamp,
        current_connections: number("serverside.curConns")?,
        max_connections: number("serverside.maxConns")?,
        packets_in: number("serverside.pktsIn")?,
        packets_out: number("serverside.pktsOut")?,
        bits_in: number("serverside.bitsIn")?,
        bits_out: number("serverside.bitsOut")?,
        active_member_count: number("activeMemberCnt")?.max(0.0) as u64,
        members: BTreeMap::new(),
        down_member_count: 0,
        disabled_member_count: 0,
        unavailable_member_count: 0,
        total_members: 0,
        missing_member_fields: Vec::new(),
    };

    let member_prefix = format!("{}members.", prefix);
    for id in member_ids(doc, &member_prefix) {
        let base = format!("{}{}", member_prefix, id);
        let enabled_path = format!("{}.enabledState", base);
        let availability_path = format!("{}.availabilityState", base);
        let (Some(enabled_state), Some(availability_state)) = (
            keyword(doc, &enabled_path),
            keyword(doc, &availability_path),
        ) else {
            for path in [enabled_path, availability_path] {
                if keyword(doc, &path).is_none() {
                    warn!(pool, member = %id, field = %path, "Member field missing");
                    state.missing_member_fields.push(path);
                }
            }
            continue;
        };
        let member = PoolMemberState {
            enabled_state,
            availability_state,
        };
        debug!(
            pool,
            member = %id,
            enabled_state = %member.enabled_state,
            availability_state = %member.availability_state,
            "Member found"
        );

        if !member.is_enabled() {
            state.disabled_member_count += 1;
        }
        if !member.is_available() {
            state.down_member_count += 1;
        }
        if member.is_unavailable(ignore_disabled) {
            state.unavailable_member_count += 1;
        }
        state.total_members += 1;
        state.members.insert(id, member);
    }

    Ok(state)
}

/// String state, preferring the `.keyword` sub-field.
fn keyword(doc: &SearchDocument, path: &str) -> Option<String> {
    doc.get_string(&format!("{}.keyword", path))
        .or_else(|| doc.get_string(path))
}

fn member_ids(doc: &SearchDocument, member_prefix: &str) -> Vec<String> {
    let mut ids: Vec<String> = doc
        .paths()
        .iter()
        .filter_map(|path| {
            let rest = path.strip_prefix(member_prefix)?;
            let id = [
                ".enabledState.keyword",
                ".enabledState",
                ".availabilityState.keyword",
                ".availabilityState",
            ]
            .iter()
            .find_map(|suffix| rest.strip_suffix(suffix))?;
            trace!(field = %path, member = id, "Member field matched");
            Some(id.to_string())
        })
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Pool check against one search backend.
pub struct PoolCheck<'a, C: SearchClient + ?Sized> {
    client: &'a C,
    config: &'a PoolCheckConfig,
}

impl<'a, C: SearchClient + ?Sized> PoolCheck<'a, C> {
    pub fn new(client: &'a C, config: &'a PoolCheckConfig) -> Self {
        Self { client, config }
    }

    pub fn query(&self) -> String {
        let pool_fields = format!("pools.{}.*", self.config.pool);
        latest_document_query(&["@timestamp", pool_fields.as_str()])
    }

    /// Fetches the newest document and builds the pool snapshot.
    ///
    /// Failures are recorded in `report` as UNKNOWN before being returned.
    pub fn execute(&self, report: &mut CheckReport) -> Result<PoolState, CheckError> {
        let pool = &self.config.pool;
        let query = self.query();

        let doc = match fetch_latest(
            self.client,
            &self.config.index,
            &query,
            &format!("pool {}", pool),
        ) {
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
                error!(pool = %pool, error = %e, "No data for pool");
                report.add_result(Status::Unknown, e.to_string());
                return Err(e);
            }
        };

        gather_pool_state(&doc, pool, self.config.ignore_disabled).map_err(|e| {
            error!(pool = %pool, error = %e, "Could not gather pool state");
            report.add_result(Status::Unknown, e.to_string());
            e
        })
    }

    /// Evaluates thresholds, member states and data age.
    pub fn check(&self, state: &PoolState, report: &mut CheckReport, now: DateTime<Utc>) {
        let thresholds = &self.config.thresholds;
        let ranges = ThresholdRanges::parse(thresholds, report);
        let unavailable = state.unavailable_member_count as f64;
        let summary = format!(
            "{} of {} pool members unavailable",
            state.unavailable_member_count, state.total_members
        );

        let critical = ranges.critical_fires(unavailable);
        if critical {
            report.add_result(Status::Critical, summary.clone());
        }
        let warning = ranges.warning_fires(unavailable);
        if warning {
            report.add_result(Status::Warning, summary);
        }
        if !critical && !warning {
            report.add_result(
                Status::Ok,
                format!(
                    "pool {} is healthy, {} members available",
                    self.config.pool, state.active_member_count
                ),
            );
        }

        for field in &state.missing_member_fields {
            report.add_result(
                Status::Unknown,
                format!("Field {} is missing for pool {}", field, self.config.pool),
            );
        }

        for (id, member) in &state.members {
            let status = if member.is_unavailable(self.config.ignore_disabled) {
                Status::Warning
            } else {
                Status::Ok
            };
            report.add_result(
                status,
                format!(
                    "Member {}: {}, {}",
                    id, member.enabled_state, member.availability_state
                ),
            );
        }

        add_perfdata(state, report, &thresholds.warning, &thresholds.critical);
        check_age(report, state.timestamp, now, thresholds);
        info!(
            pool = %self.config.pool,
            unavailable = state.unavailable_member_count,
            total = state.total_members,
            status = %report.status(),
            "Pool check finished"
        );
    }

    /// [`execute`](Self::execute) followed by [`check`](Self::check).
    pub fn run(&self, report: &mut CheckReport, now: DateTime<Utc>) -> Result<PoolState, CheckError> {
        let state = self.execute(report)?;
        self.check(&state, report, now);
        Ok(state)
    }
}

fn add_perfdata(state: &PoolState, report: &mut CheckReport, warn: &str, crit: &str) {
    report.add_perf("current_connections", "", state.current_connections);
    report.add_perf("max_connections", "", state.max_connections);
    report.add_perf("packets_in", "c", state.packets_in);
    report.add_perf("packets_out", "c", state.packets_out);
    report.add_perf("bits_in", "c", state.bits_in);
    report.add_perf("bits_out", "c", state.bits_out);
    report.add_perf("active_member_count", "", state.active_member_count as f64);
    report.add_perf("down_member_count", "", state.down_member_count as f64);
    report.add_perf("disabled_member_count", "", state.disabled_member_count as f64);
    report.add_perf_datum(
        PerfDatum::new(
            "unavailable_member_count",
            "",
            state.unavailable_member_count as f64,
        )
        .with_thresholds(warn, crit)
        .with_min(0.0),
    );
    report.add_perf("total_members", "", state.total_members as f64);
}
