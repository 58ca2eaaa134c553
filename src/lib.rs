//! check_f5_telemetry - Icinga/Nagios check for F5 telemetry in Elasticsearch.
//!
//! The F5 telemetry streaming extension ships LTM statistics into an
//! Elasticsearch index. This library reads the newest document and turns it
//! into a monitoring verdict:
//! - `check::pool` - pool and member availability
//! - `check::throughput` - traffic rates from two counter snapshots
//!
//! The binary `check_f5_telemetry` wires configuration, logging and the
//! HTTP transport around these checks. `logfile` rotates its log file.

pub mod check;
pub mod config;
pub mod logfile;
pub mod range;
pub mod search;
pub mod storage;

/// Crate version, reported by `--version` and in the log.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
