//! Persistence of the previous throughput snapshot between check runs.
//!
//! The throughput check is invoked once per monitoring interval and needs the
//! counters of the previous run to derive rates. The store is read once at
//! start and written once after a successful read of the backend.
//!
//! Invocations sharing one history file are not coordinated: two checks
//! running at the same time both read the same previous snapshot and the last
//! writer wins.

mod snapshot_file;

pub use snapshot_file::YamlSnapshotFile;

use std::fmt;

use crate::check::ThroughputSnapshot;

/// Error type for snapshot persistence.
#[derive(Debug)]
pub enum SnapshotError {
    /// History file exists but could not be read or written.
    Io(String),
    /// History file content is not a valid snapshot.
    Parse(String),
    /// Snapshot could not be serialized.
    Encode(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(msg) => write!(f, "Could not access historic data: {}", msg),
            SnapshotError::Parse(msg) => write!(f, "Could not parse historic data: {}", msg),
            SnapshotError::Encode(msg) => write!(f, "Could not encode historic data: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Storage of the most recent throughput snapshot.
pub trait SnapshotStore {
    /// Previous snapshot; `None` when no history exists yet.
    fn load(&self) -> Result<Option<ThroughputSnapshot>, SnapshotError>;

    /// Replaces the stored snapshot.
    fn save(&self, snapshot: &ThroughputSnapshot) -> Result<(), SnapshotError>;
}
