//! YAML history file.
//!
//! ```yaml
//! Timestamp: 2026-10-17T08:59:00Z
//! Fields:
//!   clientBitsIn: 81920000
//!   clientBitsOut: 40960000
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{SnapshotError, SnapshotStore};
use crate::check::ThroughputSnapshot;

/// Snapshot store backed by a single YAML file.
#[derive(Debug, Clone)]
pub struct YamlSnapshotFile {
    path: PathBuf,
}

impl YamlSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for YamlSnapshotFile {
    fn load(&self) -> Result<Option<ThroughputSnapshot>, SnapshotError> {
        debug!(file = %self.path.display(), "Read historic data");
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(file = %self.path.display(), "No historic data, using empty defaults");
                return Ok(None);
            }
            Err(e) => {
                return Err(SnapshotError::Io(format!("{}: {}", self.path.display(), e)));
            }
        };

        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| SnapshotError::Parse(format!("{}: {}", self.path.display(), e)))
    }

    /// Written via a `.tmp` file and renamed, so a crash never leaves a
    /// truncated history behind.
    fn save(&self, snapshot: &ThroughputSnapshot) -> Result<(), SnapshotError> {
        let yaml =
            serde_yaml::to_string(snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let io_err = |e: io::Error| SnapshotError::Io(format!("{}: {}", self.path.display(), e));

        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(yaml.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        debug!(
            file = %self.path.display(),
            timestamp = %snapshot.timestamp,
            fields = snapshot.fields.len(),
            "Wrote historic data"
        );
        Ok(())
    }
}
