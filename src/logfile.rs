//! Log file rotation.
//!
//! The plugin runs for a fraction of a second per invocation, so the log
//! file is rotated once at startup instead of while writing:
//!
//! ```text
//! check_f5_telemetry.log                                  active file
//! check_f5_telemetry-2026-10-17T08-15-00.000.log.zst      backup, newest first
//! check_f5_telemetry-2026-10-17T07-40-12.250.log.zst
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const COMPRESSION_LEVEL: i32 = 3;

/// Limits for the active log file and its backups.
#[derive(Debug, Clone)]
pub struct LogRotation {
    /// Size in bytes at which the active file is moved to a backup. Default: 100MB.
    pub max_size: u64,
    /// Backups kept at most. Default: 10.
    pub max_backups: usize,
    /// Backups older than this many days are removed. Default: 1 day.
    pub max_age_days: u32,
}

impl Default for LogRotation {
    fn default() -> Self {
        Self {
            max_size: 100 * 1024 * 1024,
            max_backups: 10,
            max_age_days: 1,
        }
    }
}

/// Result of a rotation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RotationResult {
    /// Backup created from the active file, if it was over the size limit.
    pub backup: Option<PathBuf>,
    pub removed_by_age: usize,
    pub removed_by_count: usize,
}

/// Moves an oversized log file to a compressed backup and prunes old backups.
pub fn rotate(path: &Path, config: &LogRotation, now: DateTime<Utc>) -> io::Result<RotationResult> {
    let mut result = RotationResult::default();
    let (stem, ext) = name_parts(path);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if let Ok(metadata) = fs::metadata(path)
        && metadata.len() >= config.max_size
    {
        let name = format!("{}-{}{}.zst", stem, now.format(BACKUP_TIME_FORMAT), ext);
        let backup = dir.join(name);
        compress(path, &backup)?;
        fs::remove_file(path)?;
        debug!(backup = %backup.display(), size = metadata.len(), "Log file rotated");
        result.backup = Some(backup);
    }

    let mut backups: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(time) = backup_time(name, &stem, &ext) {
            backups.push((time, entry.path()));
        }
    }
    // Newest first
    backups.sort_by(|a, b| b.0.cmp(&a.0));

    let age_limit = now - chrono::Duration::days(config.max_age_days as i64);
    for (index, (time, backup)) in backups.iter().enumerate() {
        if *time < age_limit {
            fs::remove_file(backup)?;
            result.removed_by_age += 1;
        } else if index >= config.max_backups {
            fs::remove_file(backup)?;
            result.removed_by_count += 1;
        }
    }

    Ok(result)
}

/// Splits `dir/name.log` into `("name", ".log")`.
fn name_parts(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("log")
        .to_string();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    (stem, ext)
}

/// Parses the timestamp from a backup name `<stem>-<time><ext>.zst`.
fn backup_time(name: &str, stem: &str, ext: &str) -> Option<DateTime<Utc>> {
    let time = name
        .strip_prefix(stem)?
        .strip_prefix('-')?
        .strip_suffix(".zst")?
        .strip_suffix(ext)?;
    NaiveDateTime::parse_from_str(time, BACKUP_TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

fn compress(source: &Path, target: &Path) -> io::Result<()> {
    let tmp = target.with_extension("zst.tmp");
    let input = File::open(source)?;
    let output = File::create(&tmp)?;
    zstd::stream::copy_encode(input, &output, COMPRESSION_LEVEL)?;
    output.sync_all()?;
    fs::rename(&tmp, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    fn backup_name(at: DateTime<Utc>) -> String {
        format!("check-{}.log.zst", at.format(BACKUP_TIME_FORMAT))
    }

    #[test]
    fn test_small_file_is_kept() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("check.log");
        fs::write(&log, "one line\n").unwrap();

        let result = rotate(&log, &LogRotation::default(), now()).unwrap();
        assert_eq!(result, RotationResult::default());
        assert_eq!(fs::read_to_string(&log).unwrap(), "one line\n");
    }

    #[test]
    fn test_oversized_file_becomes_compressed_backup() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("check.log");
        let content = "level=warn message=\"Field is missing\"\n".repeat(50);
        fs::write(&log, &content).unwrap();
        let config = LogRotation {
            max_size: 100,
            ..LogRotation::default()
        };

        let result = rotate(&log, &config, now()).unwrap();
        let backup = result.backup.unwrap();
        assert_eq!(
            backup.file_name().unwrap().to_str().unwrap(),
            "check-2026-10-17T09-00-00.000.log.zst"
        );
        assert!(!log.exists());

        let restored = zstd::stream::decode_all(File::open(&backup).unwrap()).unwrap();
        assert_eq!(String::from_utf8(restored).unwrap(), content);
    }

    #[test]
    fn test_old_and_surplus_backups_are_removed() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("check.log");
        for minutes in 1..=4 {
            let at = now() - chrono::Duration::minutes(minutes);
            fs::write(dir.path().join(backup_name(at)), "x").unwrap();
        }
        let stale = backup_name(now() - chrono::Duration::days(2));
        fs::write(dir.path().join(&stale), "x").unwrap();
        fs::write(dir.path().join("other.log"), "x").unwrap();

        let config = LogRotation {
            max_backups: 3,
            ..LogRotation::default()
        };
        let result = rotate(&log, &config, now()).unwrap();

        assert_eq!(result.removed_by_age, 1);
        assert_eq!(result.removed_by_count, 1);
        assert!(!dir.path().join(stale).exists());
        assert!(!dir.path().join(backup_name(now() - chrono::Duration::minutes(4))).exists());
        assert!(dir.path().join(backup_name(now() - chrono::Duration::minutes(1))).exists());
        assert!(dir.path().join("other.log").exists());
    }

    #[test]
    fn test_backup_time() {
        assert_eq!(
            backup_time("check-2026-10-17T09-00-00.000.log.zst", "check", ".log"),
            Some(now())
        );
        assert_eq!(backup_time("check.log", "check", ".log"), None);
        assert_eq!(backup_time("check-latest.log.zst", "check", ".log"), None);
    }
}
