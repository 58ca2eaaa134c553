//! Check configuration.
//!
//! Values come from three layers, highest precedence first: command line,
//! YAML config file (`--config`), built-in defaults.
//!
//! ```text
//!   command line ──► RawConfig ─┐
//!                               ├─ overlay() ──► RawConfig ──► ConnectionConfig
//!   YAML file    ──► RawConfig ─┘                          ├─► PoolCheckConfig
//!                                                          ├─► ThroughputCheckConfig
//!                                                          └─► LogConfig
//! ```
//!
//! Defaults are applied only when the resolved structs are built, so an unset
//! key never shadows a lower layer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_INDEX: &str = "f5_telemetry";
pub const DEFAULT_AGE_WARNING: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_AGE_CRITICAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_LOG_LEVEL: &str = "WARN";
pub const DEFAULT_LOG_FILE: &str = "/var/log/icinga2/check_f5_telemetry.log";
pub const DEFAULT_HISTORY_FILE: &str = "/var/tmp/check_f5_telemetry_throughput.yaml";

/// Error type for configuration problems.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    Io(String),
    /// Config file is not valid YAML for [`RawConfig`].
    Parse(String),
    /// A value is present but unusable.
    Invalid { key: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Could not read config file: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Could not parse config file: {}", msg),
            ConfigError::Invalid { key, message } => {
                write!(f, "Invalid value for {}: {}", key, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Connection settings for the search backend.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub ssl: bool,
    pub validate_ssl: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Proxy URL, empty for none.
    pub proxy: String,
    /// Treat `proxy` as a SOCKS5 proxy.
    pub socks: bool,
    /// Request timeout, also used as point-in-time keep-alive.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ssl: true,
            validate_ssl: true,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            proxy: String::new(),
            socks: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Alert thresholds shared by all checks.
///
/// An empty range string means the severity is not configured.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    pub warning: String,
    pub critical: String,
    pub age_warning: Option<Duration>,
    pub age_critical: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct PoolCheckConfig {
    pub index: String,
    pub pool: String,
    /// Count disabled members as unavailable.
    pub ignore_disabled: bool,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone)]
pub struct ThroughputCheckConfig {
    pub index: String,
    /// Where the previous counter snapshot is kept between runs.
    pub history_file: PathBuf,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// Log file path, `-` for stderr.
    pub file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// One layer of unresolved settings, either the command line or the YAML
/// config file. Keys match the long flag names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub loglevel: Option<String>,
    pub logfile: Option<String>,
    pub ssl: Option<bool>,
    pub validatessl: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub proxy: Option<String>,
    pub socks: Option<bool>,
    pub timeout: Option<String>,
    pub warning: Option<String>,
    pub critical: Option<String>,
    pub age_warning: Option<String>,
    pub age_critical: Option<String>,
    pub index: Option<String>,
    pub pool: Option<String>,
    pub ignore_disabled: Option<bool>,
    pub history_file: Option<String>,
}

impl RawConfig {
    /// Loads a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(file = %path.display(), "Read config");
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Fills every key unset in `self` from `lower`.
    pub fn overlay(self, lower: RawConfig) -> RawConfig {
        RawConfig {
            loglevel: self.loglevel.or(lower.loglevel),
            logfile: self.logfile.or(lower.logfile),
            ssl: self.ssl.or(lower.ssl),
            validatessl: self.validatessl.or(lower.validatessl),
            host: self.host.or(lower.host),
            port: self.port.or(lower.port),
            user: self.user.or(lower.user),
            password: self.password.or(lower.password),
            proxy: self.proxy.or(lower.proxy),
            socks: self.socks.or(lower.socks),
            timeout: self.timeout.or(lower.timeout),
            warning: self.warning.or(lower.warning),
            critical: self.critical.or(lower.critical),
            age_warning: self.age_warning.or(lower.age_warning),
            age_critical: self.age_critical.or(lower.age_critical),
            index: self.index.or(lower.index),
            pool: self.pool.or(lower.pool),
            ignore_disabled: self.ignore_disabled.or(lower.ignore_disabled),
            history_file: self.history_file.or(lower.history_file),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self
                .loglevel
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            file: self
                .logfile
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
        }
    }

    pub fn connection(&self) -> Result<ConnectionConfig, ConfigError> {
        let defaults = ConnectionConfig::default();
        let timeout = match self.timeout.as_deref() {
            Some(value) => parse_duration("timeout", value)?,
            None => defaults.timeout,
        };
        if timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(ConnectionConfig {
            ssl: self.ssl.unwrap_or(defaults.ssl),
            validate_ssl: self.validatessl.unwrap_or(defaults.validate_ssl),
            host: self.host.clone().unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            proxy: self.proxy.clone().unwrap_or_default(),
            socks: self.socks.unwrap_or(defaults.socks),
            timeout,
        })
    }

    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        let age = |key: &str, value: &Option<String>, default: Duration| match value {
            Some(value) => parse_age(key, value),
            None => Ok(Some(default)),
        };
        Ok(Thresholds {
            warning: self.warning.clone().unwrap_or_default(),
            critical: self.critical.clone().unwrap_or_default(),
            age_warning: age("age_warning", &self.age_warning, DEFAULT_AGE_WARNING)?,
            age_critical: age("age_critical", &self.age_critical, DEFAULT_AGE_CRITICAL)?,
        })
    }

    fn index(&self) -> String {
        self.index
            .clone()
            .unwrap_or_else(|| DEFAULT_INDEX.to_string())
    }

    pub fn pool_check(&self) -> Result<PoolCheckConfig, ConfigError> {
        let pool = self
            .pool
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid {
                key: "pool".to_string(),
                message: "a pool name is required".to_string(),
            })?;
        Ok(PoolCheckConfig {
            index: self.index(),
            pool,
            ignore_disabled: self.ignore_disabled.unwrap_or(false),
            thresholds: self.thresholds()?,
        })
    }

    pub fn throughput_check(&self) -> Result<ThroughputCheckConfig, ConfigError> {
        Ok(ThroughputCheckConfig {
            index: self.index(),
            history_file: PathBuf::from(
                self.history_file
                    .as_deref()
                    .unwrap_or(DEFAULT_HISTORY_FILE),
            ),
            thresholds: self.thresholds()?,
        })
    }
}

/// Parses a duration such as `2m`, `90s` or `1h 30m`.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("'{}': {}", value, e),
    })
}

/// Parses an optional age threshold; an empty string disables it.
pub fn parse_age(key: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_duration(key, value).map(Some)
    }
}
