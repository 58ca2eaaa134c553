//! check_f5_telemetry - Icinga/Nagios plugin entry point.
//!
//! Prints one check result to stdout and exits with the plugin exit code
//! (0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN). Logging never goes to stdout.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use check_f5_telemetry::check::{CheckReport, PoolCheck, Status, ThroughputCheck};
use check_f5_telemetry::config::{ConfigError, LogConfig, RawConfig};
use check_f5_telemetry::logfile::{self, LogRotation};
use check_f5_telemetry::search::ElasticClient;
use check_f5_telemetry::storage::YamlSnapshotFile;

/// Check F5 telemetry data stored in Elasticsearch.
#[derive(Parser)]
#[command(name = "check_f5_telemetry", version = check_f5_telemetry::VERSION)]
struct Args {
    /// YAML config file with the same keys as the long options.
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level: TRACE, DEBUG, INFO, WARN or ERROR [default: WARN].
    #[arg(short = 'l', long, global = true)]
    loglevel: Option<String>,

    /// Log file, `-` for stderr [default: /var/log/icinga2/check_f5_telemetry.log].
    /// Rotated at 100MB into up to 10 compressed backups kept for one day.
    #[arg(short = 'L', long, global = true)]
    logfile: Option<String>,

    /// Connect via https [default: true].
    #[arg(short = 's', long, global = true, action = ArgAction::Set,
          num_args = 0..=1, default_missing_value = "true")]
    ssl: Option<bool>,

    /// Validate the server certificate [default: true].
    #[arg(short = 'v', long, global = true, action = ArgAction::Set,
          num_args = 0..=1, default_missing_value = "true")]
    validatessl: Option<bool>,

    /// Elasticsearch host [default: localhost].
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// Elasticsearch port [default: 9200].
    #[arg(short = 'P', long, global = true)]
    port: Option<u16>,

    /// Username for basic authentication.
    #[arg(short = 'u', long, global = true)]
    user: Option<String>,

    /// Password for basic authentication.
    #[arg(short = 'p', long, global = true, env = "CF5_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Proxy URL.
    #[arg(short = 'y', long, global = true)]
    proxy: Option<String>,

    /// The proxy is a SOCKS5 proxy [default: false].
    #[arg(short = 'Y', long, global = true, action = ArgAction::Set,
          num_args = 0..=1, default_missing_value = "true")]
    socks: Option<bool>,

    /// Request timeout, also the point-in-time keep-alive [default: 2m].
    #[arg(short = 'T', long, global = true)]
    timeout: Option<String>,

    /// Warning range.
    #[arg(short = 'W', long, global = true, allow_hyphen_values = true)]
    warning: Option<String>,

    /// Critical range.
    #[arg(short = 'C', long, global = true, allow_hyphen_values = true)]
    critical: Option<String>,

    /// Data older than this is WARNING, empty disables [default: 5m].
    #[arg(short = 'a', long = "age_warning", global = true)]
    age_warning: Option<String>,

    /// Data older than this is CRITICAL, empty disables [default: 15m].
    #[arg(short = 'A', long = "age_critical", global = true)]
    age_critical: Option<String>,

    /// Index holding the telemetry documents [default: f5_telemetry].
    #[arg(short = 'I', long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check availability of a pool and its members.
    Pool {
        /// Pool name, e.g. /Common/web.
        #[arg(short = 'O', long)]
        pool: Option<String>,

        /// Count disabled members as unavailable [default: false].
        #[arg(short = 'i', long = "ignore_disabled", action = ArgAction::Set,
              num_args = 0..=1, default_missing_value = "true")]
        ignore_disabled: Option<bool>,
    },
    /// Check system throughput against the previous run.
    Throughput {
        /// File keeping the counters of the previous run
        /// [default: /var/tmp/check_f5_telemetry_throughput.yaml].
        #[arg(short = 'f', long = "history_file")]
        history_file: Option<String>,
    },
}

impl Args {
    /// The command line as the highest-precedence config layer.
    fn layer(&self) -> RawConfig {
        let mut layer = RawConfig {
            loglevel: self.loglevel.clone(),
            logfile: self.logfile.clone(),
            ssl: self.ssl,
            validatessl: self.validatessl,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            proxy: self.proxy.clone(),
            socks: self.socks,
            timeout: self.timeout.clone(),
            warning: self.warning.clone(),
            critical: self.critical.clone(),
            age_warning: self.age_warning.clone(),
            age_critical: self.age_critical.clone(),
            index: self.index.clone(),
            ..RawConfig::default()
        };
        match &self.command {
            Command::Pool {
                pool,
                ignore_disabled,
            } => {
                layer.pool = pool.clone();
                layer.ignore_disabled = *ignore_disabled;
            }
            Command::Throughput { history_file } => {
                layer.history_file = history_file.clone();
            }
        }
        layer
    }
}

fn parse_level(level: &str) -> Result<Level, ConfigError> {
    match level.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "FATAL" | "PANIC" => Ok(Level::ERROR),
        _ => Err(ConfigError::Invalid {
            key: "loglevel".to_string(),
            message: format!("illegal log level '{}'", level),
        }),
    }
}

/// Initializes the tracing subscriber. Output goes to the log file, or to
/// stderr for `-`, so stdout stays reserved for the plugin result.
fn init_logging(config: &LogConfig) -> Result<(), ConfigError> {
    let level = parse_level(&config.level)?;
    let directive = format!("check_f5_telemetry={}", level)
        .parse::<Directive>()
        .map_err(|e| ConfigError::Invalid {
            key: "loglevel".to_string(),
            message: e.to_string(),
        })?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    if config.file == "-" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let rotation = logfile::rotate(Path::new(&config.file), &LogRotation::default(), Utc::now());
    match OpenOptions::new().create(true).append(true).open(&config.file) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
            match rotation {
                Ok(result) => debug!(?result, "Log rotation"),
                Err(e) => warn!(file = %config.file, error = %e, "Could not rotate log file"),
            }
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            warn!(file = %config.file, error = %e, "Could not open log file, logging to stderr");
        }
    }
    Ok(())
}

/// Prints a plugin result consisting of one UNKNOWN verdict.
fn unknown(message: impl Into<String>) -> i32 {
    let mut report = CheckReport::new();
    report.add_result(Status::Unknown, message);
    let (text, code) = report.render();
    println!("{}", text);
    code
}

fn run() -> i32 {
    let args = Args::parse();

    let file_layer = match &args.config {
        Some(path) => match RawConfig::load(path) {
            Ok(layer) => layer,
            Err(e) => return unknown(e.to_string()),
        },
        None => RawConfig::default(),
    };
    let raw = args.layer().overlay(file_layer);

    if let Err(e) = init_logging(&raw.log_config()) {
        return unknown(e.to_string());
    }
    info!(version = check_f5_telemetry::VERSION, "check_f5_telemetry starting");

    let connection = match raw.connection() {
        Ok(connection) => connection,
        Err(e) => return unknown(e.to_string()),
    };
    let client = match ElasticClient::new(&connection) {
        Ok(client) => client,
        Err(e) => {
            return unknown(format!("Could not create connection to Elasticsearch: {}", e));
        }
    };

    let mut report = CheckReport::new();
    let now = Utc::now();
    let outcome = match &args.command {
        Command::Pool { .. } => {
            let config = match raw.pool_check() {
                Ok(config) => config,
                Err(e) => return unknown(e.to_string()),
            };
            PoolCheck::new(&client, &config)
                .run(&mut report, now)
                .map(|_| ())
        }
        Command::Throughput { .. } => {
            let config = match raw.throughput_check() {
                Ok(config) => config,
                Err(e) => return unknown(e.to_string()),
            };
            let store = YamlSnapshotFile::new(&config.history_file);
            ThroughputCheck::new(&client, &store, &config)
                .run(&mut report, now)
                .map(|_| ())
        }
    };
    if let Err(e) = outcome {
        debug!(error = %e, "Check did not complete");
    }

    let (text, code) = report.render();
    println!("{}", text);
    info!(exit_code = code, "Check finished");
    code
}

fn main() {
    std::process::exit(run());
}
