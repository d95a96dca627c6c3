use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::pipeline::logs::RetryPolicy;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding per-job `.process.jsonl` / `.server.jsonl` files.
    pub logs_dir: PathBuf,
    /// Minimum level written to a job's server log.
    pub log_level: Level,
    pub logs_prefix: String,
    pub metadata_prefix: String,
    pub results_prefix: String,
    pub log_retry: RetryPolicy,
    /// How long local log copies outlive the close pipeline.
    pub log_retention: Duration,
    /// Bounded wait for in-flight close pipelines at shutdown.
    pub shutdown_grace: Duration,
    pub status_queue_capacity: usize,
    /// Backend status polling for batch jobs. `None` disables the poller.
    pub batch_poll_interval: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from(".data/logs"),
            log_level: Level::INFO,
            logs_prefix: "logs".into(),
            metadata_prefix: "metadata".into(),
            results_prefix: "results".into(),
            log_retry: RetryPolicy::default(),
            log_retention: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(5),
            status_queue_capacity: 256,
            batch_poll_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default      |
    /// |----------------------------|--------------|
    /// | `LOGS_DIR`                 | `.data/logs` |
    /// | `LOG_LEVEL`                | `info`       |
    /// | `STORAGE_LOGS_PREFIX`      | `logs`       |
    /// | `STORAGE_METADATA_PREFIX`  | `metadata`   |
    /// | `STORAGE_RESULTS_PREFIX`   | `results`    |
    /// | `LOG_RETRY_ATTEMPTS`       | `5`          |
    /// | `LOG_RETRY_UNIT_SECS`      | `5`          |
    /// | `LOG_RETENTION_SECS`       | `3600`       |
    /// | `SHUTDOWN_GRACE_SECS`      | `5`          |
    /// | `STATUS_QUEUE_CAPACITY`    | `256`        |
    /// | `BATCH_POLL_INTERVAL_SECS` | `30` (0=off) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`EngineConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let string = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let log_level = match lookup("LOG_LEVEL") {
            Some(raw) => raw.parse::<Level>().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid LOG_LEVEL, falling back to info");
                Level::INFO
            }),
            None => defaults.log_level,
        };

        let max_attempts: u32 = parse(&lookup, "LOG_RETRY_ATTEMPTS", defaults.log_retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "LOG_RETRY_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        let unit_secs: u64 = parse(&lookup, "LOG_RETRY_UNIT_SECS", defaults.log_retry.unit.as_secs())?;
        let retention_secs: u64 =
            parse(&lookup, "LOG_RETENTION_SECS", defaults.log_retention.as_secs())?;
        let grace_secs: u64 = parse(&lookup, "SHUTDOWN_GRACE_SECS", defaults.shutdown_grace.as_secs())?;
        let queue_capacity: usize =
            parse(&lookup, "STATUS_QUEUE_CAPACITY", defaults.status_queue_capacity)?;
        let poll_secs: u64 = parse(&lookup, "BATCH_POLL_INTERVAL_SECS", 30)?;

        Ok(Self {
            logs_dir: PathBuf::from(string("LOGS_DIR", ".data/logs")),
            log_level,
            logs_prefix: string("STORAGE_LOGS_PREFIX", &defaults.logs_prefix),
            metadata_prefix: string("STORAGE_METADATA_PREFIX", &defaults.metadata_prefix),
            results_prefix: string("STORAGE_RESULTS_PREFIX", &defaults.results_prefix),
            log_retry: RetryPolicy {
                max_attempts,
                unit: Duration::from_secs(unit_secs),
            },
            log_retention: Duration::from_secs(retention_secs),
            shutdown_grace: Duration::from_secs(grace_secs),
            status_queue_capacity: queue_capacity.max(1),
            batch_poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
