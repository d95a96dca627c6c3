use std::path::PathBuf;

use procapi_cloud::digest::dockerhub::DEFAULT_HUB_URL;

/// Where durable objects (logs, metadata, results) are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Fs { root: PathBuf },
    S3 { bucket: String },
}

/// Wiring configuration for the worker binary.
///
/// Engine behaviour is configured separately by `EngineConfig::from_env`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub storage: StorageConfig,
    pub docker_bin: String,
    pub docker_network: String,
    pub batch_log_group: String,
    /// Registry API used for public image digests.
    pub docker_hub_url: String,
    /// `false` disables the batch backend entirely.
    pub batch_enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var           | Default                  |
    /// |-------------------|--------------------------|
    /// | `DATABASE_URL`    | required                 |
    /// | `STORAGE_BACKEND` | `fs` (`fs` or `s3`)      |
    /// | `STORAGE_FS_ROOT` | `.data/storage`          |
    /// | `S3_BUCKET`       | required for `s3`        |
    /// | `DOCKER_BIN`      | `docker`                 |
    /// | `DOCKER_NETWORK`  | `process_api_net`        |
    /// | `BATCH_LOG_GROUP` | `/aws/batch/job`         |
    /// | `DOCKER_HUB_URL`  | `https://hub.docker.com` |
    /// | `BATCH_ENABLED`   | `true`                   |
    pub fn from_env() -> Result<Self, WorkerConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WorkerConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(WorkerConfigError::Missing("DATABASE_URL"))?;

        let storage = match var("STORAGE_BACKEND", "fs").as_str() {
            "fs" => StorageConfig::Fs {
                root: PathBuf::from(var("STORAGE_FS_ROOT", ".data/storage")),
            },
            "s3" => StorageConfig::S3 {
                bucket: lookup("S3_BUCKET")
                    .filter(|v| !v.is_empty())
                    .ok_or(WorkerConfigError::Missing("S3_BUCKET"))?,
            },
            other => {
                return Err(WorkerConfigError::Invalid {
                    var: "STORAGE_BACKEND",
                    value: other.to_string(),
                    reason: "expected `fs` or `s3`",
                })
            }
        };

        let batch_enabled = match var("BATCH_ENABLED", "true").to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                return Err(WorkerConfigError::Invalid {
                    var: "BATCH_ENABLED",
                    value: var("BATCH_ENABLED", "true"),
                    reason: "expected a boolean",
                })
            }
        };

        Ok(Self {
            database_url,
            storage,
            docker_bin: var("DOCKER_BIN", "docker"),
            docker_network: var("DOCKER_NETWORK", "process_api_net"),
            batch_log_group: var("BATCH_LOG_GROUP", "/aws/batch/job"),
            docker_hub_url: var("DOCKER_HUB_URL", DEFAULT_HUB_URL),
            batch_enabled,
        })
    }
}
