//! Compute backend contract.
//!
//! A backend submits a unit of work, can kill it, reports its status and
//! timestamps, and serves its logs (possibly paginated). One implementation
//! exists per substrate: [`docker::DockerBackend`] for the local container
//! engine and [`batch::BatchBackend`] for AWS Batch.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use procapi_core::request::{HostSpec, Resources};
use procapi_core::status::JobStatus;
use procapi_core::types::{JobId, Timestamp};

use crate::process::CliError;

pub mod batch;
pub mod docker;

pub use batch::BatchBackend;
pub use docker::DockerBackend;

/// How often the default [`ComputeBackend::wait`] polls `inspect`.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything a backend needs to launch one unit of work.
#[derive(Debug, Clone)]
pub struct SubmitSpec {
    pub job_id: JobId,
    /// Name given to the container or batch job.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub resources: Resources,
    pub host: HostSpec,
}

/// Backend-assigned identifier of a submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub String);

impl BackendHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-native lifecycle, normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl BackendStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// The job status this backend status implies, if any.
    pub fn job_status(self) -> Option<JobStatus> {
        match self {
            Self::Pending => Some(JobStatus::Accepted),
            Self::Running => Some(JobStatus::Running),
            Self::Succeeded => Some(JobStatus::Successful),
            Self::Failed => Some(JobStatus::Failed),
            Self::Unknown => None,
        }
    }
}

/// Point-in-time view of a unit of work.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub status: BackendStatus,
    pub exit_code: Option<i64>,
    pub created_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    /// Image URI the backend actually ran.
    pub image: Option<String>,
    /// Image digest when the backend knows it without a registry lookup.
    pub image_digest: Option<String>,
}

impl Inspection {
    pub fn new(status: BackendStatus) -> Self {
        Self {
            status,
            exit_code: None,
            created_at: None,
            started_at: None,
            finished_at: None,
            image: None,
            image_digest: None,
        }
    }
}

/// One page of log lines plus the token for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    pub lines: Vec<String>,
    /// `None` when the backend has no further pages.
    pub next_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Submission rejected by the backend.
    #[error("Submission rejected: {0}")]
    Submit(String),

    /// Termination rejected by the backend.
    #[error("Kill rejected: {0}")]
    Kill(String),

    #[error("Unit of work not found: {0}")]
    NotFound(String),

    /// The pagination token is invalid or expired.
    #[error("Log pagination token is invalid or expired")]
    InvalidToken,

    /// The log sink has not caught up with the unit of work yet.
    #[error("Logs not available yet: {0}")]
    LogsUnavailable(String),

    /// The backend replied with something we could not interpret.
    #[error("Unexpected backend response: {0}")]
    Parse(String),

    /// AWS API call failed outside the cases above.
    #[error("AWS request failed: {0}")]
    Aws(String),

    #[error(transparent)]
    Cli(#[from] CliError),
}

impl BackendError {
    /// Delivery errors the log pipeline retries instead of surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::LogsUnavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Host type recorded for jobs on this backend (`local`, `aws-batch`).
    fn kind(&self) -> &'static str;

    async fn submit(&self, spec: &SubmitSpec) -> Result<BackendHandle, BackendError>;

    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    async fn inspect(&self, handle: &BackendHandle) -> Result<Inspection, BackendError>;

    /// Fetch one page of logs starting at `token` (`None` = from the start).
    async fn fetch_logs(
        &self,
        handle: &BackendHandle,
        token: Option<&str>,
    ) -> Result<LogPage, BackendError>;

    /// Block until the unit of work exits and return its exit code.
    async fn wait(&self, handle: &BackendHandle) -> Result<i64, BackendError> {
        loop {
            let inspection = self.inspect(handle).await?;
            match inspection.status {
                BackendStatus::Succeeded => return Ok(inspection.exit_code.unwrap_or(0)),
                BackendStatus::Failed => return Ok(inspection.exit_code.unwrap_or(1)),
                _ => tokio::time::sleep(WAIT_POLL_INTERVAL).await,
            }
        }
    }

    /// Free backend resources once logs and metadata are persisted.
    async fn release(&self, _handle: &BackendHandle) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Parse an RFC 3339 timestamp, treating empty and year-1 "zero" values as absent.
pub(crate) fn parse_rfc3339(value: &str) -> Option<Timestamp> {
    if value.is_empty() || value.starts_with("0001-01-01") {
        return None;
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Convert epoch milliseconds, treating zero as absent.
pub(crate) fn from_epoch_millis(ms: Option<i64>) -> Option<Timestamp> {
    ms.filter(|ms| *ms > 0)
        .and_then(chrono::DateTime::from_timestamp_millis)
}
