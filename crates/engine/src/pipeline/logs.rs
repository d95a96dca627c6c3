//! Log retrieval with bounded, linearly escalating retry.
//!
//! Remote log sinks lag job completion, so one retrieval is up to
//! `max_attempts` full forward paginations with `unit * attempt` sleeps in
//! between. An invalid or expired pagination token restarts pagination from
//! the first page inside the same attempt. Every attempt collects into a
//! fresh buffer, so the persisted result is the complete line set of a
//! single successful pass and never contains duplicates.

use std::time::Duration;

use procapi_cloud::backend::{BackendError, BackendHandle, ComputeBackend};
use tokio_util::sync::CancellationToken;

/// Pagination restarts tolerated within a single attempt.
pub const MAX_RESTARTS_PER_ATTEMPT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            unit: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.unit * attempt
    }
}

/// One full forward pagination of a job's logs.
pub async fn paginate(
    backend: &dyn ComputeBackend,
    handle: &BackendHandle,
) -> Result<Vec<String>, BackendError> {
    let mut lines = Vec::new();
    let mut token: Option<String> = None;
    let mut restarts = 0;

    loop {
        match backend.fetch_logs(handle, token.as_deref()).await {
            Ok(page) => {
                lines.extend(page.lines);
                match page.next_token {
                    // A repeated token marks the end of the stream.
                    Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                    _ => return Ok(lines),
                }
            }
            Err(BackendError::InvalidToken) if restarts < MAX_RESTARTS_PER_ATTEMPT => {
                restarts += 1;
                tracing::debug!(handle = %handle, restarts, "Pagination token rejected, restarting");
                lines.clear();
                token = None;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Retrieve a job's complete logs under `policy`.
///
/// Returns the last error once attempts are exhausted or `cancel` fires
/// during a back-off sleep.
pub async fn collect_logs(
    backend: &dyn ComputeBackend,
    handle: &BackendHandle,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<String>, BackendError> {
    let mut attempt = 1;
    loop {
        match paginate(backend, handle).await {
            Ok(lines) => return Ok(lines),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    handle = %handle,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    transient = e.is_transient(),
                    error = %e,
                    "Log retrieval failed, retrying",
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
