//! Backend status polling for batch jobs.
//!
//! Observed statuses are pushed onto the status queue rather than applied
//! directly, so the status-update loop stays the single writer.

use std::sync::Weak;
use std::time::Duration;

use procapi_core::messages::StatusMessage;

use super::Job;

pub(super) async fn poll_status(job: Weak<Job>, interval: Duration) {
    let Some(cancel) = job.upgrade().map(|j| j.cancel.clone()) else {
        return;
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        // The registry owns the job; stop once it has been dropped.
        let Some(job) = job.upgrade() else { break };

        let inspection = match job.backend.inspect(&job.handle).await {
            Ok(inspection) => inspection,
            Err(e) => {
                job.logger.warn(&format!("Status poll failed: {e}"));
                continue;
            }
        };

        if let Some(status) = inspection.status.job_status() {
            if job.current_status().can_transition_to(status) {
                let msg = StatusMessage::new(job.job_id().clone(), status);
                if job.ctx.status_tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
        if inspection.status.is_finished() {
            break;
        }
    }
}
