//! In-memory index of active jobs.
//!
//! The registry is the only long-lived owner of an active [`Job`]. Jobs are
//! added once submission succeeds and removed when their close pipeline
//! reports completion.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use procapi_core::types::JobId;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::job::Job;

/// Outcome of [`JobRegistry::kill_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillAllReport {
    pub killed: usize,
    pub failed: usize,
    /// Jobs already terminal, including those that finished mid-sweep.
    pub skipped: usize,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, job: Arc<Job>) {
        let id = job.job_id().clone();
        self.jobs.write().await.insert(id, job);
    }

    /// Remove a job. Removing an unknown id is a no-op returning `false`.
    pub async fn remove(&self, id: &str) -> bool {
        self.jobs.write().await.remove(id).is_some()
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Snapshot of the active jobs; later adds and removes do not affect it.
    pub async fn list(&self) -> Vec<Arc<Job>> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Kill every non-terminal job concurrently.
    ///
    /// The registry lock is not held while jobs are being killed. Failures
    /// are logged and counted; they do not stop the sweep.
    pub async fn kill_all(&self) -> KillAllReport {
        let jobs = self.list().await;
        let total = jobs.len();
        let targets: Vec<Arc<Job>> = jobs
            .into_iter()
            .filter(|job| !job.current_status().is_terminal())
            .collect();

        let mut report = KillAllReport {
            skipped: total - targets.len(),
            ..Default::default()
        };

        let outcomes = join_all(targets.iter().map(|job| async move {
            (job.job_id().clone(), job.kill().await)
        }))
        .await;

        for (job_id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.killed += 1,
                Err(EngineError::TerminalState) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to kill job");
                }
            }
        }

        tracing::info!(
            killed = report.killed,
            failed = report.failed,
            skipped = report.skipped,
            "Kill-all complete",
        );
        report
    }
}
