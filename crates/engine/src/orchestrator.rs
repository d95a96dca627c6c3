//! Lifecycle coordinator.
//!
//! [`Orchestrator`] owns the [`JobRegistry`] and two background loops:
//!
//! - the **status loop** drains status callbacks (and batch poller reports)
//!   and the results queue. It is the single writer for externally reported
//!   statuses; the winner of a terminal transition starts the job's close
//!   pipeline.
//! - the **completion loop** removes closed jobs from the registry.
//!
//! Queries consult the registry first and fall back to the job store and
//! object storage for jobs that have already finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use procapi_cloud::backend::ComputeBackend;
use procapi_cloud::digest::DigestResolver;
use procapi_core::logs::JobLogs;
use procapi_core::messages::{ResultsMessage, StatusMessage};
use procapi_core::metadata::JobMetadata;
use procapi_core::record::JobRecord;
use procapi_core::request::{ExecutionMode, HostSpec, JobRequest};
use procapi_core::status::JobStatus;
use procapi_core::storage::{metadata_key, results_key, ObjectStore, CONTENT_TYPE_JSON};
use procapi_core::types::{JobId, Timestamp};
use procapi_db::store::JobStore;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job::{Job, JobContext};
use crate::registry::JobRegistry;

/// Capacity of the results queue.
const RESULTS_QUEUE_CAPACITY: usize = 64;

/// How long shutdown waits for each background loop to exit.
const LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Compute backends by host type.
#[derive(Clone)]
pub struct Backends {
    pub local: Arc<dyn ComputeBackend>,
    /// `None` when no batch service is configured.
    pub batch: Option<Arc<dyn ComputeBackend>>,
}

/// Status view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    #[serde(rename = "jobID")]
    pub job_id: JobId,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub status: JobStatus,
    #[serde(rename = "updated")]
    pub updated_at: Timestamp,
}

impl JobSummary {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.job_id().clone(),
            process_id: job.process_id().to_string(),
            status: job.current_status(),
            updated_at: job.last_update(),
        }
    }
}

impl From<JobRecord> for JobSummary {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.id,
            process_id: record.process_id,
            status: record.status,
            updated_at: record.updated_at,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    ctx: JobContext,
    backends: Backends,
    results_tx: mpsc::Sender<ResultsMessage>,
    accepting: AtomicBool,
    /// Stops the status and completion loops.
    loops: CancellationToken,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the engine and start its background loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStore>,
        digests: DigestResolver,
        backends: Backends,
    ) -> Arc<Self> {
        let (status_tx, status_rx) = mpsc::channel(config.status_queue_capacity.max(1));
        let (results_tx, results_rx) = mpsc::channel(RESULTS_QUEUE_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let ctx = JobContext {
            store,
            storage,
            digests,
            config: Arc::new(config),
            completions: completions_tx,
            status_tx,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        };
        let registry = Arc::new(JobRegistry::new());
        let loops = CancellationToken::new();

        let status_handle = tokio::spawn(status_loop(
            Arc::clone(&registry),
            ctx.clone(),
            status_rx,
            results_rx,
            loops.clone(),
        ));
        let completion_handle = tokio::spawn(completion_loop(
            Arc::clone(&registry),
            completions_rx,
            loops.clone(),
        ));

        tracing::info!("Job orchestrator started");

        Arc::new(Self {
            registry,
            ctx,
            backends,
            results_tx,
            accepting: AtomicBool::new(true),
            loops,
            loop_handles: Mutex::new(vec![status_handle, completion_handle]),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Queue for status callbacks. Delivery may be late or duplicated.
    pub fn status_sender(&self) -> mpsc::Sender<StatusMessage> {
        self.ctx.status_tx.clone()
    }

    /// Queue for results pushed by the unit of work.
    pub fn results_sender(&self) -> mpsc::Sender<ResultsMessage> {
        self.results_tx.clone()
    }

    /// Create a job and start it.
    ///
    /// Synchronous requests return once the job has finished (local jobs
    /// only); asynchronous requests return as soon as the job is accepted.
    pub async fn submit(&self, request: JobRequest) -> Result<JobSummary, EngineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let backend = self.backend_for(&request.host)?;
        let job = Job::create(self.ctx.clone(), &request, backend).await?;
        self.registry.add(Arc::clone(&job)).await;

        // Shutdown may have swept the registry while the job was being created.
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::info!(job_id = %job.job_id(), "Job created during shutdown, dismissing");
            match job.kill().await {
                Ok(()) | Err(EngineError::TerminalState) => {}
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id(), error = %e, "Failed to dismiss job created during shutdown")
                }
            }
            return Err(EngineError::ShuttingDown);
        }

        tracing::info!(
            job_id = %job.job_id(),
            process_id = %job.process_id(),
            host = %job.identity().host,
            mode = ?request.mode,
            "Job submitted",
        );

        match request.mode {
            ExecutionMode::Sync => job.run().await,
            ExecutionMode::Async => {
                let runner = Arc::clone(&job);
                self.ctx.tasks.spawn(async move { runner.run().await });
            }
        }

        Ok(JobSummary::of(&job))
    }

    /// Kill an active job.
    pub async fn dismiss(&self, job_id: &str) -> Result<JobSummary, EngineError> {
        let Some(job) = self.registry.lookup(job_id).await else {
            // Jobs leave the registry only once they are terminal.
            return if self.ctx.store.check_job_exist(job_id).await? {
                Err(EngineError::TerminalState)
            } else {
                Err(EngineError::NotFound(job_id.to_string()))
            };
        };
        job.kill().await?;
        Ok(JobSummary::of(&job))
    }

    pub async fn status(&self, job_id: &str) -> Result<JobSummary, EngineError> {
        if let Some(job) = self.registry.lookup(job_id).await {
            return Ok(JobSummary::of(&job));
        }
        self.ctx
            .store
            .get_job(job_id)
            .await?
            .map(JobSummary::from)
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }

    pub async fn logs(&self, job_id: &str) -> Result<JobLogs, EngineError> {
        if let Some(job) = self.registry.lookup(job_id).await {
            return job.logs().await;
        }
        if !self.ctx.store.check_job_exist(job_id).await? {
            return Err(EngineError::NotFound(job_id.to_string()));
        }
        self.ctx
            .store
            .get_logs(job_id)
            .await?
            .ok_or_else(|| EngineError::NotAvailable("logs not available".into()))
    }

    /// Provenance metadata. Served for successful jobs only.
    pub async fn metadata(&self, job_id: &str) -> Result<JobMetadata, EngineError> {
        if self.registry.lookup(job_id).await.is_some() {
            return Err(EngineError::NotAvailable("metadata not ready".into()));
        }
        let record = self
            .ctx
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?;

        match record.status {
            JobStatus::Successful => {}
            JobStatus::Failed | JobStatus::Dismissed => {
                return Err(EngineError::NotAvailable(
                    "job Failed or Dismissed. Metadata only available for successful jobs".into(),
                ))
            }
            JobStatus::Accepted | JobStatus::Running => {
                return Err(EngineError::NotAvailable("metadata not ready".into()))
            }
        }

        let key = metadata_key(&self.ctx.config.metadata_prefix, &record.id);
        let body = self
            .ctx
            .storage
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotAvailable("metadata not found".into()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Results document pushed through the results queue.
    pub async fn results(&self, job_id: &str) -> Result<serde_json::Value, EngineError> {
        if let Some(job) = self.registry.lookup(job_id).await {
            let status = job.current_status();
            if !status.is_terminal() {
                return Err(EngineError::NotAvailable(format!(
                    "results not available, status {status}"
                )));
            }
        } else if !self.ctx.store.check_job_exist(job_id).await? {
            return Err(EngineError::NotFound(job_id.to_string()));
        }

        let key = results_key(&self.ctx.config.results_prefix, &job_id.to_string());
        let body = self
            .ctx
            .storage
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotAvailable("results not available".into()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Page through job records, most recently updated first.
    ///
    /// `limit` defaults to [`DEFAULT_PAGE_LIMIT`] and is clamped to
    /// `1..=MAX_PAGE_LIMIT`; a negative `offset` is treated as zero.
    pub async fn list_jobs(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<JobRecord>, EngineError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        Ok(self.ctx.store.get_jobs(limit, offset).await?)
    }

    /// Stop accepting work, kill active jobs and wait (bounded) for their
    /// close pipelines before closing the job store.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job orchestrator");
        self.accepting.store(false, Ordering::SeqCst);

        self.registry.kill_all().await;

        self.ctx.tasks.close();
        let grace = self.ctx.config.shutdown_grace;
        if tokio::time::timeout(grace, self.ctx.tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.ctx.tasks.len(),
                grace_secs = grace.as_secs(),
                "Shutdown grace period elapsed with job tasks still running",
            );
        }
        self.ctx.shutdown.cancel();

        self.loops.cancel();
        let mut handles = self.loop_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = tokio::time::timeout(LOOP_STOP_TIMEOUT, handle).await;
        }

        self.ctx.store.close().await;
        tracing::info!("Job orchestrator shut down complete");
    }

    // ---- private helpers ----

    fn backend_for(&self, host: &HostSpec) -> Result<Arc<dyn ComputeBackend>, EngineError> {
        match host {
            HostSpec::Local => Ok(Arc::clone(&self.backends.local)),
            HostSpec::AwsBatch { .. } => self.backends.batch.clone().ok_or_else(|| {
                EngineError::NotAvailable("no batch backend configured".into())
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

async fn status_loop(
    registry: Arc<JobRegistry>,
    ctx: JobContext,
    mut status_rx: mpsc::Receiver<StatusMessage>,
    mut results_rx: mpsc::Receiver<ResultsMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(msg) = status_rx.recv() => handle_status(&registry, &ctx, msg).await,
            Some(msg) = results_rx.recv() => handle_results(&registry, &ctx, msg).await,
            else => break,
        }
    }
    tracing::debug!("Status loop stopped");
}

async fn handle_status(registry: &JobRegistry, ctx: &JobContext, msg: StatusMessage) {
    let Some(job) = registry.lookup(&msg.job_id).await else {
        tracing::debug!(job_id = %msg.job_id, status = %msg.status, "Status update for inactive job dropped");
        return;
    };

    if job.apply_status(msg.status, msg.timestamp).await && msg.status.is_terminal() {
        ctx.tasks.spawn(async move { job.close().await });
    }
}

async fn handle_results(registry: &JobRegistry, ctx: &JobContext, msg: ResultsMessage) {
    let known = match registry.lookup(&msg.job_id).await {
        Some(_) => true,
        None => ctx.store.check_job_exist(&msg.job_id).await.unwrap_or_else(|e| {
            tracing::error!(job_id = %msg.job_id, error = %e, "Failed to look up job for results");
            false
        }),
    };
    if !known {
        tracing::warn!(job_id = %msg.job_id, "Results for unknown job dropped");
        return;
    }

    let key = results_key(&ctx.config.results_prefix, &msg.job_id);
    let body = match serde_json::to_vec(&msg.payload) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(job_id = %msg.job_id, error = %e, "Failed to encode results");
            return;
        }
    };
    match ctx.storage.put(&key, body, CONTENT_TYPE_JSON).await {
        Ok(()) => tracing::debug!(job_id = %msg.job_id, key = %key, "Results stored"),
        Err(e) => tracing::error!(job_id = %msg.job_id, error = %e, "Failed to store results"),
    }
}

async fn completion_loop(
    registry: Arc<JobRegistry>,
    mut completions_rx: mpsc::UnboundedReceiver<JobId>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            id = completions_rx.recv() => match id {
                Some(id) => {
                    if registry.remove(&id).await {
                        tracing::debug!(job_id = %id, "Job removed from registry");
                    }
                }
                None => break,
            },
        }
    }
    tracing::debug!("Completion loop stopped");
}
