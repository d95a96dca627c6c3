//! One execution instance of a registered process.
//!
//! A [`Job`] is the same type for every compute backend; what differs is
//! the backend adapter it drives and its [`JobKind`]:
//!
//! - **Local** jobs run on the host's container engine. [`Job::run`] blocks
//!   until the container exits and maps exit code 0 to `successful`.
//! - **Batch** jobs run on a managed batch service. [`Job::run`] returns
//!   immediately; terminal status arrives through the orchestrator's
//!   status queue (callbacks or the optional backend poller).
//!
//! Status changes are compare-and-set: a transition applies only while the
//! job is non-terminal and only forwards. The winner of the transition into
//! a terminal status owns the close pipeline, which runs at most once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use procapi_cloud::backend::{BackendHandle, ComputeBackend, SubmitSpec};
use procapi_cloud::digest::DigestResolver;
use procapi_core::logs::JobLogs;
use procapi_core::messages::StatusMessage;
use procapi_core::request::{batch_job_name, resolve_env, HostSpec, JobRequest};
use procapi_core::status::JobStatus;
use procapi_core::storage::{log_key, ObjectStore, CONTENT_TYPE_NDJSON};
use procapi_core::types::{new_job_id, JobId, Timestamp};
use procapi_db::store::{JobStore, NewJob};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pipeline::logs::{collect_logs, paginate};
use crate::pipeline::metadata::{self, MetadataSubject};

pub mod logger;
mod poller;

use logger::{read_process_log, read_server_log, write_process_log, JobLogger};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Collaborators every job needs, shared across jobs.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub digests: DigestResolver,
    pub config: Arc<EngineConfig>,
    /// Closed jobs report their id here so the registry can drop them.
    pub completions: mpsc::UnboundedSender<JobId>,
    /// The status-update queue (fed by callbacks and batch pollers).
    pub status_tx: mpsc::Sender<StatusMessage>,
    /// Tracks detached run/close tasks so shutdown can bound them.
    pub tasks: TaskTracker,
    /// Cancelled once the engine's shutdown grace period is over.
    pub shutdown: CancellationToken,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Local,
    Batch,
}

impl JobKind {
    pub fn from_host(host: &HostSpec) -> Self {
        match host {
            HostSpec::Local => Self::Local,
            HostSpec::AwsBatch { .. } => Self::Batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub id: JobId,
    pub process_id: String,
    pub process_version: String,
    pub submitter: String,
    pub host: String,
}

#[derive(Debug, Clone, Copy)]
struct StatusState {
    status: JobStatus,
    updated_at: Timestamp,
}

pub struct Job {
    identity: JobIdentity,
    kind: JobKind,
    image: String,
    command: Vec<String>,
    backend: Arc<dyn ComputeBackend>,
    handle: BackendHandle,
    ctx: JobContext,
    state: RwLock<StatusState>,
    /// Serialises transitions together with their record update.
    transition: Mutex<()>,
    cancel: CancellationToken,
    closing: AtomicBool,
    logger: JobLogger,
    process_log: PathBuf,
}

impl Job {
    /// Validate `request`, submit it to `backend` and record it as accepted.
    ///
    /// Any failure aborts before the caller could register the job; local
    /// log files of an aborted job are removed and a unit of work that was
    /// already submitted is killed.
    pub async fn create(
        ctx: JobContext,
        request: &JobRequest,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Arc<Self>, EngineError> {
        request.validate_request()?;

        let kind = JobKind::from_host(&request.host);
        let id = new_job_id();
        let command = request.build_command(&id)?;
        let mut env = request.env.clone();
        env.extend(resolve_env(&request.process_id, &request.forward_env));

        let logs_dir = ctx.config.logs_dir.clone();
        tokio::fs::create_dir_all(&logs_dir).await?;
        let process_log = logger::process_log_path(&logs_dir, &id);
        tokio::fs::write(&process_log, b"").await?;
        let logger = JobLogger::create(&logs_dir, &id, ctx.config.log_level)?;

        let cancel = ctx.shutdown.child_token();
        let spec = SubmitSpec {
            job_id: id.clone(),
            name: match kind {
                JobKind::Local => String::new(),
                JobKind::Batch => batch_job_name(&id),
            },
            image: request.image.clone(),
            command: command.clone(),
            env,
            volumes: request.volumes.clone(),
            resources: request.resources,
            host: request.host.clone(),
        };

        logger.debug(&format!("Submitting to {} backend.", backend.kind()));
        let submitted = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::ShuttingDown),
            result = backend.submit(&spec) => result.map_err(EngineError::from),
        };
        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => {
                logger.error(&format!("Submission failed: {e}"));
                discard_local_logs(&process_log, logger.path()).await;
                return Err(e);
            }
        };

        let now = Utc::now();
        let record = NewJob {
            id: id.clone(),
            status: JobStatus::Accepted,
            host: request.host.as_str().to_string(),
            process_id: request.process_id.clone(),
            submitter: request.submitter.clone(),
            created_at: now,
        };
        if let Err(e) = ctx.store.add_job(&record).await {
            logger.error(&format!("Failed to record job: {e}"));
            if let Err(kill_err) = backend.kill(&handle).await {
                logger.warn(&format!("Failed to terminate orphaned unit of work: {kill_err}"));
            }
            let _ = backend.release(&handle).await;
            discard_local_logs(&process_log, logger.path()).await;
            return Err(e.into());
        }

        logger.info(&format!("Job accepted with backend handle {handle}."));

        Ok(Arc::new(Self {
            identity: JobIdentity {
                id,
                process_id: request.process_id.clone(),
                process_version: request.process_version.clone(),
                submitter: request.submitter.clone(),
                host: record.host,
            },
            kind,
            image: request.image.clone(),
            command,
            backend,
            handle,
            ctx,
            state: RwLock::new(StatusState {
                status: JobStatus::Accepted,
                updated_at: now,
            }),
            transition: Mutex::new(()),
            cancel,
            closing: AtomicBool::new(false),
            logger,
            process_log,
        }))
    }

    // ---- accessors ----

    pub fn job_id(&self) -> &JobId {
        &self.identity.id
    }

    pub fn process_id(&self) -> &str {
        &self.identity.process_id
    }

    pub fn process_version(&self) -> &str {
        &self.identity.process_version
    }

    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    /// The literal command line submitted to the backend.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn current_status(&self) -> JobStatus {
        self.read_state().status
    }

    pub fn last_update(&self) -> Timestamp {
        self.read_state().updated_at
    }

    /// `true` once the close pipeline has started.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn read_state(&self) -> StatusState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- state machine ----

    /// Apply a status transition if it moves the job forward.
    ///
    /// Returns `false` (and changes nothing) for duplicates, regressions and
    /// anything targeting a terminal job. `at` of `None` means now.
    pub async fn apply_status(&self, status: JobStatus, at: Option<Timestamp>) -> bool {
        let _transition = self.transition.lock().await;
        let updated_at = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.status.can_transition_to(status) {
                tracing::debug!(
                    job_id = %self.identity.id,
                    current = %state.status,
                    requested = %status,
                    "Status transition dropped",
                );
                return false;
            }
            state.status = status;
            state.updated_at = at.unwrap_or_else(Utc::now);
            state.updated_at
        };

        self.logger.info(&format!("Status changed to {status}."));
        match self
            .ctx
            .store
            .update_job_record(&self.identity.id, status, updated_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => self.logger.warn("Job record missing while updating status."),
            Err(e) => self.logger.error(&format!("Failed to update job record: {e}")),
        }
        true
    }

    /// Execute the job.
    ///
    /// Local jobs block until the container exits and then close. Batch jobs
    /// only start the optional status poller and return.
    pub async fn run(self: &Arc<Self>) {
        match self.kind {
            JobKind::Local => self.run_to_exit().await,
            JobKind::Batch => {
                if let Some(interval) = self.ctx.config.batch_poll_interval {
                    self.ctx
                        .tasks
                        .spawn(poller::poll_status(Arc::downgrade(self), interval));
                }
            }
        }
    }

    async fn run_to_exit(self: &Arc<Self>) {
        if !self.apply_status(JobStatus::Running, None).await {
            return;
        }

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return,
            outcome = self.backend.wait(&self.handle) => outcome,
        };
        let status = match outcome {
            Ok(0) => {
                self.logger.info("Container exited with code 0.");
                JobStatus::Successful
            }
            Ok(code) => {
                self.logger.info(&format!("Container exited with code {code}."));
                JobStatus::Failed
            }
            Err(e) => {
                self.logger.error(&format!("Failed waiting for container: {e}"));
                JobStatus::Failed
            }
        };

        if self.apply_status(status, None).await {
            self.close().await;
        }
    }

    /// Terminate the unit of work and mark the job dismissed.
    ///
    /// Returns without waiting for the close pipeline, which runs as a
    /// tracked background task.
    pub async fn kill(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.current_status().is_terminal() {
            return Err(EngineError::TerminalState);
        }

        self.logger.info("Dismiss requested.");
        if let Err(e) = self.backend.kill(&self.handle).await {
            self.logger.error(&format!("Failed to terminate unit of work: {e}"));
            return Err(e.into());
        }
        if !self.apply_status(JobStatus::Dismissed, None).await {
            return Err(EngineError::TerminalState);
        }

        self.cancel.cancel();
        let job = Arc::clone(self);
        self.ctx.tasks.spawn(async move { job.close().await });
        Ok(())
    }

    /// Persist logs and metadata, then report completion. Runs at most once.
    ///
    /// Storage and delivery failures are logged; they never change the
    /// job's terminal status.
    pub async fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.logger.debug("Closing job.");

        let config = &self.ctx.config;
        match collect_logs(
            self.backend.as_ref(),
            &self.handle,
            config.log_retry,
            &self.ctx.shutdown,
        )
        .await
        {
            Ok(lines) => {
                if let Err(e) = write_process_log(&self.process_log, &lines).await {
                    self.logger.error(&format!("Failed to write process log: {e}"));
                }
            }
            Err(e) => self.logger.error(&format!(
                "Failed to fetch logs after {} attempts: {e}",
                config.log_retry.max_attempts
            )),
        }

        self.write_metadata().await;

        if let Err(e) = self.backend.release(&self.handle).await {
            self.logger.warn(&format!("Failed to release backend resources: {e}"));
        }

        if let Err(e) = self.upload_logs().await {
            self.logger.error(&format!("Failed to upload logs: {e}"));
        }

        if self.ctx.completions.send(self.identity.id.clone()).is_err() {
            tracing::debug!(job_id = %self.identity.id, "Completion channel closed");
        }
        self.schedule_local_cleanup();
    }

    /// Both log streams. Non-terminal jobs refresh process logs first.
    pub async fn logs(&self) -> Result<JobLogs, EngineError> {
        if !self.current_status().is_terminal() && !self.is_closing() {
            match paginate(self.backend.as_ref(), &self.handle).await {
                Ok(lines) => write_process_log(&self.process_log, &lines).await?,
                Err(e) => self.logger.debug(&format!("Log refresh failed: {e}")),
            }
        }
        self.read_local_logs().await
    }

    // ---- close pipeline steps ----

    async fn write_metadata(&self) {
        let inspection = match self.backend.inspect(&self.handle).await {
            Ok(inspection) => Some(inspection),
            Err(e) => {
                self.logger.warn(&format!("Failed to inspect backend for metadata: {e}"));
                None
            }
        };
        let subject = MetadataSubject {
            job_id: &self.identity.id,
            process_id: &self.identity.process_id,
            process_version: &self.identity.process_version,
            image: &self.image,
            command: &self.command,
        };

        let written = match metadata::assemble(&subject, inspection.as_ref(), &self.ctx.digests)
            .await
        {
            Ok(md) => {
                metadata::store(
                    self.ctx.storage.as_ref(),
                    &self.ctx.config.metadata_prefix,
                    &md,
                )
                .await
            }
            Err(e) => Err(e),
        };
        match written {
            Ok(key) => self.logger.debug(&format!("Metadata written to {key}.")),
            Err(e) => self.logger.error(&e.to_string()),
        }
    }

    async fn upload_logs(&self) -> Result<(), EngineError> {
        let logs = self.read_local_logs().await?;
        let body = logs.to_ndjson()?;
        let key = log_key(&self.ctx.config.logs_prefix, &self.identity.id);
        self.ctx.storage.put(&key, body, CONTENT_TYPE_NDJSON).await?;
        Ok(())
    }

    async fn read_local_logs(&self) -> Result<JobLogs, EngineError> {
        let mut logs = JobLogs::new(self.identity.id.clone(), self.identity.process_id.clone());
        logs.process_logs = read_process_log(&self.process_log).await?;
        self.logger.flush().await;
        logs.server_logs = read_server_log(self.logger.path()).await?;
        Ok(logs)
    }

    /// Delete the local log copies after the retention window. The timer is
    /// abandoned, leaving the files, if the engine shuts down first.
    fn schedule_local_cleanup(&self) {
        let retention = self.ctx.config.log_retention;
        let shutdown = self.ctx.shutdown.clone();
        let job_id = self.identity.id.clone();
        let process_log = self.process_log.clone();
        let server_log = self.logger.path().to_path_buf();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Local log retention abandoned at shutdown");
                }
                _ = tokio::time::sleep(retention) => {
                    discard_local_logs(&process_log, &server_log).await;
                    tracing::debug!(job_id = %job_id, "Local log copies removed");
                }
            }
        });
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("status", &self.current_status())
            .finish_non_exhaustive()
    }
}

async fn discard_local_logs(process_log: &Path, server_log: &Path) {
    for path in [process_log, server_log] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove local log");
            }
        }
    }
}
