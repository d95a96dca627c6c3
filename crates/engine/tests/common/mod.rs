//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use procapi_cloud::backend::{
    BackendError, BackendHandle, BackendStatus, ComputeBackend, Inspection, LogPage, SubmitSpec,
};
use procapi_cloud::digest::{DigestError, DigestResolver, DigestSource};
use procapi_cloud::storage::FsObjectStore;
use procapi_core::image::ImageReference;
use procapi_core::logs::JobLogs;
use procapi_core::messages::StatusMessage;
use procapi_core::record::JobRecord;
use procapi_core::request::{ExecutionMode, HostSpec, JobRequest, Resources};
use procapi_core::status::JobStatus;
use procapi_core::storage::{log_key, ObjectStore};
use procapi_core::types::{JobId, Timestamp};
use procapi_db::store::{JobStore, NewJob};
use procapi_db::DbError;
use procapi_engine::pipeline::logs::RetryPolicy;
use procapi_engine::{EngineConfig, JobContext};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// ---------------------------------------------------------------------------
// Requests and config
// ---------------------------------------------------------------------------

pub fn local_request(command: &[&str]) -> JobRequest {
    JobRequest {
        process_id: "pyecho".into(),
        process_version: "1.0.0".into(),
        submitter: "tester".into(),
        image: "alpine:3.18".into(),
        command: command.iter().map(|s| s.to_string()).collect(),
        inputs: None,
        env: BTreeMap::new(),
        forward_env: Vec::new(),
        volumes: Vec::new(),
        resources: Resources::default(),
        host: HostSpec::Local,
        mode: ExecutionMode::Async,
    }
}

pub fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        logs_dir: dir.path().join("logs"),
        log_level: tracing::Level::DEBUG,
        log_retry: RetryPolicy {
            max_attempts: 3,
            unit: Duration::from_millis(10),
        },
        log_retention: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(2),
        batch_poll_interval: None,
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
    storage: Arc<dyn ObjectStore>,
    logs_prefix: String,
    pub fail_add: AtomicBool,
    pub closed: AtomicBool,
    /// While set, `add_job` signals `add_entered` and parks until `add_release`.
    pub hold_add: AtomicBool,
    pub add_entered: Notify,
    pub add_release: Notify,
}

impl MemoryJobStore {
    pub fn new(storage: Arc<dyn ObjectStore>, logs_prefix: &str) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            storage,
            logs_prefix: logs_prefix.to_string(),
            fail_add: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            hold_add: AtomicBool::new(false),
            add_entered: Notify::new(),
            add_release: Notify::new(),
        }
    }

    pub fn record(&self, id: &str) -> Option<JobRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, job: &NewJob) -> Result<(), DbError> {
        if self.hold_add.load(Ordering::SeqCst) {
            self.add_entered.notify_one();
            self.add_release.notified().await;
        }
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(DbError::Corrupt("insert refused".into()));
        }
        let record = JobRecord {
            id: job.id.clone(),
            process_id: job.process_id.clone(),
            status: job.status,
            submitter: job.submitter.clone(),
            host: job.host.clone(),
            updated_at: job.created_at,
            created_at: job.created_at,
        };
        self.records.lock().unwrap().insert(job.id.clone(), record);
        Ok(())
    }

    async fn update_job_record(
        &self,
        id: &str,
        status: JobStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, DbError> {
        Ok(self.record(id))
    }

    async fn get_jobs(&self, limit: i64, offset: i64) -> Result<Vec<JobRecord>, DbError> {
        let mut all: Vec<JobRecord> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn check_job_exist(&self, id: &str) -> Result<bool, DbError> {
        Ok(self.records.lock().unwrap().contains_key(id))
    }

    async fn get_logs(&self, id: &str) -> Result<Option<JobLogs>, DbError> {
        let Some(record) = self.record(id) else {
            return Ok(None);
        };
        let key = log_key(&self.logs_prefix, &record.id);
        match self.storage.get(&key).await? {
            Some(bytes) => Ok(Some(JobLogs::from_ndjson(
                record.id,
                record.process_id,
                &bytes,
            )?)),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

pub struct FixedDigest(pub &'static str);

#[async_trait]
impl DigestSource for FixedDigest {
    async fn digest(&self, _image: &ImageReference) -> Result<String, DigestError> {
        Ok(self.0.to_string())
    }
}

pub fn fixed_digests() -> DigestResolver {
    DigestResolver::new(
        Arc::new(FixedDigest("sha256:managed")),
        Arc::new(FixedDigest("sha256:public")),
    )
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Backend whose units of work run until killed or [`ScriptedBackend::finish`]ed.
///
/// Log pages are served by index; page `i` points at token `p{i+1}` and the
/// last page carries no token.
pub struct ScriptedBackend {
    pub submits: AtomicUsize,
    pub kills: AtomicUsize,
    pub releases: AtomicUsize,
    pub log_calls: AtomicUsize,
    pub fail_submit: AtomicBool,
    pub fail_kill: AtomicBool,
    /// Reject the next request that carries a page token.
    pub reject_next_token: AtomicBool,
    pub last_spec: Mutex<Option<SubmitSpec>>,
    exit: watch::Sender<Option<i64>>,
    pages: Vec<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_pages(Vec::new())
    }

    pub fn with_pages(pages: Vec<Vec<&str>>) -> Self {
        Self {
            submits: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            log_calls: AtomicUsize::new(0),
            fail_submit: AtomicBool::new(false),
            fail_kill: AtomicBool::new(false),
            reject_next_token: AtomicBool::new(false),
            last_spec: Mutex::new(None),
            exit: watch::channel(None).0,
            pages: pages
                .into_iter()
                .map(|p| p.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }

    /// Let the unit of work exit with `code`.
    pub fn finish(&self, code: i64) {
        self.exit.send_modify(|exit| {
            exit.get_or_insert(code);
        });
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeBackend for ScriptedBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, spec: &SubmitSpec) -> Result<BackendHandle, BackendError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(BackendError::Submit("image not found".into()));
        }
        self.submits.fetch_add(1, Ordering::SeqCst);
        *self.last_spec.lock().unwrap() = Some(spec.clone());
        Ok(BackendHandle(format!("scripted-{}", spec.job_id)))
    }

    async fn kill(&self, _handle: &BackendHandle) -> Result<(), BackendError> {
        if self.fail_kill.load(Ordering::SeqCst) {
            return Err(BackendError::Kill("daemon unavailable".into()));
        }
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.finish(137);
        Ok(())
    }

    async fn inspect(&self, _handle: &BackendHandle) -> Result<Inspection, BackendError> {
        let status = match *self.exit.borrow() {
            None => BackendStatus::Running,
            Some(0) => BackendStatus::Succeeded,
            Some(_) => BackendStatus::Failed,
        };
        let now = Utc::now();
        let mut inspection = Inspection::new(status);
        inspection.created_at = Some(now);
        inspection.started_at = Some(now);
        inspection.image_digest = Some("sha256:scripted".into());
        Ok(inspection)
    }

    async fn fetch_logs(
        &self,
        _handle: &BackendHandle,
        token: Option<&str>,
    ) -> Result<LogPage, BackendError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        if token.is_some() && self.reject_next_token.swap(false, Ordering::SeqCst) {
            return Err(BackendError::InvalidToken);
        }
        if self.pages.is_empty() {
            return Ok(LogPage::default());
        }
        let index = token
            .and_then(|t| t.strip_prefix('p'))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0)
            .min(self.pages.len() - 1);
        let next_token = (index + 1 < self.pages.len()).then(|| format!("p{}", index + 1));
        Ok(LogPage {
            lines: self.pages[index].clone(),
            next_token,
        })
    }

    async fn wait(&self, _handle: &BackendHandle) -> Result<i64, BackendError> {
        let mut rx = self.exit.subscribe();
        let exit = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BackendError::NotFound("exit channel closed".into()))?;
        Ok((*exit).unwrap_or(-1))
    }

    async fn release(&self, _handle: &BackendHandle) -> Result<(), BackendError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host process backend
// ---------------------------------------------------------------------------

type Exit = Option<(i64, Vec<String>)>;

#[derive(Clone)]
struct HostRun {
    done: watch::Receiver<Exit>,
    cancel: CancellationToken,
}

/// Runs the submitted command directly on the host; stdout lines are the
/// unit of work's logs.
#[derive(Default)]
pub struct HostProcessBackend {
    runs: Mutex<HashMap<String, HostRun>>,
}

impl HostProcessBackend {
    fn run(&self, handle: &BackendHandle) -> Result<HostRun, BackendError> {
        self.runs
            .lock()
            .unwrap()
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))
    }
}

#[async_trait]
impl ComputeBackend for HostProcessBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, spec: &SubmitSpec) -> Result<BackendHandle, BackendError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| BackendError::Submit("empty command".into()))?;
        let child = tokio::process::Command::new(program)
            .args(args)
            .envs(&spec.env)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Submit(e.to_string()))?;

        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                _ = token.cancelled() => (137, Vec::new()),
                output = child.wait_with_output() => match output {
                    Ok(out) => (
                        i64::from(out.status.code().unwrap_or(-1)),
                        String::from_utf8_lossy(&out.stdout).lines().map(str::to_string).collect(),
                    ),
                    Err(_) => (-1, Vec::new()),
                },
            };
            let _ = tx.send(Some(exit));
        });

        let handle = BackendHandle(spec.job_id.clone());
        self.runs.lock().unwrap().insert(
            handle.0.clone(),
            HostRun { done: rx, cancel },
        );
        Ok(handle)
    }

    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.run(handle)?.cancel.cancel();
        Ok(())
    }

    async fn inspect(&self, handle: &BackendHandle) -> Result<Inspection, BackendError> {
        let run = self.run(handle)?;
        let status = match &*run.done.borrow() {
            None => BackendStatus::Running,
            Some((0, _)) => BackendStatus::Succeeded,
            Some(_) => BackendStatus::Failed,
        };
        let mut inspection = Inspection::new(status);
        inspection.image_digest = Some("sha256:host".into());
        Ok(inspection)
    }

    async fn fetch_logs(
        &self,
        handle: &BackendHandle,
        _token: Option<&str>,
    ) -> Result<LogPage, BackendError> {
        let run = self.run(handle)?;
        let lines = match &*run.done.borrow() {
            Some((_, lines)) => lines.clone(),
            None => Vec::new(),
        };
        Ok(LogPage {
            lines,
            next_token: None,
        })
    }

    async fn wait(&self, handle: &BackendHandle) -> Result<i64, BackendError> {
        let mut done = self.run(handle)?.done;
        let exit = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BackendError::NotFound(handle.to_string()))?;
        Ok(match &*exit {
            Some((code, _)) => *code,
            None => -1,
        })
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct Harness {
    pub ctx: JobContext,
    pub store: Arc<MemoryJobStore>,
    pub storage: Arc<FsObjectStore>,
    pub status_rx: mpsc::Receiver<StatusMessage>,
    pub completions_rx: mpsc::UnboundedReceiver<JobId>,
    pub dir: TempDir,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let storage = Arc::new(FsObjectStore::new(dir.path().join("objects")));
    let store = Arc::new(MemoryJobStore::new(storage.clone(), &config.logs_prefix));
    let (status_tx, status_rx) = mpsc::channel(16);
    let (completions, completions_rx) = mpsc::unbounded_channel();

    let ctx = JobContext {
        store: store.clone(),
        storage: storage.clone(),
        digests: fixed_digests(),
        config: Arc::new(config),
        completions,
        status_tx,
        tasks: TaskTracker::new(),
        shutdown: CancellationToken::new(),
    };

    Harness {
        ctx,
        store,
        storage,
        status_rx,
        completions_rx,
        dir,
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn ts(rfc3339: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}
