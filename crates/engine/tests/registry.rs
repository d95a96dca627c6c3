mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use procapi_core::status::JobStatus;
use procapi_engine::{Job, JobRegistry, KillAllReport};

use common::{harness, local_request, ScriptedBackend};

async fn job(h: &common::Harness, backend: &Arc<ScriptedBackend>) -> Arc<Job> {
    Job::create(h.ctx.clone(), &local_request(&["sleep", "60"]), backend.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn add_lookup_remove() {
    let h = harness();
    let backend = Arc::new(ScriptedBackend::new());
    let registry = JobRegistry::new();
    let job = job(&h, &backend).await;

    registry.add(Arc::clone(&job)).await;
    assert_eq!(registry.len().await, 1);
    let found = registry.lookup(job.job_id()).await.unwrap();
    assert!(Arc::ptr_eq(&found, &job));

    assert!(registry.remove(job.job_id()).await);
    assert!(registry.lookup(job.job_id()).await.is_none());
    assert!(!registry.remove(job.job_id()).await);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn removing_unknown_id_is_a_no_op() {
    let h = harness();
    let backend = Arc::new(ScriptedBackend::new());
    let registry = JobRegistry::new();
    registry.add(job(&h, &backend).await).await;

    assert!(!registry.remove("never-added").await);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn list_is_a_snapshot() {
    let h = harness();
    let backend = Arc::new(ScriptedBackend::new());
    let registry = JobRegistry::new();
    let first = job(&h, &backend).await;
    registry.add(Arc::clone(&first)).await;
    registry.add(job(&h, &backend).await).await;

    let snapshot = registry.list().await;
    registry.remove(first.job_id()).await;

    assert_eq!(snapshot.len(), 2);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn kill_all_skips_terminal_jobs() {
    let h = harness();
    let backend = Arc::new(ScriptedBackend::new());
    let registry = JobRegistry::new();

    let running = job(&h, &backend).await;
    running.apply_status(JobStatus::Running, None).await;
    let accepted = job(&h, &backend).await;
    let finished = job(&h, &backend).await;
    finished.apply_status(JobStatus::Successful, None).await;
    for j in [&running, &accepted, &finished] {
        registry.add(Arc::clone(j)).await;
    }

    let report = registry.kill_all().await;

    assert_eq!(
        report,
        KillAllReport {
            killed: 2,
            failed: 0,
            skipped: 1,
        }
    );
    assert_eq!(backend.kill_count(), 2);
    assert_eq!(running.current_status(), JobStatus::Dismissed);
    assert_eq!(accepted.current_status(), JobStatus::Dismissed);
    assert_eq!(finished.current_status(), JobStatus::Successful);
}

#[tokio::test]
async fn kill_all_counts_failures_and_continues() {
    let h = harness();
    let healthy = Arc::new(ScriptedBackend::new());
    let broken = Arc::new(ScriptedBackend::new());
    broken.fail_kill.store(true, Ordering::SeqCst);
    let registry = JobRegistry::new();

    let ok = job(&h, &healthy).await;
    let stuck = job(&h, &broken).await;
    registry.add(Arc::clone(&ok)).await;
    registry.add(Arc::clone(&stuck)).await;

    let report = registry.kill_all().await;

    assert_eq!(report.killed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(ok.current_status(), JobStatus::Dismissed);
    assert_eq!(stuck.current_status(), JobStatus::Accepted);
}
