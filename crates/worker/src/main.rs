use std::sync::Arc;

use anyhow::Context;
use procapi_cloud::backend::{BatchBackend, ComputeBackend, DockerBackend};
use procapi_cloud::digest::{DigestResolver, DockerHubDigestSource, EcrDigestSource};
use procapi_cloud::storage::{FsObjectStore, S3ObjectStore};
use procapi_core::storage::ObjectStore;
use procapi_db::store::PgJobStore;
use procapi_engine::{Backends, EngineConfig, Orchestrator};
use procapi_worker::config::{StorageConfig, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "procapi_worker=debug,procapi_engine=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let worker = WorkerConfig::from_env()?;
    let engine = EngineConfig::from_env()?;
    tracing::info!(
        logs_dir = %engine.logs_dir.display(),
        storage = ?worker.storage,
        batch_enabled = worker.batch_enabled,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = procapi_db::create_pool(&worker.database_url)
        .await
        .context("Failed to connect to database")?;
    procapi_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    procapi_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Object storage ---
    let storage: Arc<dyn ObjectStore> = match &worker.storage {
        StorageConfig::Fs { root } => Arc::new(FsObjectStore::new(root.clone())),
        StorageConfig::S3 { bucket } => Arc::new(S3ObjectStore::from_env(bucket.clone()).await),
    };
    let store = Arc::new(PgJobStore::new(
        pool,
        Arc::clone(&storage),
        engine.logs_prefix.clone(),
    ));

    // --- Compute backends ---
    let local: Arc<dyn ComputeBackend> = Arc::new(DockerBackend::new(
        worker.docker_bin.clone(),
        worker.docker_network.clone(),
    ));
    let batch = if worker.batch_enabled {
        let backend = BatchBackend::from_env(worker.batch_log_group.clone()).await;
        Some(Arc::new(backend) as Arc<dyn ComputeBackend>)
    } else {
        None
    };

    // --- Image digests ---
    let digests = DigestResolver::new(
        Arc::new(EcrDigestSource::from_env().await),
        Arc::new(
            DockerHubDigestSource::new(worker.docker_hub_url.clone())
                .context("Failed to build registry client")?,
        ),
    );

    // --- Orchestrator ---
    let orchestrator =
        Orchestrator::start(engine, store, storage, digests, Backends { local, batch });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    orchestrator.shutdown().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
