//! The job store contract consumed by the engine.
//!
//! The store owns the durable facts of a job once it leaves the registry:
//! its record (PostgreSQL) and its persisted logs (object storage).

use std::sync::Arc;

use async_trait::async_trait;
use procapi_core::logs::JobLogs;
use procapi_core::record::JobRecord;
use procapi_core::status::JobStatus;
use procapi_core::storage::{log_key, ObjectStore};
use procapi_core::types::{JobId, Timestamp};

use crate::error::DbError;
use crate::models::job::CreateJob;
use crate::models::status::JobStatusId;
use crate::repositories::JobRepo;
use crate::DbPool;

/// Fields of a newly accepted job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub status: JobStatus,
    pub host: String,
    pub process_id: String,
    pub submitter: String,
    pub created_at: Timestamp,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn add_job(&self, job: &NewJob) -> Result<(), DbError>;

    /// Returns `false` if the job has no record.
    async fn update_job_record(
        &self,
        id: &str,
        status: JobStatus,
        updated_at: Timestamp,
    ) -> Result<bool, DbError>;

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, DbError>;

    async fn get_jobs(&self, limit: i64, offset: i64) -> Result<Vec<JobRecord>, DbError>;

    async fn check_job_exist(&self, id: &str) -> Result<bool, DbError>;

    /// Logs persisted by a finished job's close pipeline.
    async fn get_logs(&self, id: &str) -> Result<Option<JobLogs>, DbError>;

    /// Release the underlying connections.
    async fn close(&self);
}

/// [`JobStore`] backed by PostgreSQL records and object-stored logs.
pub struct PgJobStore {
    pool: DbPool,
    storage: Arc<dyn ObjectStore>,
    logs_prefix: String,
}

impl PgJobStore {
    pub fn new(pool: DbPool, storage: Arc<dyn ObjectStore>, logs_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            storage,
            logs_prefix: logs_prefix.into(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn add_job(&self, job: &NewJob) -> Result<(), DbError> {
        let input = CreateJob {
            id: job.id.clone(),
            process_id: job.process_id.clone(),
            status_id: JobStatusId::from(job.status).id(),
            submitter: job.submitter.clone(),
            host: job.host.clone(),
            created_at: job.created_at,
        };
        JobRepo::insert(&self.pool, &input).await?;
        Ok(())
    }

    async fn update_job_record(
        &self,
        id: &str,
        status: JobStatus,
        updated_at: Timestamp,
    ) -> Result<bool, DbError> {
        let status_id = JobStatusId::from(status).id();
        Ok(JobRepo::update_status(&self.pool, id, status_id, updated_at).await?)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, DbError> {
        JobRepo::find_by_id(&self.pool, id)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn get_jobs(&self, limit: i64, offset: i64) -> Result<Vec<JobRecord>, DbError> {
        JobRepo::list(&self.pool, limit, offset)
            .await?
            .into_iter()
            .map(JobRecord::try_from)
            .collect()
    }

    async fn check_job_exist(&self, id: &str) -> Result<bool, DbError> {
        Ok(JobRepo::exists(&self.pool, id).await?)
    }

    async fn get_logs(&self, id: &str) -> Result<Option<JobLogs>, DbError> {
        let Some(record) = self.get_job(id).await? else {
            return Ok(None);
        };
        let key = log_key(&self.logs_prefix, &record.id);
        match self.storage.get(&key).await? {
            Some(bytes) => Ok(Some(JobLogs::from_ndjson(
                record.id,
                record.process_id,
                &bytes,
            )?)),
            None => {
                tracing::debug!(job_id = %id, key = %key, "No durable log object");
                Ok(None)
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
