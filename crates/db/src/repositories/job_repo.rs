//! Repository for the `jobs` table.

use procapi_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::job::{CreateJob, JobRow};
use crate::models::status::StatusId;

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, process_id, status_id, submitter, host, created_at, updated_at";

/// Provides CRUD operations for job records. Records are never deleted.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job record. `updated_at` starts equal to `created_at`.
    pub async fn insert(pool: &PgPool, input: &CreateJob) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, process_id, status_id, submitter, host, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(&input.id)
            .bind(&input.process_id)
            .bind(input.status_id)
            .bind(&input.submitter)
            .bind(&input.host)
            .bind(input.created_at)
            .fetch_one(pool)
            .await
    }

    /// Set status and last-update time. Returns `false` if no row matched.
    pub async fn update_status(
        pool: &PgPool,
        id: &str,
        status_id: StatusId,
        updated_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE jobs SET status_id = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status_id)
            .bind(updated_at)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recently updated first.
    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs ORDER BY updated_at DESC, id ASC LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn exists(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}
