//! Row model for the `jobs` table.

use procapi_core::record::JobRecord;
use procapi_core::types::{JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{JobStatusId, StatusId};
use crate::error::DbError;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub id: JobId,
    pub process_id: String,
    pub status_id: StatusId,
    pub submitter: String,
    pub host: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Insert DTO for a freshly accepted job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub id: JobId,
    pub process_id: String,
    pub status_id: StatusId,
    pub submitter: String,
    pub host: String,
    pub created_at: Timestamp,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatusId::from_id(row.status_id)
            .ok_or_else(|| {
                DbError::Corrupt(format!("job {} has unknown status id {}", row.id, row.status_id))
            })?
            .into();
        Ok(JobRecord {
            id: row.id,
            process_id: row.process_id,
            status,
            submitter: row.submitter,
            host: row.host,
            updated_at: row.updated_at,
            created_at: row.created_at,
        })
    }
}
