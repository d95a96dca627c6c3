//! The persisted job record as seen by the engine.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

/// One row of the durable job table.
///
/// Created when a job is accepted, updated on every accepted status
/// transition, never deleted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "jobID")]
    pub id: JobId,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub status: JobStatus,
    pub submitter: String,
    pub host: String,
    #[serde(rename = "updated")]
    pub updated_at: Timestamp,
    #[serde(rename = "created")]
    pub created_at: Timestamp,
}
