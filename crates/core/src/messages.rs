//! Inbound callback messages.
//!
//! Both shapes are produced by an external callback surface (typically the
//! running unit of work reporting on itself) and consumed by the
//! orchestrator loops. Delivery is at-least-once and unordered.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

/// A (possibly late or duplicate) status report for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "jobID", default)]
    pub job_id: JobId,
    pub status: JobStatus,
    /// When the status change happened. `None` means "now".
    #[serde(rename = "updated", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl StatusMessage {
    pub fn new(job_id: impl Into<JobId>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Results pushed by a backend that does not let the engine pull them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsMessage {
    #[serde(rename = "jobID", default)]
    pub job_id: JobId,
    pub payload: serde_json::Value,
}
