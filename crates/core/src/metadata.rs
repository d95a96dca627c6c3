//! Reproducibility metadata recorded for every closed job.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// JSON-LD context tag written into every metadata record.
pub const METADATA_CONTEXT: &str = "http://schema.org/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRef {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub uri: String,
    pub digest: String,
}

/// The durable metadata object. Timestamps the backend never reported are
/// the zero value ([`crate::types::zero_timestamp`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "jobID")]
    pub job_id: JobId,
    pub process: ProcessRef,
    pub image: ImageRef,
    pub commands: Vec<String>,
    #[serde(rename = "generatedAtTime")]
    pub generated_at: Timestamp,
    #[serde(rename = "startedAtTime")]
    pub started_at: Timestamp,
    #[serde(rename = "endedAtTime")]
    pub ended_at: Timestamp,
}
