//! Durable object storage contract and key layout.
//!
//! Every job owns at most three durable objects, one per prefix:
//!
//! | Object   | Key                           | Content type           |
//! |----------|-------------------------------|------------------------|
//! | logs     | `{logs_prefix}/{id}.jsonl`    | `application/x-ndjson` |
//! | metadata | `{metadata_prefix}/{id}.json` | `application/json`     |
//! | results  | `{results_prefix}/{id}.json`  | `application/json`     |
//!
//! Writes are whole-object overwrites, so re-running a close pipeline or a
//! retried log upload never leaves partial or duplicated content behind.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key does not name a valid object location.
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    /// Local filesystem failure.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote object store rejected or failed the request.
    #[error("Object store error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Key/value object storage (S3 or a local directory).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` at `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    /// Read the object at `key`. `Ok(None)` when it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete the object at `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

fn join(prefix: &str, job_id: &JobId, ext: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{job_id}.{ext}")
    } else {
        format!("{prefix}/{job_id}.{ext}")
    }
}

pub fn log_key(prefix: &str, job_id: &JobId) -> String {
    join(prefix, job_id, "jsonl")
}

pub fn metadata_key(prefix: &str, job_id: &JobId) -> String {
    join(prefix, job_id, "json")
}

pub fn results_key(prefix: &str, job_id: &JobId) -> String {
    join(prefix, job_id, "json")
}

/// Reject keys that could escape a storage root or address nothing.
pub fn validate_key(key: &str) -> Result<(), CoreError> {
    if key.is_empty() || key.starts_with('/') {
        return Err(CoreError::Validation(format!("Invalid storage key '{key}'")));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(CoreError::Validation(format!("Invalid storage key '{key}'")));
    }
    Ok(())
}
