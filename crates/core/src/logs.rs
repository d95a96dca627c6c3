//! Job log shapes and the durable newline-delimited JSON encoding.
//!
//! A job has two log streams: the *process* stream (lines produced by the
//! unit of work itself, as reported by the compute backend) and the
//! *server* stream (structured events the engine recorded about the job).
//! In the durable object process lines come first, then server entries,
//! each line tagged with its `source`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// One structured entry from a job's server log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLogEntry {
    pub time: Timestamp,
    pub level: String,
    pub msg: String,
}

/// Both log streams of a single job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogs {
    #[serde(rename = "jobID")]
    pub job_id: JobId,
    #[serde(rename = "processID")]
    pub process_id: String,
    #[serde(rename = "processLogs")]
    pub process_logs: Vec<String>,
    #[serde(rename = "serverLogs")]
    pub server_logs: Vec<ServerLogEntry>,
}

/// A single line of the durable log object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum LogRecord {
    Process { line: String },
    Server(ServerLogEntry),
}

impl JobLogs {
    pub fn new(job_id: impl Into<JobId>, process_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            process_id: process_id.into(),
            ..Default::default()
        }
    }

    /// Encode as newline-delimited JSON, one [`LogRecord`] per line.
    pub fn to_ndjson(&self) -> Result<Vec<u8>, CoreError> {
        let mut out = Vec::new();
        let records = self
            .process_logs
            .iter()
            .map(|line| LogRecord::Process { line: line.clone() })
            .chain(self.server_logs.iter().cloned().map(LogRecord::Server));
        for record in records {
            serde_json::to_writer(&mut out, &record)
                .map_err(|e| CoreError::Internal(format!("Failed to encode log record: {e}")))?;
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Decode a durable log object. Blank lines are skipped; a malformed
    /// line is an error because the object is written by this engine only.
    pub fn from_ndjson(
        job_id: impl Into<JobId>,
        process_id: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Self, CoreError> {
        let mut logs = Self::new(job_id, process_id);
        let text = String::from_utf8_lossy(bytes);
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(line).map_err(|e| {
                CoreError::Internal(format!("Malformed log record on line {}: {e}", i + 1))
            })?;
            match record {
                LogRecord::Process { line } => logs.process_logs.push(line),
                LogRecord::Server(entry) => logs.server_logs.push(entry),
            }
        }
        Ok(logs)
    }
}
