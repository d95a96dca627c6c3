//! Job submission request: what to run, where, and how.
//!
//! The request is assembled by the external API layer from a process
//! definition plus the caller's inputs. Validation happens here, before any
//! registry mutation or backend call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::CoreError;
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prefix of the job name submitted to the batch service.
pub const BATCH_JOB_NAME_PREFIX: &str = "ogc-api-id-";

/// Key injected into the inputs object so the unit of work knows its job id.
pub const INPUT_JOB_ID_KEY: &str = "jobID";

/// Maximum length of an environment variable name.
const MAX_ENV_NAME_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where the job executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostSpec {
    /// Container engine on the same host.
    Local,
    /// Managed batch compute service.
    AwsBatch {
        job_definition: String,
        job_queue: String,
    },
}

impl HostSpec {
    /// Host type as recorded in the job record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::AwsBatch { .. } => "aws-batch",
        }
    }
}

/// Whether the caller waits for the job to finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sync,
    #[default]
    Async,
}

/// Container resource limits. Zero means "engine default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub memory_mib: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobRequest {
    #[validate(length(min = 1, message = "Process id must not be empty"))]
    pub process_id: String,
    #[validate(length(min = 1, message = "Process version must not be empty"))]
    pub process_version: String,
    #[serde(default)]
    pub submitter: String,
    #[validate(length(min = 1, message = "Image must not be empty"))]
    pub image: String,
    /// Base command. The serialized inputs are appended as the last argument.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub inputs: Option<Value>,
    /// Literal environment for the unit of work.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host variables forwarded to the unit of work (see [`resolve_env`]).
    #[serde(default)]
    pub forward_env: Vec<String>,
    /// `host_path:container_path` bind mounts (local jobs only).
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
    pub host: HostSpec,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl JobRequest {
    /// Reject malformed requests with a [`CoreError::Validation`].
    pub fn validate_request(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        if self.command.iter().any(|arg| arg.is_empty()) {
            return Err(CoreError::Validation(
                "Command entries must not be empty".into(),
            ));
        }
        if let Some(inputs) = &self.inputs {
            if !inputs.is_object() {
                return Err(CoreError::Validation("Inputs must be a JSON object".into()));
            }
        }
        if self.command.is_empty() && self.inputs.is_none() {
            return Err(CoreError::Validation(
                "Either a command or inputs must be provided".into(),
            ));
        }
        for name in self.env.keys().chain(self.forward_env.iter()) {
            validate_env_name(name).map_err(CoreError::Validation)?;
        }
        for volume in &self.volumes {
            validate_volume(volume).map_err(CoreError::Validation)?;
        }
        if !self.resources.cpus.is_finite() || self.resources.cpus < 0.0 {
            return Err(CoreError::Validation(
                "CPU limit must be a non-negative number".into(),
            ));
        }
        if self.resources.memory_mib < 0 {
            return Err(CoreError::Validation(
                "Memory limit must not be negative".into(),
            ));
        }

        match &self.host {
            HostSpec::Local => {}
            HostSpec::AwsBatch {
                job_definition,
                job_queue,
            } => {
                if job_definition.is_empty() || job_queue.is_empty() {
                    return Err(CoreError::Validation(
                        "Batch jobs require a job definition and a job queue".into(),
                    ));
                }
                if self.mode == ExecutionMode::Sync {
                    return Err(CoreError::Validation(
                        "Batch jobs cannot be executed synchronously".into(),
                    ));
                }
                if !self.volumes.is_empty() {
                    return Err(CoreError::Validation(
                        "Volumes are only supported for local jobs".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The literal command line for this job.
    ///
    /// When inputs are present they are serialized with the job id injected
    /// and appended as one final argument.
    pub fn build_command(&self, job_id: &JobId) -> Result<Vec<String>, CoreError> {
        let mut cmd = self.command.clone();
        if let Some(inputs) = &self.inputs {
            let mut inputs = inputs.clone();
            if let Some(obj) = inputs.as_object_mut() {
                obj.insert(INPUT_JOB_ID_KEY.into(), Value::String(job_id.clone()));
            }
            let encoded = serde_json::to_string(&inputs)
                .map_err(|e| CoreError::Internal(format!("Failed to encode inputs: {e}")))?;
            cmd.push(encoded);
        }
        Ok(cmd)
    }
}

/// Name under which a batch job is submitted.
pub fn batch_job_name(job_id: &JobId) -> String {
    format!("{BATCH_JOB_NAME_PREFIX}{job_id}")
}

// ---------------------------------------------------------------------------
// Environment forwarding
// ---------------------------------------------------------------------------

/// Read the listed host variables, stripping the `{PROCESS_ID}_` prefix.
///
/// `resolve_env("pyecho", ["PYECHO_TOKEN"])` yields `TOKEN=<value>`.
/// Variables missing on the host are forwarded as empty strings.
pub fn resolve_env(process_id: &str, names: &[String]) -> BTreeMap<String, String> {
    resolve_env_with(process_id, names, |name| std::env::var(name).ok())
}

/// [`resolve_env`] with an injectable lookup.
pub fn resolve_env_with(
    process_id: &str,
    names: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    let prefix = format!("{}_", process_id.to_uppercase());
    names
        .iter()
        .map(|name| {
            let value = lookup(name).unwrap_or_default();
            let stripped = name.strip_prefix(&prefix).unwrap_or(name);
            (stripped.to_string(), value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

/// Environment variable names: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_env_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Environment variable name must not be empty".to_string());
    }
    if name.len() > MAX_ENV_NAME_LEN {
        return Err(format!(
            "Environment variable name exceeds maximum length of {MAX_ENV_NAME_LEN}"
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("Invalid environment variable name '{name}'"));
    }
    Ok(())
}

/// Volumes must be `host:container[:mode]` with both paths non-empty.
pub fn validate_volume(volume: &str) -> Result<(), String> {
    let parts: Vec<&str> = volume.split(':').collect();
    match parts.as_slice() {
        [host, container] | [host, container, _] if !host.is_empty() && !container.is_empty() => {
            Ok(())
        }
        _ => Err(format!(
            "Invalid volume '{volume}'. Expected host_path:container_path"
        )),
    }
}
