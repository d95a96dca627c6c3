//! AWS Batch backend.
//!
//! Jobs are submitted against a job definition and queue with the command
//! and environment passed as container overrides. Logs are read from the
//! CloudWatch stream Batch assigns to the container, using forward
//! pagination tokens.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use aws_sdk_batch::error::DisplayErrorContext;
use aws_sdk_batch::types::{
    ContainerOverrides, JobDetail, JobStatus as BatchJobStatus, KeyValuePair,
    ResourceRequirement, ResourceType,
};
use aws_sdk_batch::Client as BatchClient;
use aws_sdk_cloudwatchlogs::operation::get_log_events::GetLogEventsError;
use aws_sdk_cloudwatchlogs::Client as LogsClient;
use procapi_core::request::HostSpec;

use super::{
    from_epoch_millis, BackendError, BackendHandle, BackendStatus, ComputeBackend, Inspection,
    LogPage, SubmitSpec,
};

/// Log group Batch writes container output to by default.
pub const DEFAULT_LOG_GROUP: &str = "/aws/batch/job";

/// Reason recorded on terminated jobs.
const TERMINATE_REASON: &str = "Dismissed by process API";

pub struct BatchBackend {
    batch: BatchClient,
    logs: LogsClient,
    log_group: String,
    /// Batch job id -> CloudWatch log stream, filled once Batch reports it.
    log_streams: RwLock<HashMap<String, String>>,
}

impl BatchBackend {
    pub fn new(batch: BatchClient, logs: LogsClient, log_group: impl Into<String>) -> Self {
        Self {
            batch,
            logs,
            log_group: log_group.into(),
            log_streams: RwLock::new(HashMap::new()),
        }
    }

    /// Build both clients from the ambient AWS configuration (env, profile, IMDS).
    pub async fn from_env(log_group: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(BatchClient::new(&config), LogsClient::new(&config), log_group)
    }

    async fn describe(&self, handle: &BackendHandle) -> Result<JobDetail, BackendError> {
        let output = self
            .batch
            .describe_jobs()
            .jobs(handle.as_str())
            .send()
            .await
            .map_err(|e| {
                BackendError::Aws(format!("describe {handle}: {}", DisplayErrorContext(&e)))
            })?;
        let detail = output
            .jobs()
            .first()
            .cloned()
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))?;

        if let Some(stream) = log_stream_name(&detail) {
            self.remember_stream(handle, stream.to_string());
        }
        Ok(detail)
    }

    fn remember_stream(&self, handle: &BackendHandle, stream: String) {
        if let Ok(mut streams) = self.log_streams.write() {
            streams.insert(handle.0.clone(), stream);
        }
    }

    fn cached_stream(&self, handle: &BackendHandle) -> Option<String> {
        self.log_streams
            .read()
            .ok()
            .and_then(|streams| streams.get(handle.as_str()).cloned())
    }

    async fn log_stream(&self, handle: &BackendHandle) -> Result<String, BackendError> {
        if let Some(stream) = self.cached_stream(handle) {
            return Ok(stream);
        }
        let detail = self.describe(handle).await?;
        log_stream_name(&detail)
            .map(str::to_string)
            .ok_or_else(|| BackendError::LogsUnavailable(format!("no log stream for {handle}")))
    }
}

fn log_stream_name(detail: &JobDetail) -> Option<&str> {
    detail.container().and_then(|c| c.log_stream_name())
}

/// Map a Batch job status onto the normalised backend status.
pub fn map_batch_status(status: &BatchJobStatus) -> BackendStatus {
    match status {
        BatchJobStatus::Submitted
        | BatchJobStatus::Pending
        | BatchJobStatus::Runnable
        | BatchJobStatus::Starting => BackendStatus::Pending,
        BatchJobStatus::Running => BackendStatus::Running,
        BatchJobStatus::Succeeded => BackendStatus::Succeeded,
        BatchJobStatus::Failed => BackendStatus::Failed,
        _ => BackendStatus::Unknown,
    }
}

/// Container overrides for `SubmitJob`. Zero resources keep the job
/// definition's values.
fn container_overrides(spec: &SubmitSpec) -> Result<ContainerOverrides, BackendError> {
    let environment = spec
        .env
        .iter()
        .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
        .collect();

    let mut requirements = Vec::new();
    if spec.resources.cpus > 0.0 {
        requirements.push(resource(ResourceType::Vcpu, spec.resources.cpus.to_string())?);
    }
    if spec.resources.memory_mib > 0 {
        requirements.push(resource(ResourceType::Memory, spec.resources.memory_mib.to_string())?);
    }

    Ok(ContainerOverrides::builder()
        .set_command(Some(spec.command.clone()))
        .set_environment(Some(environment))
        .set_resource_requirements((!requirements.is_empty()).then_some(requirements))
        .build())
}

fn resource(kind: ResourceType, value: String) -> Result<ResourceRequirement, BackendError> {
    Ok(ResourceRequirement::builder()
        .r#type(kind)
        .value(value)
        .build())
}

/// Classify CloudWatch failures the log pipeline should retry.
fn classify_logs_error(err: GetLogEventsError) -> BackendError {
    if err.is_invalid_parameter_exception() {
        BackendError::InvalidToken
    } else if err.is_resource_not_found_exception() {
        BackendError::LogsUnavailable(err.to_string())
    } else {
        BackendError::Aws(DisplayErrorContext(&err).to_string())
    }
}

#[async_trait]
impl ComputeBackend for BatchBackend {
    fn kind(&self) -> &'static str {
        "aws-batch"
    }

    async fn submit(&self, spec: &SubmitSpec) -> Result<BackendHandle, BackendError> {
        let HostSpec::AwsBatch {
            job_definition,
            job_queue,
        } = &spec.host
        else {
            return Err(BackendError::Submit(
                "batch backend requires a job definition and queue".into(),
            ));
        };

        let output = self
            .batch
            .submit_job()
            .job_name(&spec.name)
            .job_queue(job_queue)
            .job_definition(job_definition)
            .container_overrides(container_overrides(spec)?)
            .send()
            .await
            .map_err(|e| BackendError::Submit(DisplayErrorContext(&e).to_string()))?;
        let job_id = output
            .job_id()
            .ok_or_else(|| BackendError::Submit("batch returned no job id".into()))?;
        Ok(BackendHandle(job_id.to_string()))
    }

    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.batch
            .terminate_job()
            .job_id(handle.as_str())
            .reason(TERMINATE_REASON)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Kill(DisplayErrorContext(&e).to_string()))
    }

    async fn inspect(&self, handle: &BackendHandle) -> Result<Inspection, BackendError> {
        let detail = self.describe(handle).await?;
        let status = Option::<&BatchJobStatus>::from(detail.status())
            .map(map_batch_status)
            .unwrap_or(BackendStatus::Unknown);
        let container = detail.container();
        Ok(Inspection {
            status,
            exit_code: container.and_then(|c| c.exit_code()).map(i64::from),
            created_at: from_epoch_millis(detail.created_at()),
            started_at: from_epoch_millis(Option::from(detail.started_at())),
            finished_at: from_epoch_millis(detail.stopped_at()),
            image: container.and_then(|c| c.image()).map(str::to_string),
            image_digest: None,
        })
    }

    async fn fetch_logs(
        &self,
        handle: &BackendHandle,
        token: Option<&str>,
    ) -> Result<LogPage, BackendError> {
        let stream = self.log_stream(handle).await?;
        let output = self
            .logs
            .get_log_events()
            .log_group_name(&self.log_group)
            .log_stream_name(stream)
            .start_from_head(true)
            .set_next_token(token.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify_logs_error(e.into_service_error()))?;

        Ok(LogPage {
            lines: output
                .events()
                .iter()
                .map(|event| event.message().unwrap_or_default().to_string())
                .collect(),
            next_token: output.next_forward_token().map(str::to_string),
        })
    }

    async fn release(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        if let Ok(mut streams) = self.log_streams.write() {
            streams.remove(handle.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use aws_config::{BehaviorVersion, Region, SdkConfig};
    use aws_sdk_cloudwatchlogs::types::error::{
        InvalidParameterException, ResourceNotFoundException, ServiceUnavailableException,
    };
    use procapi_core::request::Resources;

    use super::*;

    fn offline_backend() -> BatchBackend {
        let config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        BatchBackend::new(
            BatchClient::new(&config),
            LogsClient::new(&config),
            DEFAULT_LOG_GROUP,
        )
    }

    #[test]
    fn batch_statuses_map() {
        for s in ["SUBMITTED", "PENDING", "RUNNABLE", "STARTING"] {
            assert_eq!(map_batch_status(&BatchJobStatus::from(s)), BackendStatus::Pending);
        }
        assert_eq!(map_batch_status(&BatchJobStatus::Running), BackendStatus::Running);
        assert_eq!(map_batch_status(&BatchJobStatus::Succeeded), BackendStatus::Succeeded);
        assert_eq!(map_batch_status(&BatchJobStatus::Failed), BackendStatus::Failed);
        assert_eq!(map_batch_status(&BatchJobStatus::from("WAT")), BackendStatus::Unknown);
    }

    #[test]
    fn overrides_include_env_and_resources() {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "x".to_string());
        let spec = SubmitSpec {
            job_id: "j1".into(),
            name: "ogc-api-id-j1".into(),
            image: "img".into(),
            command: vec!["run".into()],
            env,
            volumes: Vec::new(),
            resources: Resources {
                cpus: 2.0,
                memory_mib: 0,
            },
            host: HostSpec::AwsBatch {
                job_definition: "def".into(),
                job_queue: "q".into(),
            },
        };
        let overrides = container_overrides(&spec).unwrap();
        assert_eq!(overrides.command(), ["run".to_string()]);
        assert_eq!(overrides.environment()[0].name(), Some("TOKEN"));
        assert_eq!(overrides.environment()[0].value(), Some("x"));
        let requirements = overrides.resource_requirements();
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].r#type(), Some(&ResourceType::Vcpu));
        assert_eq!(requirements[0].value(), Some("2"));
    }

    #[test]
    fn cloudwatch_errors_are_classified() {
        let invalid = GetLogEventsError::InvalidParameterException(
            InvalidParameterException::builder()
                .message("The specified nextToken is invalid.")
                .build(),
        );
        assert_matches!(classify_logs_error(invalid), BackendError::InvalidToken);

        let missing = GetLogEventsError::ResourceNotFoundException(
            ResourceNotFoundException::builder()
                .message("The specified log stream does not exist.")
                .build(),
        );
        assert_matches!(classify_logs_error(missing), BackendError::LogsUnavailable(_));

        let other = GetLogEventsError::ServiceUnavailableException(
            ServiceUnavailableException::builder().build(),
        );
        let err = classify_logs_error(other);
        assert!(!err.is_transient());
        assert_matches!(err, BackendError::Aws(_));
    }

    #[tokio::test]
    async fn release_forgets_log_stream() {
        let backend = offline_backend();
        let handle = BackendHandle("job-1".into());
        let other = BackendHandle("job-2".into());
        backend.remember_stream(&handle, "def/default/abc".into());
        backend.remember_stream(&other, "def/default/xyz".into());
        assert_eq!(backend.cached_stream(&handle).as_deref(), Some("def/default/abc"));

        backend.release(&handle).await.unwrap();

        assert!(backend.cached_stream(&handle).is_none());
        assert_eq!(backend.cached_stream(&other).as_deref(), Some("def/default/xyz"));
        // Releasing twice is harmless.
        backend.release(&handle).await.unwrap();
    }
}
