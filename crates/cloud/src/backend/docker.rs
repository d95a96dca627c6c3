//! Local container engine backend driven through the `docker` CLI.
//!
//! Every container joins a dedicated bridge network, created on first use.
//! Containers are kept after exit so their logs and timestamps remain
//! inspectable; [`ComputeBackend::release`] force-removes them once the
//! close pipeline has persisted everything.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{
    parse_rfc3339, BackendError, BackendHandle, BackendStatus, ComputeBackend, Inspection,
    LogPage, SubmitSpec,
};
use crate::process::{args, run_cli, run_cli_checked, CliError};

/// Default network every job container joins.
pub const DEFAULT_NETWORK: &str = "process_api_net";

/// Label carrying the job id on every container.
pub const JOB_ID_LABEL: &str = "procapi.job_id";

/// Timeout for short engine calls (inspect, kill, rm, network).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// `docker run` may pull the image first.
const RUN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub struct DockerBackend {
    bin: String,
    network: String,
    network_ready: OnceCell<()>,
}

impl DockerBackend {
    pub fn new(bin: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            network: network.into(),
            network_ready: OnceCell::new(),
        }
    }

    async fn ensure_network(&self) -> Result<(), BackendError> {
        self.network_ready
            .get_or_try_init(|| async {
                let inspect = run_cli(
                    &self.bin,
                    &args(["network", "inspect", self.network.as_str()]),
                    Some(CONTROL_TIMEOUT),
                )
                .await?;
                if inspect.success() {
                    return Ok(());
                }
                tracing::info!(network = %self.network, "Creating container network");
                run_cli_checked(
                    &self.bin,
                    &args(["network", "create", self.network.as_str()]),
                    Some(CONTROL_TIMEOUT),
                )
                .await
                .map(|_| ())
                .map_err(|e| BackendError::Submit(format!("network {}: {e}", self.network)))
            })
            .await
            .copied()
    }

    /// Arguments for `docker run`.
    pub fn run_args(&self, spec: &SubmitSpec) -> Vec<String> {
        let mut argv = args([
            "run",
            "--detach",
            "--network",
            self.network.as_str(),
            "--label",
        ]);
        argv.push(format!("{JOB_ID_LABEL}={}", spec.job_id));
        if !spec.name.is_empty() {
            argv.push("--name".into());
            argv.push(spec.name.clone());
        }
        for volume in &spec.volumes {
            argv.push("--volume".into());
            argv.push(volume.clone());
        }
        for (key, value) in &spec.env {
            argv.push("--env".into());
            argv.push(format!("{key}={value}"));
        }
        if spec.resources.cpus > 0.0 {
            argv.push("--cpus".into());
            argv.push(spec.resources.cpus.to_string());
        }
        if spec.resources.memory_mib > 0 {
            argv.push("--memory".into());
            argv.push(format!("{}m", spec.resources.memory_mib));
        }
        argv.push(spec.image.clone());
        argv.extend(spec.command.iter().cloned());
        argv
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    #[serde(default)]
    created: String,
    /// Image id (`sha256:...`).
    #[serde(default)]
    image: String,
    state: ContainerState,
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    exit_code: i64,
    #[serde(default)]
    started_at: String,
    #[serde(default)]
    finished_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    image: String,
}

fn map_state(state: &ContainerState) -> BackendStatus {
    match state.status.as_str() {
        "created" => BackendStatus::Pending,
        "running" | "paused" | "restarting" => BackendStatus::Running,
        "exited" | "dead" if state.exit_code == 0 => BackendStatus::Succeeded,
        "exited" | "dead" => BackendStatus::Failed,
        _ => BackendStatus::Unknown,
    }
}

/// Parse `docker inspect` output (a one-element JSON array).
fn parse_inspect(stdout: &str) -> Result<Inspection, BackendError> {
    let mut containers: Vec<ContainerInspect> =
        serde_json::from_str(stdout).map_err(|e| BackendError::Parse(e.to_string()))?;
    let container = containers
        .pop()
        .ok_or_else(|| BackendError::Parse("empty inspect result".into()))?;

    let status = map_state(&container.state);
    Ok(Inspection {
        status,
        exit_code: status.is_finished().then_some(container.state.exit_code),
        created_at: parse_rfc3339(&container.created),
        started_at: parse_rfc3339(&container.state.started_at),
        finished_at: parse_rfc3339(&container.state.finished_at),
        image: container.config.map(|c| c.image).filter(|i| !i.is_empty()),
        image_digest: Some(container.image).filter(|i| !i.is_empty()),
    })
}

fn is_missing(err: &CliError) -> bool {
    err.stderr().contains("No such container") || err.stderr().contains("No such object")
}

#[async_trait]
impl ComputeBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, spec: &SubmitSpec) -> Result<BackendHandle, BackendError> {
        self.ensure_network().await?;
        let output = run_cli_checked(&self.bin, &self.run_args(spec), Some(RUN_TIMEOUT))
            .await
            .map_err(|e| BackendError::Submit(e.to_string()))?;
        let id = output.stdout.trim();
        if id.is_empty() {
            return Err(BackendError::Submit("engine returned no container id".into()));
        }
        Ok(BackendHandle(id.to_string()))
    }

    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let output = run_cli(
            &self.bin,
            &args(["kill", "--signal", "KILL", handle.as_str()]),
            Some(CONTROL_TIMEOUT),
        )
        .await?;
        // Killing a container that already exited is not an error.
        if output.success() || output.stderr.contains("is not running") {
            Ok(())
        } else {
            Err(BackendError::Kill(output.stderr.trim().to_string()))
        }
    }

    async fn inspect(&self, handle: &BackendHandle) -> Result<Inspection, BackendError> {
        let output = run_cli_checked(
            &self.bin,
            &args(["inspect", "--type", "container", handle.as_str()]),
            Some(CONTROL_TIMEOUT),
        )
        .await
        .map_err(|e| {
            if is_missing(&e) {
                BackendError::NotFound(handle.to_string())
            } else {
                e.into()
            }
        })?;
        parse_inspect(&output.stdout)
    }

    /// The engine returns the full log in one page.
    async fn fetch_logs(
        &self,
        handle: &BackendHandle,
        _token: Option<&str>,
    ) -> Result<LogPage, BackendError> {
        let output = run_cli_checked(
            &self.bin,
            &args(["logs", handle.as_str()]),
            Some(CONTROL_TIMEOUT),
        )
        .await
        .map_err(|e| {
            if is_missing(&e) {
                BackendError::LogsUnavailable(handle.to_string())
            } else {
                e.into()
            }
        })?;
        // stdout then stderr; the CLI splits the container's streams.
        let lines = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        Ok(LogPage {
            lines,
            next_token: None,
        })
    }

    async fn wait(&self, handle: &BackendHandle) -> Result<i64, BackendError> {
        let output = run_cli_checked(&self.bin, &args(["wait", handle.as_str()]), None).await?;
        output
            .stdout
            .trim()
            .parse()
            .map_err(|_| BackendError::Parse(format!("exit code '{}'", output.stdout.trim())))
    }

    async fn release(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        run_cli_checked(
            &self.bin,
            &args(["rm", "--force", handle.as_str()]),
            Some(CONTROL_TIMEOUT),
        )
        .await
        .map(|_| ())
        .or_else(|e| if is_missing(&e) { Ok(()) } else { Err(e.into()) })
    }
}
