//! Shared CLI subprocess runner.
//!
//! The container engine adapter drives the `docker` CLI through
//! [`run_cli`], which owns spawn, output capture and timeout handling.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured result of a finished CLI invocation.
#[derive(Debug, Clone)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Either stream exceeded the capture cap; the excess was discarded.
    pub truncated: bool,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// The program could not be started or waited on.
    #[error("Failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {elapsed_ms}ms")]
    Timeout { program: String, elapsed_ms: u64 },

    /// The program ran and exited non-zero.
    #[error("{program} exited with code {exit_code}: {stderr}")]
    Failed {
        program: String,
        exit_code: i32,
        stderr: String,
    },
}

impl CliError {
    /// Stderr of a failed run, empty for spawn and timeout failures.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

/// Run `program args...`, capturing stdout/stderr.
///
/// With a `timeout` the child is killed once it elapses. Dropping the
/// returned future also kills the child. Each stream keeps its first
/// [`MAX_OUTPUT_BYTES`]; the rest is read and discarded so the child never
/// blocks or dies on a closed pipe.
pub async fn run_cli(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<CliOutput, CliError> {
    run_cli_capped(program, args, timeout, MAX_OUTPUT_BYTES).await
}

async fn run_cli_capped(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
    cap: usize,
) -> Result<CliOutput, CliError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| CliError::Io {
        program: program.to_string(),
        source,
    })?;

    // Read the pipes in tasks so `child.wait()` can borrow `&mut child`.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle, cap).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle, cap).await });

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(result) => result,
            Err(_elapsed) => {
                return Err(CliError::Timeout {
                    program: program.to_string(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        },
        None => child.wait().await,
    }
    .map_err(|source| CliError::Io {
        program: program.to_string(),
        source,
    })?;

    let (stdout_bytes, stdout_truncated) = stdout_task.await.unwrap_or_default();
    let (stderr_bytes, stderr_truncated) = stderr_task.await.unwrap_or_default();
    if stdout_truncated || stderr_truncated {
        tracing::warn!(
            program,
            cap,
            stdout_truncated,
            stderr_truncated,
            "CLI output exceeded capture limit and was truncated",
        );
    }

    Ok(CliOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
        truncated: stdout_truncated || stderr_truncated,
    })
}

/// [`run_cli`], turning a non-zero exit into [`CliError::Failed`].
pub async fn run_cli_checked(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<CliOutput, CliError> {
    let output = run_cli(program, args, timeout).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(CliError::Failed {
            program: program.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Read an output stream to EOF, keeping the first `cap` bytes.
///
/// Returns the kept bytes and whether anything past `cap` was discarded.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, cap: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return (buf, false);
    };
    let _ = (&mut h).take(cap as u64).read_to_end(&mut buf).await;
    let discarded = tokio::io::copy(&mut h, &mut tokio::io::sink())
        .await
        .unwrap_or(0);
    (buf, discarded > 0)
}

/// Build an owned argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
