//! Per-job server log.
//!
//! Every job-scoped event is appended to `{logs_dir}/{job_id}.server.jsonl`
//! as one `{"time","level","msg"}` object per line and mirrored to
//! `tracing` with the job id attached. Lines are handed to a writer task
//! so logging never blocks the caller on file I/O; [`JobLogger::flush`]
//! must be awaited before the file is read back.

use std::fs::OpenOptions;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::Utc;
use procapi_core::logs::ServerLogEntry;
use procapi_core::types::JobId;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::Level;

pub fn server_log_path(dir: &Path, job_id: &JobId) -> PathBuf {
    dir.join(format!("{job_id}.server.jsonl"))
}

pub fn process_log_path(dir: &Path, job_id: &JobId) -> PathBuf {
    dir.join(format!("{job_id}.process.jsonl"))
}

enum WriterCommand {
    Line(Vec<u8>),
    Flush(oneshot::Sender<()>),
}

pub struct JobLogger {
    job_id: JobId,
    max_level: Level,
    path: PathBuf,
    writer: mpsc::UnboundedSender<WriterCommand>,
}

impl JobLogger {
    /// Create (or truncate) the server log for `job_id` and start its writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(dir: &Path, job_id: &JobId, max_level: Level) -> io::Result<Self> {
        let path = server_log_path(dir, job_id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let (writer, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(
            job_id.clone(),
            tokio::fs::File::from_std(file),
            rx,
        ));
        Ok(Self {
            job_id: job_id.clone(),
            max_level,
            path,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, level: Level, msg: &str) {
        match level {
            Level::ERROR => tracing::error!(job_id = %self.job_id, "{msg}"),
            Level::WARN => tracing::warn!(job_id = %self.job_id, "{msg}"),
            Level::INFO => tracing::info!(job_id = %self.job_id, "{msg}"),
            Level::DEBUG => tracing::debug!(job_id = %self.job_id, "{msg}"),
            _ => tracing::trace!(job_id = %self.job_id, "{msg}"),
        }

        // ERROR is the lowest `Level`.
        if level > self.max_level {
            return;
        }
        let entry = ServerLogEntry {
            time: Utc::now(),
            level: level.as_str().to_ascii_lowercase(),
            msg: msg.to_string(),
        };
        let Ok(mut line) = serde_json::to_vec(&entry) else {
            return;
        };
        line.push(b'\n');
        if self.writer.send(WriterCommand::Line(line)).is_err() {
            tracing::warn!(job_id = %self.job_id, "Server log writer stopped; entry dropped");
        }
    }

    /// Wait until every entry logged so far is on disk.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.writer.send(WriterCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn error(&self, msg: &str) {
        self.log(Level::ERROR, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.log(Level::WARN, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(Level::INFO, msg);
    }

    pub fn debug(&self, msg: &str) {
        self.log(Level::DEBUG, msg);
    }
}

/// Drain queued lines into the file, flushing whenever the queue runs dry.
/// Exits once the logger is dropped.
async fn write_loop(
    job_id: JobId,
    file: tokio::fs::File,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    let mut out = BufWriter::new(file);
    let mut acks = Vec::new();
    while let Some(command) = rx.recv().await {
        let mut next = Some(command);
        while let Some(command) = next.take() {
            match command {
                WriterCommand::Line(line) => {
                    if let Err(e) = out.write_all(&line).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to write server log");
                    }
                }
                WriterCommand::Flush(ack) => acks.push(ack),
            }
            next = rx.try_recv().ok();
        }
        if let Err(e) = out.flush().await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to flush server log");
        }
        for ack in acks.drain(..) {
            let _ = ack.send(());
        }
    }
}

/// Read a server log file. A missing file reads as empty; unparsable lines are skipped.
pub async fn read_server_log(path: &Path) -> io::Result<Vec<ServerLogEntry>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Read a process log file, one entry per line. A missing file reads as empty.
pub async fn read_process_log(path: &Path) -> io::Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Overwrite a process log file with `lines`.
pub async fn write_process_log(path: &Path, lines: &[String]) -> io::Result<()> {
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    tokio::fs::write(path, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_below_level_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let id: JobId = "j1".into();
        let logger = JobLogger::create(dir.path(), &id, Level::INFO).unwrap();

        logger.debug("hidden");
        logger.info("Status changed to running.");
        logger.error("boom");
        logger.flush().await;

        let entries = read_server_log(logger.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, "info");
        assert_eq!(entries[0].msg, "Status changed to running.");
        assert_eq!(entries[1].level, "error");
    }

    #[tokio::test]
    async fn entries_keep_order_across_concurrent_loggers() {
        let dir = tempfile::tempdir().unwrap();
        let id: JobId = "j2".into();
        let logger = std::sync::Arc::new(JobLogger::create(dir.path(), &id, Level::DEBUG).unwrap());

        let tasks: Vec<_> = (0..4)
            .map(|t| {
                let logger = std::sync::Arc::clone(&logger);
                tokio::spawn(async move {
                    for i in 0..50 {
                        logger.info(&format!("task {t} line {i}"));
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        logger.flush().await;

        let entries = read_server_log(logger.path()).await.unwrap();
        assert_eq!(entries.len(), 200);
        for t in 0..4 {
            let lines: Vec<_> = entries
                .iter()
                .filter(|e| e.msg.starts_with(&format!("task {t} ")))
                .map(|e| e.msg.clone())
                .collect();
            let expected: Vec<_> = (0..50).map(|i| format!("task {t} line {i}")).collect();
            assert_eq!(lines, expected);
        }
    }

    #[tokio::test]
    async fn process_log_overwrite_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = process_log_path(dir.path(), &"j1".to_string());

        assert!(read_process_log(&path).await.unwrap().is_empty());
        write_process_log(&path, &["a".into(), "b".into()]).await.unwrap();
        write_process_log(&path, &["a".into(), "b".into()]).await.unwrap();
        assert_eq!(read_process_log(&path).await.unwrap(), vec!["a", "b"]);
    }
}
