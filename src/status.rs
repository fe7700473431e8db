/// Status file: a JSON snapshot of the most recent batch, rewritten after
/// every batch for reporting collaborators to pick up.
///
/// Uses atomic write pattern: write to temp file then rename.
use crate::process::{ProcessResult, RunOutcome};
use crate::supervisor::BatchObserver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One process's entry in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub name: String,
    pub command: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: f64,
    pub succeeded: bool,
    pub outcome: RunOutcome,
    pub log_file: String,
    pub log_files: Vec<String>,
}

impl ProcessStatus {
    pub fn from_result(result: &ProcessResult) -> Self {
        Self {
            name: result.name().to_string(),
            command: result.spec.command_line(),
            start: result.start,
            end: result.end,
            duration_secs: result.duration.as_secs_f64(),
            succeeded: result.succeeded(),
            outcome: result.outcome.clone(),
            log_file: result.log.current_name().display().to_string(),
            log_files: result
                .log
                .files()
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        }
    }
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub agent_started: DateTime<Utc>,
    pub batch: u64,
    pub last_update: DateTime<Utc>,
    pub processes_total: usize,
    pub processes_failed: usize,
    pub processes: Vec<ProcessStatus>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a new StatusFile writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".overseer.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Path to the status file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes a fresh snapshot after every batch.
pub struct StatusWriter {
    file: StatusFile,
    pid: u32,
    agent_started: DateTime<Utc>,
}

impl StatusWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: StatusFile::new(path),
            pid: std::process::id(),
            agent_started: Utc::now(),
        }
    }

    pub fn snapshot(&self, batch: u64, results: &[ProcessResult]) -> StatusData {
        let processes: Vec<ProcessStatus> = results.iter().map(ProcessStatus::from_result).collect();
        StatusData {
            pid: self.pid,
            agent_started: self.agent_started,
            batch,
            last_update: Utc::now(),
            processes_total: processes.len(),
            processes_failed: processes.iter().filter(|p| !p.succeeded).count(),
            processes,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl BatchObserver for StatusWriter {
    fn batch_completed(&self, batch: u64, results: &[ProcessResult]) {
        let data = self.snapshot(batch, results);
        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
