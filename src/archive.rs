//! Compressed log snapshots using zstd.
//!
//! After each batch, the active log file of every process is compressed into
//! `{archive_dir}/{name}_{timestamp}.log.zst`. Only the newest `keep` snapshots
//! per process are retained.

use crate::process::ProcessResult;
use crate::rotating_log::log_file_key;
use crate::supervisor::BatchObserver;
use chrono::Utc;
use std::path::{Path, PathBuf};

const SNAPSHOT_SUFFIX: &str = ".log.zst";

/// Writes compressed snapshots of each process's current log.
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
    keep: usize,
    level: i32,
}

impl Archiver {
    pub fn new(dir: impl Into<PathBuf>, keep: usize, level: i32) -> Self {
        Self {
            dir: dir.into(),
            keep: keep.max(1),
            level,
        }
    }

    /// Snapshot every result's current log.
    ///
    /// Errors for individual processes are logged but do not stop processing.
    pub fn archive(&self, results: &[ProcessResult]) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(error = %e, dir = %self.dir.display(), "failed to create archive directory");
            return;
        }

        for result in results {
            let base = result.log.base_name();
            match self.snapshot(result) {
                Ok(path) => {
                    tracing::debug!(name = %result.name(), file = %path.display(), "archived log snapshot")
                }
                Err(e) => {
                    tracing::warn!(error = %e, name = %result.name(), "failed to archive log snapshot");
                    continue;
                }
            }
            prune_snapshots(&self.dir, base, self.keep);
        }
    }

    fn snapshot(&self, result: &ProcessResult) -> std::io::Result<PathBuf> {
        let contents = result
            .log
            .current_contents()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let compressed = zstd::encode_all(contents.as_slice(), self.level)?;

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.9f");
        let dest = self
            .dir
            .join(format!("{}_{stamp}{SNAPSHOT_SUFFIX}", result.log.base_name()));
        std::fs::write(&dest, compressed)?;
        Ok(dest)
    }
}

impl BatchObserver for Archiver {
    fn batch_completed(&self, _batch: u64, results: &[ProcessResult]) {
        self.archive(results);
    }
}

/// Delete the oldest snapshots of `base_name` until at most `keep` remain.
fn prune_snapshots(dir: &Path, base_name: &str, keep: usize) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read archive directory for pruning");
            return;
        }
    };

    let mut snapshots: Vec<_> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let key = log_file_key(&name, base_name, SNAPSHOT_SUFFIX)?;
            Some((key, entry.path()))
        })
        .collect();

    if snapshots.len() <= keep {
        return;
    }

    snapshots.sort_by(|a, b| a.0.cmp(&b.0));
    let excess = snapshots.len() - keep;
    for (_, path) in snapshots.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(error = %e, file = %path.display(), "failed to delete old snapshot");
        }
    }
}
