use crate::rotating_log::{log_file_key, sanitize_base_name};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Manages the log directory layout.
///
/// Every per-process log, the event log, the status snapshot and the
/// singleton lock live under one directory (default `logs/`).
#[derive(Debug, Clone)]
pub struct LogDir {
    root: PathBuf,
}

impl LogDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `logs/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the singleton lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("overseer.lock")
    }

    /// Default path of the status snapshot.
    pub fn status(&self) -> PathBuf {
        self.root.join("status.json")
    }

    /// Create the directory if it does not exist. Safe to call repeatedly.
    pub fn init(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Log files written for the process `name`, oldest first.
    pub fn list_logs(&self, name: &str) -> Vec<PathBuf> {
        let base = sanitize_base_name(name);
        // The root is a literal path; only the trailing `*` is a wildcard.
        let pattern = format!(
            "{}/{}_*.log",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(&base)
        );

        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "invalid log file pattern");
                return Vec::new();
            }
        };

        let mut found: Vec<_> = paths
            .flatten()
            .filter_map(|path| {
                let key = log_file_key(path.file_name()?.to_str()?, &base, ".log")?;
                Some((key, path))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, path)| path).collect()
    }

    /// Take the singleton lock, failing if another supervisor holds it.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn acquire_lock(&self) -> Result<LockGuard, LockError> {
        let path = self.lock();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LockError::Open {
                path: path.clone(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "acquired singleton lock");
                Ok(LockGuard { file, path })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::Held { path })
            }
            Err(e) => Err(LockError::Open { path, source: e }),
        }
    }
}

/// Holds the singleton lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug)]
pub enum LockError {
    /// Another supervisor already owns this log directory.
    Held { path: PathBuf },
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Held { path } => write!(
                f,
                "another supervisor is already running (lock held on {})",
                path.display()
            ),
            LockError::Open { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Held { .. } => None,
            LockError::Open { source, .. } => Some(source),
        }
    }
}
