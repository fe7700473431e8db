//! Disk-bounded, append-only log files.
//!
//! A `RotatingLog` owns one active file at a time. Every write is flushed before
//! it returns. After each write the message count and the wall-clock time spent
//! on the current file are checked; crossing either threshold rotates to a fresh
//! file, and once more than `max_files` files exist the oldest one is deleted.
//!
//! Files are named `{base}_{YYYY-MM-DDTHH-MM-SS.fffffffff}.log`.
use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Timestamp layout embedded in every log file name. Filesystem safe (no `:`).
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.9f";

/// Upper bound on `-N` suffixes tried when a file name is already taken.
const MAX_NAME_ATTEMPTS: u32 = 64;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Rotation and retention thresholds for one sink. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    /// Files kept on disk (active file included) before the oldest is pruned.
    pub max_files: usize,
    /// Messages written to one file before rotating.
    pub max_messages: u64,
    /// Wall-clock time spent writing one file before rotating.
    pub max_duration: Duration,
}

impl LogLimits {
    pub fn new(max_files: usize, max_messages: u64, max_duration_secs: u64) -> Self {
        Self {
            max_files,
            max_messages,
            max_duration: Duration::from_secs(max_duration_secs),
        }
    }

    fn validate(&self) -> Result<(), SinkError> {
        if self.max_files == 0 {
            return Err(SinkError::InvalidLimits {
                reason: "max_files must be at least 1",
            });
        }
        if self.max_messages == 0 {
            return Err(SinkError::InvalidLimits {
                reason: "max_messages must be at least 1",
            });
        }
        if self.max_duration.is_zero() {
            return Err(SinkError::InvalidLimits {
                reason: "max_duration must be non-zero",
            });
        }
        Ok(())
    }
}

/// Errors raised by a rotating log.
#[derive(Debug)]
pub enum SinkError {
    /// A backing file could not be created.
    Create { path: PathBuf, source: io::Error },
    /// A limit was zero.
    InvalidLimits { reason: &'static str },
    /// Reading or duplicating the active file failed.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Create { path, source } => {
                write!(f, "failed to create log file {}: {}", path.display(), source)
            }
            SinkError::InvalidLimits { reason } => write!(f, "invalid log limits: {reason}"),
            SinkError::Io { path, source } => {
                write!(f, "I/O error on log file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Create { source, .. } => Some(source),
            SinkError::InvalidLimits { .. } => None,
            SinkError::Io { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
struct LogState {
    file: File,
    current: PathBuf,
    /// Oldest first; the back entry is always `current`.
    files: VecDeque<PathBuf>,
    message_count: u64,
    elapsed: Duration,
    last_write: Instant,
}

/// Append-only log writer bounded by file count, message count, and age.
///
/// Safe to share between tasks: one lock covers the write, the flush, the
/// counters, and any rotation or pruning that the write triggers.
#[derive(Debug)]
pub struct RotatingLog {
    dir: PathBuf,
    base_name: String,
    limits: LogLimits,
    state: Mutex<LogState>,
}

impl RotatingLog {
    /// Create the sink and its first backing file inside `dir`.
    pub fn new(
        dir: impl Into<PathBuf>,
        base_name: &str,
        limits: LogLimits,
    ) -> Result<Self, SinkError> {
        limits.validate()?;
        let dir = dir.into();
        let base_name = sanitize_base_name(base_name);
        let (file, path) = create_log_file(&dir, &base_name)?;
        tracing::debug!(file = %path.display(), "opened log file");

        let mut files = VecDeque::new();
        files.push_back(path.clone());

        Ok(Self {
            dir,
            base_name,
            limits,
            state: Mutex::new(LogState {
                file,
                current: path,
                files,
                message_count: 0,
                elapsed: Duration::ZERO,
                last_write: Instant::now(),
            }),
        })
    }

    /// Append one line, flush it, and rotate if a threshold was crossed.
    ///
    /// A trailing newline is added unless the message already ends with one.
    /// Write failures are logged; the counters still advance so a broken file
    /// gets rotated away.
    pub fn write(&self, message: &str) {
        let mut state = self.state();

        if let Err(e) = append_line(&mut state.file, message) {
            tracing::warn!(
                error = %e,
                file = %state.current.display(),
                "failed to write log message"
            );
        }

        let now = Instant::now();
        let delta = now.saturating_duration_since(state.last_write);
        state.elapsed += delta;
        state.last_write = now;
        state.message_count += 1;

        if state.message_count >= self.limits.max_messages
            || state.elapsed >= self.limits.max_duration
        {
            if let Err(e) = self.rotate_locked(&mut state) {
                tracing::warn!(
                    error = %e,
                    base = %self.base_name,
                    "log rotation failed, keeping current file"
                );
            }
        }
    }

    /// Format and write one message.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(s) => self.write(s),
            None => self.write(&args.to_string()),
        }
    }

    /// Switch to a fresh file now, pruning the oldest file if over the ceiling.
    ///
    /// On failure the current file stays active and nothing is reset.
    pub fn rotate(&self) -> Result<(), SinkError> {
        let mut state = self.state();
        self.rotate_locked(&mut state)
    }

    fn rotate_locked(&self, state: &mut LogState) -> Result<(), SinkError> {
        let (file, path) = create_log_file(&self.dir, &self.base_name)?;

        let _ = state.file.flush();
        let previous = std::mem::replace(&mut state.file, file);
        drop(previous);

        state.current = path.clone();
        state.message_count = 0;
        state.elapsed = Duration::ZERO;
        state.last_write = Instant::now();
        state.files.push_back(path);

        tracing::debug!(
            base = %self.base_name,
            file = %state.current.display(),
            files = state.files.len(),
            "rotated log file"
        );

        // One file per rotation; the ceiling is never exceeded by more.
        if state.files.len() > self.limits.max_files {
            if let Some(oldest) = state.files.pop_front() {
                match std::fs::remove_file(&oldest) {
                    Ok(()) => tracing::debug!(file = %oldest.display(), "pruned oldest log file"),
                    Err(e) => tracing::warn!(
                        error = %e,
                        file = %oldest.display(),
                        "failed to delete pruned log file"
                    ),
                }
            }
        }

        Ok(())
    }

    /// Bytes of the active file, including every write issued so far.
    pub fn current_contents(&self) -> Result<Vec<u8>, SinkError> {
        let mut state = self.state();
        let _ = state.file.flush();
        std::fs::read(&state.current).map_err(|e| SinkError::Io {
            path: state.current.clone(),
            source: e,
        })
    }

    /// Path of the active file.
    pub fn current_name(&self) -> PathBuf {
        self.state().current.clone()
    }

    /// A duplicated handle to the active file.
    pub fn current_file(&self) -> Result<File, SinkError> {
        let state = self.state();
        state.file.try_clone().map_err(|e| SinkError::Io {
            path: state.current.clone(),
            source: e,
        })
    }

    /// Every file this sink still retains, oldest first.
    pub fn files(&self) -> Vec<PathBuf> {
        self.state().files.iter().cloned().collect()
    }

    /// Messages written since the last rotation.
    pub fn message_count(&self) -> u64 {
        self.state().message_count
    }

    /// Sanitized base name used for file naming.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn limits(&self) -> LogLimits {
        self.limits
    }

    /// Delete every file this sink created. Used to unwind a failed startup.
    pub(crate) fn remove_files(&self) {
        let state = self.state();
        for path in &state.files {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(error = %e, file = %path.display(), "failed to remove log file");
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        // A panic while holding the lock cannot leave the counters unusable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn append_line(file: &mut File, message: &str) -> io::Result<()> {
    if message.ends_with('\n') {
        file.write_all(message.as_bytes())?;
    } else {
        let mut line = String::with_capacity(message.len() + 1);
        line.push_str(message);
        line.push('\n');
        file.write_all(line.as_bytes())?;
    }
    file.flush()
}

/// Create a new, never-before-used log file for `base_name` in `dir`.
fn create_log_file(dir: &Path, base_name: &str) -> Result<(File, PathBuf), SinkError> {
    let stem = format!("{base_name}_{}", Utc::now().format(STAMP_FORMAT));

    let mut last_err = None;
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}.log")
        } else {
            format!("{stem}-{attempt}.log")
        };
        let path = dir.join(name);
        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some((path, e)),
            Err(e) => return Err(SinkError::Create { path, source: e }),
        }
    }

    let (path, source) = last_err.unwrap_or_else(|| {
        (
            dir.join(format!("{stem}.log")),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free log file name"),
        )
    });
    Err(SinkError::Create { path, source })
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_base_name(name: &str) -> String {
    let cleaned = UNSAFE_NAME_CHARS.replace_all(name, "_");
    if cleaned.is_empty() {
        "log".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// Sort key for a file written for `base_name` with the given `suffix`
/// (e.g. `.log`). Returns `None` for files belonging to another base name.
///
/// The key orders files by creation time, then by collision counter.
pub fn log_file_key(file_name: &str, base_name: &str, suffix: &str) -> Option<(NaiveDateTime, u32)> {
    let rest = file_name
        .strip_prefix(base_name)?
        .strip_prefix('_')?
        .strip_suffix(suffix)?;

    // The fractional part is always nine digits, so a counter follows a '-'
    // after the last '.'.
    let (stamp, counter) = match rest.rfind('.') {
        Some(dot) => match rest[dot..].split_once('-') {
            Some((frac, n)) => (&rest[..dot + frac.len()], n.parse().ok()?),
            None => (rest, 0),
        },
        None => return None,
    };

    let parsed = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H-%M-%S%.f").ok()?;
    Some((parsed, counter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn limits(max_files: usize, max_messages: u64) -> LogLimits {
        LogLimits::new(max_files, max_messages, 3600)
    }

    fn files_on_disk(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_new_creates_first_file() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), "worker", limits(3, 10)).unwrap();

        let current = log.current_name();
        assert!(current.exists());
        let name = current.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("worker_"));
        assert!(name.ends_with(".log"));
        assert_eq!(log.files(), vec![current]);
        assert_eq!(log.message_count(), 0);
    }

    #[test]
    fn test_new_fails_in_missing_directory() {
        let err = RotatingLog::new("/nonexistent-dir/logs", "worker", limits(3, 10)).unwrap_err();
        assert!(matches!(err, SinkError::Create { .. }));
        assert!(err.to_string().contains("failed to create log file"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let dir = tempdir().unwrap();
        let err = RotatingLog::new(dir.path(), "w", limits(0, 10)).unwrap_err();
        assert!(matches!(err, SinkError::InvalidLimits { .. }));

        let err = RotatingLog::new(dir.path(), "w", limits(1, 0)).unwrap_err();
        assert!(matches!(err, SinkError::InvalidLimits { .. }));

        let err = RotatingLog::new(dir.path(), "w", LogLimits::new(1, 1, 0)).unwrap_err();
        assert!(matches!(err, SinkError::InvalidLimits { .. }));
        assert_eq!(files_on_disk(dir.path()), 0);
    }

    #[test]
    fn test_rotates_after_max_messages() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), "worker", limits(5, 3)).unwrap();

        log.write("one");
        log.write("two");
        let before = log.current_name();
        assert_eq!(log.message_count(), 2);

        log.write("three");
        assert_ne!(log.current_name(), before);
        assert_eq!(log.message_count(), 0);
        assert_eq!(log.files().len(), 2);

        // The rotated file holds all three lines; the new one is empty.
        let old = std::fs::read_to_string(&before).unwrap();
        assert_eq!(old, "one\ntwo\nthree\n");
        assert!(log.current_contents().unwrap().is_empty());
    }

    #[test]
    fn test_rotates_after_max_duration() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(
            dir.path(),
            "aged",
            LogLimits {
                max_files: 5,
                max_messages: 1000,
                max_duration: Duration::from_millis(50),
            },
        )
        .unwrap();

        let first = log.current_name();
        std::thread::sleep(Duration::from_millis(80));
        log.write("late");

        assert_ne!(log.current_name(), first);
        assert_eq!(log.message_count(), 0);
    }

    #[test]
    fn test_prunes_oldest_beyond_max_files() {
        let dir = tempdir().unwrap();
        let k = 3;
        let log = RotatingLog::new(dir.path(), "pruned", limits(k, 1)).unwrap();
        let original = log.current_name();

        // max_messages = 1: every write rotates.
        for i in 0..=k {
            log.write(&format!("message {i}"));
        }

        let files = log.files();
        assert_eq!(files.len(), k);
        assert_eq!(files_on_disk(dir.path()), k);
        assert!(!original.exists());
        assert_eq!(files.last().unwrap(), &log.current_name());
        for f in &files {
            assert!(f.exists(), "{} should be retained", f.display());
        }
    }

    #[test]
    fn test_single_file_ceiling_keeps_only_active_file() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), "solo", limits(1, 2)).unwrap();
        for i in 0..7 {
            log.write(&format!("line {i}"));
        }
        assert_eq!(log.files(), vec![log.current_name()]);
        assert_eq!(files_on_disk(dir.path()), 1);
        assert_eq!(log.current_contents().unwrap(), b"line 6\n");
    }

    #[test]
    fn test_failed_rotation_keeps_current_file() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let log = RotatingLog::new(&logs, "orphan", limits(3, 2)).unwrap();
        let current = log.current_name();

        std::fs::remove_dir_all(&logs).unwrap();

        let err = log.rotate().unwrap_err();
        assert!(matches!(err, SinkError::Create { .. }));

        log.write("a");
        log.write("b");
        log.write("c");
        assert_eq!(log.current_name(), current);
        assert_eq!(log.files(), vec![current]);
        assert_eq!(log.message_count(), 3);
    }

    #[test]
    fn test_current_contents_sees_every_write() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), "reader", limits(3, 100)).unwrap();
        log.write("first");
        log.log(format_args!("second {}", 2));
        log.write("third\n");

        let contents = String::from_utf8(log.current_contents().unwrap()).unwrap();
        assert_eq!(contents, "first\nsecond 2\nthird\n");
    }

    #[test]
    fn test_current_file_is_same_file() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), "handle", limits(3, 100)).unwrap();
        log.write("hello");

        let handle = log.current_file().unwrap();
        let meta = handle.metadata().unwrap();
        assert_eq!(meta.len(), "hello\n".len() as u64);
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let dir = tempdir().unwrap();
        let log = Arc::new(RotatingLog::new(dir.path(), "shared", limits(3, 100_000)).unwrap());

        std::thread::scope(|s| {
            for t in 0..8 {
                let log = Arc::clone(&log);
                s.spawn(move || {
                    for i in 0..100 {
                        log.write(&format!("thread-{t} message-{i} payload-payload-payload"));
                    }
                });
            }
        });

        let contents = String::from_utf8(log.current_contents().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 800);
        for line in lines {
            assert!(line.starts_with("thread-"));
            assert!(line.ends_with("payload-payload-payload"));
        }
        assert_eq!(log.message_count(), 800);
    }

    #[test]
    fn test_concurrent_rotation_respects_ceiling() {
        let dir = tempdir().unwrap();
        let log = Arc::new(RotatingLog::new(dir.path(), "busy", limits(4, 7)).unwrap());

        std::thread::scope(|s| {
            for _ in 0..4 {
                let log = Arc::clone(&log);
                s.spawn(move || {
                    for i in 0..50 {
                        log.write(&format!("line {i}"));
                    }
                });
            }
        });

        assert_eq!(log.files().len(), 4);
        assert_eq!(files_on_disk(dir.path()), 4);
        assert!(log.message_count() < 7);
    }

    #[test]
    fn test_back_to_back_sinks_get_distinct_files() {
        let dir = tempdir().unwrap();
        let a = RotatingLog::new(dir.path(), "same", limits(3, 10)).unwrap();
        let b = RotatingLog::new(dir.path(), "same", limits(3, 10)).unwrap();
        assert_ne!(a.current_name(), b.current_name());
    }

    #[test]
    fn test_sanitize_base_name() {
        assert_eq!(sanitize_base_name("miner"), "miner");
        assert_eq!(sanitize_base_name("my proc/1"), "my_proc_1");
        assert_eq!(sanitize_base_name("a.b-c_d"), "a.b-c_d");
        assert_eq!(sanitize_base_name(""), "log");
    }

    #[test]
    fn test_log_file_key_matches_own_files_only() {
        let key = log_file_key("a_2026-10-18T12-30-00.123456789.log", "a", ".log").unwrap();
        assert_eq!(key.1, 0);

        let collided = log_file_key("a_2026-10-18T12-30-00.123456789-2.log", "a", ".log").unwrap();
        assert_eq!(collided.0, key.0);
        assert_eq!(collided.1, 2);
        assert!(collided > key);

        // Another process whose name starts with "a_".
        assert!(log_file_key("a_b_2026-10-18T12-30-00.123456789.log", "a", ".log").is_none());
        assert!(log_file_key("a_2026-10-18T12-30-00.123456789.log", "a", ".log.zst").is_none());
        assert!(log_file_key("notes.log", "a", ".log").is_none());
    }

    #[test]
    fn test_log_file_key_parses_real_file_names() {
        let dir = tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), "real", limits(3, 10)).unwrap();
        let name = log.current_name();
        let name = name.file_name().unwrap().to_str().unwrap();
        assert!(log_file_key(name, "real", ".log").is_some());
    }
}
