/// Process supervisor: loads a manifest and runs every process in it, either
/// all at once or one after another, optionally forever.
///
/// Each process writes into its own rotating log. Supervisor-level events go to
/// a separate rotating log (`overseer_*.log`) that is handed to every run
/// explicitly. A failing or hanging process never stops the others from
/// running or being reported.
use crate::manifest::{self, ManifestError, ProcessSpec};
use crate::process::{
    run_process, stamped, ProcessDescriptor, ProcessResult, RunOptions, RunOutcome, RunRecord,
};
use crate::restart::RestartPolicy;
use crate::rotating_log::{LogLimits, RotatingLog, SinkError};
use crate::signals::Shutdown;
use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Base name of the supervisor's own event log.
pub const EVENT_LOG_NAME: &str = "overseer";

/// Where logs go and how they are bounded.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub process_limits: LogLimits,
    pub event_limits: LogLimits,
}

/// How one batch runs its processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One task per process, joined before returning.
    #[default]
    Concurrent,
    /// One process at a time, in manifest order.
    Sequential,
}

/// Receives every completed batch from [`Supervisor::supervise`].
pub trait BatchObserver: Send + Sync {
    fn batch_completed(&self, batch: u64, results: &[ProcessResult]);
}

/// Errors that prevent a supervisor from being built.
#[derive(Debug)]
pub enum SupervisorError {
    /// The manifest could not be read or parsed.
    Manifest(ManifestError),
    /// A per-process log could not be created.
    LogSinkInit { name: String, source: SinkError },
    /// The supervisor event log could not be created.
    EventLogInit(SinkError),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Manifest(e) => write!(f, "{e}"),
            SupervisorError::LogSinkInit { name, source } => {
                write!(f, "failed to initialize log for process {name:?}: {source}")
            }
            SupervisorError::EventLogInit(e) => {
                write!(f, "failed to initialize supervisor event log: {e}")
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Manifest(e) => Some(e),
            SupervisorError::LogSinkInit { source, .. } => Some(source),
            SupervisorError::EventLogInit(e) => Some(e),
        }
    }
}

pub struct Supervisor {
    processes: Vec<ProcessDescriptor>,
    events: Arc<RotatingLog>,
    options: RunOptions,
    mode: RunMode,
    shutdown: Shutdown,
    observers: Vec<Box<dyn BatchObserver>>,
}

impl Supervisor {
    /// Load the manifest at `path` and create a log for every process in it.
    ///
    /// All or nothing: if any log cannot be created, files already created
    /// for this supervisor are removed and an error is returned.
    pub fn from_manifest(path: &Path, logs: &LogSettings) -> Result<Self, SupervisorError> {
        let specs = manifest::load(path).map_err(SupervisorError::Manifest)?;
        let supervisor = Self::from_specs(specs, logs)?;
        supervisor.events.write(&stamped(format_args!(
            "[overseer] loaded {} processes from {}",
            supervisor.processes.len(),
            path.display()
        )));
        Ok(supervisor)
    }

    /// Build from already-parsed specs.
    pub fn from_specs(specs: Vec<ProcessSpec>, logs: &LogSettings) -> Result<Self, SupervisorError> {
        manifest::check_log_names(&specs).map_err(SupervisorError::Manifest)?;
        let events = RotatingLog::new(&logs.dir, EVENT_LOG_NAME, logs.event_limits)
            .map_err(SupervisorError::EventLogInit)?;

        let mut processes: Vec<ProcessDescriptor> = Vec::with_capacity(specs.len());
        for spec in specs {
            match RotatingLog::new(&logs.dir, &spec.name, logs.process_limits) {
                Ok(log) => processes.push(ProcessDescriptor::new(spec, log)),
                Err(source) => {
                    for descriptor in &processes {
                        descriptor.log().remove_files();
                    }
                    events.remove_files();
                    return Err(SupervisorError::LogSinkInit {
                        name: spec.name,
                        source,
                    });
                }
            }
        }

        tracing::info!(
            processes = processes.len(),
            log_dir = %logs.dir.display(),
            "supervisor initialized"
        );

        Ok(Self {
            processes,
            events: Arc::new(events),
            options: RunOptions::default(),
            mode: RunMode::default(),
            shutdown: Shutdown::never(),
            observers: Vec::new(),
        })
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Kill any process that runs longer than `limit`.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.options.max_runtime = limit;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn BatchObserver>) {
        self.observers.push(observer);
    }

    pub fn processes(&self) -> &[ProcessDescriptor] {
        &self.processes
    }

    pub fn event_log(&self) -> &Arc<RotatingLog> {
        &self.events
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Results of the most recent run of every process that has run.
    pub fn results(&self) -> Vec<ProcessResult> {
        self.processes.iter().filter_map(ProcessDescriptor::result).collect()
    }

    /// Run one batch in the configured mode.
    pub async fn run_batch(&mut self) -> Vec<ProcessResult> {
        match self.mode {
            RunMode::Concurrent => self.run_concurrent().await,
            RunMode::Sequential => self.run_sequential().await,
        }
    }

    /// Run every process one at a time in manifest order.
    pub async fn run_sequential(&mut self) -> Vec<ProcessResult> {
        let total = self.processes.len();
        self.events.write(&stamped(format_args!(
            "[overseer] executing {total} processes in series"
        )));

        for descriptor in &mut self.processes {
            let record = run_process(
                descriptor.spec(),
                descriptor.log(),
                &self.events,
                &self.options,
                self.shutdown.clone(),
            )
            .await;
            descriptor.record(record);
        }

        self.finish_batch("synchronously")
    }

    /// Run every process as its own task and wait for all of them.
    ///
    /// Results come back in manifest order, not completion order.
    pub async fn run_concurrent(&mut self) -> Vec<ProcessResult> {
        let total = self.processes.len();
        self.events.write(&stamped(format_args!(
            "[overseer] executing {total} processes concurrently"
        )));

        let handles: Vec<_> = self
            .processes
            .iter()
            .map(|descriptor| {
                let spec = Arc::clone(descriptor.spec());
                let log = Arc::clone(descriptor.log());
                let events = Arc::clone(&self.events);
                let options = self.options.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    run_process(&spec, &log, &events, &options, shutdown).await
                })
            })
            .collect();

        for (descriptor, handle) in self.processes.iter_mut().zip(handles) {
            let record = match handle.await {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(name = %descriptor.spec().name, error = %e, "process task failed");
                    let now = Utc::now();
                    RunRecord {
                        start: now,
                        end: now,
                        outcome: RunOutcome::WaitFailed {
                            error: e.to_string(),
                        },
                    }
                }
            };
            descriptor.record(record);
        }

        self.finish_batch("concurrently")
    }

    fn finish_batch(&self, how: &str) -> Vec<ProcessResult> {
        let results = self.results();
        let failed = results.iter().filter(|r| !r.succeeded()).count();
        self.events.write(&stamped(format_args!(
            "[overseer] {} processes finished executing {how}, {failed} failed",
            results.len()
        )));
        results
    }

    /// Keep the manifest's processes running: run a batch, wait the restart
    /// delay, repeat.
    ///
    /// Returns the number of batches run once shutdown is requested or
    /// `max_batches` is reached. Without either it never returns.
    pub async fn supervise(&mut self, mut policy: RestartPolicy, max_batches: Option<u64>) -> u64 {
        let mut batch = 0u64;
        tracing::info!(mode = ?self.mode, processes = self.processes.len(), "supervising");

        while !self.shutdown.is_requested() {
            batch += 1;
            let results = self.run_batch().await;
            let failed = results.iter().filter(|r| !r.succeeded()).count();
            tracing::info!(batch, processes = results.len(), failed, "batch completed");

            for observer in &self.observers {
                observer.batch_completed(batch, &results);
            }

            if max_batches.is_some_and(|max| batch >= max) || self.shutdown.is_requested() {
                break;
            }

            let delay = policy.next_delay(failed == 0);
            if delay.is_zero() {
                // Keeps an empty or instantly-exiting batch from starving the runtime.
                tokio::task::yield_now().await;
                continue;
            }

            self.events.write(&stamped(format_args!(
                "[overseer] restarting in {}s",
                delay.as_secs()
            )));
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.requested() => break,
            }
        }

        self.events.write(&stamped(format_args!(
            "[overseer] supervision stopped after {batch} batches"
        )));
        tracing::info!(batches = batch, "supervision stopped");
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restart::BackoffKind;
    use crate::signals;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    fn settings(dir: &Path) -> LogSettings {
        LogSettings {
            dir: dir.to_path_buf(),
            process_limits: LogLimits::new(5, 1000, 3600),
            event_limits: LogLimits::new(5, 1000, 3600),
        }
    }

    fn write_manifest(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("processes.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn logs_dir(dir: &TempDir) -> PathBuf {
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        logs
    }

    fn contents(log: &RotatingLog) -> String {
        String::from_utf8(log.current_contents().unwrap()).unwrap()
    }

    fn outcomes(results: &[ProcessResult]) -> Vec<(&str, bool)> {
        results.iter().map(|r| (r.name(), r.succeeded())).collect()
    }

    #[derive(Clone, Default)]
    struct Recorder {
        batches: Arc<Mutex<Vec<(u64, usize)>>>,
    }

    impl BatchObserver for Recorder {
        fn batch_completed(&self, batch: u64, results: &[ProcessResult]) {
            self.batches.lock().unwrap().push((batch, results.len()));
        }
    }

    #[test]
    fn test_construct_creates_descriptors_in_order() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(
            &dir,
            r#"{"healthcheck": "/bin/sh /opt/check.sh", "greeter": "/bin/echo hello world"}"#,
        );
        let logs = logs_dir(&dir);

        let supervisor = Supervisor::from_manifest(&manifest, &settings(&logs)).unwrap();
        let processes = supervisor.processes();
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].spec().name, "healthcheck");
        assert_eq!(processes[1].spec().executable, "/bin/echo");
        assert_eq!(processes[1].spec().arguments, vec!["hello", "world"]);
        assert!(processes.iter().all(|p| p.last_run().is_none()));
        assert!(supervisor.results().is_empty());

        // One file per process plus the event log.
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 3);
        assert!(contents(supervisor.event_log()).contains("loaded 2 processes"));
    }

    #[test]
    fn test_construct_missing_manifest() {
        let dir = tempdir().unwrap();
        let err = Supervisor::from_manifest(&dir.path().join("missing.json"), &settings(dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, SupervisorError::Manifest(ref e) if e.is_read()));
    }

    #[test]
    fn test_construct_invalid_manifest() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"a": 42}"#);
        let logs = logs_dir(&dir);
        let err = Supervisor::from_manifest(&manifest, &settings(&logs)).err().unwrap();
        assert!(matches!(err, SupervisorError::Manifest(ref e) if !e.is_read()));
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);
    }

    #[test]
    fn test_construct_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let too_long = "x".repeat(300);
        let manifest = write_manifest(
            &dir,
            &format!(r#"{{"ok": "/bin/true", "{too_long}": "/bin/true"}}"#),
        );
        let logs = logs_dir(&dir);

        let err = Supervisor::from_manifest(&manifest, &settings(&logs)).err().unwrap();
        match err {
            SupervisorError::LogSinkInit { name, .. } => assert_eq!(name, too_long),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);
    }

    #[test]
    fn test_construct_rejects_bad_process_limits() {
        let dir = tempdir().unwrap();
        let logs = logs_dir(&dir);
        let mut settings = settings(&logs);
        settings.process_limits.max_files = 0;

        let specs = vec![ProcessSpec::parse("a", "/bin/true").unwrap()];
        let err = Supervisor::from_specs(specs, &settings).err().unwrap();
        assert!(matches!(err, SupervisorError::LogSinkInit { .. }));
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);
    }

    #[test]
    fn test_construct_rejects_shared_log_names() {
        let dir = tempdir().unwrap();
        let logs = logs_dir(&dir);
        let specs = vec![
            ProcessSpec::parse("a b", "/bin/true").unwrap(),
            ProcessSpec::parse("a_b", "/bin/true").unwrap(),
        ];
        let err = Supervisor::from_specs(specs, &settings(&logs)).err().unwrap();
        assert!(matches!(err, SupervisorError::Manifest(ManifestError::Entry { .. })));

        let specs = vec![ProcessSpec::parse(EVENT_LOG_NAME, "/bin/true").unwrap()];
        assert!(Supervisor::from_specs(specs, &settings(&logs)).is_err());
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);
    }

    #[test]
    fn test_construct_event_log_failure() {
        let specs = vec![ProcessSpec::parse("a", "/bin/true").unwrap()];
        let err = Supervisor::from_specs(specs, &settings(Path::new("/nonexistent/logs")))
            .err()
            .unwrap();
        assert!(matches!(err, SupervisorError::EventLogInit(_)));
    }

    const MIXED: &str = r#"{
        "first": "/bin/sh -c exit",
        "second": "/bin/sh -c false",
        "third": "/bin/echo third"
    }"#;

    #[tokio::test]
    async fn test_sequential_completes_batch_despite_failure() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, MIXED);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let results = supervisor.run_sequential().await;
        assert_eq!(
            outcomes(&results),
            vec![("first", true), ("second", false), ("third", true)]
        );
        assert_eq!(results[1].outcome, RunOutcome::Exited { code: 1 });
        for pair in results.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[tokio::test]
    async fn test_concurrent_completes_batch_despite_failure() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, MIXED);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let results = supervisor.run_concurrent().await;
        assert_eq!(
            outcomes(&results),
            vec![("first", true), ("second", false), ("third", true)]
        );
        let events = contents(supervisor.event_log());
        assert!(events.contains("3 processes finished executing concurrently, 1 failed"));
    }

    #[tokio::test]
    async fn test_spawn_failure_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(
            &dir,
            r#"{"missing": "/nonexistent/binary", "fine": "/bin/echo ok"}"#,
        );
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let sequential = supervisor.run_sequential().await;
        let concurrent = supervisor.run_concurrent().await;
        for results in [sequential, concurrent] {
            assert_eq!(outcomes(&results), vec![("missing", false), ("fine", true)]);
            assert!(matches!(results[0].outcome, RunOutcome::SpawnFailed { .. }));
        }
    }

    #[tokio::test]
    async fn test_concurrent_echo_scenario() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"echo1": "/bin/echo A", "echo2": "/bin/echo B"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let results = supervisor.run_concurrent().await;
        assert_eq!(outcomes(&results), vec![("echo1", true), ("echo2", true)]);

        for (result, expected) in results.iter().zip(["A", "B"]) {
            assert!(result.end >= result.start);
            let out = contents(&result.log);
            assert!(out.lines().any(|l| l == expected), "missing output in {out}");
            assert!(out.contains(&format!("starting {}", result.name())));
            assert!(out.contains(&format!("{} exited successfully", result.name())));
        }
    }

    #[tokio::test]
    async fn test_concurrent_results_in_manifest_order() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"slow": "sleep 0.3", "fast": "true"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let results = supervisor.run_concurrent().await;
        assert_eq!(outcomes(&results), vec![("slow", true), ("fast", true)]);
        assert!(results[1].end < results[0].end);
    }

    #[tokio::test]
    async fn test_concurrent_runs_overlap() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(
            &dir,
            r#"{"a": "sleep 1", "b": "sleep 1", "c": "sleep 1"}"#,
        );
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let started = Instant::now();
        let results = supervisor.run_concurrent().await;
        assert_eq!(results.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_hung_process_times_out_without_blocking_others() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"hang": "sleep 30", "quick": "/bin/echo hi"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir)))
            .unwrap()
            .with_timeout(Some(Duration::from_millis(300)));

        let started = Instant::now();
        let results = supervisor.run_concurrent().await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(results[0].outcome, RunOutcome::TimedOut { .. }));
        assert!(results[1].succeeded());
    }

    #[tokio::test]
    async fn test_repeated_runs_reuse_descriptors_and_logs() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"echo": "/bin/echo again"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();

        let first = supervisor.run_sequential().await;
        let count_after_first = first[0].log.message_count();
        let file_after_first = first[0].log.current_name();

        let second = supervisor.run_sequential().await;
        assert!(Arc::ptr_eq(&first[0].log, &second[0].log));
        assert!(Arc::ptr_eq(&second[0].log, supervisor.processes()[0].log()));
        assert_eq!(second[0].log.current_name(), file_after_first);
        assert_eq!(second[0].log.message_count(), count_after_first * 2);

        let out = contents(&second[0].log);
        assert_eq!(out.lines().filter(|l| *l == "again").count(), 2);
        assert!(second[0].start >= first[0].end);
    }

    #[tokio::test]
    async fn test_repeated_runs_continue_rotation_state() {
        let dir = tempdir().unwrap();
        let logs = logs_dir(&dir);
        let mut settings = settings(&logs);
        // start + output + end = 3 messages per run; rotate every 4.
        settings.process_limits = LogLimits::new(10, 4, 3600);
        let manifest = write_manifest(&dir, r#"{"echo": "/bin/echo x"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings).unwrap();

        supervisor.run_sequential().await;
        let log = Arc::clone(supervisor.processes()[0].log());
        assert_eq!(log.message_count(), 3);
        assert_eq!(log.files().len(), 1);

        supervisor.run_sequential().await;
        // The 4th message rotated; two more landed in the new file.
        assert_eq!(log.files().len(), 2);
        assert_eq!(log.message_count(), 2);
    }

    #[tokio::test]
    async fn test_supervise_runs_max_batches_and_notifies_observers() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"a": "true", "b": "false"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();
        let recorder = Recorder::default();
        supervisor.add_observer(Box::new(recorder.clone()));

        let batches = supervisor.supervise(RestartPolicy::immediate(), Some(3)).await;
        assert_eq!(batches, 3);
        assert_eq!(*recorder.batches.lock().unwrap(), vec![(1, 2), (2, 2), (3, 2)]);

        let out = contents(supervisor.processes()[0].log());
        assert_eq!(out.matches("starting a").count(), 3);
    }

    #[tokio::test]
    async fn test_supervise_sequential_mode() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"a": "true"}"#);
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir)))
            .unwrap()
            .with_mode(RunMode::Sequential);

        assert_eq!(supervisor.supervise(RestartPolicy::immediate(), Some(2)).await, 2);
        assert!(contents(supervisor.event_log()).contains("executing 1 processes in series"));
    }

    #[tokio::test]
    async fn test_supervise_empty_manifest_still_yields() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, "{}");
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir))).unwrap();
        assert_eq!(supervisor.supervise(RestartPolicy::immediate(), Some(5)).await, 5);
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_batch() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"long": "sleep 30"}"#);
        let (trigger, shutdown) = signals::channel();
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir)))
            .unwrap()
            .with_shutdown(shutdown);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger();
        });

        let started = Instant::now();
        let batches = supervisor.supervise(RestartPolicy::immediate(), None).await;
        assert_eq!(batches, 1);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(supervisor.results()[0].outcome, RunOutcome::Cancelled);
        assert!(contents(supervisor.event_log()).contains("supervision stopped after 1 batches"));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_restart_delay() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"{"a": "true"}"#);
        let (trigger, shutdown) = signals::channel();
        let mut supervisor = Supervisor::from_manifest(&manifest, &settings(&logs_dir(&dir)))
            .unwrap()
            .with_shutdown(shutdown);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.trigger();
        });

        let started = Instant::now();
        let policy = RestartPolicy::new(BackoffKind::Fixed, 60, 60);
        let batches = supervisor.supervise(policy, None).await;
        assert_eq!(batches, 1);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(contents(supervisor.event_log()).contains("restarting in 60s"));
    }
}
