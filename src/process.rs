/// One supervised process: its manifest entry, its output log, and the
/// statistics of its most recent run.
///
/// A run spawns the executable in its own process group, streams stdout and
/// stderr into the process's rotating log as they are produced, and waits for
/// exit.
/// An optional maximum runtime and the agent-wide shutdown signal both kill the
/// whole group.
use crate::manifest::ProcessSpec;
use crate::rotating_log::RotatingLog;
use crate::signals::Shutdown;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The process exited on its own.
    Exited { code: i32 },
    /// The process was terminated by a signal.
    Signaled { signal: Option<i32> },
    /// The executable could not be started.
    SpawnFailed { error: String },
    /// Waiting on the child failed, or the task running it died.
    WaitFailed { error: String },
    /// The process outlived its maximum runtime and was killed.
    TimedOut { after_secs: u64 },
    /// Shutdown was requested before or during the run.
    Cancelled,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Exited { code: 0 })
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => RunOutcome::Exited { code },
            None => RunOutcome::Signaled {
                signal: status.signal(),
            },
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Exited { code: 0 } => write!(f, "exited successfully"),
            RunOutcome::Exited { code } => write!(f, "exited with status {code}"),
            RunOutcome::Signaled { signal: Some(sig) } => write!(f, "killed by signal {sig}"),
            RunOutcome::Signaled { signal: None } => write!(f, "killed by signal"),
            RunOutcome::SpawnFailed { error } => write!(f, "failed to start: {error}"),
            RunOutcome::WaitFailed { error } => write!(f, "lost track of process: {error}"),
            RunOutcome::TimedOut { after_secs } => {
                write!(f, "timed out after {after_secs}s and was killed")
            }
            RunOutcome::Cancelled => write!(f, "cancelled by shutdown"),
        }
    }
}

/// Timing and outcome of one completed run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub outcome: RunOutcome,
}

impl RunRecord {
    /// `end - start`, never negative.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Knobs applied to every run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the process group once a run has lasted this long.
    pub max_runtime: Option<Duration>,
}

/// The supervisor's record for one manifest entry.
#[derive(Debug)]
pub struct ProcessDescriptor {
    spec: Arc<ProcessSpec>,
    log: Arc<RotatingLog>,
    last_run: Option<RunRecord>,
}

impl ProcessDescriptor {
    pub fn new(spec: ProcessSpec, log: RotatingLog) -> Self {
        Self {
            spec: Arc::new(spec),
            log: Arc::new(log),
            last_run: None,
        }
    }

    pub fn spec(&self) -> &Arc<ProcessSpec> {
        &self.spec
    }

    pub fn log(&self) -> &Arc<RotatingLog> {
        &self.log
    }

    pub fn last_run(&self) -> Option<&RunRecord> {
        self.last_run.as_ref()
    }

    pub(crate) fn record(&mut self, record: RunRecord) {
        self.last_run = Some(record);
    }

    /// Snapshot of the last run, if any run has completed.
    pub fn result(&self) -> Option<ProcessResult> {
        let run = self.last_run.as_ref()?;
        Some(ProcessResult {
            spec: Arc::clone(&self.spec),
            start: run.start,
            end: run.end,
            duration: run.duration(),
            outcome: run.outcome.clone(),
            log: Arc::clone(&self.log),
        })
    }
}

/// What a batch hands back for each process.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub spec: Arc<ProcessSpec>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: RunOutcome,
    /// The process's output log, for reading current contents.
    pub log: Arc<RotatingLog>,
}

impl ProcessResult {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn executable(&self) -> &str {
        &self.spec.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.spec.arguments
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }
}

/// Prefix a supervisor line with an RFC 3339 UTC timestamp.
pub(crate) fn stamped(args: fmt::Arguments<'_>) -> String {
    format!(
        "{} {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        args
    )
}

/// Run `spec` to completion, recording start/end lines in both `log` and
/// `events`. Never fails: every problem becomes part of the returned outcome.
pub async fn run_process(
    spec: &ProcessSpec,
    log: &RotatingLog,
    events: &RotatingLog,
    options: &RunOptions,
    mut shutdown: Shutdown,
) -> RunRecord {
    let start = Utc::now();

    let outcome = if shutdown.is_requested() {
        RunOutcome::Cancelled
    } else {
        let line = stamped(format_args!(
            "[overseer] starting {}: {}",
            spec.name,
            spec.command_line()
        ));
        log.write(&line);
        events.write(&line);
        tracing::info!(name = %spec.name, command = %spec.command_line(), "starting process");

        execute(spec, log, options, &mut shutdown).await
    };

    let record = RunRecord {
        start,
        end: Utc::now(),
        outcome,
    };
    let duration = record.duration();

    let line = stamped(format_args!(
        "[overseer] {} {} after {:.3}s",
        spec.name,
        record.outcome,
        duration.as_secs_f64()
    ));
    log.write(&line);
    events.write(&line);

    if record.outcome.succeeded() {
        tracing::info!(name = %spec.name, duration_secs = duration.as_secs(), "process exited successfully");
    } else {
        tracing::warn!(
            name = %spec.name,
            outcome = %record.outcome,
            duration_secs = duration.as_secs(),
            "process failed"
        );
    }

    record
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

async fn execute(
    spec: &ProcessSpec,
    log: &RotatingLog,
    options: &RunOptions,
    shutdown: &mut Shutdown,
) -> RunOutcome {
    let mut child = match Command::new(&spec.executable)
        .args(&spec.arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0) // New process group for clean kill
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return RunOutcome::SpawnFailed {
                error: e.to_string(),
            }
        }
    };

    let pid = child.id();
    tracing::debug!(name = %spec.name, pid, "process spawned");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finish = {
        let drain_and_wait = async {
            tokio::join!(pump_lines(stdout, log), pump_lines(stderr, log));
            child.wait().await
        };
        tokio::pin!(drain_and_wait);

        tokio::select! {
            status = &mut drain_and_wait => Finish::Exited(status),
            after = deadline(options.max_runtime) => Finish::TimedOut(after),
            () = shutdown.requested() => Finish::Cancelled,
        }
    };

    match finish {
        Finish::Exited(Ok(status)) => RunOutcome::from_status(status),
        Finish::Exited(Err(e)) => RunOutcome::WaitFailed {
            error: e.to_string(),
        },
        Finish::TimedOut(after) => {
            kill_group(pid);
            let _ = child.wait().await;
            RunOutcome::TimedOut {
                after_secs: after.as_secs(),
            }
        }
        Finish::Cancelled => {
            kill_group(pid);
            let _ = child.wait().await;
            RunOutcome::Cancelled
        }
    }
}

/// Largest message taken from a child's output. Longer lines are split.
const MAX_CHUNK: usize = 8 * 1024;

/// How long an unterminated line may sit in the buffer before it is written anyway.
const PARTIAL_LINE_FLUSH: Duration = Duration::from_millis(200);

/// Copy `stream` into `log` until EOF, one message per line.
///
/// Output without a trailing newline (progress prompts, a final partial line)
/// is written once the child goes quiet for [`PARTIAL_LINE_FLUSH`], and
/// buffered output never grows past [`MAX_CHUNK`] before being written.
async fn pump_lines<R>(stream: Option<R>, log: &RotatingLog)
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else { return };
    let mut buf = vec![0u8; MAX_CHUNK];
    let mut pending: Vec<u8> = Vec::with_capacity(MAX_CHUNK);

    loop {
        let read = if pending.is_empty() {
            stream.read(&mut buf).await
        } else {
            // `read` is cancel safe, so timing out loses nothing.
            match tokio::time::timeout(PARTIAL_LINE_FLUSH, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    flush_partial(&mut pending, log);
                    continue;
                }
            }
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                write_complete_lines(&mut pending, log);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read process output");
                break;
            }
        }
    }

    flush_partial(&mut pending, log);
}

/// Write every newline-terminated line in `pending`, then any full-size chunks.
fn write_complete_lines(pending: &mut Vec<u8>, log: &RotatingLog) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        write_output(&line, log);
    }
    while pending.len() >= MAX_CHUNK {
        let chunk: Vec<u8> = pending.drain(..MAX_CHUNK).collect();
        write_output(&chunk, log);
    }
}

fn flush_partial(pending: &mut Vec<u8>, log: &RotatingLog) {
    if !pending.is_empty() {
        write_output(pending, log);
        pending.clear();
    }
}

fn write_output(bytes: &[u8], log: &RotatingLog) {
    let text = String::from_utf8_lossy(bytes);
    log.write(text.trim_end_matches(['\n', '\r']));
}

/// Resolve after `limit`, or never.
async fn deadline(limit: Option<Duration>) -> Duration {
    match limit {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

/// SIGKILL the process group led by `pid`.
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pid, "killed process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "failed to kill process group"),
    }
}
