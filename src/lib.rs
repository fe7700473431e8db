//! overseer: a host-resident process supervisor with bounded rotating logs.
//!
//! - **manifest**: the JSON process list
//! - **rotating_log**: size/age bounded log sinks
//! - **process**: running one child and recording its outcome
//! - **supervisor**: batches, restart loop, observers
//! - **status** / **archive**: observers that publish each batch
//!
//! ```ignore
//! use overseer::{LogLimits, LogSettings, RestartPolicy, Supervisor};
//!
//! let settings = LogSettings {
//!     dir: "logs".into(),
//!     process_limits: LogLimits::new(10, 50_000, 604_800),
//!     event_limits: LogLimits::new(10, 50_000, 604_800),
//! };
//! let mut supervisor = Supervisor::from_manifest("processes.json".as_ref(), &settings)?;
//! for result in supervisor.run_concurrent().await {
//!     println!("{}: {}", result.name(), result.outcome);
//! }
//! ```

pub mod archive;
pub mod config;
pub mod log_dir;
pub mod manifest;
pub mod process;
pub mod restart;
pub mod rotating_log;
pub mod signals;
pub mod status;
pub mod supervisor;

pub use manifest::ProcessSpec;
pub use process::{ProcessResult, RunOutcome};
pub use restart::{BackoffKind, RestartPolicy};
pub use rotating_log::{LogLimits, RotatingLog, SinkError};
pub use supervisor::{BatchObserver, LogSettings, RunMode, Supervisor, SupervisorError};
