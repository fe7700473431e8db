use clap::{Parser, Subcommand};
use overseer::config::{self, AgentConfig};
use overseer::log_dir::LogDir;
use overseer::{archive, manifest, signals, status};
use overseer::{LogLimits, LogSettings, RunMode, Supervisor};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Host-resident agent that keeps a manifest of child processes running and
/// their logs inside a bounded disk budget.
#[derive(Parser, Debug)]
#[command(name = "overseer", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file path
    #[arg(short, long, default_value = "overseer.toml")]
    config: PathBuf,

    /// Process manifest (overrides config)
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Log directory (overrides config)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Per-process timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervise the manifest until SIGINT/SIGTERM (default)
    Run,
    /// Run a single batch and report the outcome of every process
    Once {
        /// Run processes one at a time, ignoring the configured mode
        #[arg(long)]
        sequential: bool,
    },
    /// Validate config and manifest, print the resolved settings, don't run
    Check,
    /// List the log files of a process, oldest first
    Logs {
        /// Process name as it appears in the manifest
        name: String,
    },
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Once { sequential } => once(&config, sequential).await,
        Command::Check => check(&config),
        Command::Logs { name } => {
            list_logs(&config, &name);
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "overseer failed");
            ExitCode::FAILURE
        }
    }
}

/// Load the config file and apply CLI overrides.
fn load_config(cli: &Cli) -> Result<AgentConfig, config::ConfigError> {
    let mut config = AgentConfig::load(&cli.config)?;
    if let Some(manifest) = &cli.manifest {
        config.supervisor.manifest = manifest.clone();
    }
    if let Some(dir) = &cli.log_dir {
        config.logging.dir = dir.clone();
    }
    if let Some(secs) = cli.timeout {
        config.supervisor.process_timeout_secs = Some(secs);
    }
    config.validate()?;
    Ok(config)
}

fn log_settings(config: &AgentConfig) -> Result<LogSettings, config::ConfigError> {
    Ok(LogSettings {
        dir: config.logging.dir.clone(),
        process_limits: config.process_limits()?,
        event_limits: config.event_limits()?,
    })
}

/// Build a supervisor with observers from config.
fn build_supervisor(config: &AgentConfig, mode: RunMode) -> Result<Supervisor, BoxError> {
    let settings = log_settings(config)?;
    let timeout = config
        .supervisor
        .process_timeout_secs
        .map(Duration::from_secs);

    let mut supervisor = Supervisor::from_manifest(&config.supervisor.manifest, &settings)?
        .with_mode(mode)
        .with_timeout(timeout);

    if let Some(path) = config.status_file() {
        supervisor.add_observer(Box::new(status::StatusWriter::new(path)));
    }
    if config.archive.enabled {
        supervisor.add_observer(Box::new(archive::Archiver::new(
            &config.archive.dir,
            config.archive.keep,
            config.archive.level,
        )));
    }
    Ok(supervisor)
}

async fn run(config: &AgentConfig) -> Result<ExitCode, BoxError> {
    let log_dir = LogDir::new(&config.logging.dir);
    log_dir.init()?;
    let lock = log_dir.acquire_lock()?;
    tracing::debug!(lock = %lock.path().display(), "holding singleton lock");

    let shutdown = signals::install()?;
    let mut supervisor =
        build_supervisor(config, config.supervisor.mode)?.with_shutdown(shutdown);

    tracing::info!(
        manifest = %config.supervisor.manifest.display(),
        processes = supervisor.processes().len(),
        mode = ?supervisor.mode(),
        "overseer starting"
    );

    let batches = supervisor
        .supervise(config.restart_policy(), config.supervisor.max_batches)
        .await;
    tracing::info!(batches, "overseer exiting");
    Ok(ExitCode::SUCCESS)
}

async fn once(config: &AgentConfig, sequential: bool) -> Result<ExitCode, BoxError> {
    let log_dir = LogDir::new(&config.logging.dir);
    log_dir.init()?;
    let _lock = log_dir.acquire_lock()?;

    let mode = if sequential {
        RunMode::Sequential
    } else {
        config.supervisor.mode
    };
    let shutdown = signals::install()?;
    let mut supervisor = build_supervisor(config, mode)?.with_shutdown(shutdown);

    // A single-batch supervise notifies the status writer and archiver too.
    supervisor.supervise(config.restart_policy(), Some(1)).await;
    let results = supervisor.results();

    for result in &results {
        println!(
            "{:<20} {:>8.3}s  {}",
            result.name(),
            result.duration.as_secs_f64(),
            result.outcome
        );
    }
    let failed = results.iter().filter(|r| !r.succeeded()).count();
    println!("{} processes, {failed} failed", results.len());

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(config: &AgentConfig) -> Result<ExitCode, BoxError> {
    let specs = manifest::load(&config.supervisor.manifest)?;
    let settings = log_settings(config)?;

    println!("manifest: {}", config.supervisor.manifest.display());
    for spec in &specs {
        println!("  {:<20} {}", spec.name, spec.command_line());
    }
    println!("mode: {:?}", config.supervisor.mode);
    match config.supervisor.process_timeout_secs {
        Some(secs) => println!("process timeout: {secs}s"),
        None => println!("process timeout: none"),
    }
    println!("log dir: {}", settings.dir.display());
    print_limits("process logs", &settings.process_limits);
    print_limits("event log", &settings.event_limits);
    println!(
        "restart: {:?}, delay {}s, max {}s",
        config.restart.policy, config.restart.delay_secs, config.restart.max_delay_secs
    );
    match config.status_file() {
        Some(path) => println!("status file: {}", path.display()),
        None => println!("status file: disabled"),
    }
    if config.archive.enabled {
        println!(
            "archive: {} (keep {}, level {})",
            config.archive.dir.display(),
            config.archive.keep,
            config.archive.level
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_limits(label: &str, limits: &LogLimits) {
    println!(
        "{label}: {} files, {} messages, {}s",
        limits.max_files,
        limits.max_messages,
        limits.max_duration.as_secs()
    );
}

fn list_logs(config: &AgentConfig, name: &str) {
    let files = LogDir::new(&config.logging.dir).list_logs(name);
    if files.is_empty() {
        eprintln!(
            "no log files for {name:?} in {}",
            config.logging.dir.display()
        );
    }
    for path in files {
        println!("{}", path.display());
    }
}
