use crate::log_dir::LogDir;
use crate::restart::{BackoffKind, RestartPolicy};
use crate::rotating_log::LogLimits;
use crate::supervisor::RunMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from overseer.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub supervisor: SupervisorConfig,
    pub restart: RestartConfig,
    pub logging: LoggingConfig,
    pub status: StatusConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub manifest: PathBuf,
    pub mode: RunMode,
    pub process_timeout_secs: Option<u64>,
    pub max_batches: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub policy: BackoffKind,
    pub delay_secs: u64,
    pub max_delay_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    /// How aggressively logs are pruned, 0 (keep most) to 3 (keep least).
    pub volatility: u8,
    pub max_files: Option<usize>,
    pub max_messages: Option<u64>,
    pub max_duration_secs: Option<u64>,
    pub events: EventLogConfig,
}

/// Limits for the supervisor's own event log.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub max_files: usize,
    pub max_messages: u64,
    pub max_duration_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    /// Defaults to `status.json` inside the log directory.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub keep: usize,
    pub level: i32,
}

// --- Default implementations ---

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("processes.json"),
            mode: RunMode::Concurrent,
            process_timeout_secs: None,
            max_batches: None,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: BackoffKind::Fixed,
            delay_secs: 0,
            max_delay_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            volatility: 0,
            max_files: None,
            max_messages: None,
            max_duration_secs: None,
            events: EventLogConfig::default(),
        }
    }
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_messages: 50_000,
            max_duration_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("archive"),
            keep: 5,
            level: 3,
        }
    }
}

/// (max_files, max_messages, max_duration_secs) per volatility level.
const VOLATILITY_PRESETS: [(usize, u64, u64); 4] = [
    (10, 50_000, 7 * 24 * 3600),
    (5, 20_000, 2 * 24 * 3600),
    (3, 5_000, 12 * 3600),
    (1, 1_000, 3600),
];

impl AgentConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if usize::from(self.logging.volatility) >= VOLATILITY_PRESETS.len() {
            return Err(ConfigError::Invalid(format!(
                "logging.volatility must be 0-{}, got {}",
                VOLATILITY_PRESETS.len() - 1,
                self.logging.volatility
            )));
        }
        if self.restart.max_delay_secs < self.restart.delay_secs {
            return Err(ConfigError::Invalid(format!(
                "restart.max_delay_secs ({}) is less than restart.delay_secs ({})",
                self.restart.max_delay_secs, self.restart.delay_secs
            )));
        }
        if self.supervisor.process_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "supervisor.process_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.archive.keep == 0 {
            return Err(ConfigError::Invalid(
                "archive.keep must be greater than 0".to_string(),
            ));
        }
        self.process_limits()?;
        self.event_limits()?;
        Ok(())
    }

    /// Limits for per-process sinks: the volatility preset with explicit overrides applied.
    pub fn process_limits(&self) -> Result<LogLimits, ConfigError> {
        let logging = &self.logging;
        let (files, messages, secs) = VOLATILITY_PRESETS
            .get(usize::from(logging.volatility))
            .copied()
            .ok_or_else(|| {
                ConfigError::Invalid(format!("unknown volatility level {}", logging.volatility))
            })?;
        checked_limits(
            "logging",
            logging.max_files.unwrap_or(files),
            logging.max_messages.unwrap_or(messages),
            logging.max_duration_secs.unwrap_or(secs),
        )
    }

    pub fn event_limits(&self) -> Result<LogLimits, ConfigError> {
        let events = &self.logging.events;
        checked_limits(
            "logging.events",
            events.max_files,
            events.max_messages,
            events.max_duration_secs,
        )
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(
            self.restart.policy,
            self.restart.delay_secs,
            self.restart.max_delay_secs,
        )
    }

    /// Where the status snapshot goes, if enabled.
    pub fn status_file(&self) -> Option<PathBuf> {
        if !self.status.enabled {
            return None;
        }
        Some(
            self.status
                .file
                .clone()
                .unwrap_or_else(|| LogDir::new(&self.logging.dir).status()),
        )
    }
}

fn checked_limits(
    section: &str,
    max_files: usize,
    max_messages: u64,
    max_duration_secs: u64,
) -> Result<LogLimits, ConfigError> {
    if max_files == 0 || max_messages == 0 || max_duration_secs == 0 {
        return Err(ConfigError::Invalid(format!(
            "{section}: max_files, max_messages and max_duration_secs must all be greater than 0"
        )));
    }
    Ok(LogLimits::new(max_files, max_messages, max_duration_secs))
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse(e) => write!(f, "failed to parse config: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}
