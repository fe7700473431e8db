/// Process manifest: a flat JSON object mapping process names to command lines.
///
/// ```json
/// { "healthcheck": "/bin/sh /opt/agent/healthcheck.sh" }
/// ```
///
/// Command lines are split on whitespace: the first token is the executable and
/// the rest are passed through verbatim. There is no quoting or escaping.
/// Key order in the file is preserved.
use crate::rotating_log::sanitize_base_name;
use crate::supervisor::EVENT_LOG_NAME;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// One manifest entry, split into executable and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub executable: String,
    pub arguments: Vec<String>,
}

impl ProcessSpec {
    /// Split a command line into executable and arguments.
    pub fn parse(name: &str, command: &str) -> Result<Self, ManifestError> {
        if name.trim().is_empty() {
            return Err(ManifestError::Entry {
                name: name.to_string(),
                reason: "process name is empty",
            });
        }

        let mut tokens = command.split_whitespace().map(str::to_string);
        let executable = tokens.next().ok_or_else(|| ManifestError::Entry {
            name: name.to_string(),
            reason: "command is empty",
        })?;

        Ok(Self {
            name: name.to_string(),
            executable,
            arguments: tokens.collect(),
        })
    }

    /// The command re-joined with single spaces, for display.
    pub fn command_line(&self) -> String {
        let mut line = self.executable.clone();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Errors produced while loading a manifest.
#[derive(Debug)]
pub enum ManifestError {
    /// The manifest file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The contents are not a flat JSON object of strings.
    Json(serde_json::Error),
    /// An individual entry is unusable.
    Entry { name: String, reason: &'static str },
}

impl ManifestError {
    /// True for read failures, false for structural (parse) failures.
    pub fn is_read(&self) -> bool {
        matches!(self, ManifestError::Read { .. })
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Read { path, source } => {
                write!(f, "failed to read manifest {}: {}", path.display(), source)
            }
            ManifestError::Json(e) => write!(f, "invalid manifest: {e}"),
            ManifestError::Entry { name, reason } => {
                write!(f, "invalid manifest entry {name:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Read { source, .. } => Some(source),
            ManifestError::Json(e) => Some(e),
            ManifestError::Entry { .. } => None,
        }
    }
}

/// Read and parse the manifest at `path`.
pub fn load(path: &Path) -> Result<Vec<ProcessSpec>, ManifestError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let specs = parse(&contents)?;
    tracing::debug!(path = %path.display(), processes = specs.len(), "loaded manifest");
    Ok(specs)
}

/// Parse manifest JSON into process specs, in file order.
pub fn parse(contents: &str) -> Result<Vec<ProcessSpec>, ManifestError> {
    let entries: OrderedEntries = serde_json::from_str(contents).map_err(ManifestError::Json)?;

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(entries.0.len());
    for (name, command) in entries.0 {
        if !seen.insert(name.clone()) {
            return Err(ManifestError::Entry {
                name,
                reason: "duplicate process name",
            });
        }
        specs.push(ProcessSpec::parse(&name, &command)?);
    }
    check_log_names(&specs)?;
    Ok(specs)
}

/// Every process needs its own log base name, distinct from the event log's.
///
/// Names are sanitized for the file system, so `"a b"` and `"a_b"` would
/// otherwise share files.
pub fn check_log_names(specs: &[ProcessSpec]) -> Result<(), ManifestError> {
    let mut bases = HashSet::new();
    for spec in specs {
        let base = sanitize_base_name(&spec.name);
        if base == EVENT_LOG_NAME {
            return Err(ManifestError::Entry {
                name: spec.name.clone(),
                reason: "log file name is reserved for the supervisor event log",
            });
        }
        if !bases.insert(base) {
            return Err(ManifestError::Entry {
                name: spec.name.clone(),
                reason: "log file name collides with another process",
            });
        }
    }
    Ok(())
}

/// A JSON object of string values, keeping key order and duplicate keys so
/// that both can be checked.
struct OrderedEntries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping process names to command strings")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, command)) = map.next_entry::<String, String>()? {
                    entries.push((name, command));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
