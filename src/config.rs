use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Tunables for activity inference and storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quiet period before an agent falls back to idle
    pub quiet_period_ms: u64,
    /// Inserted characters above which an edit counts as agent writing
    pub large_edit_threshold: usize,
    /// Path components marking plan artifacts
    pub planning_markers: Vec<String>,
    /// Files treated as plan artifacts when under a planning marker
    pub artifact_glob: String,
    /// Files written by the agent's internal tools
    pub internal_logs_glob: String,
    /// Path component of the internal tool log directory
    pub internal_logs_marker: String,
    /// Path components of version-control metadata
    pub vcs_markers: Vec<String>,
    /// Directories watched in addition to the workspace
    pub watch_roots: Vec<PathBuf>,
    /// Workspace state file; defaults to one per workspace in the data dir
    pub state_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quiet_period_ms: 3000,
            large_edit_threshold: 50,
            planning_markers: vec![".gemini".to_string(), "brain".to_string()],
            artifact_glob: "**/*.md".to_string(),
            internal_logs_glob: "**/.system_generated/**".to_string(),
            internal_logs_marker: ".system_generated".to_string(),
            vcs_markers: vec![".git".to_string()],
            watch_roots: Vec::new(),
            state_file: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agent-pulse").join("config.toml"))
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}
