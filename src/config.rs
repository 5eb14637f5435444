//! Orchestrator configuration.
//!
//! Loaded from a TOML file; a missing file yields the defaults so a bare
//! deployment needs no config at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Orchestrator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of the durable session registry file.
    #[serde(default = "default_sessions_file")]
    pub sessions_file: PathBuf,

    /// Path of the in-flight generation ledger file.
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,

    /// Path of the externally written restart snapshot file.
    #[serde(default = "default_restart_file")]
    pub restart_file: PathBuf,

    /// How long to collect rapid-fire messages before dispatching one
    /// combined prompt.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Minimum spacing between partial-answer projections.
    #[serde(default = "default_partial_edit_interval_ms")]
    pub partial_edit_interval_ms: u64,

    /// Idle time after which a live agent connection is torn down.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    /// Interval between idle sweeps.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Hard deadline for one generation.
    #[serde(default = "default_generation_timeout_seconds")]
    pub generation_timeout_seconds: u64,

    /// Model name passed to the agent when the options provider sets none.
    #[serde(default)]
    pub model: Option<String>,

    /// Text prepended to the first prompt of a brand-new session.
    #[serde(default)]
    pub new_session_preamble: Option<String>,
}

fn default_sessions_file() -> PathBuf {
    PathBuf::from("courier-sessions.json")
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from(".active-generations.json")
}

fn default_restart_file() -> PathBuf {
    PathBuf::from(".restart-state.json")
}

fn default_batch_window_ms() -> u64 {
    1500
}

fn default_partial_edit_interval_ms() -> u64 {
    2000
}

fn default_idle_timeout_seconds() -> u64 {
    300
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_generation_timeout_seconds() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_file: default_sessions_file(),
            ledger_file: default_ledger_file(),
            restart_file: default_restart_file(),
            batch_window_ms: default_batch_window_ms(),
            partial_edit_interval_ms: default_partial_edit_interval_ms(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            generation_timeout_seconds: default_generation_timeout_seconds(),
            model: None,
            new_session_preamble: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&contents)?)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn partial_edit_interval(&self) -> Duration {
        Duration::from_millis(self.partial_edit_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }
}
