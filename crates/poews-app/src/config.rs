//! Application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use poews_feed::{PartialLinePolicy, TailerConfig};
use poews_hub::{HubConfig, ServerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Config file used when neither `--config` nor `POEWS_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "POEWS_CONFIG";

/// Log watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Game client log file (usually `Client.txt`).
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Handling of a trailing line that has no newline yet.
    #[serde(default)]
    pub partial_lines: PartialLinePolicy,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            poll_interval_ms: default_poll_interval_ms(),
            partial_lines: PartialLinePolicy::default(),
        }
    }
}

impl From<&WatcherConfig> for TailerConfig {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            partial_lines: config.partial_lines,
        }
    }
}

/// Operator input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Broadcast lines typed on stdin.
    #[serde(default = "default_stdin")]
    pub stdin: bool,
}

fn default_stdin() -> bool {
    true
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            stdin: default_stdin(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub input: InputConfig,
    /// Shutdown deadline. Clients are still closed when it runs out.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            watcher: WatcherConfig::default(),
            hub: HubConfig::default(),
            input: InputConfig::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from an explicit path, `POEWS_CONFIG`, or the default location.
    ///
    /// Only a missing default file falls back to built-in defaults. An explicit
    /// path that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> AppResult<Self> {
        let chosen = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match chosen {
            Some(path) => {
                tracing::info!(config_path = %path.display(), "Loading configuration");
                Self::from_file(&path)
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    tracing::info!(config_path = %path.display(), "Loading configuration");
                    Self::from_file(path)
                } else {
                    tracing::warn!(
                        config_path = %path.display(),
                        "Config file not found, using defaults"
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    /// Check the settings the relay cannot start without.
    pub fn validate(&self) -> AppResult<()> {
        if self.watcher.file_path.is_none() {
            return Err(AppError::Config(
                "watcher.file_path is not set (use --file)".to_string(),
            ));
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "watcher.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.hub.intake_capacity == 0 {
            return Err(AppError::Config(
                "hub.intake_capacity must be greater than 0".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(AppError::Config(
                "server.max_connections must be greater than 0".to_string(),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(AppError::Config(format!(
                "server.ws_path must start with '/': {}",
                self.server.ws_path
            )));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
