//! Player configuration with persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mpv::default_ipc_path;

const CONFIG_DIR_NAME: &str = "mpvlink";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid config file: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Player configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// IPC socket/pipe path (None = platform default).
  #[serde(default)]
  pub socket_path: Option<String>,

  /// Connection attempts after spawning MPV.
  #[serde(default = "default_connect_retries")]
  pub connect_retries: u32,

  /// Wait before the first connection attempt, in milliseconds.
  #[serde(default = "default_startup_delay_ms")]
  pub startup_delay_ms: u64,

  /// How long a correlated request waits for its response.
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,

  /// Per-subscriber event buffer.
  #[serde(default = "default_event_buffer")]
  pub event_buffer: usize,

  /// Restart attempts after a crash.
  #[serde(default = "default_restart_attempts")]
  pub restart_attempts: u32,

  /// Log every message and event.
  #[serde(default)]
  pub verbose: bool,

  /// Log player errors and restart progress.
  #[serde(default)]
  pub debug: bool,

  /// Properties observed after every (re)start.
  #[serde(default = "default_observe")]
  pub observe: Vec<String>,
}

fn default_connect_retries() -> u32 {
  10
}

fn default_startup_delay_ms() -> u64 {
  500
}

fn default_request_timeout_secs() -> u64 {
  5
}

fn default_event_buffer() -> usize {
  crate::mpv::DEFAULT_EVENT_BUFFER_SIZE
}

fn default_restart_attempts() -> u32 {
  1
}

fn default_observe() -> Vec<String> {
  ["pause", "volume", "mute", "time-pos"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for PlayerConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      socket_path: None,
      connect_retries: default_connect_retries(),
      startup_delay_ms: default_startup_delay_ms(),
      request_timeout_secs: default_request_timeout_secs(),
      event_buffer: default_event_buffer(),
      restart_attempts: default_restart_attempts(),
      verbose: false,
      debug: false,
      observe: default_observe(),
    }
  }
}

impl PlayerConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.connect_retries == 0 {
      return Err(ConfigError::Invalid(
        "Connect retries must be at least 1".to_string(),
      ));
    }
    if self.event_buffer == 0 {
      return Err(ConfigError::Invalid(
        "Event buffer must be at least 1".to_string(),
      ));
    }
    if self.request_timeout_secs < 1 || self.request_timeout_secs > 300 {
      return Err(ConfigError::Invalid(
        "Request timeout must be between 1 and 300 seconds".to_string(),
      ));
    }
    if self.restart_attempts == 0 {
      return Err(ConfigError::Invalid(
        "Restart attempts must be at least 1".to_string(),
      ));
    }
    if self.observe.iter().any(|name| name.trim().is_empty()) {
      return Err(ConfigError::Invalid(
        "Observed property names cannot be empty".to_string(),
      ));
    }
    Ok(())
  }

  /// Read and validate a JSON config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
  }

  /// Load from the default location, falling back to defaults when the file
  /// does not exist.
  pub fn load_or_default() -> Result<Self, ConfigError> {
    match Self::default_path() {
      Some(path) if path.exists() => {
        log::info!("Loading config from {}", path.display());
        Self::load(&path)
      }
      _ => {
        log::info!("No config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  /// Write the config as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }

  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
  }

  pub fn ipc_path(&self) -> String {
    self
      .socket_path
      .clone()
      .filter(|s| !s.is_empty())
      .unwrap_or_else(default_ipc_path)
  }

  pub fn mpv_path(&self) -> Option<PathBuf> {
    self
      .mpv_path
      .as_ref()
      .filter(|s| !s.is_empty())
      .map(PathBuf::from)
  }
}
