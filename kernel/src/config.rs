// Service Configuration
//
// Startup settings for the collector server and the drain job.
// Loaded from JSON and/or command-line overrides, read once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LOG_FILE: &str = "emails.json";
pub const DEFAULT_BACKUP_DIR: &str = "email-backups";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where accepted submissions go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Append to a single log file on every submission.
    Direct,

    /// Hold in memory until drained into snapshots.
    #[default]
    Buffered,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Direct => f.write_str("direct"),
            StorageMode::Buffered => f.write_str("buffered"),
        }
    }
}

impl FromStr for StorageMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(StorageMode::Direct),
            "buffered" => Ok(StorageMode::Buffered),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown storage mode `{0}` (expected `direct` or `buffered`)")]
    UnknownMode(String),

    #[error("a scheduler secret is required in buffered mode")]
    MissingSecret,

    #[error("a drain endpoint is required")]
    MissingEndpoint,

    #[error("drain endpoint must start with http:// or https://, got `{0}`")]
    InvalidEndpoint(String),

    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Collector server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub mode: StorageMode,
    pub secret: Option<String>,
    pub log_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mode: StorageMode::default(),
            secret: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == StorageMode::Buffered && blank(self.secret.as_deref()) {
            return Err(ConfigError::MissingSecret);
        }
        Ok(())
    }
}

/// Drain job settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Base URL of the collector, e.g. `https://collector.example.com`.
    pub endpoint: Option<String>,
    pub secret: Option<String>,
    pub backup_dir: PathBuf,
    pub request_timeout_secs: u64,
    /// Seconds between drains when looping. `None` drains once.
    pub interval_secs: Option<u64>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            secret: None,
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            interval_secs: None,
        }
    }
}

impl DrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
        }

        if blank(self.secret.as_deref()) {
            return Err(ConfigError::MissingSecret);
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(|s| Duration::from_secs(s.max(1)))
    }
}

/// Load a JSON config file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
