//! Configuration management for rssdigest.
//!
//! Configuration is read from `~/.config/rssdigest/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::changelog::DEFAULT_BATCH_SIZE;
use crate::fetcher::http_fetcher::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::pipeline::DEFAULT_WORKERS;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub sync: SyncConfig,
}

/// Where the database and the subscription outline live.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
    pub outline_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub workers: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Change-log replication settings. Replication stays off until a seed
/// phrase, user id and device id are set; pushing and pulling additionally
/// need a relay url and token.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub relay_url: Option<String>,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub token: Option<String>,
    pub seed_phrase: Option<String>,
    pub auto_sync: bool,
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            user_id: None,
            device_id: None,
            token: None,
            seed_phrase: None,
            auto_sync: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SyncConfig {
    /// `(seed_phrase, user_id, device_id)` when all three are set.
    pub fn identity(&self) -> Option<(&str, &str, &str)> {
        Some((
            present(&self.seed_phrase)?,
            present(&self.user_id)?,
            present(&self.device_id)?,
        ))
    }

    /// `(relay_url, token)` when both are set.
    pub fn relay(&self) -> Option<(&str, &str)> {
        Some((present(&self.relay_url)?, present(&self.token)?))
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load from an explicit path, creating the default file if missing.
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/rssdigest/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("rssdigest").join("config.toml"))
    }

    /// Default data directory: `~/.local/share/rssdigest`
    pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("rssdigest"))
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::default_data_dir()?.join("rssdigest.db")),
        }
    }

    pub fn outline_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.outline_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::default_data_dir()?.join("feeds.opml")),
        }
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        format!(
            r##"# rssdigest configuration
#
# Paths default to the platform data directory
# (~/.local/share/rssdigest on Linux).

[storage]
# db_path = "/path/to/rssdigest.db"
# outline_path = "/path/to/feeds.opml"

[fetch]
# Feeds fetched concurrently during a full sync
workers = {workers}

# Per-request timeout in seconds
timeout_secs = {timeout}

# user_agent = "{agent}"

[sync]
# Cross-device replication. Every device of one user shares the seed
# phrase and user id; each device needs its own device id.
# relay_url = "https://relay.example.com/api"
# token = ""
# user_id = ""
# device_id = ""
# seed_phrase = ""

# Push each local change as soon as it is recorded
auto_sync = false

# Records per push/pull request
batch_size = {batch}
"##,
            workers = DEFAULT_WORKERS,
            timeout = DEFAULT_TIMEOUT_SECS,
            agent = DEFAULT_USER_AGENT,
            batch = DEFAULT_BATCH_SIZE,
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
