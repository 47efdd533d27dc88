use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::playback::PlaybackSettings;
use crate::schedule::SyncPolicy;

const APP_DIR: &str = "podder";

/// Settings read from `config.toml`; every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Where data lives on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/podder.db`
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Defaults to `<data_dir>/downloads`
    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_periodic_hours")]
    pub periodic_hours: u64,
    #[serde(default = "default_stale_minutes")]
    pub stale_minutes: u64,
    #[serde(default = "default_retry_minutes")]
    pub retry_minutes: u64,
    #[serde(default = "default_new_episode_window_hours")]
    pub new_episode_window_hours: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadsConfig {
    /// Finished downloads are deleted this long after being finished
    #[serde(default = "default_expire_after_hours")]
    pub expire_after_hours: u64,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_seek_back_secs")]
    pub seek_back_secs: u64,
    #[serde(default = "default_seek_forward_secs")]
    pub seek_forward_secs: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            downloads_dir: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            periodic_hours: default_periodic_hours(),
            stale_minutes: default_stale_minutes(),
            retry_minutes: default_retry_minutes(),
            new_episode_window_hours: default_new_episode_window_hours(),
        }
    }
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            expire_after_hours: default_expire_after_hours(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            tick_millis: default_tick_millis(),
            seek_back_secs: default_seek_back_secs(),
            seek_forward_secs: default_seek_forward_secs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_periodic_hours() -> u64 {
    6
}

fn default_stale_minutes() -> u64 {
    60
}

fn default_retry_minutes() -> u64 {
    15
}

fn default_new_episode_window_hours() -> u64 {
    24
}

fn default_expire_after_hours() -> u64 {
    24
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_tick_millis() -> u64 {
    1_000
}

fn default_seek_back_secs() -> u64 {
    5
}

fn default_seek_forward_secs() -> u64 {
    15
}

/// `$XDG_CONFIG_HOME/podder/config.toml` or the platform equivalent
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// used if present, otherwise all defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("podder.db"))
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.paths
            .downloads_dir
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("downloads"))
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            periodic_interval: hours(self.sync.periodic_hours),
            stale_after: minutes(self.sync.stale_minutes),
            retry_after: minutes(self.sync.retry_minutes),
        }
    }

    pub fn new_episode_window(&self) -> Duration {
        hours(self.sync.new_episode_window_hours)
    }

    pub fn expire_after(&self) -> Duration {
        hours(self.downloads.expire_after_hours)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.downloads.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.downloads.read_timeout_secs)
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            heartbeat_interval: Duration::from_secs(self.playback.heartbeat_secs),
            tick_interval: Duration::from_millis(self.playback.tick_millis.max(1)),
            seek_back: Duration::from_secs(self.playback.seek_back_secs),
            seek_forward: Duration::from_secs(self.playback.seek_forward_secs),
        }
    }
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60 * 60))
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}
