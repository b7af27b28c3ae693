//! Realtime layer configuration.
//!
//! Stored as camelCase JSON, by default at
//! `~/.config/gymops/realtime.json`. Every field is optional in the file;
//! environment variables override endpoints and the storage directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gymops_event_bus::history::DEFAULT_HISTORY_CAPACITY;
use gymops_outbox::QueueConfig;
use gymops_protocol::Channel;

use crate::error::{ConfigError, RealtimeError};
use crate::types::{ReconnectConfig, sanitize_factor};

/// WebSocket URL per channel. `None` means the channel is not deployed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub schedule: Option<String>,
    pub member: Option<String>,
    pub identity: Option<String>,
}

impl Endpoints {
    pub fn get(&self, channel: Channel) -> Option<&str> {
        let url = match channel {
            Channel::Schedule => &self.schedule,
            Channel::Member => &self.member,
            Channel::Identity => &self.identity,
        };
        url.as_deref().filter(|u| !u.trim().is_empty())
    }

    pub fn set(&mut self, channel: Channel, url: Option<String>) {
        let slot = match channel {
            Channel::Schedule => &mut self.schedule,
            Channel::Member => &mut self.member,
            Channel::Identity => &mut self.identity,
        };
        *slot = url;
    }

    /// Checks that the mandatory channel is present and every configured
    /// URL is a WebSocket URL.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        for channel in Channel::ALL {
            match self.get(channel) {
                None if channel.is_mandatory() => {
                    return Err(RealtimeError::MissingEndpoint(channel));
                }
                None => {}
                Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => {}
                Some(url) => {
                    return Err(RealtimeError::InvalidEndpoint {
                        channel,
                        url: url.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Delivery queue settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub limits: QueueConfig,
    /// Directory for the durable mirror. `None` keeps the queue in memory.
    pub storage_dir: Option<PathBuf>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            limits: QueueConfig::default(),
            storage_dir: None,
        }
    }
}

/// Everything the connection manager needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub endpoints: Endpoints,
    pub reconnect: ReconnectConfig,
    pub queue: QueueSettings,
    pub history_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            reconnect: ReconnectConfig::default(),
            queue: QueueSettings::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ReconnectFile {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    backoff_factor: f64,
    max_attempts: u32,
    jitter: f64,
    connect_timeout_ms: u64,
}

impl Default for ReconnectFile {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectFile {
    fn from(c: &ReconnectConfig) -> Self {
        Self {
            initial_delay_ms: c.initial_delay.as_millis() as u64,
            max_delay_ms: c.max_delay.as_millis() as u64,
            backoff_factor: c.backoff_factor,
            max_attempts: c.max_attempts,
            jitter: c.jitter,
            connect_timeout_ms: c.connect_timeout.as_millis() as u64,
        }
    }
}

impl From<ReconnectFile> for ReconnectConfig {
    fn from(f: ReconnectFile) -> Self {
        Self {
            initial_delay: Duration::from_millis(f.initial_delay_ms),
            max_delay: Duration::from_millis(f.max_delay_ms),
            backoff_factor: sanitize_factor(f.backoff_factor),
            max_attempts: f.max_attempts.max(1),
            jitter: f.jitter.clamp(0.0, 1.0),
            connect_timeout: Duration::from_millis(f.connect_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QueueFile {
    capacity: usize,
    persist_capacity: usize,
    stale_after_secs: u64,
    storage_dir: Option<PathBuf>,
}

impl Default for QueueFile {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for QueueFile {
    fn from(q: &QueueSettings) -> Self {
        Self {
            capacity: q.limits.capacity,
            persist_capacity: q.limits.persist_capacity,
            stale_after_secs: q.limits.stale_after.as_secs(),
            storage_dir: q.storage_dir.clone(),
        }
    }
}

impl From<QueueFile> for QueueSettings {
    fn from(f: QueueFile) -> Self {
        Self {
            limits: QueueConfig {
                capacity: f.capacity.max(1),
                persist_capacity: f.persist_capacity,
                stale_after: Duration::from_secs(f.stale_after_secs),
            },
            storage_dir: f.storage_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigFile {
    endpoints: Endpoints,
    reconnect: ReconnectFile,
    queue: QueueFile,
    history_capacity: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for ConfigFile {
    fn from(c: &RealtimeConfig) -> Self {
        Self {
            endpoints: c.endpoints.clone(),
            reconnect: ReconnectFile::from(&c.reconnect),
            queue: QueueFile::from(&c.queue),
            history_capacity: c.history_capacity,
        }
    }
}

impl From<ConfigFile> for RealtimeConfig {
    fn from(f: ConfigFile) -> Self {
        Self {
            endpoints: f.endpoints,
            reconnect: f.reconnect.into(),
            queue: f.queue.into(),
            history_capacity: f.history_capacity.max(1),
        }
    }
}

impl RealtimeConfig {
    /// Loads configuration from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<ConfigFile>(content).map(Self::from)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&ConfigFile::from(self))
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = self.to_json().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Overlays `GYMOPS_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        for (channel, name) in [
            (Channel::Schedule, "GYMOPS_SCHEDULE_URL"),
            (Channel::Member, "GYMOPS_MEMBER_URL"),
            (Channel::Identity, "GYMOPS_IDENTITY_URL"),
        ] {
            if let Some(url) = var(name) {
                debug!(%channel, "endpoint overridden from {name}");
                self.endpoints.set(channel, Some(url));
            }
        }
        if let Some(dir) = var("GYMOPS_STORAGE_DIR") {
            self.queue.storage_dir = Some(PathBuf::from(dir));
        }
    }
}

/// `<config dir>/gymops/realtime.json`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    config_dir()
        .map(|d| d.join("gymops").join("realtime.json"))
        .ok_or(ConfigError::NoConfigDir)
}

/// `<config dir>/gymops/storage`, used for the queue mirror when no
/// directory is configured.
pub fn default_storage_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("gymops").join("storage"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
