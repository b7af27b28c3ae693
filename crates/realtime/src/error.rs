use std::path::PathBuf;

use gymops_protocol::Channel;

/// Errors returned by [`ConnectionManager::connect`](crate::ConnectionManager::connect).
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("no endpoint configured for mandatory channel `{0}`")]
    MissingEndpoint(Channel),

    #[error("invalid endpoint for channel `{channel}`: {url}")]
    InvalidEndpoint { channel: Channel, url: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors loading a [`RealtimeConfig`](crate::RealtimeConfig) file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config directory not found")]
    NoConfigDir,
}
