//! Error types for the delivery queue.

/// Errors from a durable store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A replayed command could not be handed to its transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("send failed: {0}")]
pub struct SendError(pub String);

impl SendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
