//! Error types for the dispatcher.

use gymops_protocol::EventType;

/// Error a subscriber callback may return; logged, never propagated.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Why an inbound event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{event} payload is missing required key `{key}`")]
    MissingKey { event: EventType, key: &'static str },

    #[error("{event} payload must be a JSON object to carry `{key}`")]
    NotAnObject { event: EventType, key: &'static str },
}
