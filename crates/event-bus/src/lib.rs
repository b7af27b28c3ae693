//! Event dispatcher for server-pushed dashboard events.
//!
//! Validates inbound events against the catalog's identifying-key contract,
//! records them in a bounded history, fans them out to typed subscribers and
//! echoes every dispatch on a broadcast channel for listeners that never
//! subscribe directly.

pub mod broadcast;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod history;
pub mod validation;

pub use broadcast::{BroadcastChannel, BroadcastSink};
pub use dispatcher::{DispatchOutcome, EventDispatcher, SubscriptionId};
pub use error::{SubscriberError, ValidationError};
pub use event::Event;
pub use history::{History, HistoryEntry};
