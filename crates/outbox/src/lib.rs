//! Outbound delivery queue.
//!
//! Buffers commands that could not be sent because their channel was
//! unavailable, orders them by priority and age, evicts within a fixed
//! capacity, mirrors high-priority entries to durable storage, and replays
//! them once the channel is back.

pub mod error;
pub mod queue;
pub mod store;
pub mod types;

pub use error::{SendError, StoreError};
pub use queue::DeliveryQueue;
pub use store::{DurableStore, FileStore, MemoryStore};
pub use types::{PersistedCommand, QueueConfig, QueuedCommand, Replay, ReplayReport};
