//! Public types for the delivery queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gymops_protocol::{Channel, Priority};

/// A command waiting for its channel to come back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedCommand {
    pub id: String,
    pub command: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub channel: Channel,
    pub priority: Priority,
    /// Insertion order; final tie-break when timestamps collide.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl QueuedCommand {
    /// Sort key: priority rank, then age, then insertion order.
    pub(crate) fn order_key(&self) -> (u8, DateTime<Utc>, u64) {
        (self.priority.rank(), self.enqueued_at, self.seq)
    }

    /// Age key ignoring priority.
    pub(crate) fn age_key(&self) -> (DateTime<Utc>, u64) {
        (self.enqueued_at, self.seq)
    }
}

/// On-disk layout of one mirrored high-priority command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCommand {
    pub id: String,
    pub event_name: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp_ms: i64,
    pub channel: Channel,
    pub priority: Priority,
}

impl From<&QueuedCommand> for PersistedCommand {
    fn from(cmd: &QueuedCommand) -> Self {
        Self {
            id: cmd.id.clone(),
            event_name: cmd.command.clone(),
            payload: cmd.payload.clone(),
            timestamp_ms: cmd.enqueued_at.timestamp_millis(),
            channel: cmd.channel,
            priority: cmd.priority,
        }
    }
}

/// Limits for the delivery queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of buffered commands.
    pub capacity: usize,
    /// Maximum number of high-priority commands mirrored to storage.
    pub persist_capacity: usize,
    /// Persisted commands older than this are discarded on restore.
    pub stale_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            persist_capacity: 20,
            stale_after: Duration::from_secs(60 * 60),
        }
    }
}

/// What the replay callback did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Handed to the transport; drop from the queue.
    Sent,
    /// Not for this replay (e.g. another channel); keep it buffered.
    Skipped,
}

/// Counters from one [`DeliveryQueue::replay`](crate::DeliveryQueue::replay) pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}
