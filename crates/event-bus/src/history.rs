use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use gymops_protocol::{Channel, EventType};

use crate::event::Event;

/// Default number of dispatched events kept for inspection.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// A dispatched event as recorded in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub event_type: EventType,
    pub data: Value,
    pub channel: Option<Channel>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Event> for HistoryEntry {
    fn from(event: &Event) -> Self {
        Self {
            event_type: event.event_type.clone(),
            data: event.data.clone(),
            channel: event.channel,
            timestamp: event.timestamp,
        }
    }
}

/// Append-only audit trail of dispatched events.
///
/// Backed by a `VecDeque`. When full, the oldest entry is dropped on each
/// push. Iteration order is oldest → newest.
#[derive(Debug, Clone)]
pub struct History {
    buf: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    /// Creates an empty history holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "History capacity must be > 0");
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry, dropping the oldest when at capacity.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(entry);
    }

    /// The newest `limit` entries, optionally restricted to one event type,
    /// ordered oldest → newest.
    pub fn recent(&self, event_type: Option<&EventType>, limit: usize) -> Vec<HistoryEntry> {
        let mut out: Vec<HistoryEntry> = self
            .buf
            .iter()
            .rev()
            .filter(|e| event_type.is_none_or(|t| &e.event_type == t))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.buf.iter()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
