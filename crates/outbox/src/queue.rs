//! The delivery queue itself.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use gymops_protocol::constants::OUTBOX_STORAGE_KEY;
use gymops_protocol::{Channel, Priority};

use crate::error::{SendError, StoreError};
use crate::store::DurableStore;
use crate::types::{PersistedCommand, QueueConfig, QueuedCommand, Replay, ReplayReport};

#[derive(Debug, Default)]
struct QueueInner {
    /// Always sorted by [`QueuedCommand::order_key`].
    entries: Vec<QueuedCommand>,
    next_seq: u64,
    evicted: u64,
}

/// Bounded outbound buffer ordered by priority then age.
///
/// All operations are synchronous and never fail: storage problems are
/// logged and the queue carries on memory-only.
pub struct DeliveryQueue {
    inner: Mutex<QueueInner>,
    /// Held for a whole replay pass so passes never interleave.
    replay_lock: Mutex<()>,
    store: Option<Arc<dyn DurableStore>>,
    config: QueueConfig,
}

impl DeliveryQueue {
    /// Creates a memory-only queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            replay_lock: Mutex::new(()),
            store: None,
            config,
        }
    }

    /// Creates a queue backed by durable storage and restores any
    /// high-priority commands that are still fresh.
    pub fn with_store(config: QueueConfig, store: Arc<dyn DurableStore>) -> Self {
        let queue = Self {
            inner: Mutex::new(QueueInner::default()),
            replay_lock: Mutex::new(()),
            store: Some(store),
            config,
        };
        queue.restore(Utc::now());
        queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Buffers a command and returns its id.
    pub fn enqueue(
        &self,
        command: impl Into<String>,
        payload: Value,
        channel: Channel,
        priority: Priority,
    ) -> String {
        let command = command.into();
        let id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        debug!(%id, %command, %channel, %priority, "queueing command");
        let cmd = QueuedCommand {
            id: id.clone(),
            command,
            payload,
            enqueued_at: Utc::now(),
            channel,
            priority,
            seq,
        };
        let evicted = self.insert_locked(&mut inner, cmd);
        let evicted_high = evicted.is_some_and(|e| e.priority == Priority::High);
        if priority == Priority::High || evicted_high {
            self.persist_locked(&inner);
        }
        id
    }

    /// Drains the buffer in priority/age order through `send`.
    ///
    /// [`Replay::Sent`] removes the command, [`Replay::Skipped`] keeps it,
    /// and an error re-enqueues it with its original priority and age, so a
    /// command is delivered at least once but may be delivered twice.
    ///
    /// Passes are serialized: a second `replay` waits for the first to put
    /// back what it kept. `send` may enqueue but must not replay this queue.
    pub fn replay<F>(&self, send: F) -> ReplayReport
    where
        F: FnMut(&QueuedCommand) -> Result<Replay, SendError>,
    {
        self.replay_where(|_| true, send)
    }

    /// Like [`replay`](Self::replay), restricted to one channel. Commands
    /// for other channels stay in the buffer for the whole pass.
    pub fn replay_channel<F>(&self, channel: Channel, send: F) -> ReplayReport
    where
        F: FnMut(&QueuedCommand) -> Result<Replay, SendError>,
    {
        self.replay_where(|cmd| cmd.channel == channel, send)
    }

    fn replay_where<P, F>(&self, wanted: P, mut send: F) -> ReplayReport
    where
        P: Fn(&QueuedCommand) -> bool,
        F: FnMut(&QueuedCommand) -> Result<Replay, SendError>,
    {
        let _pass = self
            .replay_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // The entry lock is released while `send` runs so it may enqueue.
        let drained: Vec<QueuedCommand> = {
            let mut inner = self.lock();
            let (drained, rest) = std::mem::take(&mut inner.entries)
                .into_iter()
                .partition(|cmd| wanted(cmd));
            inner.entries = rest;
            drained
        };
        if drained.is_empty() {
            return ReplayReport::default();
        }

        let mut report = ReplayReport::default();
        let mut keep = Vec::new();
        let mut high_sent = false;
        for cmd in drained {
            match send(&cmd) {
                Ok(Replay::Sent) => {
                    report.sent += 1;
                    high_sent |= cmd.priority == Priority::High;
                }
                Ok(Replay::Skipped) => {
                    report.skipped += 1;
                    keep.push(cmd);
                }
                Err(e) => {
                    warn!(
                        id = %cmd.id,
                        command = %cmd.command,
                        channel = %cmd.channel,
                        error = %e,
                        "replay failed, re-queueing"
                    );
                    report.failed += 1;
                    keep.push(cmd);
                }
            }
        }

        let mut inner = self.lock();
        let mut evicted_high = false;
        for cmd in keep {
            if let Some(e) = self.insert_locked(&mut inner, cmd) {
                evicted_high |= e.priority == Priority::High;
            }
        }
        if high_sent || evicted_high {
            self.persist_locked(&inner);
        }

        if report.sent > 0 || report.failed > 0 {
            info!(
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                remaining = inner.entries.len(),
                "replayed queued commands"
            );
        }
        report
    }

    /// Copy of the buffered commands in delivery order.
    pub fn snapshot(&self) -> Vec<QueuedCommand> {
        self.lock().entries.clone()
    }

    /// Number of buffered commands.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of commands dropped by capacity eviction since creation.
    pub fn evicted_total(&self) -> u64 {
        self.lock().evicted
    }

    /// Drops every buffered command and the durable mirror.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        if let Some(store) = &self.store
            && let Err(e) = store.remove(OUTBOX_STORAGE_KEY)
        {
            warn!(error = %e, "failed to clear persisted commands");
        }
        debug!("delivery queue cleared");
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts in order and enforces capacity. Returns the evicted command.
    fn insert_locked(
        &self,
        inner: &mut QueueInner,
        cmd: QueuedCommand,
    ) -> Option<QueuedCommand> {
        let pos = inner
            .entries
            .partition_point(|e| e.order_key() <= cmd.order_key());
        inner.entries.insert(pos, cmd);

        if inner.entries.len() <= self.config.capacity {
            return None;
        }
        let idx = eviction_index(&inner.entries)?;
        let evicted = inner.entries.remove(idx);
        inner.evicted += 1;
        warn!(
            id = %evicted.id,
            command = %evicted.command,
            priority = %evicted.priority,
            capacity = self.config.capacity,
            "delivery queue full, evicted command"
        );
        Some(evicted)
    }

    /// Rewrites the durable mirror with the newest high-priority commands.
    fn persist_locked(&self, inner: &QueueInner) {
        let Some(store) = &self.store else {
            return;
        };

        let mut high: Vec<&QueuedCommand> = inner
            .entries
            .iter()
            .filter(|c| c.priority == Priority::High)
            .collect();
        high.sort_by_key(|c| c.age_key());
        let skip = high.len().saturating_sub(self.config.persist_capacity);
        let records: Vec<PersistedCommand> =
            high.into_iter().skip(skip).map(PersistedCommand::from).collect();

        let result = if records.is_empty() {
            store.remove(OUTBOX_STORAGE_KEY)
        } else {
            serde_json::to_string(&records)
                .map_err(StoreError::from)
                .and_then(|json| store.save(OUTBOX_STORAGE_KEY, &json))
        };
        match result {
            Ok(()) => debug!(count = records.len(), "mirrored high-priority commands"),
            Err(e) => warn!(error = %e, "failed to persist high-priority commands"),
        }
    }

    /// Loads fresh persisted commands into memory and clears the durable copy.
    fn restore(&self, now: DateTime<Utc>) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let records = match load_persisted(store.as_ref()) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "persisted commands unreadable, starting empty");
                Vec::new()
            }
        };

        let mut inner = self.lock();
        let mut restored = 0;
        let mut stale = 0;
        for record in records {
            let Some(enqueued_at) = DateTime::from_timestamp_millis(record.timestamp_ms) else {
                stale += 1;
                continue;
            };
            // Timestamps from the future count as fresh.
            let age = now
                .signed_duration_since(enqueued_at)
                .to_std()
                .unwrap_or_default();
            if age >= self.config.stale_after {
                stale += 1;
                continue;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            self.insert_locked(
                &mut inner,
                QueuedCommand {
                    id: record.id,
                    command: record.event_name,
                    payload: record.payload,
                    enqueued_at,
                    channel: record.channel,
                    priority: record.priority,
                    seq,
                },
            );
            restored += 1;
        }

        if let Err(e) = store.remove(OUTBOX_STORAGE_KEY) {
            warn!(error = %e, "failed to clear persisted commands after restore");
        }
        if restored > 0 || stale > 0 {
            info!(restored, stale, "restored persisted commands");
        }
        restored
    }
}

fn load_persisted(store: &dyn DurableStore) -> Result<Vec<PersistedCommand>, StoreError> {
    match store.load(OUTBOX_STORAGE_KEY)? {
        Some(data) => Ok(serde_json::from_str(&data)?),
        None => Ok(Vec::new()),
    }
}

/// Oldest low-priority entry if any, otherwise the globally oldest entry.
fn eviction_index(entries: &[QueuedCommand]) -> Option<usize> {
    let oldest_low = entries
        .iter()
        .enumerate()
        .filter(|(_, c)| c.priority == Priority::Low)
        .min_by_key(|(_, c)| c.age_key())
        .map(|(i, _)| i);
    oldest_low.or_else(|| {
        entries
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.age_key())
            .map(|(i, _)| i)
    })
}
