//! Per-channel connection state shared by the supervisors and the manager.
//!
//! Every write goes through one `std::sync::Mutex` and is applied only while
//! the writer's cancellation token is live, checked under that lock. Teardown
//! cancels the token under the same lock, so a supervisor that lost the race
//! can never resurrect state after a disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gymops_outbox::DeliveryQueue;
use gymops_protocol::{Channel, Priority};

use crate::types::{ChannelPhase, ConnectionEvent, ConnectionState, EmitOutcome};
use crate::ws_client::WsClient;

struct Slot {
    state: ConnectionState,
    client: Option<Arc<WsClient>>,
    /// Wakes the supervisor to flush commands queued while connected.
    flush: Arc<Notify>,
}

pub(crate) struct ChannelRegistry {
    slots: Mutex<HashMap<Channel, Slot>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
}

impl ChannelRegistry {
    pub(crate) fn new(events_tx: mpsc::Sender<ConnectionEvent>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            events_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Channel, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the registry contents with an `Idle` slot per channel.
    pub(crate) fn install(&self, channels: &[Channel]) {
        let fresh: Vec<ConnectionState> = {
            let mut slots = self.lock();
            slots.clear();
            channels
                .iter()
                .map(|&channel| {
                    let state = ConnectionState::new(channel);
                    slots.insert(
                        channel,
                        Slot {
                            state: state.clone(),
                            client: None,
                            flush: Arc::new(Notify::new()),
                        },
                    );
                    state
                })
                .collect()
        };
        for state in fresh {
            self.notify_state(state);
        }
    }

    /// Cancels `token` and empties the registry in one critical section.
    /// Returns the clients that were attached so the caller can close them.
    pub(crate) fn teardown(&self, token: &CancellationToken) -> Vec<Arc<WsClient>> {
        let mut slots = self.lock();
        token.cancel();
        slots.drain().filter_map(|(_, slot)| slot.client).collect()
    }

    /// Applies `f` to the channel's slot if `token` is still live.
    fn update<F>(&self, channel: Channel, token: &CancellationToken, f: F) -> Option<ConnectionState>
    where
        F: FnOnce(&mut Slot),
    {
        let state = {
            let mut slots = self.lock();
            if token.is_cancelled() {
                trace!(%channel, "ignoring transition from cancelled supervisor");
                return None;
            }
            let slot = slots.get_mut(&channel)?;
            f(slot);
            slot.state.clone()
        };
        self.notify_state(state.clone());
        Some(state)
    }

    /// Enters `Connecting` or `Reconnecting` ahead of an attempt.
    pub(crate) fn begin_attempt(
        &self,
        channel: Channel,
        token: &CancellationToken,
        phase: ChannelPhase,
    ) -> Option<ConnectionState> {
        self.update(channel, token, |slot| slot.state.phase = phase)
    }

    /// Records a successful connect and publishes the client for `emit`.
    pub(crate) fn attach(
        &self,
        channel: Channel,
        token: &CancellationToken,
        client: Arc<WsClient>,
    ) -> Option<ConnectionState> {
        self.update(channel, token, |slot| {
            slot.state.phase = ChannelPhase::Connected;
            slot.state.reconnect_attempts = 0;
            slot.state.last_connected_at = Some(Utc::now());
            slot.state.last_error = None;
            slot.client = Some(client);
        })
    }

    /// Records that a live connection dropped.
    pub(crate) fn detach(
        &self,
        channel: Channel,
        token: &CancellationToken,
    ) -> Option<ConnectionState> {
        self.update(channel, token, |slot| {
            slot.state.phase = ChannelPhase::Disconnected;
            slot.state.last_error = Some("connection lost".into());
            slot.client = None;
        })
    }

    /// Counts a failed attempt and returns the new total.
    pub(crate) fn record_failure(
        &self,
        channel: Channel,
        token: &CancellationToken,
        error: String,
    ) -> Option<u32> {
        self.update(channel, token, |slot| {
            slot.state.reconnect_attempts = slot.state.reconnect_attempts.saturating_add(1);
            slot.state.last_error = Some(error);
            slot.client = None;
        })
        .map(|s| s.reconnect_attempts)
    }

    /// Marks the channel `Failed` after its budget ran out.
    pub(crate) fn fail(&self, channel: Channel, token: &CancellationToken) -> Option<ConnectionState> {
        let state = self.update(channel, token, |slot| {
            slot.state.phase = ChannelPhase::Failed;
            slot.client = None;
        })?;
        self.notify(ConnectionEvent::Failed {
            channel,
            attempts: state.reconnect_attempts,
            last_error: state.last_error.clone(),
        });
        Some(state)
    }

    pub(crate) fn state(&self, channel: Channel) -> Option<ConnectionState> {
        self.lock().get(&channel).map(|s| s.state.clone())
    }

    /// All tracked channels in [`Channel::ALL`] order.
    pub(crate) fn states(&self) -> Vec<ConnectionState> {
        let slots = self.lock();
        Channel::ALL
            .iter()
            .filter_map(|c| slots.get(c).map(|s| s.state.clone()))
            .collect()
    }

    pub(crate) fn is_any_connected(&self) -> bool {
        self.lock().values().any(|s| s.state.connected())
    }

    pub(crate) fn any_failed(&self) -> bool {
        self.lock().values().any(|s| s.state.failed())
    }

    /// The channel's client if it is connected and still writable.
    pub(crate) fn live_client(&self, channel: Channel) -> Option<Arc<WsClient>> {
        self.lock()
            .get(&channel)
            .filter(|s| s.state.connected())
            .and_then(|s| s.client.clone())
            .filter(|c| !c.is_closed())
    }

    /// Signal the channel's supervisor waits on while connected.
    pub(crate) fn flush_signal(&self, channel: Channel) -> Option<Arc<Notify>> {
        self.lock().get(&channel).map(|s| s.flush.clone())
    }

    /// Sends now if the channel is up, otherwise buffers in `queue`.
    ///
    /// A command buffered while the channel is connected (backpressure, or
    /// a connect that finished its replay in between) wakes the supervisor
    /// to flush it.
    pub(crate) fn route(
        &self,
        queue: &DeliveryQueue,
        channel: Channel,
        command: &str,
        payload: Value,
        priority: Priority,
    ) -> EmitOutcome {
        if let Some(client) = self.live_client(channel) {
            match client.send_command(command, &payload) {
                Ok(()) => {
                    debug!(%channel, %command, "command sent");
                    return EmitOutcome::Sent;
                }
                Err(e) => {
                    warn!(%channel, %command, error = %e, "send failed, queueing");
                }
            }
        }
        let id = queue.enqueue(command, payload, channel, priority);
        if self.live_client(channel).is_some()
            && let Some(flush) = self.flush_signal(channel)
        {
            trace!(%channel, "requesting flush of queued commands");
            flush.notify_one();
        }
        EmitOutcome::Queued(id)
    }

    fn notify_state(&self, state: ConnectionState) {
        self.notify(ConnectionEvent::StateChanged {
            channel: state.channel,
            state,
        });
    }

    /// Best-effort: a full or dropped receiver never stalls a supervisor.
    pub(crate) fn notify(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("connection event not delivered: {e}");
        }
    }
}
