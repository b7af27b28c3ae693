//! Connection manager orchestrating the per-channel supervisors.
//!
//! Owns the delivery queue and event dispatcher, starts one supervisor per
//! configured channel on [`connect`](ConnectionManager::connect), and routes
//! outbound commands to the wire or the queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gymops_event_bus::EventDispatcher;
use gymops_outbox::{DeliveryQueue, FileStore};
use gymops_protocol::{Channel, Identity, Priority};

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::handle::{ChannelHandle, ChannelHandles};
use crate::reconnection::{ChannelContext, supervise};
use crate::registry::ChannelRegistry;
use crate::types::{ConnectionEvent, ConnectionState, EmitOutcome};

struct Session {
    identity: Identity,
    cancel: CancellationToken,
    handles: ChannelHandles,
    tasks: Vec<JoinHandle<()>>,
}

/// Entry point of the realtime layer.
pub struct ConnectionManager {
    config: RealtimeConfig,
    queue: Arc<DeliveryQueue>,
    dispatcher: Arc<EventDispatcher>,
    registry: Arc<ChannelRegistry>,
    /// Serializes `connect` and `disconnect` end to end.
    lifecycle: AsyncMutex<()>,
    session: Mutex<Option<Session>>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl ConnectionManager {
    /// Creates a manager around an existing queue and dispatcher.
    pub fn new(
        config: RealtimeConfig,
        queue: Arc<DeliveryQueue>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            config,
            queue,
            dispatcher,
            registry: Arc::new(ChannelRegistry::new(events_tx)),
            lifecycle: AsyncMutex::new(()),
            session: Mutex::new(None),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Creates a manager with its own queue (file-backed when a storage
    /// directory is configured) and dispatcher.
    pub fn from_config(config: RealtimeConfig) -> Self {
        let limits = config.queue.limits.clone();
        let queue = match &config.queue.storage_dir {
            Some(dir) => DeliveryQueue::with_store(limits, Arc::new(FileStore::new(dir))),
            None => DeliveryQueue::new(limits),
        };
        let dispatcher = EventDispatcher::new(config.history_capacity);
        Self::new(config, Arc::new(queue), Arc::new(dispatcher))
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts supervising every configured channel as `identity`.
    ///
    /// Returns immediately; connections come up in the background. Calling
    /// again with the same identity while no channel has failed returns the
    /// existing handles. Otherwise the current session is torn down and a
    /// fresh one starts with every channel back at `Idle`.
    pub async fn connect(&self, identity: Identity) -> Result<ChannelHandles, RealtimeError> {
        self.config.endpoints.validate()?;
        let _lifecycle = self.lifecycle.lock().await;

        {
            let session = self.lock_session();
            if let Some(s) = session.as_ref()
                && s.identity == identity
                && !self.registry.any_failed()
            {
                debug!(user = %identity.user_id, "session already live");
                return Ok(s.handles.clone());
            }
        }
        self.end_session().await;

        let endpoints = &self.config.endpoints;
        let configured: Vec<Channel> = Channel::ALL
            .into_iter()
            .filter(|&c| endpoints.get(c).is_some())
            .collect();
        self.registry.install(&configured);

        let cancel = CancellationToken::new();
        let ctx = ChannelContext {
            identity: identity.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            dispatcher: self.dispatcher.clone(),
            reconnect: self.config.reconnect.clone(),
        };

        let mut tasks = Vec::with_capacity(configured.len());
        for channel in Channel::ALL {
            match endpoints.get(channel) {
                Some(url) => {
                    debug!(%channel, %url, "starting supervisor");
                    tasks.push(tokio::spawn(supervise(
                        channel,
                        url.to_string(),
                        ctx.clone(),
                        cancel.clone(),
                    )));
                }
                None => info!(%channel, "no endpoint configured, channel inert"),
            }
        }

        let handles = ChannelHandles::new(|channel| {
            if configured.contains(&channel) {
                ChannelHandle::live(
                    channel,
                    self.registry.clone(),
                    self.queue.clone(),
                    self.dispatcher.clone(),
                )
            } else {
                ChannelHandle::inert(channel)
            }
        });

        info!(
            user = %identity.user_id,
            role = %identity.role,
            channels = configured.len(),
            "session started"
        );
        *self.lock_session() = Some(Session {
            identity,
            cancel,
            handles: handles.clone(),
            tasks,
        });
        Ok(handles)
    }

    /// Tears down every channel and clears all state. Idempotent.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.end_session().await;
    }

    async fn end_session(&self) {
        let Some(session) = self.lock_session().take() else {
            return;
        };
        for client in self.registry.teardown(&session.cancel) {
            client.close();
        }
        for task in session.tasks {
            let _ = task.await;
        }
        info!(user = %session.identity.user_id, "session ended");
    }

    /// Alias for [`disconnect`](Self::disconnect).
    pub async fn shutdown(&self) {
        self.disconnect().await;
    }

    /// State of one channel. `None` before `connect`, after `disconnect` and
    /// for unconfigured channels.
    pub fn get_state(&self, channel: Channel) -> Option<ConnectionState> {
        self.registry.state(channel)
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.registry.states()
    }

    pub fn is_any_connected(&self) -> bool {
        self.registry.is_any_connected()
    }

    /// Sends `command` on `channel` now, or queues it for replay.
    ///
    /// Only a channel with no configured endpoint drops the command.
    pub fn emit(
        &self,
        channel: Channel,
        command: &str,
        payload: Value,
        priority: Priority,
    ) -> EmitOutcome {
        if self.config.endpoints.get(channel).is_none() {
            debug!(%channel, %command, "no endpoint configured, dropping command");
            return EmitOutcome::Dropped;
        }
        self.registry
            .route(&self.queue, channel, command, payload, priority)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            self.registry.teardown(&session.cancel);
            for task in session.tasks {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gymops_outbox::{MemoryStore, QueueConfig};
    use gymops_protocol::Role;
    use serde_json::json;

    use super::*;
    use crate::types::ChannelPhase;

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: user.into(),
            role: Role::Admin,
            client_id: "deadbeef".into(),
        }
    }

    fn unreachable_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/ws")
    }

    fn config(schedule: Option<String>, member: Option<String>) -> RealtimeConfig {
        let mut config = RealtimeConfig::default();
        config.endpoints.schedule = schedule;
        config.endpoints.member = member;
        config.reconnect.initial_delay = Duration::from_secs(30);
        config.reconnect.jitter = 0.0;
        config.reconnect.connect_timeout = Duration::from_secs(1);
        config
    }

    #[tokio::test]
    async fn missing_schedule_endpoint_fails_fast() {
        let manager = ConnectionManager::from_config(config(None, Some(unreachable_url())));
        let err = manager.connect(identity("u-1")).await.unwrap_err();
        assert!(matches!(err, RealtimeError::MissingEndpoint(Channel::Schedule)));
        assert!(manager.states().is_empty());
    }

    #[tokio::test]
    async fn invalid_endpoint_is_rejected() {
        let manager =
            ConnectionManager::from_config(config(Some("http://example.com".into()), None));
        let err = manager.connect(identity("u-1")).await.unwrap_err();
        assert!(matches!(
            err,
            RealtimeError::InvalidEndpoint { channel: Channel::Schedule, .. }
        ));
    }

    #[tokio::test]
    async fn take_events_once() {
        let manager = ConnectionManager::from_config(RealtimeConfig::default());
        assert!(manager.take_events().is_some());
        assert!(manager.take_events().is_none());
    }

    #[tokio::test]
    async fn disconnect_when_not_connected_is_noop() {
        let manager = ConnectionManager::from_config(RealtimeConfig::default());
        manager.disconnect().await;
        manager.shutdown().await;
        assert!(!manager.is_any_connected());
    }

    #[tokio::test]
    async fn emit_before_connect_queues() {
        let manager = ConnectionManager::from_config(config(Some(unreachable_url()), None));
        let outcome = manager.emit(
            Channel::Schedule,
            "cancel_booking",
            json!({"bookingId": 3}),
            Priority::High,
        );
        assert!(matches!(outcome, EmitOutcome::Queued(_)));
        assert_eq!(manager.queue().len(), 1);
    }

    #[tokio::test]
    async fn emit_on_unconfigured_channel_is_dropped() {
        let manager = ConnectionManager::from_config(config(Some(unreachable_url()), None));
        let outcome = manager.emit(Channel::Identity, "approve", json!({}), Priority::Normal);
        assert_eq!(outcome, EmitOutcome::Dropped);
        assert!(manager.queue().is_empty());
    }

    #[tokio::test]
    async fn connect_tracks_configured_channels_only() {
        let manager = ConnectionManager::from_config(config(Some(unreachable_url()), None));
        let handles = manager.connect(identity("u-1")).await.unwrap();

        assert!(!handles.schedule().is_inert());
        assert!(handles.member().is_inert());
        assert!(handles.identity().is_inert());
        assert!(manager.get_state(Channel::Schedule).is_some());
        assert!(manager.get_state(Channel::Member).is_none());

        manager.disconnect().await;
        assert!(manager.get_state(Channel::Schedule).is_none());
        assert!(manager.states().is_empty());
        // Second disconnect is harmless.
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn unreachable_channel_keeps_connecting() {
        let manager = ConnectionManager::from_config(config(Some(unreachable_url()), None));
        manager.connect(identity("u-1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = manager.get_state(Channel::Schedule).unwrap();
        assert_eq!(state.phase, ChannelPhase::Connecting);
        assert_eq!(state.reconnect_attempts, 1);
        assert!(!manager.is_any_connected());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn same_identity_reuses_session() {
        let manager = ConnectionManager::from_config(config(Some(unreachable_url()), None));
        manager.connect(identity("u-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let before = manager.get_state(Channel::Schedule).unwrap();

        manager.connect(identity("u-1")).await.unwrap();
        let after = manager.get_state(Channel::Schedule).unwrap();
        assert_eq!(before.reconnect_attempts, after.reconnect_attempts);

        // A different identity restarts from Idle.
        manager.connect(identity("u-2")).await.unwrap();
        let restarted = manager.get_state(Channel::Schedule).unwrap();
        assert!(restarted.reconnect_attempts <= 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn file_backed_queue_survives_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(Some(unreachable_url()), None);
        cfg.queue.storage_dir = Some(tmp.path().to_path_buf());

        let first = ConnectionManager::from_config(cfg.clone());
        first.emit(Channel::Schedule, "cancel_booking", json!({"bookingId": 8}), Priority::High);
        first.emit(Channel::Schedule, "note", json!({}), Priority::Low);
        drop(first);

        let second = ConnectionManager::from_config(cfg);
        let restored = second.queue().snapshot();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].command, "cancel_booking");
    }

    #[tokio::test]
    async fn shares_injected_queue() {
        let queue = Arc::new(DeliveryQueue::with_store(
            QueueConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let manager = ConnectionManager::new(
            config(Some(unreachable_url()), None),
            queue.clone(),
            Arc::new(EventDispatcher::default()),
        );
        manager.emit(Channel::Schedule, "x", json!({}), Priority::Normal);
        assert_eq!(queue.len(), 1);
    }
}
