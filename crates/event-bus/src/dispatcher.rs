//! Typed publish/subscribe dispatcher.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use gymops_protocol::{Channel, EventType};

use crate::broadcast::{BroadcastChannel, BroadcastSink};
use crate::error::{SubscriberError, ValidationError};
use crate::event::Event;
use crate::history::{History, HistoryEntry};
use crate::validation::validate;

/// Callback invoked for each matching event.
pub type Callback = Arc<dyn Fn(&Event) -> Result<(), SubscriberError> + Send + Sync>;

/// Handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Result of one [`EventDispatcher::dispatch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Recorded and fanned out. `failed` counts subscribers that returned
    /// an error or panicked.
    Delivered { subscribers: usize, failed: usize },
    /// Payload failed validation; nothing was recorded or invoked.
    Rejected(ValidationError),
    /// The dispatcher is disabled.
    Disabled,
}

struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    callback: Callback,
    once: bool,
}

struct Tables {
    /// Registration order.
    subscriptions: Vec<Subscription>,
    history: History,
}

/// Publish/subscribe bus for inbound events.
///
/// Subscriber invocation follows registration order, but callers must not
/// rely on it. No lock is held while callbacks run, so callbacks may
/// subscribe, unsubscribe or dispatch.
pub struct EventDispatcher {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
    enabled: AtomicBool,
    broadcast: BroadcastChannel,
    extra_sinks: Mutex<Vec<Arc<dyn BroadcastSink>>>,
}

impl EventDispatcher {
    /// Creates an enabled dispatcher keeping `history_capacity` entries.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables {
                subscriptions: Vec::new(),
                history: History::new(history_capacity.max(1)),
            }),
            next_id: AtomicU64::new(1),
            enabled: AtomicBool::new(true),
            broadcast: BroadcastChannel::new(),
            extra_sinks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback for every future `event_type` dispatch.
    ///
    /// Returns `None` when the dispatcher is disabled.
    pub fn subscribe<F>(&self, event_type: EventType, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(callback), false)
    }

    /// Registers a callback that fires on the next `event_type` dispatch only.
    pub fn subscribe_once<F>(&self, event_type: EventType, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(callback), true)
    }

    /// Registers a pre-built callback.
    pub fn register(
        &self,
        event_type: EventType,
        callback: Callback,
        once: bool,
    ) -> Option<SubscriptionId> {
        if !self.is_enabled() {
            warn!(event = %event_type, "dispatcher disabled, ignoring subscribe");
            return None;
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(%id, event = %event_type, once, "subscribed");
        self.lock().subscriptions.push(Subscription {
            id,
            event_type,
            callback,
            once,
        });
        Some(id)
    }

    /// Removes one subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut tables = self.lock();
        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|s| s.id != id);
        before != tables.subscriptions.len()
    }

    /// Removes every subscription for `event_type`. Returns how many were removed.
    pub fn unsubscribe_all(&self, event_type: &EventType) -> usize {
        let mut tables = self.lock();
        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|s| &s.event_type != event_type);
        let removed = before - tables.subscriptions.len();
        debug!(event = %event_type, removed, "unsubscribed all");
        removed
    }

    /// Number of live subscriptions for `event_type`.
    pub fn subscriber_count(&self, event_type: &EventType) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| &s.event_type == event_type)
            .count()
    }

    /// Validates, records and fans out a locally produced event.
    pub fn dispatch(&self, event_type: EventType, data: Value) -> DispatchOutcome {
        self.dispatch_event(Event::new(event_type, data, None))
    }

    /// Same as [`dispatch`](Self::dispatch) for an event received on `channel`.
    pub fn dispatch_from(
        &self,
        channel: Channel,
        event_type: EventType,
        data: Value,
    ) -> DispatchOutcome {
        self.dispatch_event(Event::new(event_type, data, Some(channel)))
    }

    fn dispatch_event(&self, event: Event) -> DispatchOutcome {
        if !self.is_enabled() {
            warn!(event = %event.event_type, "dispatcher disabled, dropping event");
            return DispatchOutcome::Disabled;
        }
        if let Err(e) = validate(&event.event_type, &event.data) {
            warn!(channel = ?event.channel, error = %e, "rejected invalid event");
            return DispatchOutcome::Rejected(e);
        }

        // Record first, then take the matching callbacks. `once` entries
        // leave the table here so a concurrent dispatch cannot fire them again.
        let callbacks: Vec<(SubscriptionId, Callback)> = {
            let mut tables = self.lock();
            tables.history.push(HistoryEntry::from(&event));
            let mut matched = Vec::new();
            tables.subscriptions.retain(|s| {
                if s.event_type != event.event_type {
                    return true;
                }
                matched.push((s.id, s.callback.clone()));
                !s.once
            });
            matched
        };

        trace!(
            event = %event.event_type,
            subscribers = callbacks.len(),
            "dispatching"
        );
        let mut failed = 0;
        for (id, callback) in &callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    warn!(%id, event = %event.event_type, error = %e, "subscriber failed");
                }
                Err(panic) => {
                    failed += 1;
                    warn!(
                        %id,
                        event = %event.event_type,
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }

        self.broadcast.publish(&event);
        let sinks = self
            .extra_sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in sinks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| sink.publish(&event))) {
                warn!(
                    event = %event.event_type,
                    panic = panic_message(panic.as_ref()),
                    "broadcast sink panicked"
                );
            }
        }

        DispatchOutcome::Delivered {
            subscribers: callbacks.len(),
            failed,
        }
    }

    /// The newest `limit` recorded events, optionally of one type, newest last.
    pub fn history(&self, event_type: Option<&EventType>, limit: usize) -> Vec<HistoryEntry> {
        self.lock().history.recent(event_type, limit)
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    /// Attaches a legacy broadcast listener.
    pub fn listen(&self) -> broadcast::Receiver<Event> {
        self.broadcast.listen()
    }

    /// Adds another sink that receives every dispatched event.
    pub fn add_sink(&self, sink: Arc<dyn BroadcastSink>) {
        self.extra_sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Enables or disables the dispatcher. While disabled, `subscribe` and
    /// `dispatch` are no-ops.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        debug!(enabled, "dispatcher toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(crate::history::DEFAULT_HISTORY_CAPACITY)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) -> Result<(), SubscriberError>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move |_: &Event| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn dispatch_invokes_matching_subscribers_only() {
        let bus = EventDispatcher::default();
        let (rooms, on_room) = counter();
        let (notes, on_note) = counter();
        bus.subscribe(EventType::RoomUpdated, on_room).unwrap();
        bus.subscribe(EventType::Notification, on_note).unwrap();

        let outcome = bus.dispatch(EventType::RoomUpdated, json!({"roomId": 1}));

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                subscribers: 1,
                failed: 0
            }
        );
        assert_eq!(rooms.load(Ordering::SeqCst), 1);
        assert_eq!(notes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_subscriber_does_not_block_siblings_or_history() {
        let bus = EventDispatcher::default();
        bus.subscribe(EventType::BookingCreated, |_| Err("render failed".into()))
            .unwrap();
        let (hits, second) = counter();
        bus.subscribe(EventType::BookingCreated, second).unwrap();

        let outcome = bus.dispatch(EventType::BookingCreated, json!({"bookingId": 7}));

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                subscribers: 2,
                failed: 1
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let history = bus.history(Some(&EventType::BookingCreated), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].data["bookingId"], 7);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let bus = EventDispatcher::default();
        bus.subscribe(EventType::Notification, |_| panic!("boom"))
            .unwrap();
        let (hits, second) = counter();
        bus.subscribe(EventType::Notification, second).unwrap();

        let outcome = bus.dispatch(EventType::Notification, json!({"text": "hi"}));

        assert!(matches!(outcome, DispatchOutcome::Delivered { failed: 1, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.history(None, 10).len(), 1);
    }

    #[test]
    fn once_fires_exactly_once() {
        let bus = EventDispatcher::default();
        let (hits, cb) = counter();
        bus.subscribe_once(EventType::ScheduleUpdated, cb).unwrap();

        for i in 0..3 {
            bus.dispatch(EventType::ScheduleUpdated, json!({"scheduleId": i}));
            // Unrelated churn must not resurrect the subscription.
            bus.unsubscribe_all(&EventType::RoomUpdated);
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(&EventType::ScheduleUpdated), 0);
    }

    #[test]
    fn failing_once_subscriber_is_still_removed() {
        let bus = EventDispatcher::default();
        bus.subscribe_once(EventType::Notification, |_| Err("nope".into()))
            .unwrap();
        bus.dispatch(EventType::Notification, json!({}));
        assert_eq!(bus.subscriber_count(&EventType::Notification), 0);
    }

    #[test]
    fn invalid_event_is_neither_recorded_nor_dispatched() {
        let bus = EventDispatcher::default();
        let (hits, cb) = counter();
        bus.subscribe(EventType::MembershipUpdated, cb).unwrap();
        let mut legacy = bus.listen();

        let outcome = bus.dispatch(EventType::MembershipUpdated, json!({"status": "active"}));

        assert!(matches!(outcome, DispatchOutcome::Rejected(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(bus.history(None, 10).is_empty());
        assert!(legacy.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_reports_presence() {
        let bus = EventDispatcher::default();
        let (hits, cb) = counter();
        let id = bus.subscribe(EventType::Notification, cb).unwrap();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.dispatch(EventType::Notification, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_all_only_touches_one_type() {
        let bus = EventDispatcher::default();
        bus.subscribe(EventType::RoomUpdated, |_| Ok(())).unwrap();
        bus.subscribe(EventType::RoomUpdated, |_| Ok(())).unwrap();
        bus.subscribe(EventType::TrainerUpdated, |_| Ok(())).unwrap();

        assert_eq!(bus.unsubscribe_all(&EventType::RoomUpdated), 2);
        assert_eq!(bus.subscriber_count(&EventType::RoomUpdated), 0);
        assert_eq!(bus.subscriber_count(&EventType::TrainerUpdated), 1);
    }

    #[test]
    fn broadcast_echo_carries_same_payload() {
        let bus = EventDispatcher::default();
        let mut legacy = bus.listen();
        let (hits, cb) = counter();
        bus.subscribe(EventType::CertificationApproved, cb).unwrap();

        bus.dispatch_from(
            Channel::Identity,
            EventType::CertificationApproved,
            json!({"certificationId": "c-9"}),
        );

        let echoed = legacy.try_recv().unwrap();
        assert_eq!(echoed.event_type, EventType::CertificationApproved);
        assert_eq!(echoed.data["certificationId"], "c-9");
        assert_eq!(echoed.channel, Some(Channel::Identity));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extra_sinks_receive_events() {
        struct Collect(Mutex<Vec<EventType>>);
        impl BroadcastSink for Collect {
            fn publish(&self, event: &Event) {
                self.0.lock().unwrap().push(event.event_type.clone());
            }
        }

        let bus = EventDispatcher::default();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        bus.add_sink(sink.clone());
        bus.dispatch(EventType::Notification, json!({}));

        assert_eq!(*sink.0.lock().unwrap(), vec![EventType::Notification]);
    }

    #[test]
    fn panicking_sink_does_not_stop_later_sinks() {
        struct Explode;
        impl BroadcastSink for Explode {
            fn publish(&self, _event: &Event) {
                panic!("sink offline");
            }
        }
        struct Count(AtomicUsize);
        impl BroadcastSink for Count {
            fn publish(&self, _event: &Event) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let bus = EventDispatcher::default();
        let count = Arc::new(Count(AtomicUsize::new(0)));
        bus.add_sink(Arc::new(Explode));
        bus.add_sink(count.clone());

        let outcome = bus.dispatch(EventType::RoomUpdated, json!({"roomId": 2}));
        assert!(matches!(outcome, DispatchOutcome::Delivered { .. }));
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        assert_eq!(bus.history(None, 10).len(), 1);
    }

    #[test]
    fn disabled_dispatcher_ignores_subscribe_and_dispatch() {
        let bus = EventDispatcher::default();
        let (hits, cb) = counter();
        bus.subscribe(EventType::Notification, cb).unwrap();

        bus.set_enabled(false);
        assert!(bus.subscribe(EventType::Notification, |_| Ok(())).is_none());
        assert_eq!(
            bus.dispatch(EventType::Notification, json!({})),
            DispatchOutcome::Disabled
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(bus.history(None, 10).is_empty());

        bus.set_enabled(true);
        bus.dispatch(EventType::Notification, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventDispatcher::new(3);
        for i in 0..5 {
            bus.dispatch(EventType::Notification, json!({ "n": i }));
        }
        let history = bus.history(None, 100);
        let ns: Vec<i64> = history.iter().map(|e| e.data["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3, 4]);

        bus.clear_history();
        assert!(bus.history(None, 100).is_empty());
    }

    #[test]
    fn callbacks_may_reenter_the_dispatcher() {
        let bus = Arc::new(EventDispatcher::default());
        let inner = bus.clone();
        bus.subscribe(EventType::AccountDeleted, move |_| {
            inner.unsubscribe_all(&EventType::TrainerUpdated);
            inner.dispatch(EventType::Notification, json!({"text": "account removed"}));
            Ok(())
        })
        .unwrap();

        bus.dispatch(EventType::AccountDeleted, json!({"userId": "u-1"}));

        let types: Vec<EventType> = bus
            .history(None, 10)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![EventType::AccountDeleted, EventType::Notification]
        );
    }
}
