//! Per-channel views returned from [`ConnectionManager::connect`].
//!
//! [`ConnectionManager::connect`]: crate::ConnectionManager::connect

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use gymops_event_bus::{Event, EventDispatcher, SubscriberError, SubscriptionId};
use gymops_outbox::DeliveryQueue;
use gymops_protocol::{Channel, EventType, Priority};

use crate::registry::ChannelRegistry;
use crate::types::{ConnectionState, EmitOutcome};

#[derive(Clone)]
struct Link {
    registry: Arc<ChannelRegistry>,
    queue: Arc<DeliveryQueue>,
    dispatcher: Arc<EventDispatcher>,
}

/// A channel's send/subscribe surface.
///
/// Handles for channels without an endpoint are inert: emits are dropped,
/// subscriptions are refused and the state is always absent.
#[derive(Clone)]
pub struct ChannelHandle {
    channel: Channel,
    link: Option<Link>,
}

impl ChannelHandle {
    pub(crate) fn live(
        channel: Channel,
        registry: Arc<ChannelRegistry>,
        queue: Arc<DeliveryQueue>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            channel,
            link: Some(Link {
                registry,
                queue,
                dispatcher,
            }),
        }
    }

    pub fn inert(channel: Channel) -> Self {
        Self {
            channel,
            link: None,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_inert(&self) -> bool {
        self.link.is_none()
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.link.as_ref()?.registry.state(self.channel)
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_some_and(|s| s.connected())
    }

    /// Sends `command` now or queues it until the channel is back.
    pub fn emit(&self, command: &str, payload: Value, priority: Priority) -> EmitOutcome {
        match &self.link {
            Some(link) => link
                .registry
                .route(&link.queue, self.channel, command, payload, priority),
            None => {
                debug!(channel = %self.channel, %command, "inert channel, dropping command");
                EmitOutcome::Dropped
            }
        }
    }

    /// Subscribes to `event_type` as received on this channel only.
    pub fn subscribe<F>(&self, event_type: EventType, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let link = self.link.as_ref()?;
        let channel = self.channel;
        link.dispatcher.subscribe(event_type, move |event: &Event| {
            if event.channel == Some(channel) {
                callback(event)
            } else {
                Ok(())
            }
        })
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.channel)
            .field("inert", &self.is_inert())
            .finish()
    }
}

/// One handle per [`Channel`], live or inert.
#[derive(Debug, Clone)]
pub struct ChannelHandles {
    handles: [ChannelHandle; 3],
}

impl ChannelHandles {
    pub(crate) fn new(make: impl Fn(Channel) -> ChannelHandle) -> Self {
        Self {
            handles: Channel::ALL.map(make),
        }
    }

    pub fn get(&self, channel: Channel) -> &ChannelHandle {
        let index = match channel {
            Channel::Schedule => 0,
            Channel::Member => 1,
            Channel::Identity => 2,
        };
        &self.handles[index]
    }

    pub fn schedule(&self) -> &ChannelHandle {
        self.get(Channel::Schedule)
    }

    pub fn member(&self) -> &ChannelHandle {
        self.get(Channel::Member)
    }

    pub fn identity(&self) -> &ChannelHandle {
        self.get(Channel::Identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelHandle> {
        self.handles.iter()
    }
}
