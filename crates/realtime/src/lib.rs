//! Realtime connection layer for the GymOps dashboard.
//!
//! Supervises one WebSocket per configured [`Channel`], reconnects with
//! exponential backoff, routes inbound events to the [`EventDispatcher`] and
//! outbound commands either straight to the wire or into the
//! [`DeliveryQueue`] for replay once the channel is back.
//!
//! [`Channel`]: gymops_protocol::Channel
//! [`EventDispatcher`]: gymops_event_bus::EventDispatcher
//! [`DeliveryQueue`]: gymops_outbox::DeliveryQueue

pub mod config;
pub mod error;
pub mod handle;
pub mod manager;
mod pumps;
pub(crate) mod reconnection;
pub(crate) mod registry;
pub mod types;
pub mod ws_client;

pub use config::{Endpoints, QueueSettings, RealtimeConfig, default_config_path};
pub use error::{ConfigError, RealtimeError};
pub use handle::{ChannelHandle, ChannelHandles};
pub use manager::ConnectionManager;
pub use types::{
    ChannelPhase, ConnectionEvent, ConnectionState, EmitOutcome, ReconnectConfig,
};
pub use ws_client::{TransportError, WsClient};
