//! Public types for the realtime connection manager.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gymops_protocol::Channel;

/// Lifecycle phase of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelPhase {
    /// Configured but no attempt made yet.
    Idle,
    /// First connection cycle in progress (including its retries).
    Connecting,
    /// Socket open, identity announced.
    Connected,
    /// Connection lost, reconnect not started yet.
    Disconnected,
    /// Connection lost, retrying with backoff.
    Reconnecting,
    /// Attempt budget exhausted. Only a new `connect` restarts the channel.
    Failed,
}

impl fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelPhase::Idle => "idle",
            ChannelPhase::Connecting => "connecting",
            ChannelPhase::Connected => "connected",
            ChannelPhase::Disconnected => "disconnected",
            ChannelPhase::Reconnecting => "reconnecting",
            ChannelPhase::Failed => "failed",
        })
    }
}

/// Snapshot of one channel's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub channel: Channel,
    pub phase: ChannelPhase,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Failed attempts since the last successful connect.
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            phase: ChannelPhase::Idle,
            last_connected_at: None,
            reconnect_attempts: 0,
            last_error: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.phase == ChannelPhase::Connected
    }

    /// An attempt is in flight or scheduled.
    pub fn connecting(&self) -> bool {
        matches!(
            self.phase,
            ChannelPhase::Connecting | ChannelPhase::Reconnecting
        )
    }

    pub fn failed(&self) -> bool {
        self.phase == ChannelPhase::Failed
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A channel moved to a new phase.
    StateChanged {
        channel: Channel,
        state: ConnectionState,
    },
    /// A retry is scheduled for a channel.
    Reconnecting {
        channel: Channel,
        attempt: u32,
        next_retry_secs: f64,
    },
    /// A channel gave up after exhausting its attempts.
    Failed {
        channel: Channel,
        attempts: u32,
        last_error: Option<String>,
    },
}

/// What happened to an emitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Handed to the transport.
    Sent,
    /// Buffered in the delivery queue under this id.
    Queued(String),
    /// The channel has no endpoint configured.
    Dropped,
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Failed attempts before the channel is marked failed.
    pub max_attempts: u32,
    /// Relative jitter in `[0, 1]`; `0.25` spreads delays by ±25%.
    pub jitter: f64,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 10,
            jitter: 0.25,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based), with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt).as_secs_f64();
        let jitter = capped * self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }

    /// Delay before retry number `attempt` without jitter.
    ///
    /// A factor below 1 (or not finite) is treated as 1, so delays never
    /// shrink or go negative.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = sanitize_factor(self.backoff_factor);
        let secs = self.initial_delay.as_secs_f64() * factor.powi(exp);
        Duration::from_secs_f64(secs.max(0.0).min(self.max_delay.as_secs_f64()))
    }
}

/// Clamps a backoff factor to a finite value `>= 1.0`.
pub(crate) fn sanitize_factor(factor: f64) -> f64 {
    if factor.is_finite() { factor.max(1.0) } else { 1.0 }
}
