use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A logical backend service the dashboard keeps a connection to.
///
/// Channels are supervised independently: a failure or reconnect on one
/// never affects another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Bookings, classes and room schedule. Mandatory.
    Schedule,
    /// Memberships and training sessions.
    Member,
    /// Accounts and trainer certifications.
    Identity,
}

impl Channel {
    /// Every channel, in supervision order.
    pub const ALL: [Channel; 3] = [Channel::Schedule, Channel::Member, Channel::Identity];

    /// Wire name of the channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Schedule => "schedule",
            Channel::Member => "member",
            Channel::Identity => "identity",
        }
    }

    /// Whether a missing endpoint for this channel is a fatal configuration error.
    pub fn is_mandatory(self) -> bool {
        matches!(self, Channel::Schedule)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognised channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Importance of an outbound command.
///
/// Governs queue ordering (high first), eviction (low first) and whether
/// the command survives a restart (high only).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Numeric sort rank: high = 0, normal = 1, low = 2.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        })
    }
}
