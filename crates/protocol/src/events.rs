//! Catalog of server-pushed event names.
//!
//! Each known event declares the payload key that identifies the record it
//! is about. Names outside the catalog are carried as [`EventType::Other`]
//! and never validated.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Name of a server-originated event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    // Schedule channel
    BookingCreated,
    BookingCancelled,
    ScheduleCreated,
    ScheduleUpdated,
    ScheduleDeleted,
    RoomUpdated,

    // Member channel
    SessionStarted,
    SessionEnded,
    MembershipUpdated,
    MembershipExpired,

    // Identity channel
    CertificationApproved,
    CertificationRejected,
    TrainerUpdated,
    AccountDeleted,

    /// Generic user-facing notification, no identifying key.
    Notification,

    /// Any name not in the catalog.
    Other(String),
}

impl EventType {
    /// Maps a wire name to its catalog entry.
    pub fn from_name(name: &str) -> Self {
        match name {
            "booking_created" => EventType::BookingCreated,
            "booking_cancelled" => EventType::BookingCancelled,
            "schedule_created" => EventType::ScheduleCreated,
            "schedule_updated" => EventType::ScheduleUpdated,
            "schedule_deleted" => EventType::ScheduleDeleted,
            "room_updated" => EventType::RoomUpdated,
            "session_started" => EventType::SessionStarted,
            "session_ended" => EventType::SessionEnded,
            "membership_updated" => EventType::MembershipUpdated,
            "membership_expired" => EventType::MembershipExpired,
            "certification_approved" => EventType::CertificationApproved,
            "certification_rejected" => EventType::CertificationRejected,
            "trainer_updated" => EventType::TrainerUpdated,
            "account_deleted" => EventType::AccountDeleted,
            "notification" => EventType::Notification,
            other => EventType::Other(other.to_string()),
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &str {
        match self {
            EventType::BookingCreated => "booking_created",
            EventType::BookingCancelled => "booking_cancelled",
            EventType::ScheduleCreated => "schedule_created",
            EventType::ScheduleUpdated => "schedule_updated",
            EventType::ScheduleDeleted => "schedule_deleted",
            EventType::RoomUpdated => "room_updated",
            EventType::SessionStarted => "session_started",
            EventType::SessionEnded => "session_ended",
            EventType::MembershipUpdated => "membership_updated",
            EventType::MembershipExpired => "membership_expired",
            EventType::CertificationApproved => "certification_approved",
            EventType::CertificationRejected => "certification_rejected",
            EventType::TrainerUpdated => "trainer_updated",
            EventType::AccountDeleted => "account_deleted",
            EventType::Notification => "notification",
            EventType::Other(name) => name,
        }
    }

    /// Payload key that must be present (and non-null) for the event to be
    /// accepted, if the event declares one.
    pub fn required_key(&self) -> Option<&'static str> {
        match self {
            EventType::BookingCreated | EventType::BookingCancelled => Some("bookingId"),
            EventType::ScheduleCreated
            | EventType::ScheduleUpdated
            | EventType::ScheduleDeleted => Some("scheduleId"),
            EventType::RoomUpdated => Some("roomId"),
            EventType::SessionStarted | EventType::SessionEnded => Some("sessionId"),
            EventType::MembershipUpdated | EventType::MembershipExpired => Some("membershipId"),
            EventType::CertificationApproved | EventType::CertificationRejected => {
                Some("certificationId")
            }
            EventType::TrainerUpdated => Some("trainerId"),
            EventType::AccountDeleted => Some("userId"),
            EventType::Notification | EventType::Other(_) => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType::from_name(name)
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventType::from_name(&name))
    }
}
