use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gymops_protocol::{Channel, EventType};

/// One inbound event as seen by subscribers and broadcast listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,
    pub data: Value,
    /// Channel the event arrived on; `None` for locally dispatched events.
    pub channel: Option<Channel>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, data: Value, channel: Option<Channel>) -> Self {
        Self {
            event_type,
            data,
            channel,
            timestamp: Utc::now(),
        }
    }

    /// Deserializes the payload into a concrete type.
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct BookingCreated {
        booking_id: u64,
        member_name: String,
    }

    #[test]
    fn parse_into_concrete_payload() {
        let event = Event::new(
            EventType::BookingCreated,
            serde_json::json!({"bookingId": 12, "memberName": "Ana"}),
            Some(Channel::Schedule),
        );
        let booking: BookingCreated = event.parse().unwrap();
        assert_eq!(
            booking,
            BookingCreated {
                booking_id: 12,
                member_name: "Ana".into()
            }
        );
    }

    #[test]
    fn parse_mismatch_is_an_error() {
        let event = Event::new(EventType::BookingCreated, serde_json::json!([1, 2]), None);
        assert!(event.parse::<BookingCreated>().is_err());
    }
}
