use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventType;

/// Envelope for every WebSocket frame, in both directions.
///
/// Outbound frames carry a command name, inbound frames an event name;
/// both live in `type`. The payload is opaque to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    /// Creates a new message with the given name and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let payload = payload.map(serde_json::to_value).transpose()?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            payload,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(v) => Ok(Some(T::deserialize(v)?)),
            None => Ok(None),
        }
    }

    /// The frame's name interpreted as an inbound event.
    pub fn event_type(&self) -> EventType {
        EventType::from_name(&self.name)
    }

    /// Takes the payload, substituting `null` when absent.
    pub fn into_payload(self) -> Value {
        self.payload.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Identity, Role};

    #[test]
    fn message_new_with_payload() {
        let payload = serde_json::json!({"scheduleId": "s-1"});
        let msg = Message::new("msg-1", "schedule_updated", Some(&payload)).unwrap();
        assert_eq!(msg.id, "msg-1");
        assert_eq!(msg.event_type(), EventType::ScheduleUpdated);
        assert_eq!(msg.payload, Some(payload));
    }

    #[test]
    fn message_omits_missing_payload() {
        let msg = Message::new::<()>("m1", "ping", None).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("payload"));
        assert!(json.contains("\"type\":\"ping\""));
    }

    #[test]
    fn message_parse_payload() {
        let identity = Identity {
            user_id: "u-7".into(),
            role: Role::Trainer,
            client_id: "c0ffee00".into(),
        };
        let msg = Message::new("m1", "identify", Some(&identity)).unwrap();
        let parsed: Option<Identity> = msg.parse_payload().unwrap();
        assert_eq!(parsed.unwrap(), identity);
    }

    #[test]
    fn inbound_frame_without_id_parses() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"booking_created","payload":{"bookingId":9}}"#)
                .unwrap();
        assert!(msg.id.is_empty());
        assert_eq!(msg.event_type(), EventType::BookingCreated);
        assert_eq!(msg.into_payload()["bookingId"], 9);
    }
}
