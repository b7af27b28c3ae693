//! Structural checks applied before an event is recorded or dispatched.

use serde_json::Value;

use gymops_protocol::EventType;

use crate::error::ValidationError;

/// Checks that `data` carries the identifying key `event_type` requires.
///
/// A key that is present but `null` counts as missing. Event types without a
/// requirement accept any payload.
pub fn validate(event_type: &EventType, data: &Value) -> Result<(), ValidationError> {
    let Some(key) = event_type.required_key() else {
        return Ok(());
    };
    let Some(object) = data.as_object() else {
        return Err(ValidationError::NotAnObject {
            event: event_type.clone(),
            key,
        });
    };
    match object.get(key) {
        Some(v) if !v.is_null() => Ok(()),
        _ => Err(ValidationError::MissingKey {
            event: event_type.clone(),
            key,
        }),
    }
}
