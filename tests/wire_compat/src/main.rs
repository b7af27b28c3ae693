fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use gymops_outbox::PersistedCommand;
    use gymops_protocol::{Channel, EventType, Identity, Message, Priority, Role};
    use gymops_realtime::RealtimeConfig;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes numbers so that `65` and `65.0` compare as equal.
    ///
    /// Server and dashboard may write the same number either way.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON values
    /// (order-independent, number-normalized).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  ours:    {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_envelope() {
        let msg = roundtrip_test::<Message>("message_envelope.json");
        assert_eq!(msg.event_type(), EventType::BookingCreated);
        assert_eq!(msg.payload.as_ref().unwrap()["bookingId"], 42);
    }

    #[test]
    fn fixture_message_without_payload() {
        let msg = roundtrip_test::<Message>("message_without_payload.json");
        assert_eq!(msg.event_type(), EventType::Notification);
        assert!(msg.payload.is_none());
        assert!(msg.into_payload().is_null());
    }

    #[test]
    fn fixture_identify_command() {
        let msg = roundtrip_test::<Message>("identify_command.json");
        assert_eq!(msg.name, gymops_protocol::constants::IDENTIFY_COMMAND);
        let identity: Identity = msg.parse_payload().unwrap().unwrap();
        assert_eq!(identity.user_id, "trainer-7");
        assert_eq!(identity.role, Role::Trainer);
    }

    #[test]
    fn fixture_identity() {
        let identity = roundtrip_test::<Identity>("identity.json");
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.client_id, "9f8e7d6c");
    }

    // --- Persisted queue layout ---

    #[test]
    fn fixture_persisted_outbox() {
        let entries = roundtrip_test::<Vec<PersistedCommand>>("persisted_outbox.json");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_name, "cancel_booking");
        assert_eq!(entries[0].channel, Channel::Schedule);
        assert_eq!(entries[1].channel, Channel::Identity);
        assert!(entries.iter().all(|e| e.priority == Priority::High));
        assert!(entries[0].timestamp_ms < entries[1].timestamp_ms);
    }

    // --- Configuration file ---

    #[test]
    fn fixture_realtime_config() {
        let fixture = load_fixture("realtime_config.json");
        let config = RealtimeConfig::from_json(&fixture.to_string()).unwrap();
        assert_eq!(
            config.endpoints.get(Channel::Member),
            Some("wss://gym.example/ws/member")
        );
        assert!(config.endpoints.get(Channel::Identity).is_none());

        let reserialized: serde_json::Value =
            serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(normalize_value(&fixture), normalize_value(&reserialized));
    }

    // --- Event catalog ---

    #[test]
    fn fixture_event_catalog() {
        let catalog = load_fixture("event_catalog.json");
        for entry in catalog.as_array().unwrap() {
            let name = entry["name"].as_str().unwrap();
            let event_type = EventType::from_name(name);
            assert_eq!(event_type.name(), name);
            assert_eq!(
                event_type.required_key(),
                entry["requiredKey"].as_str(),
                "required key for {name}"
            );
            let json = serde_json::to_value(&event_type).unwrap();
            assert_eq!(json, name);
        }
    }
}
