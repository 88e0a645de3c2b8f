//! Tests for logical messages and the JSON serializer

use super::*;
use serde_json::json;

#[test]
fn test_markers_map_to_message_types() {
    assert_eq!(
        LogicalMessage::new("Ping", json!({})).message_type(),
        MessageType::Ordinary
    );
    assert_eq!(
        LogicalMessage::administrative("AddSubscription", json!({})).message_type(),
        MessageType::Administrative
    );
    assert_eq!(
        LogicalMessage::load_balancer("Heartbeat", json!({})).message_type(),
        MessageType::LoadBalancer
    );
}

#[test]
fn test_round_trip_preserves_sequence() {
    let serializer = JsonMessageSerializer;
    let messages = vec![
        LogicalMessage::new("Greeting", json!("Hello")),
        LogicalMessage::new("Order", json!({ "sku": "a-1", "quantity": 3 })),
        LogicalMessage::administrative("AddSubscription", json!({ "topic": "orders" })),
    ];

    let payload = serializer.serialize(&messages).unwrap();
    let decoded = serializer.deserialize(&payload).unwrap();
    assert_eq!(decoded, messages);
}

#[test]
fn test_serialize_rejects_empty_sequence() {
    let serializer = JsonMessageSerializer;
    assert!(matches!(
        serializer.serialize(&[]),
        Err(SerializationError::EmptySequence)
    ));
}

#[test]
fn test_deserialize_rejects_empty_sequence() {
    let serializer = JsonMessageSerializer;
    let payload = Bytes::from("[]");
    assert!(matches!(
        serializer.deserialize(&payload),
        Err(SerializationError::EmptySequence)
    ));
}

#[test]
fn test_deserialize_rejects_corrupt_payload() {
    let serializer = JsonMessageSerializer;
    let payload = Bytes::from(vec![0xfe, 0xed, 0xfa, 0xce]);
    assert!(matches!(
        serializer.deserialize(&payload),
        Err(SerializationError::Json(_))
    ));
}

#[test]
fn test_marker_defaults_to_ordinary_on_the_wire() {
    let serializer = JsonMessageSerializer;
    let payload = Bytes::from(r#"[{"type_name":"Greeting","body":"Hello"}]"#);
    let decoded = serializer.deserialize(&payload).unwrap();
    assert_eq!(decoded[0].marker, PayloadMarker::Ordinary);
    assert_eq!(decoded[0].body, json!("Hello"));
}
