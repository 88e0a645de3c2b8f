//! Tests for the message logging module

use super::*;
use crate::events::TransportEvents;
use carrier_queue::{InMemoryQueueEngine, QueueName};
use serde_json::json;

fn log_endpoint() -> Endpoint {
    Endpoint::parse("carrier://localhost:2200/orders_log").unwrap()
}

fn info(message_id: Uuid) -> crate::context::CurrentMessageInformation {
    crate::context::CurrentMessageInformation {
        message_id: Some(message_id),
        source: Some(Endpoint::parse("carrier://peer:2200/orders").unwrap()),
        destination: Some(Endpoint::parse("carrier://localhost:2200/orders").unwrap()),
        all_messages: Arc::new(vec![LogicalMessage::new("Greeting", json!("Hello"))]),
        current_message: Some(LogicalMessage::new("Greeting", json!("Hello"))),
        transport_message_id: None,
    }
}

async fn drain_records(
    engine: &Arc<InMemoryQueueEngine>,
) -> Vec<AuditRecord> {
    engine
        .browse(&QueueName::new("orders_log").unwrap())
        .await
        .unwrap()
        .iter()
        .map(|message| serde_json::from_slice(&message.payload).unwrap())
        .collect()
}

async fn module_under_test() -> (
    Arc<InMemoryQueueEngine>,
    Arc<TransportEvents>,
    MessageLoggingModule,
) {
    let engine = Arc::new(InMemoryQueueEngine::default());
    let events = Arc::new(TransportEvents::new());
    let module = MessageLoggingModule::init(
        engine.clone(),
        &events,
        log_endpoint(),
        TransactionOptions::default(),
    )
    .await
    .unwrap();
    (engine, events, module)
}

#[tokio::test]
async fn test_init_creates_the_log_queue() {
    let (engine, events, module) = module_under_test().await;
    assert!(engine
        .browse(&QueueName::new("orders_log").unwrap())
        .await
        .unwrap()
        .is_empty());
    module.dispose(&events).await;
}

#[tokio::test]
async fn test_arrival_is_mirrored() {
    let (engine, events, module) = module_under_test().await;
    let id = Uuid::new_v4();

    let consumed = events.fire_message_arrived(&info(id)).unwrap();
    assert!(!consumed, "the logging module must not consume messages");

    module.flush().await;
    let records = drain_records(&engine).await;
    assert_eq!(records.len(), 1);
    match &records[0] {
        AuditRecord::MessageArrived {
            message_id,
            source,
            message,
            ..
        } => {
            assert_eq!(*message_id, Some(id));
            assert_eq!(source.as_deref(), Some("carrier://peer:2200/orders"));
            assert_eq!(message.as_ref().unwrap().type_name, "Greeting");
        }
        other => panic!("expected arrival record, got {:?}", other),
    }

    module.dispose(&events).await;
}

#[tokio::test]
async fn test_completion_carries_duration_from_arrival() {
    let (engine, events, module) = module_under_test().await;
    let id = Uuid::new_v4();

    events.fire_message_arrived(&info(id)).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    events.fire_message_processing_completed(&info(id), None);

    module.flush().await;
    let records = drain_records(&engine).await;
    assert_eq!(records.len(), 2);
    match &records[1] {
        AuditRecord::MessageProcessingCompleted {
            message_id,
            message_type,
            duration_ms,
            ..
        } => {
            assert_eq!(*message_id, Some(id));
            assert_eq!(message_type.as_deref(), Some("Greeting"));
            assert!(*duration_ms >= 20, "duration {} too short", duration_ms);
        }
        other => panic!("expected completion record, got {:?}", other),
    }

    module.dispose(&events).await;
}

#[tokio::test]
async fn test_failure_is_mirrored_with_error_text() {
    let (engine, events, module) = module_under_test().await;
    let id = Uuid::new_v4();
    let error = TransportError::Handler(Box::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        "boom",
    )));

    events.fire_message_processing_failure(&info(id), &error);

    module.flush().await;
    let records = drain_records(&engine).await;
    assert_eq!(records.len(), 1);
    match &records[0] {
        AuditRecord::MessageProcessingFailed {
            message_id,
            error,
            message,
            ..
        } => {
            assert_eq!(*message_id, Some(id));
            assert!(error.contains("boom"));
            assert!(message.is_some());
        }
        other => panic!("expected failure record, got {:?}", other),
    }

    module.dispose(&events).await;
}

#[tokio::test]
async fn test_send_and_serialization_fault_are_mirrored() {
    let (engine, events, module) = module_under_test().await;
    let id = Uuid::new_v4();

    events.fire_message_sent(&info(id));
    let fault = TransportError::Serialization(crate::error::SerializationError::EmptySequence);
    events.fire_message_serialization_exception(&info(id), &fault);

    module.flush().await;
    let records = drain_records(&engine).await;
    assert_eq!(records.len(), 2);
    assert!(matches!(records[0], AuditRecord::MessageSent { .. }));
    assert!(matches!(
        records[1],
        AuditRecord::SerializationFailure { .. }
    ));

    module.dispose(&events).await;
}

#[tokio::test]
async fn test_records_carry_dedup_keys() {
    let (engine, events, module) = module_under_test().await;

    events.fire_message_sent(&info(Uuid::new_v4()));
    events.fire_message_sent(&info(Uuid::new_v4()));
    module.flush().await;

    let raw = engine
        .browse(&QueueName::new("orders_log").unwrap())
        .await
        .unwrap();
    assert_eq!(raw.len(), 2);
    let first = raw[0].headers.get(LOG_ID_HEADER).unwrap();
    let second = raw[1].headers.get(LOG_ID_HEADER).unwrap();
    assert!(Uuid::parse_str(first).is_ok());
    assert_ne!(first, second);

    module.dispose(&events).await;
}

#[tokio::test]
async fn test_dispose_unsubscribes() {
    let (engine, events, module) = module_under_test().await;
    module.dispose(&events).await;

    events.fire_message_sent(&info(Uuid::new_v4()));
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(drain_records(&engine).await.is_empty());
}
