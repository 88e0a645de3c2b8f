//! Tests for the in-memory queue engine

use super::*;
use crate::transaction::{QueueTransaction, TransactionOptions};
use bytes::Bytes;
use std::sync::Arc;

fn queue() -> QueueName {
    QueueName::new("orders").unwrap()
}

fn endpoint() -> Endpoint {
    Endpoint::parse("carrier://localhost:2200/orders").unwrap()
}

fn message(body: &str) -> TransportMessage {
    let mut message = TransportMessage::new(Bytes::from(body.to_string()));
    message.set_message_id(Uuid::new_v4());
    message
}

async fn engine() -> Arc<InMemoryQueueEngine> {
    let engine = Arc::new(InMemoryQueueEngine::default());
    engine.ensure_queue(&queue()).await.unwrap();
    for sub in SubQueue::ALL {
        engine.ensure_subqueue(&queue(), sub).await.unwrap();
    }
    engine
}

fn transaction(engine: &Arc<InMemoryQueueEngine>) -> QueueTransaction {
    QueueTransaction::begin(engine.clone() as Arc<dyn QueueEngine>, TransactionOptions::default())
}

// ============================================================================
// Send / Receive Tests
// ============================================================================

#[tokio::test]
async fn test_send_then_receive_fifo_order() {
    let engine = engine().await;
    engine.send(&endpoint(), message("first")).await.unwrap();
    engine.send(&endpoint(), message("second")).await.unwrap();

    let tx = transaction(&engine);
    let first = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();
    let second = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.message.payload, Bytes::from("first"));
    assert_eq!(second.message.payload, Bytes::from("second"));
    assert_eq!(first.delivery_count, 1);
    tx.commit().await.unwrap();

    assert!(engine.browse(&queue()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_receive_timeout_returns_none() {
    let engine = engine().await;
    let tx = transaction(&engine);
    let received = engine
        .receive(&queue(), Duration::from_millis(30), &tx)
        .await
        .unwrap();
    assert!(received.is_none());
}

#[tokio::test]
async fn test_peek_does_not_consume() {
    let engine = engine().await;
    engine.send(&endpoint(), message("only")).await.unwrap();

    let peeked = engine
        .peek(&queue(), Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(peeked.payload, Bytes::from("only"));
    assert_eq!(engine.browse(&queue()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_peek_times_out_on_empty_queue() {
    let engine = engine().await;
    let peeked = engine.peek(&queue(), Duration::from_millis(30)).await.unwrap();
    assert!(peeked.is_none());
}

#[tokio::test]
async fn test_send_to_subqueue_endpoint() {
    let engine = engine().await;
    let errors = endpoint().with_subqueue(SubQueue::Errors);
    engine.send(&errors, message("poison")).await.unwrap();

    assert!(engine.browse(&queue()).await.unwrap().is_empty());
    let parked = engine
        .browse_subqueue(&queue(), SubQueue::Errors)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
}

#[tokio::test]
async fn test_send_stamps_from_header() {
    let engine = engine().await;
    let mut outbound = message("hello");
    outbound.set_source(&Endpoint::parse("carrier://peer:2200/replies").unwrap());
    engine.send(&endpoint(), outbound).await.unwrap();

    let stored = engine.browse(&queue()).await.unwrap().remove(0);
    assert_eq!(
        stored.headers.get(headers::FROM).unwrap(),
        "carrier://peer:2200/replies"
    );
}

#[tokio::test]
async fn test_queue_full_rejects_send() {
    let engine = Arc::new(InMemoryQueueEngine::new(InMemoryEngineConfig {
        max_queue_size: 1,
        ..Default::default()
    }));
    engine.ensure_queue(&queue()).await.unwrap();
    engine.send(&endpoint(), message("fits")).await.unwrap();

    let error = engine.send(&endpoint(), message("overflows")).await.unwrap_err();
    assert!(matches!(error, QueueError::QueueFull { .. }));
}

// ============================================================================
// Receipt Resolution Tests
// ============================================================================

#[tokio::test]
async fn test_abandon_returns_message_to_head() {
    let engine = engine().await;
    engine.send(&endpoint(), message("retry-me")).await.unwrap();

    let tx = transaction(&engine);
    let received = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();
    tx.rollback().await.unwrap();

    let tx = transaction(&engine);
    let again = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.message.payload, received.message.payload);
    assert_eq!(again.delivery_count, 2);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_complete_twice_fails() {
    let engine = engine().await;
    engine.send(&endpoint(), message("once")).await.unwrap();

    let tx = transaction(&engine);
    let received = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();
    engine.complete(&received.receipt).await.unwrap();

    let error = engine.complete(&received.receipt).await.unwrap_err();
    assert!(matches!(error, QueueError::MessageNotFound { .. }));
}

#[tokio::test]
async fn test_expired_lock_reclaims_message() {
    let engine = Arc::new(InMemoryQueueEngine::new(InMemoryEngineConfig {
        lock_duration: Duration::from_millis(40),
        ..Default::default()
    }));
    engine.ensure_queue(&queue()).await.unwrap();
    engine.send(&endpoint(), message("crashed")).await.unwrap();

    // Take the message and never resolve the transaction
    let tx = QueueTransaction::begin(
        engine.clone() as Arc<dyn QueueEngine>,
        TransactionOptions::default(),
    );
    engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();
    std::mem::forget(tx);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let tx = QueueTransaction::begin(
        engine.clone() as Arc<dyn QueueEngine>,
        TransactionOptions::default(),
    );
    let reclaimed = engine
        .receive(&queue(), Duration::from_millis(200), &tx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.message.payload, Bytes::from("crashed"));
    assert_eq!(reclaimed.delivery_count, 2);
    tx.commit().await.unwrap();
}

// ============================================================================
// Sub-queue Move Tests
// ============================================================================

#[tokio::test]
async fn test_move_to_subqueue_keeps_stamped_headers() {
    let engine = engine().await;
    engine.send(&endpoint(), message("poison")).await.unwrap();

    let tx = transaction(&engine);
    let received = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();

    let mut stamped = received.message.clone();
    stamped.set_retries(5);
    engine
        .move_to_subqueue(&received.receipt, SubQueue::Errors, stamped)
        .await
        .unwrap();

    let parked = engine
        .browse_subqueue(&queue(), SubQueue::Errors)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].retries(), 5);
    assert!(engine.browse(&queue()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_requeue_from_subqueue_preserves_headers() {
    let engine = engine().await;
    let id = Uuid::new_v4();
    let mut parked = message("deferred");
    parked.set_message_id(id);
    parked.set_retries(2);
    engine
        .send(&endpoint().with_subqueue(SubQueue::Timeout), parked)
        .await
        .unwrap();

    let moved = engine
        .requeue_from_subqueue(&queue(), SubQueue::Timeout, id)
        .await
        .unwrap();
    assert!(moved);

    let visible = engine.browse(&queue()).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].message_id(), Some(id));
    assert_eq!(visible[0].retries(), 2);
    assert!(engine
        .browse_subqueue(&queue(), SubQueue::Timeout)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_requeue_missing_message_returns_false() {
    let engine = engine().await;
    let moved = engine
        .requeue_from_subqueue(&queue(), SubQueue::Timeout, Uuid::new_v4())
        .await
        .unwrap();
    assert!(!moved);
}

// ============================================================================
// Teardown Tests
// ============================================================================

#[tokio::test]
async fn test_peek_after_dispose_reports_shutdown() {
    let engine = engine().await;
    engine.dispose(false).await.unwrap();

    let error = engine
        .peek(&queue(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(error.is_shutdown());
}

#[tokio::test]
async fn test_dispose_refuses_while_messages_in_flight() {
    let engine = engine().await;
    engine.send(&endpoint(), message("busy")).await.unwrap();

    let tx = transaction(&engine);
    let received = engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();

    let error = engine.dispose(false).await.unwrap_err();
    assert!(matches!(error, QueueError::Busy { .. }));

    engine.complete(&received.receipt).await.unwrap();
    engine.dispose(false).await.unwrap();
}

#[tokio::test]
async fn test_forced_dispose_tears_down_despite_in_flight() {
    let engine = engine().await;
    engine.send(&endpoint(), message("busy")).await.unwrap();

    let tx = transaction(&engine);
    engine
        .receive(&queue(), Duration::from_millis(100), &tx)
        .await
        .unwrap()
        .unwrap();

    engine.dispose(true).await.unwrap();
    let error = engine
        .peek(&queue(), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(error.is_shutdown());
}

#[tokio::test]
async fn test_receive_from_unknown_queue_fails() {
    let engine = Arc::new(InMemoryQueueEngine::default());
    let tx = transaction(&engine);
    let error = engine
        .receive(
            &QueueName::new("missing").unwrap(),
            Duration::from_millis(10),
            &tx,
        )
        .await
        .unwrap_err();
    assert!(matches!(error, QueueError::QueueNotFound { .. }));
}
