//! The queue-engine contract.
//!
//! The transport talks to its durable store exclusively through
//! [`QueueEngine`]. Real engines own page-level storage and the wire
//! protocol to remote peers; the in-memory engine in
//! [`memory`](crate::memory) implements the same contract for tests and
//! development.

use crate::endpoint::{Endpoint, QueueName, SubQueue};
use crate::error::QueueError;
use crate::message::{MessageId, ReceiptHandle, ReceivedMessage, TransportMessage};
use crate::transaction::QueueTransaction;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Contract implemented by durable queue engines.
///
/// Dequeue visibility is bound to transaction resolution: a message taken
/// by [`receive`](Self::receive) stays invisible while its receipt lock
/// holds, leaves the queue when the receipt is completed, and becomes
/// visible again when the receipt is abandoned or its lock expires.
#[async_trait]
pub trait QueueEngine: Send + Sync {
    /// Create the named queue if it does not exist
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Create a sub-queue of the named queue if it does not exist
    async fn ensure_subqueue(&self, queue: &QueueName, subqueue: SubQueue)
        -> Result<(), QueueError>;

    /// Enqueue a message at the destination endpoint.
    ///
    /// When the endpoint addresses a sub-queue the message lands there
    /// directly. Returns the engine-assigned id of the stored message.
    async fn send(
        &self,
        destination: &Endpoint,
        message: TransportMessage,
    ) -> Result<MessageId, QueueError>;

    /// Inspect the head of the queue without consuming it.
    ///
    /// Blocks up to `timeout`; `Ok(None)` is a benign timeout. Returns
    /// [`QueueError::Shutdown`] when the engine is being torn down.
    async fn peek(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<TransportMessage>, QueueError>;

    /// Take the head of the queue under the given transaction.
    ///
    /// The received message is locked invisible and its receipt recorded
    /// on `tx`; it leaves the queue only if `tx` commits. `Ok(None)` means
    /// a peer worker won the race within `timeout`.
    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
        tx: &QueueTransaction,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Resolve a receipt: the message is gone for good
    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Resolve a receipt: the message returns to the head of its queue
    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Resolve a receipt by parking `message` in a sub-queue.
    ///
    /// The caller passes the message to park so headers stamped during
    /// processing (retry counters, send-times) survive the move.
    async fn move_to_subqueue(
        &self,
        receipt: &ReceiptHandle,
        subqueue: SubQueue,
        message: TransportMessage,
    ) -> Result<(), QueueError>;

    /// Atomically move a parked message back to the main queue.
    ///
    /// The message is located by its `id` header; all headers are
    /// preserved. Returns `false` when no such message is parked.
    async fn requeue_from_subqueue(
        &self,
        queue: &QueueName,
        subqueue: SubQueue,
        id: Uuid,
    ) -> Result<bool, QueueError>;

    /// Snapshot the visible contents of the main queue
    async fn browse(&self, queue: &QueueName) -> Result<Vec<TransportMessage>, QueueError>;

    /// Snapshot the contents of a sub-queue
    async fn browse_subqueue(
        &self,
        queue: &QueueName,
        subqueue: SubQueue,
    ) -> Result<Vec<TransportMessage>, QueueError>;

    /// Tear the engine down.
    ///
    /// Without `force`, fails with [`QueueError::Busy`] while receipts are
    /// still in flight so callers can yield to in-flight workers. With
    /// `force`, tears down regardless. After teardown every peek/receive
    /// returns [`QueueError::Shutdown`].
    async fn dispose(&self, force: bool) -> Result<(), QueueError>;
}
