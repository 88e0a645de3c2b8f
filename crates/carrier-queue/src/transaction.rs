//! Explicit transaction handles for queue work.
//!
//! A [`QueueTransaction`] brackets one received message together with the
//! outbound enqueues and sub-queue moves produced while processing it.
//! Buffered operations are applied at commit; received receipts are
//! completed at commit and abandoned at rollback. A transaction that is
//! dropped unresolved is recovered by the engine's receipt-lock expiry,
//! preserving at-least-once delivery.

use crate::endpoint::{Endpoint, SubQueue};
use crate::engine::QueueEngine;
use crate::error::QueueError;
use crate::message::{ReceiptHandle, TransportMessage};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Isolation
// ============================================================================

/// Isolation level for queue transactions.
///
/// The in-memory engine serializes all state behind one lock, so every
/// level behaves serializably there; real engines map these onto their
/// store's isolation knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options carried by every transport transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    /// Upper bound on the time a commit may take
    pub timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// QueueTransaction
// ============================================================================

#[derive(Default)]
struct TxState {
    receipts: Vec<ReceiptHandle>,
    enqueues: Vec<(Endpoint, TransportMessage)>,
    moves: Vec<(ReceiptHandle, SubQueue, TransportMessage)>,
    resolved: bool,
}

/// A unit of queue work that commits or rolls back as a whole
pub struct QueueTransaction {
    engine: Arc<dyn QueueEngine>,
    options: TransactionOptions,
    state: Mutex<TxState>,
}

impl QueueTransaction {
    /// Open a transaction against the given engine
    pub fn begin(engine: Arc<dyn QueueEngine>, options: TransactionOptions) -> Self {
        Self {
            engine,
            options,
            state: Mutex::new(TxState::default()),
        }
    }

    /// Isolation level this transaction runs under
    pub fn isolation(&self) -> IsolationLevel {
        self.options.isolation
    }

    /// Check whether commit or rollback has already happened
    pub fn is_resolved(&self) -> bool {
        self.state.lock().map(|s| s.resolved).unwrap_or(true)
    }

    /// Record a receipt taken under this transaction.
    ///
    /// Called by engine implementations from
    /// [`QueueEngine::receive`](crate::engine::QueueEngine::receive).
    pub fn record_receipt(&self, receipt: ReceiptHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.receipts.push(receipt);
        }
    }

    /// Buffer an enqueue to be applied at commit
    pub fn enqueue(&self, destination: Endpoint, message: TransportMessage) {
        if let Ok(mut state) = self.state.lock() {
            state.enqueues.push((destination, message));
        }
    }

    /// Buffer a sub-queue move as the terminal fate of a received message.
    ///
    /// `message` is the message to park, carrying any headers stamped
    /// during processing.
    pub fn move_to_subqueue(
        &self,
        receipt: ReceiptHandle,
        subqueue: SubQueue,
        message: TransportMessage,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.moves.push((receipt, subqueue, message));
        }
    }

    /// Apply buffered operations and complete received receipts.
    ///
    /// On any failure the remaining receipts are abandoned so their
    /// messages become visible again; partially applied enqueues are the
    /// at-least-once cost of a mid-commit fault.
    pub async fn commit(&self) -> Result<(), QueueError> {
        let (receipts, enqueues, moves) = self.take_resolved()?;

        let work = async {
            for (destination, message) in enqueues {
                self.engine.send(&destination, message).await?;
            }
            let mut moved = Vec::with_capacity(moves.len());
            for (receipt, subqueue, message) in moves {
                self.engine
                    .move_to_subqueue(&receipt, subqueue, message)
                    .await?;
                moved.push(receipt);
            }
            for receipt in &receipts {
                if !moved.contains(receipt) {
                    self.engine.complete(receipt).await?;
                }
            }
            Ok::<_, QueueError>(())
        };

        match tokio::time::timeout(self.options.timeout, work).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.abandon_all(&receipts).await;
                Err(e)
            }
            Err(_) => {
                self.abandon_all(&receipts).await;
                Err(QueueError::Timeout {
                    duration: self.options.timeout,
                })
            }
        }
    }

    /// Abandon received receipts and discard buffered operations
    pub async fn rollback(&self) -> Result<(), QueueError> {
        let (receipts, _, _) = self.take_resolved()?;
        self.abandon_all(&receipts).await;
        Ok(())
    }

    fn take_resolved(
        &self,
    ) -> Result<
        (
            Vec<ReceiptHandle>,
            Vec<(Endpoint, TransportMessage)>,
            Vec<(ReceiptHandle, SubQueue, TransportMessage)>,
        ),
        QueueError,
    > {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::TransactionClosed)?;
        if state.resolved {
            return Err(QueueError::TransactionClosed);
        }
        state.resolved = true;
        Ok((
            std::mem::take(&mut state.receipts),
            std::mem::take(&mut state.enqueues),
            std::mem::take(&mut state.moves),
        ))
    }

    async fn abandon_all(&self, receipts: &[ReceiptHandle]) {
        for receipt in receipts {
            if let Err(e) = self.engine.abandon(receipt).await {
                warn!(receipt = %receipt.handle(), error = %e, "failed to abandon receipt");
            }
        }
    }
}

impl Drop for QueueTransaction {
    fn drop(&mut self) {
        if let Ok(state) = self.state.lock() {
            if !state.resolved && !state.receipts.is_empty() {
                warn!(
                    receipts = state.receipts.len(),
                    "transaction dropped unresolved; messages recover after lock expiry"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
