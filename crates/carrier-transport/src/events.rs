//! Lifecycle event bus.
//!
//! A small in-process registry of typed slots, one per lifecycle event.
//! Each slot has a statically known signature; dispatch iterates over a
//! snapshot so subscribing and unsubscribing stay safe while the
//! transport is running.
//!
//! Subscribers observe events strictly in the order
//! `MessageArrived` → (`BeforeMessageTransactionCommit` on success) →
//! `MessageProcessingCompleted`, with `MessageProcessingFailure` firing
//! in place of the pre-commit hook on failure.

use crate::context::CurrentMessageInformation;
use crate::error::{BoxError, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

// ============================================================================
// Handler signatures
// ============================================================================

/// Fired once when the transport has started
pub type StartedHandler = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// Consumes an arrived message; `true` means "handled"
pub type ArrivalHandler =
    Arc<dyn Fn(&CurrentMessageInformation) -> Result<bool, BoxError> + Send + Sync>;

/// Observes the end of a dispatch, successful or not
pub type CompletionHandler = Arc<
    dyn Fn(&CurrentMessageInformation, Option<&TransportError>) -> Result<(), BoxError>
        + Send
        + Sync,
>;

/// Observes a failed dispatch or a serialization fault
pub type FailureHandler =
    Arc<dyn Fn(&CurrentMessageInformation, &TransportError) -> Result<(), BoxError> + Send + Sync>;

/// Observes a committed outbound send
pub type SentHandler =
    Arc<dyn Fn(&CurrentMessageInformation) -> Result<(), BoxError> + Send + Sync>;

/// Runs between successful dispatch and transaction commit; an error
/// fails the dispatch
pub type PreCommitHandler =
    Arc<dyn Fn(&CurrentMessageInformation) -> Result<(), BoxError> + Send + Sync>;

/// Token returned by every subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ============================================================================
// Slot
// ============================================================================

/// One ordered list of subscribers, iterated by snapshot
struct Slot<H: Clone> {
    entries: RwLock<Vec<(SubscriptionId, H)>>,
}

impl<H: Clone> Slot<H> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, id: SubscriptionId, handler: H) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push((id, handler));
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                entries.len() != before
            }
            Err(_) => false,
        }
    }

    fn snapshot(&self) -> Vec<H> {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// TransportEvents
// ============================================================================

/// Registry of lifecycle event slots
pub struct TransportEvents {
    next_id: AtomicU64,
    started: Slot<StartedHandler>,
    message_arrived: Slot<ArrivalHandler>,
    administrative_message_arrived: Slot<ArrivalHandler>,
    message_processing_completed: Slot<CompletionHandler>,
    administrative_message_processing_completed: Slot<CompletionHandler>,
    message_processing_failure: Slot<FailureHandler>,
    message_serialization_exception: Slot<FailureHandler>,
    message_sent: Slot<SentHandler>,
    before_message_transaction_commit: Slot<PreCommitHandler>,
}

impl Default for TransportEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportEvents {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            started: Slot::new(),
            message_arrived: Slot::new(),
            administrative_message_arrived: Slot::new(),
            message_processing_completed: Slot::new(),
            administrative_message_processing_completed: Slot::new(),
            message_processing_failure: Slot::new(),
            message_serialization_exception: Slot::new(),
            message_sent: Slot::new(),
            before_message_transaction_commit: Slot::new(),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    pub fn on_started(&self, handler: StartedHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.started.subscribe(id, handler);
        id
    }

    pub fn on_message_arrived(&self, handler: ArrivalHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.message_arrived.subscribe(id, handler);
        id
    }

    pub fn on_administrative_message_arrived(&self, handler: ArrivalHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.administrative_message_arrived.subscribe(id, handler);
        id
    }

    pub fn on_message_processing_completed(&self, handler: CompletionHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.message_processing_completed.subscribe(id, handler);
        id
    }

    pub fn on_administrative_message_processing_completed(
        &self,
        handler: CompletionHandler,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.administrative_message_processing_completed
            .subscribe(id, handler);
        id
    }

    pub fn on_message_processing_failure(&self, handler: FailureHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.message_processing_failure.subscribe(id, handler);
        id
    }

    pub fn on_message_serialization_exception(&self, handler: FailureHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.message_serialization_exception.subscribe(id, handler);
        id
    }

    pub fn on_message_sent(&self, handler: SentHandler) -> SubscriptionId {
        let id = self.allocate_id();
        self.message_sent.subscribe(id, handler);
        id
    }

    pub fn on_before_message_transaction_commit(
        &self,
        handler: PreCommitHandler,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.before_message_transaction_commit.subscribe(id, handler);
        id
    }

    /// Remove a subscription from whichever slot holds it
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.started.unsubscribe(id)
            || self.message_arrived.unsubscribe(id)
            || self.administrative_message_arrived.unsubscribe(id)
            || self.message_processing_completed.unsubscribe(id)
            || self
                .administrative_message_processing_completed
                .unsubscribe(id)
            || self.message_processing_failure.unsubscribe(id)
            || self.message_serialization_exception.unsubscribe(id)
            || self.message_sent.unsubscribe(id)
            || self.before_message_transaction_commit.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub(crate) fn fire_started(&self) {
        for handler in self.started.snapshot() {
            if let Err(e) = handler() {
                warn!(error = %e, "started subscriber failed");
            }
        }
    }

    /// Fan an arrival out to its subscribers, folding consumption with
    /// logical OR. The first subscriber error aborts the fan-out.
    pub(crate) fn fire_message_arrived(
        &self,
        info: &CurrentMessageInformation,
    ) -> Result<bool, BoxError> {
        Self::fold_arrival(self.message_arrived.snapshot(), info)
    }

    pub(crate) fn fire_administrative_message_arrived(
        &self,
        info: &CurrentMessageInformation,
    ) -> Result<bool, BoxError> {
        Self::fold_arrival(self.administrative_message_arrived.snapshot(), info)
    }

    fn fold_arrival(
        handlers: Vec<ArrivalHandler>,
        info: &CurrentMessageInformation,
    ) -> Result<bool, BoxError> {
        let mut consumed = false;
        for handler in handlers {
            consumed |= handler(info)?;
        }
        Ok(consumed)
    }

    pub(crate) fn fire_message_processing_completed(
        &self,
        info: &CurrentMessageInformation,
        error: Option<&TransportError>,
    ) {
        Self::fan_completion(self.message_processing_completed.snapshot(), info, error);
    }

    pub(crate) fn fire_administrative_message_processing_completed(
        &self,
        info: &CurrentMessageInformation,
        error: Option<&TransportError>,
    ) {
        Self::fan_completion(
            self.administrative_message_processing_completed.snapshot(),
            info,
            error,
        );
    }

    fn fan_completion(
        handlers: Vec<CompletionHandler>,
        info: &CurrentMessageInformation,
        error: Option<&TransportError>,
    ) {
        for handler in handlers {
            if let Err(e) = handler(info, error) {
                warn!(error = %e, "completion subscriber failed");
            }
        }
    }

    pub(crate) fn fire_message_processing_failure(
        &self,
        info: &CurrentMessageInformation,
        error: &TransportError,
    ) {
        for handler in self.message_processing_failure.snapshot() {
            if let Err(e) = handler(info, error) {
                warn!(error = %e, "failure subscriber failed");
            }
        }
    }

    pub(crate) fn fire_message_serialization_exception(
        &self,
        info: &CurrentMessageInformation,
        error: &TransportError,
    ) {
        for handler in self.message_serialization_exception.snapshot() {
            if let Err(e) = handler(info, error) {
                warn!(error = %e, "serialization-fault subscriber failed");
            }
        }
    }

    pub(crate) fn fire_message_sent(&self, info: &CurrentMessageInformation) {
        for handler in self.message_sent.snapshot() {
            if let Err(e) = handler(info) {
                warn!(error = %e, "sent subscriber failed");
            }
        }
    }

    /// Run pre-commit hooks; the first error fails the dispatch
    pub(crate) fn fire_before_message_transaction_commit(
        &self,
        info: &CurrentMessageInformation,
    ) -> Result<(), BoxError> {
        for handler in self.before_message_transaction_commit.snapshot() {
            handler(info)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
