//! Per-message dispatch: classify, deserialize, fan out, resolve.
//!
//! Every inbound message gets exactly one terminal fate per transaction:
//! consumed (commit), discarded (moved to the `discarded` sub-queue and
//! committed), errored (moved to `errors` and committed), or retried
//! (rolled back). Errors inside a dispatch are funnelled into the
//! completion step and converted to event notifications; they never
//! unwind into the worker loop.

use crate::context::CurrentMessageInformation;
use crate::error::TransportError;
use crate::error_action::{ErrorAction, FailureDisposition};
use crate::events::TransportEvents;
use crate::serializer::{LogicalMessage, MessageSerializer};
use carrier_queue::{
    Endpoint, QueueTransaction, ReceivedMessage, SubQueue, TransportMessage,
};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub(crate) struct Dispatcher {
    events: Arc<TransportEvents>,
    serializer: Arc<dyn MessageSerializer>,
    error_action: Arc<ErrorAction>,
    local_endpoint: Endpoint,
}

impl Dispatcher {
    pub(crate) fn new(
        events: Arc<TransportEvents>,
        serializer: Arc<dyn MessageSerializer>,
        error_action: Arc<ErrorAction>,
        local_endpoint: Endpoint,
    ) -> Self {
        Self {
            events,
            serializer,
            error_action,
            local_endpoint,
        }
    }

    /// Dispatch a received message and resolve its transaction.
    ///
    /// Administrative messages go through the administrative event pair
    /// and skip the pre-commit hook.
    pub(crate) async fn process_message(
        &self,
        received: ReceivedMessage,
        tx: QueueTransaction,
        administrative: bool,
    ) {
        match self.serializer.deserialize(&received.message.payload) {
            Err(e) => {
                let info = self.untrusted_info(&received);
                let fault = TransportError::from(e);
                // Best-effort notification; the dispatch still fails so
                // the error action sees the message
                self.events
                    .fire_message_serialization_exception(&info, &fault);
                self.resolve(info, Some(fault), &received, tx, administrative)
                    .await;
            }
            Ok(messages) => {
                let all = Arc::new(messages);
                let mut failure: Option<TransportError> = None;
                let mut info = self.info_for(&received, all.clone(), None);

                for message in all.iter() {
                    info = self.info_for(&received, all.clone(), Some(message.clone()));
                    let consumed = if administrative {
                        self.events.fire_administrative_message_arrived(&info)
                    } else {
                        self.events.fire_message_arrived(&info)
                    };

                    match consumed {
                        Ok(true) => {}
                        Ok(false) => {
                            if let Err(e) = self.retain_discarded(&received, message, &tx) {
                                failure = Some(e);
                                break;
                            }
                        }
                        Err(e) => {
                            failure = Some(TransportError::Handler(e));
                            break;
                        }
                    }
                }

                self.resolve(info, failure, &received, tx, administrative)
                    .await;
            }
        }
    }

    /// Re-send a message nobody consumed to the `discarded` sub-queue so
    /// it stays retrievable for audit
    fn retain_discarded(
        &self,
        received: &ReceivedMessage,
        message: &LogicalMessage,
        tx: &QueueTransaction,
    ) -> Result<(), TransportError> {
        let payload = self.serializer.serialize(std::slice::from_ref(message))?;
        let mut discarded = TransportMessage::new(payload);
        discarded.headers = received.message.headers.clone();
        tx.enqueue(
            self.local_endpoint.with_subqueue(SubQueue::Discarded),
            discarded,
        );
        debug!(
            message_id = ?received.message.message_id(),
            type_name = %message.type_name,
            "no consumer, message retained in discarded sub-queue"
        );
        Ok(())
    }

    /// The completion step: commit on success, otherwise decide between
    /// retry and quarantine, then notify subscribers.
    async fn resolve(
        &self,
        info: CurrentMessageInformation,
        failure: Option<TransportError>,
        received: &ReceivedMessage,
        tx: QueueTransaction,
        administrative: bool,
    ) {
        let mut final_error = failure;

        if final_error.is_none() {
            if !administrative {
                if let Err(e) = self.events.fire_before_message_transaction_commit(&info) {
                    final_error = Some(TransportError::Handler(e));
                }
            }
            if final_error.is_none() {
                if let Err(e) = tx.commit().await {
                    final_error = Some(e.into());
                }
            }
        }

        match final_error {
            None => {
                self.error_action.reset(self.failure_key(received));
                if administrative {
                    self.events
                        .fire_administrative_message_processing_completed(&info, None);
                } else {
                    self.events.fire_message_processing_completed(&info, None);
                }
            }
            Some(err) => {
                self.settle_failure(received, &tx).await;
                self.events.fire_message_processing_failure(&info, &err);
                if administrative {
                    self.events
                        .fire_administrative_message_processing_completed(&info, Some(&err));
                } else {
                    self.events
                        .fire_message_processing_completed(&info, Some(&err));
                }
            }
        }
    }

    /// Consult the error action and give the failed message its fate
    async fn settle_failure(&self, received: &ReceivedMessage, tx: &QueueTransaction) {
        let key = self.failure_key(received);
        let disposition = self
            .error_action
            .register_failure(key, received.message.retries());

        match disposition {
            FailureDisposition::Poison { retries } => {
                if tx.is_resolved() {
                    warn!(
                        message_id = %key,
                        "poison move deferred, transaction already resolved"
                    );
                    return;
                }
                let mut poison = received.message.clone();
                poison.set_retries(retries);
                tx.move_to_subqueue(received.receipt.clone(), SubQueue::Errors, poison);
                match tx.commit().await {
                    Ok(()) => warn!(
                        message_id = %key,
                        retries,
                        "message quarantined in errors sub-queue"
                    ),
                    Err(e) => error!(
                        message_id = %key,
                        error = %e,
                        "failed to quarantine poison message"
                    ),
                }
            }
            FailureDisposition::Retry { attempt } => {
                if !tx.is_resolved() {
                    if let Err(e) = tx.rollback().await {
                        error!(message_id = %key, error = %e, "rollback failed");
                    }
                }
                debug!(
                    message_id = %key,
                    attempt,
                    "dispatch failed, message returns for retry"
                );
            }
        }
    }

    fn failure_key(&self, received: &ReceivedMessage) -> Uuid {
        received
            .message
            .message_id()
            .unwrap_or_else(|| received.transport_id.as_uuid())
    }

    fn info_for(
        &self,
        received: &ReceivedMessage,
        all: Arc<Vec<LogicalMessage>>,
        current: Option<LogicalMessage>,
    ) -> CurrentMessageInformation {
        CurrentMessageInformation {
            message_id: received.message.message_id(),
            source: received.message.source(),
            destination: Some(self.local_endpoint.clone()),
            all_messages: all,
            current_message: current,
            transport_message_id: Some(received.transport_id),
        }
    }

    /// Context for a message whose payload could not be decoded; only the
    /// engine-stamped `from` header is trusted for the source
    fn untrusted_info(&self, received: &ReceivedMessage) -> CurrentMessageInformation {
        CurrentMessageInformation {
            message_id: received.message.message_id(),
            source: received
                .message
                .from_endpoint()
                .or_else(|| received.message.source()),
            destination: Some(self.local_endpoint.clone()),
            all_messages: Arc::new(Vec::new()),
            current_message: None,
            transport_message_id: Some(received.transport_id),
        }
    }
}
