//! Message logging module.
//!
//! Subscribes to transport lifecycle events and mirrors each one as a
//! typed audit record onto a dedicated log queue. Failure records are
//! written under their own single-message transaction, distinct from the
//! dispatch transaction, so the audit survives even when the dispatch
//! aborts; everything else is written best-effort.

use crate::error::TransportError;
use crate::events::{SubscriptionId, TransportEvents};
use crate::serializer::LogicalMessage;
use carrier_queue::{
    Endpoint, MessageType, QueueEngine, QueueTransaction, TransactionOptions, TransportMessage,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

/// Header carrying the audit stream's deduplication key
pub const LOG_ID_HEADER: &str = "log-id";

// ============================================================================
// Audit records
// ============================================================================

/// Typed audit record mirrored onto the log queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    MessageArrived {
        message_id: Option<Uuid>,
        source: Option<String>,
        message: Option<LogicalMessage>,
        occurred_at: DateTime<Utc>,
    },
    MessageProcessingCompleted {
        message_id: Option<Uuid>,
        source: Option<String>,
        message_type: Option<String>,
        occurred_at: DateTime<Utc>,
        duration_ms: i64,
    },
    MessageProcessingFailed {
        message_id: Option<Uuid>,
        source: Option<String>,
        message_type: Option<String>,
        error: String,
        message: Option<LogicalMessage>,
        occurred_at: DateTime<Utc>,
    },
    MessageSent {
        message_id: Option<Uuid>,
        source: Option<String>,
        destination: Option<String>,
        messages: Vec<LogicalMessage>,
        message_type: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    SerializationFailure {
        message_id: Option<Uuid>,
        source: Option<String>,
        error: String,
        occurred_at: DateTime<Utc>,
    },
}

pub(crate) enum Command {
    Write { record: AuditRecord, durable: bool },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

// ============================================================================
// MessageLoggingModule
// ============================================================================

/// Event-bus subscriber that serializes audit records onto a log queue
pub struct MessageLoggingModule {
    sender: mpsc::UnboundedSender<Command>,
    writer: Option<JoinHandle<()>>,
    subscriptions: Vec<SubscriptionId>,
}

impl MessageLoggingModule {
    /// Ensure the log queue exists, subscribe to the lifecycle events,
    /// and start the background writer.
    pub async fn init(
        engine: Arc<dyn QueueEngine>,
        events: &TransportEvents,
        log_endpoint: Endpoint,
        options: TransactionOptions,
    ) -> Result<Self, TransportError> {
        engine.ensure_queue(log_endpoint.queue()).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(
            engine.clone(),
            log_endpoint.clone(),
            options,
            receiver,
        ));

        // Arrival timestamps, keyed by message id, shared between the
        // arrival and completion subscribers
        let arrivals: Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut subscriptions = Vec::new();

        {
            let sender = sender.clone();
            let arrivals = arrivals.clone();
            subscriptions.push(events.on_message_arrived(Arc::new(move |info| {
                let now = Utc::now();
                if let (Some(id), Ok(mut arrivals)) = (info.message_id, arrivals.lock()) {
                    arrivals.entry(id).or_insert(now);
                }
                let _ = sender.send(Command::Write {
                    record: AuditRecord::MessageArrived {
                        message_id: info.message_id,
                        source: info.source.as_ref().map(Endpoint::to_string),
                        message: info.current_message.clone(),
                        occurred_at: now,
                    },
                    durable: false,
                });
                // The logging module observes, it never consumes
                Ok(false)
            })));
        }

        {
            let sender = sender.clone();
            let arrivals = arrivals.clone();
            subscriptions.push(events.on_message_processing_completed(Arc::new(
                move |info, _error| {
                    let now = Utc::now();
                    let arrived_at = info.message_id.and_then(|id| {
                        arrivals.lock().ok().and_then(|mut arrivals| arrivals.remove(&id))
                    });
                    let duration_ms = arrived_at
                        .map(|at| (now - at).num_milliseconds())
                        .unwrap_or(0);
                    let _ = sender.send(Command::Write {
                        record: AuditRecord::MessageProcessingCompleted {
                            message_id: info.message_id,
                            source: info.source.as_ref().map(Endpoint::to_string),
                            message_type: info.message_type_name().map(str::to_string),
                            occurred_at: now,
                            duration_ms,
                        },
                        durable: false,
                    });
                    Ok(())
                },
            )));
        }

        {
            let sender = sender.clone();
            subscriptions.push(events.on_message_processing_failure(Arc::new(
                move |info, error| {
                    let _ = sender.send(Command::Write {
                        record: AuditRecord::MessageProcessingFailed {
                            message_id: info.message_id,
                            source: info.source.as_ref().map(Endpoint::to_string),
                            message_type: info.message_type_name().map(str::to_string),
                            error: error.to_string(),
                            message: info.current_message.clone(),
                            occurred_at: Utc::now(),
                        },
                        durable: true,
                    });
                    Ok(())
                },
            )));
        }

        {
            let sender = sender.clone();
            subscriptions.push(events.on_message_sent(Arc::new(move |info| {
                let _ = sender.send(Command::Write {
                    record: AuditRecord::MessageSent {
                        message_id: info.message_id,
                        source: info.source.as_ref().map(Endpoint::to_string),
                        destination: info.destination.as_ref().map(Endpoint::to_string),
                        messages: info.all_messages.as_ref().clone(),
                        message_type: info
                            .all_messages
                            .first()
                            .map(|m| m.type_name.clone()),
                        occurred_at: Utc::now(),
                    },
                    durable: false,
                });
                Ok(())
            })));
        }

        {
            let sender = sender.clone();
            subscriptions.push(events.on_message_serialization_exception(Arc::new(
                move |info, error| {
                    let _ = sender.send(Command::Write {
                        record: AuditRecord::SerializationFailure {
                            message_id: info.message_id,
                            source: info.source.as_ref().map(Endpoint::to_string),
                            error: error.to_string(),
                            occurred_at: Utc::now(),
                        },
                        durable: false,
                    });
                    Ok(())
                },
            )));
        }

        Ok(Self {
            sender,
            writer: Some(writer),
            subscriptions,
        })
    }

    /// Channel handle used by the transport to flush without holding the
    /// module lock across an await
    pub(crate) fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.sender.clone()
    }

    /// Wait until every record enqueued so far has been written
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Unsubscribe from the event bus and stop the writer
    pub async fn dispose(mut self, events: &TransportEvents) {
        for subscription in self.subscriptions.drain(..) {
            events.unsubscribe(subscription);
        }
        let _ = self.sender.send(Command::Shutdown);
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                warn!(error = %e, "log writer ended abnormally");
            }
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

async fn run_writer(
    engine: Arc<dyn QueueEngine>,
    log_endpoint: Endpoint,
    options: TransactionOptions,
    mut receiver: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Write { record, durable } => {
                if let Err(e) =
                    write_record(&engine, &log_endpoint, &options, &record, durable).await
                {
                    error!(error = %e, "failed to write audit record");
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown => break,
        }
    }
}

async fn write_record(
    engine: &Arc<dyn QueueEngine>,
    log_endpoint: &Endpoint,
    options: &TransactionOptions,
    record: &AuditRecord,
    durable: bool,
) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(record).map_err(crate::error::SerializationError::from)?;
    let mut message = TransportMessage::new(Bytes::from(payload));
    message.set_message_id(Uuid::new_v4());
    message.set_message_type(MessageType::Administrative);
    message
        .headers
        .insert(LOG_ID_HEADER.to_string(), Uuid::new_v4().to_string());

    if durable {
        let tx = QueueTransaction::begin(engine.clone(), options.clone());
        tx.enqueue(log_endpoint.clone(), message);
        tx.commit().await?;
    } else {
        engine.send(log_endpoint, message).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
