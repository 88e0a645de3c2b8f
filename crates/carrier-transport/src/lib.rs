//! # Carrier Transport
//!
//! Durable, transactional message-bus transport with at-least-once
//! delivery.
//!
//! A fixed pool of workers peeks and receives from a persistent local
//! queue under a local transaction, dispatches each message to consumer
//! subscribers, and commits or rolls back atomically with the queue
//! state. Failed messages retry until the error action quarantines them
//! in the `errors` sub-queue; unconsumed messages are retained in
//! `discarded`; future-dated messages park in `timeout` until their
//! send-time elapses. A logging module mirrors lifecycle events as typed
//! audit records onto a dedicated log queue.
//!
//! The durable store is injected through the
//! [`QueueEngine`](carrier_queue::QueueEngine) contract; payload encoding
//! through [`MessageSerializer`].

pub mod config;
pub mod context;
mod dispatcher;
pub mod error;
pub mod error_action;
pub mod events;
pub mod logging;
pub mod serializer;
pub mod timeout;
pub mod transport;

pub use config::TransportConfig;
pub use context::CurrentMessageInformation;
pub use error::{BoxError, SerializationError, TransportError};
pub use error_action::{ErrorAction, FailureDisposition};
pub use events::{
    ArrivalHandler, CompletionHandler, FailureHandler, PreCommitHandler, SentHandler,
    StartedHandler, SubscriptionId, TransportEvents,
};
pub use logging::{AuditRecord, MessageLoggingModule, LOG_ID_HEADER};
pub use serializer::{JsonMessageSerializer, LogicalMessage, MessageSerializer, PayloadMarker};
pub use timeout::TimeoutScheduler;
pub use transport::Transport;
