//! # Carrier Queue
//!
//! Queue adapter layer for the carrier transport.
//!
//! This crate defines the contract between the transport and its durable
//! store, plus the in-memory reference engine:
//! - Endpoint URIs with sub-queue addressing
//! - The wire-level [`TransportMessage`] and its reserved headers
//! - Explicit [`QueueTransaction`] handles bracketing receive, enqueue,
//!   and sub-queue moves
//! - The [`QueueEngine`] trait real engines implement
//! - [`InMemoryQueueEngine`], a fully functional engine with visibility
//!   timeouts for tests and development

pub mod endpoint;
pub mod engine;
pub mod error;
pub mod memory;
pub mod message;
pub mod transaction;

pub use endpoint::{Endpoint, QueueName, SubQueue, DEFAULT_PORT};
pub use engine::QueueEngine;
pub use error::{QueueError, ValidationError};
pub use memory::{InMemoryEngineConfig, InMemoryQueueEngine};
pub use message::{
    format_time_to_send, headers, parse_time_to_send, MessageId, MessageType, ReceiptHandle,
    ReceivedMessage, TransportMessage,
};
pub use transaction::{IsolationLevel, QueueTransaction, TransactionOptions};
