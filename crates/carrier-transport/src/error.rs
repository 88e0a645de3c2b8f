//! Error types for the transport layer.

use carrier_queue::{QueueError, ValidationError};
use thiserror::Error;

/// Boxed error produced by subscriber callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors during logical-message serialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload carried an empty message sequence")]
    EmptySequence,
}

/// Comprehensive error type for transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport already started")]
    AlreadyStarted,

    #[error("Transport not started")]
    NotStarted,

    #[error("Reply is only valid inside a message dispatch with a known source")]
    NoReplyAddress,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Subscriber failed: {0}")]
    Handler(#[source] BoxError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Check if this failure came out of message deserialization
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// Check if error is transient and the operation can be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Queue(e) => e.is_transient(),
            Self::AlreadyStarted | Self::NotStarted | Self::NoReplyAddress => false,
            Self::Serialization(_) => false,
            Self::Handler(_) => false,
            Self::Validation(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
