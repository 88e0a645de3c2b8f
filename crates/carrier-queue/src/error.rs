//! Error types for queue operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue-engine operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Sub-queue not found: {queue_name}/{subqueue}")]
    SubQueueNotFound {
        queue_name: String,
        subqueue: String,
    },

    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Queue engine is being torn down")]
    Shutdown,

    #[error("Queue engine is busy: {message}")]
    Busy { message: String },

    #[error("Queue full: {queue_name} holds {size} messages (max: {max_size})")]
    QueueFull {
        queue_name: String,
        size: usize,
        max_size: usize,
    },

    #[error("Transaction already resolved")]
    TransactionClosed,

    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if this is a benign receive/peek timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the engine is being torn down (worker should exit quietly)
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Check if error is transient and the operation can be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::SubQueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::Shutdown => false,
            Self::Busy { .. } => true,
            Self::QueueFull { .. } => true,
            Self::TransactionClosed => false,
            Self::Engine { .. } => false,
            Self::Validation(_) => false,
        }
    }
}

/// Validation errors for endpoint and message fields
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
