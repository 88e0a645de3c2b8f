//! Logical messages and the serializer seam.
//!
//! A transport payload carries a non-empty ordered sequence of
//! [`LogicalMessage`]s. The first element's marker decides the `type`
//! header stamped on outbound messages.

use crate::error::SerializationError;
use bytes::Bytes;
use carrier_queue::MessageType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// LogicalMessage
// ============================================================================

/// Marker deciding how a payload routes at the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMarker {
    #[default]
    Ordinary,
    Administrative,
    LoadBalancer,
}

impl PayloadMarker {
    /// The wire-level message kind this marker stamps
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Ordinary => MessageType::Ordinary,
            Self::Administrative => MessageType::Administrative,
            Self::LoadBalancer => MessageType::LoadBalancer,
        }
    }
}

/// One element of a decoded payload sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMessage {
    /// Application-level type name of the body
    pub type_name: String,

    /// The message body
    pub body: Value,

    /// Routing marker, ordinary unless the sender says otherwise
    #[serde(default)]
    pub marker: PayloadMarker,
}

impl LogicalMessage {
    /// Create an ordinary message
    pub fn new(type_name: impl Into<String>, body: Value) -> Self {
        Self {
            type_name: type_name.into(),
            body,
            marker: PayloadMarker::Ordinary,
        }
    }

    /// Create a control-plane message
    pub fn administrative(type_name: impl Into<String>, body: Value) -> Self {
        Self {
            type_name: type_name.into(),
            body,
            marker: PayloadMarker::Administrative,
        }
    }

    /// Create a load-balancer coordination message
    pub fn load_balancer(type_name: impl Into<String>, body: Value) -> Self {
        Self {
            type_name: type_name.into(),
            body,
            marker: PayloadMarker::LoadBalancer,
        }
    }

    /// The wire-level kind this message stamps when it leads a payload
    pub fn message_type(&self) -> MessageType {
        self.marker.message_type()
    }
}

// ============================================================================
// MessageSerializer
// ============================================================================

/// Serializer seam between logical messages and payload bytes.
///
/// Implementations must round-trip: for every serializable sequence `p`,
/// `deserialize(serialize(p)) == p`.
pub trait MessageSerializer: Send + Sync {
    /// Encode a non-empty sequence into payload bytes
    fn serialize(&self, messages: &[LogicalMessage]) -> Result<Bytes, SerializationError>;

    /// Decode payload bytes into a non-empty sequence
    fn deserialize(&self, payload: &Bytes) -> Result<Vec<LogicalMessage>, SerializationError>;
}

/// JSON serializer used by default
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMessageSerializer;

impl MessageSerializer for JsonMessageSerializer {
    fn serialize(&self, messages: &[LogicalMessage]) -> Result<Bytes, SerializationError> {
        if messages.is_empty() {
            return Err(SerializationError::EmptySequence);
        }
        Ok(Bytes::from(serde_json::to_vec(messages)?))
    }

    fn deserialize(&self, payload: &Bytes) -> Result<Vec<LogicalMessage>, SerializationError> {
        let messages: Vec<LogicalMessage> = serde_json::from_slice(payload)?;
        if messages.is_empty() {
            return Err(SerializationError::EmptySequence);
        }
        Ok(messages)
    }
}

#[cfg(test)]
#[path = "serializer_tests.rs"]
mod tests;
