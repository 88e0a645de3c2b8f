//! Wire-level message types and reserved headers.

use crate::endpoint::{Endpoint, QueueName};
use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reserved header names.
///
/// All reserved names are case-sensitive ASCII.
pub mod headers {
    /// Caller-assigned GUID for the logical message
    pub const ID: &str = "id";
    /// Message kind marker, see [`MessageType`](super::MessageType)
    pub const TYPE: &str = "type";
    /// URI of the originating endpoint
    pub const SOURCE: &str = "source";
    /// Set on inbound messages by the queue engine; trusted when
    /// deserialization fails before other headers can be
    pub const FROM: &str = "from";
    /// ISO-8601 UTC timestamp, present only for timeout messages
    pub const TIME_TO_SEND: &str = "time-to-send";
    /// Failure counter maintained by the error action
    pub const RETRIES: &str = "retries";
}

// ============================================================================
// MessageType
// ============================================================================

/// Message kind carried in the `type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Regular application message
    Ordinary,
    /// Control-plane message that bypasses normal pre-commit hooks
    Administrative,
    /// Load-balancer coordination message
    LoadBalancer,
    /// Future-dated message parked until its send-time elapses
    Timeout,
    /// Transport shutdown marker; consumed without dispatch
    Shutdown,
}

impl MessageType {
    /// Get the header value for this kind
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Administrative => "administrative",
            Self::LoadBalancer => "loadbalancer",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinary" => Ok(Self::Ordinary),
            "administrative" => Ok(Self::Administrative),
            "loadbalancer" => Ok(Self::LoadBalancer),
            "timeout" => Ok(Self::Timeout),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(ValidationError::InvalidFormat {
                field: "type".to_string(),
                message: format!("unknown message type '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Time-to-send format
// ============================================================================

/// Format a send-time the way the wire expects it: ISO-8601 UTC with seven
/// fractional-second digits.
pub fn format_time_to_send(at: &DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        at.format("%Y-%m-%dT%H:%M:%S"),
        at.nanosecond() % 1_000_000_000 / 100
    )
}

/// Parse a `time-to-send` header value
pub fn parse_time_to_send(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ValidationError::InvalidFormat {
            field: headers::TIME_TO_SEND.to_string(),
            message: format!("'{}': {}", value, e),
        })
}

// ============================================================================
// TransportMessage
// ============================================================================

/// The wire-level unit: opaque payload bytes plus a string header map.
///
/// The transport populates and consumes the reserved headers in
/// [`headers`]; everything else passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    #[serde(with = "bytes_serde")]
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl TransportMessage {
    /// Create new message with payload and no headers
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            headers: HashMap::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Caller-assigned logical message id, if present and well-formed
    pub fn message_id(&self) -> Option<Uuid> {
        self.headers
            .get(headers::ID)
            .and_then(|v| Uuid::parse_str(v).ok())
    }

    /// Stamp the logical message id
    pub fn set_message_id(&mut self, id: Uuid) {
        self.headers.insert(headers::ID.to_string(), id.to_string());
    }

    /// Message kind from the `type` header.
    ///
    /// A missing or unrecognized value classifies as ordinary; the routing
    /// decision is made by the sender's header stamp, not by inspection.
    pub fn message_type(&self) -> MessageType {
        self.headers
            .get(headers::TYPE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(MessageType::Ordinary)
    }

    /// Stamp the `type` header
    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.headers
            .insert(headers::TYPE.to_string(), message_type.to_string());
    }

    /// Originating endpoint from the `source` header
    pub fn source(&self) -> Option<Endpoint> {
        self.headers
            .get(headers::SOURCE)
            .and_then(|v| Endpoint::parse(v).ok())
    }

    /// Stamp the `source` header
    pub fn set_source(&mut self, source: &Endpoint) {
        self.headers
            .insert(headers::SOURCE.to_string(), source.to_string());
    }

    /// Sending peer recorded by the queue engine on inbound messages
    pub fn from_endpoint(&self) -> Option<Endpoint> {
        self.headers
            .get(headers::FROM)
            .and_then(|v| Endpoint::parse(v).ok())
    }

    /// Send-time for timeout messages
    pub fn time_to_send(&self) -> Option<Result<DateTime<Utc>, ValidationError>> {
        self.headers
            .get(headers::TIME_TO_SEND)
            .map(|v| parse_time_to_send(v))
    }

    /// Stamp the `time-to-send` header
    pub fn set_time_to_send(&mut self, at: &DateTime<Utc>) {
        self.headers
            .insert(headers::TIME_TO_SEND.to_string(), format_time_to_send(at));
    }

    /// Failure counter from the `retries` header, defaulting to 0
    pub fn retries(&self) -> u32 {
        self.headers
            .get(headers::RETRIES)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Stamp the `retries` header
    pub fn set_retries(&mut self, retries: u32) {
        self.headers
            .insert(headers::RETRIES.to_string(), retries.to_string());
    }
}

// ============================================================================
// Engine-side message metadata
// ============================================================================

/// Engine-assigned identifier for a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token for resolving a received message.
///
/// A receipt is valid until its lock expires; an unresolved receipt is
/// reclaimed by the engine and the message becomes visible again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    queue: QueueName,
    expires_at: DateTime<Utc>,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String, queue: QueueName, expires_at: DateTime<Utc>) -> Self {
        Self {
            handle,
            queue,
            expires_at,
        }
    }

    /// Handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Queue the message was received from
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Check if the receipt's lock has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Engine-assigned id for the stored message
    pub transport_id: MessageId,
    /// The wire-level message
    pub message: TransportMessage,
    /// Token for completing, abandoning, or moving the message
    pub receipt: ReceiptHandle,
    /// How many times this message has been delivered, this delivery included
    pub delivery_count: u32,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
