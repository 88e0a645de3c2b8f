//! Per-dispatch context handed to subscribers.

use crate::serializer::LogicalMessage;
use carrier_queue::{Endpoint, MessageId};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a subscriber may want to know about the message being
/// dispatched.
///
/// The context lives for exactly one dispatch and is passed to every
/// subscriber as an explicit argument; `Transport::reply` takes it to
/// address the originating endpoint. Subscribers must not retain it
/// beyond their callback.
#[derive(Debug, Clone)]
pub struct CurrentMessageInformation {
    /// Caller-assigned id of the logical message
    pub message_id: Option<Uuid>,

    /// Originating endpoint, when its header could be trusted
    pub source: Option<Endpoint>,

    /// Destination endpoint: the local queue for inbound dispatches, the
    /// remote queue for send notifications
    pub destination: Option<Endpoint>,

    /// The full decoded payload sequence
    pub all_messages: Arc<Vec<LogicalMessage>>,

    /// The element currently being dispatched
    pub current_message: Option<LogicalMessage>,

    /// Engine-assigned id of the stored message, absent on the send path
    pub transport_message_id: Option<MessageId>,
}

impl CurrentMessageInformation {
    /// Type name of the current element, falling back to the first
    /// element of the sequence
    pub fn message_type_name(&self) -> Option<&str> {
        self.current_message
            .as_ref()
            .map(|m| m.type_name.as_str())
            .or_else(|| self.all_messages.first().map(|m| m.type_name.as_str()))
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
