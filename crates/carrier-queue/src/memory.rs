//! In-memory queue engine for testing and development.
//!
//! This engine is a fully functional implementation of the
//! [`QueueEngine`] contract:
//! - FIFO main queue plus named sub-queues per durable queue
//! - receipt locks with visibility timeout, so an unresolved transaction's
//!   message becomes visible again after its lock expires
//! - peek with bounded blocking
//! - atomic moves between sub-queues and the main queue
//!
//! It is intended for unit and integration testing of transport consumers
//! and as the reference implementation for persistent engines.

use crate::endpoint::{Endpoint, QueueName, SubQueue};
use crate::engine::QueueEngine;
use crate::error::QueueError;
use crate::message::{headers, MessageId, ReceiptHandle, ReceivedMessage, TransportMessage};
use crate::transaction::QueueTransaction;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the in-memory engine
#[derive(Debug, Clone)]
pub struct InMemoryEngineConfig {
    /// Maximum number of messages a single queue may hold
    pub max_queue_size: usize,

    /// How long a received message stays locked invisible before an
    /// unresolved receipt is reclaimed
    pub lock_duration: Duration,

    /// Granularity of blocking peek/receive polls
    pub poll_interval: Duration,
}

impl Default for InMemoryEngineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            lock_duration: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
        }
    }
}

// ============================================================================
// Internal storage
// ============================================================================

/// A message stored in a queue with engine metadata
#[derive(Debug, Clone)]
struct StoredMessage {
    transport_id: MessageId,
    message: TransportMessage,
    delivery_count: u32,
}

/// A message currently locked under an open transaction
#[derive(Debug)]
struct InFlightMessage {
    stored: StoredMessage,
    lock_expires_at: DateTime<Utc>,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.lock_expires_at
    }
}

/// State of a single durable queue
#[derive(Debug, Default)]
struct QueueState {
    main: VecDeque<StoredMessage>,
    subqueues: HashMap<SubQueue, VecDeque<StoredMessage>>,
    in_flight: HashMap<String, InFlightMessage>,
}

impl QueueState {
    /// Return expired in-flight messages to the head of the main queue
    fn reclaim_expired(&mut self, queue: &QueueName) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.is_expired())
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(in_flight) = self.in_flight.remove(&handle) {
                warn!(
                    queue = %queue,
                    transport_id = %in_flight.stored.transport_id,
                    "receipt lock expired, message visible again"
                );
                self.main.push_front(in_flight.stored);
            }
        }
    }

    fn total_len(&self) -> usize {
        self.main.len()
            + self.in_flight.len()
            + self.subqueues.values().map(VecDeque::len).sum::<usize>()
    }
}

/// Whole-engine state behind one lock
#[derive(Debug, Default)]
struct EngineState {
    queues: HashMap<QueueName, QueueState>,
    torn_down: bool,
}

// ============================================================================
// InMemoryQueueEngine
// ============================================================================

/// In-memory implementation of the queue-engine contract
pub struct InMemoryQueueEngine {
    state: Mutex<EngineState>,
    config: InMemoryEngineConfig,
}

impl InMemoryQueueEngine {
    /// Create new engine with configuration
    pub fn new(config: InMemoryEngineConfig) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            config,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EngineState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Engine {
            message: "engine state poisoned".to_string(),
        })
    }

    fn queue_state<'a>(
        state: &'a mut EngineState,
        queue: &QueueName,
    ) -> Result<&'a mut QueueState, QueueError> {
        state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            })
    }

    fn find_in_flight<'a>(
        state: &'a mut EngineState,
        receipt: &ReceiptHandle,
    ) -> Result<(&'a mut QueueState, InFlightMessage), QueueError> {
        let queue_state = Self::queue_state(state, receipt.queue())?;
        let in_flight = queue_state
            .in_flight
            .remove(receipt.handle())
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })?;
        Ok((queue_state, in_flight))
    }
}

impl Default for InMemoryQueueEngine {
    fn default() -> Self {
        Self::new(InMemoryEngineConfig::default())
    }
}

#[async_trait]
impl QueueEngine for InMemoryQueueEngine {
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.torn_down {
            return Err(QueueError::Shutdown);
        }
        state.queues.entry(queue.clone()).or_default();
        Ok(())
    }

    async fn ensure_subqueue(
        &self,
        queue: &QueueName,
        subqueue: SubQueue,
    ) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.torn_down {
            return Err(QueueError::Shutdown);
        }
        let queue_state = Self::queue_state(&mut state, queue)?;
        queue_state.subqueues.entry(subqueue).or_default();
        Ok(())
    }

    async fn send(
        &self,
        destination: &Endpoint,
        mut message: TransportMessage,
    ) -> Result<MessageId, QueueError> {
        let mut state = self.lock()?;
        if state.torn_down {
            return Err(QueueError::Shutdown);
        }

        // Inbound stamp: the engine records where the message came from
        if !message.headers.contains_key(headers::FROM) {
            if let Some(source) = message.headers.get(headers::SOURCE).cloned() {
                message.headers.insert(headers::FROM.to_string(), source);
            }
        }

        let queue_state = state.queues.entry(destination.queue().clone()).or_default();
        if queue_state.total_len() >= self.config.max_queue_size {
            return Err(QueueError::QueueFull {
                queue_name: destination.queue().to_string(),
                size: queue_state.total_len(),
                max_size: self.config.max_queue_size,
            });
        }

        let transport_id = MessageId::new();
        let stored = StoredMessage {
            transport_id,
            message,
            delivery_count: 0,
        };

        match destination.subqueue() {
            Some(sub) => queue_state.subqueues.entry(sub).or_default().push_back(stored),
            None => queue_state.main.push_back(stored),
        }

        Ok(transport_id)
    }

    async fn peek(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<TransportMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.lock()?;
                if state.torn_down {
                    return Err(QueueError::Shutdown);
                }
                let queue_state = Self::queue_state(&mut state, queue)?;
                queue_state.reclaim_expired(queue);
                if let Some(front) = queue_state.main.front() {
                    return Ok(Some(front.message.clone()));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
        tx: &QueueTransaction,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.lock()?;
                if state.torn_down {
                    return Err(QueueError::Shutdown);
                }
                let queue_state = Self::queue_state(&mut state, queue)?;
                queue_state.reclaim_expired(queue);
                if let Some(mut stored) = queue_state.main.pop_front() {
                    stored.delivery_count += 1;
                    let expires_at = Utc::now()
                        + ChronoDuration::from_std(self.config.lock_duration).unwrap_or(
                            ChronoDuration::seconds(30),
                        );
                    let receipt = ReceiptHandle::new(
                        Uuid::new_v4().to_string(),
                        queue.clone(),
                        expires_at,
                    );
                    let received = ReceivedMessage {
                        transport_id: stored.transport_id,
                        message: stored.message.clone(),
                        receipt: receipt.clone(),
                        delivery_count: stored.delivery_count,
                    };
                    queue_state.in_flight.insert(
                        receipt.handle().to_string(),
                        InFlightMessage {
                            stored,
                            lock_expires_at: expires_at,
                        },
                    );
                    tx.record_receipt(receipt);
                    return Ok(Some(received));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let (_, in_flight) = Self::find_in_flight(&mut state, receipt)?;
        debug!(
            queue = %receipt.queue(),
            transport_id = %in_flight.stored.transport_id,
            "message completed"
        );
        Ok(())
    }

    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let (queue_state, in_flight) = Self::find_in_flight(&mut state, receipt)?;
        queue_state.main.push_front(in_flight.stored);
        Ok(())
    }

    async fn move_to_subqueue(
        &self,
        receipt: &ReceiptHandle,
        subqueue: SubQueue,
        message: TransportMessage,
    ) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let (queue_state, mut in_flight) = Self::find_in_flight(&mut state, receipt)?;
        in_flight.stored.message = message;
        queue_state
            .subqueues
            .entry(subqueue)
            .or_default()
            .push_back(in_flight.stored);
        Ok(())
    }

    async fn requeue_from_subqueue(
        &self,
        queue: &QueueName,
        subqueue: SubQueue,
        id: Uuid,
    ) -> Result<bool, QueueError> {
        let mut state = self.lock()?;
        if state.torn_down {
            return Err(QueueError::Shutdown);
        }
        let queue_state = Self::queue_state(&mut state, queue)?;
        let parked = queue_state
            .subqueues
            .get_mut(&subqueue)
            .ok_or_else(|| QueueError::SubQueueNotFound {
                queue_name: queue.to_string(),
                subqueue: subqueue.to_string(),
            })?;

        let position = parked
            .iter()
            .position(|stored| stored.message.message_id() == Some(id));
        match position {
            Some(index) => {
                let stored = parked.remove(index).ok_or_else(|| QueueError::Engine {
                    message: "parked message vanished during requeue".to_string(),
                })?;
                queue_state.main.push_back(stored);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn browse(&self, queue: &QueueName) -> Result<Vec<TransportMessage>, QueueError> {
        let mut state = self.lock()?;
        let queue_state = Self::queue_state(&mut state, queue)?;
        queue_state.reclaim_expired(queue);
        Ok(queue_state
            .main
            .iter()
            .map(|stored| stored.message.clone())
            .collect())
    }

    async fn browse_subqueue(
        &self,
        queue: &QueueName,
        subqueue: SubQueue,
    ) -> Result<Vec<TransportMessage>, QueueError> {
        let mut state = self.lock()?;
        let queue_state = Self::queue_state(&mut state, queue)?;
        Ok(queue_state
            .subqueues
            .get(&subqueue)
            .map(|parked| parked.iter().map(|stored| stored.message.clone()).collect())
            .unwrap_or_default())
    }

    async fn dispose(&self, force: bool) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if !force {
            let in_flight: usize = state
                .queues
                .values()
                .map(|q| q.in_flight.values().filter(|m| !m.is_expired()).count())
                .sum();
            if in_flight > 0 {
                return Err(QueueError::Busy {
                    message: format!("{} messages still in flight", in_flight),
                });
            }
        }
        state.torn_down = true;
        debug!("in-memory queue engine torn down");
        Ok(())
    }
}
