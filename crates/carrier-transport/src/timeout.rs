//! Deferred-delivery scheduler.
//!
//! Tracks future-dated messages parked in the `timeout` sub-queue and
//! moves each one back to the main queue when its send-time elapses. The
//! move preserves the parked message byte-for-byte, headers included.

use carrier_queue::{QueueEngine, QueueError, QueueName, SubQueue};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Background scheduler for messages parked in the `timeout` sub-queue
pub struct TimeoutScheduler {
    engine: Arc<dyn QueueEngine>,
    queue: QueueName,
    entries: Arc<Mutex<BTreeSet<(DateTime<Utc>, Uuid)>>>,
    running: Arc<AtomicBool>,
    tick: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutScheduler {
    /// Create a scheduler for the given queue's `timeout` sub-queue
    pub fn new(engine: Arc<dyn QueueEngine>, queue: QueueName, tick: Duration) -> Self {
        Self {
            engine,
            queue,
            entries: Arc::new(Mutex::new(BTreeSet::new())),
            running: Arc::new(AtomicBool::new(false)),
            tick,
            handle: Mutex::new(None),
        }
    }

    /// Recover parked messages and start the background tick.
    ///
    /// Messages already sitting in the `timeout` sub-queue (from a
    /// previous run of the transport) are re-registered so deferred
    /// delivery survives a restart.
    pub async fn start(&self) -> Result<(), QueueError> {
        let parked = self
            .engine
            .browse_subqueue(&self.queue, SubQueue::Timeout)
            .await?;

        {
            let mut entries = self.entries.lock().map_err(|_| QueueError::Engine {
                message: "scheduler state poisoned".to_string(),
            })?;
            for message in parked {
                match (message.message_id(), message.time_to_send()) {
                    (Some(id), Some(Ok(at))) => {
                        entries.insert((at, id));
                    }
                    _ => warn!(
                        queue = %self.queue,
                        "parked timeout message without usable id or send-time"
                    ),
                }
            }
            if !entries.is_empty() {
                debug!(
                    queue = %self.queue,
                    recovered = entries.len(),
                    "recovered deferred messages from timeout sub-queue"
                );
            }
        }

        self.running.store(true, Ordering::SeqCst);

        let engine = self.engine.clone();
        let queue = self.queue.clone();
        let entries = self.entries.clone();
        let running = self.running.clone();
        let tick = self.tick;

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let now = Utc::now();
                let due: Vec<(DateTime<Utc>, Uuid)> = {
                    let mut entries = match entries.lock() {
                        Ok(entries) => entries,
                        Err(_) => break,
                    };
                    let mut due = Vec::new();
                    while let Some(first) = entries.first().copied() {
                        if first.0 > now {
                            break;
                        }
                        entries.pop_first();
                        due.push(first);
                    }
                    due
                };

                for (at, id) in due {
                    match engine
                        .requeue_from_subqueue(&queue, SubQueue::Timeout, id)
                        .await
                    {
                        Ok(true) => {
                            debug!(message_id = %id, send_time = %at, "deferred message reinjected")
                        }
                        Ok(false) => {
                            debug!(message_id = %id, "deferred message no longer parked")
                        }
                        Err(e) if e.is_shutdown() => return,
                        Err(e) => {
                            warn!(message_id = %id, error = %e, "failed to reinject deferred message")
                        }
                    }
                }

                tokio::time::sleep(tick).await;
            }
        });

        if let Ok(mut handle) = self.handle.lock() {
            *handle = Some(task);
        }
        Ok(())
    }

    /// Register a message parked in the `timeout` sub-queue for delivery
    /// at `at`
    pub fn register(&self, at: DateTime<Utc>, id: Uuid) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((at, id));
        }
    }

    /// Number of deferred messages currently tracked
    pub fn pending(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Stop the background tick and wait for it to finish
    pub async fn dispose(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self.handle.lock().ok().and_then(|mut handle| handle.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "timeout scheduler task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
#[path = "timeout_tests.rs"]
mod tests;
