//! Retry accounting for failed dispatches.
//!
//! The error action is wired as a distinct slot consulted before the
//! failure fan-out, so it observes every failure ahead of user code and
//! its verdict decides the message's fate: retry (roll the transaction
//! back) or poison (relocate to the `errors` sub-queue and commit the
//! move).

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Verdict on a failed dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Roll back; the message returns to the main queue for another try
    Retry {
        /// Failures seen so far for this message
        attempt: u32,
    },
    /// Quarantine in the `errors` sub-queue; no further attempts
    Poison {
        /// Final value of the `retries` counter
        retries: u32,
    },
}

/// Per-message failure counter with a fixed retry budget
pub struct ErrorAction {
    max_retries: u32,
    attempts: Mutex<HashMap<Uuid, u32>>,
}

impl ErrorAction {
    /// Create an error action allowing `max_retries` failures per message
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for the message keyed by `id`.
    ///
    /// The counter seeds from the message's `retries` header so a
    /// restarted transport keeps counting where the sender left off. Once
    /// the counter reaches the budget the verdict is poison and the id is
    /// forgotten.
    pub fn register_failure(&self, id: Uuid, seeded_retries: u32) -> FailureDisposition {
        let mut attempts = match self.attempts.lock() {
            Ok(attempts) => attempts,
            // A poisoned counter map must not stall the queue
            Err(_) => return FailureDisposition::Poison { retries: self.max_retries },
        };

        let count = attempts.entry(id).or_insert(seeded_retries);
        *count += 1;
        let count = *count;

        if count >= self.max_retries {
            attempts.remove(&id);
            FailureDisposition::Poison { retries: count }
        } else {
            FailureDisposition::Retry { attempt: count }
        }
    }

    /// Forget a message that finally succeeded
    pub fn reset(&self, id: Uuid) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.remove(&id);
        }
    }

    /// Failures recorded so far for `id`
    pub fn attempts(&self, id: Uuid) -> u32 {
        self.attempts
            .lock()
            .map(|attempts| attempts.get(&id).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "error_action_tests.rs"]
mod tests;
