//! Transport configuration.

use carrier_queue::{Endpoint, IsolationLevel, TransactionOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a transport instance
///
/// # Examples
///
/// ```rust
/// use carrier_queue::Endpoint;
/// use carrier_transport::TransportConfig;
///
/// let endpoint = Endpoint::parse("carrier://localhost:2200/orders").unwrap();
/// let config = TransportConfig::new(endpoint)
///     .with_thread_count(4)
///     .with_number_of_retries(3);
///
/// assert_eq!(config.thread_count, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Local endpoint URI; determines the listen port and queue name
    pub endpoint: Endpoint,

    /// Number of workers running the dequeue-dispatch-commit loop
    pub thread_count: usize,

    /// On-disk directory handed to persistent queue engines
    pub path: PathBuf,

    /// Default isolation level for transport transactions
    pub queue_isolation_level: IsolationLevel,

    /// How many failures a message survives before it is quarantined
    pub number_of_retries: u32,

    /// Transport-wide transaction timeout
    pub transaction_timeout: Duration,

    /// How long a worker blocks in receive before conceding to a peer
    pub receive_timeout: Duration,

    /// Internal peek timeout of the worker loop
    pub peek_timeout: Duration,

    /// Polling granularity of the timeout scheduler
    pub scheduler_tick: Duration,

    /// Queue the logging module mirrors lifecycle events onto
    pub log_endpoint: Option<Endpoint>,
}

impl TransportConfig {
    /// Create a configuration for the given local endpoint with defaults
    /// for everything else
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            thread_count: 1,
            path: PathBuf::from("carrier-data"),
            queue_isolation_level: IsolationLevel::default(),
            number_of_retries: 5,
            transaction_timeout: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(1),
            peek_timeout: Duration::from_secs(2),
            scheduler_tick: Duration::from_millis(500),
            log_endpoint: None,
        }
    }

    /// Set the number of workers
    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count.max(1);
        self
    }

    /// Set the storage directory for the queue engine
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the default isolation level
    pub fn with_isolation_level(mut self, isolation: IsolationLevel) -> Self {
        self.queue_isolation_level = isolation;
        self
    }

    /// Set the retry budget of the error action
    pub fn with_number_of_retries(mut self, retries: u32) -> Self {
        self.number_of_retries = retries;
        self
    }

    /// Set the transport-wide transaction timeout
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Set the scheduler polling granularity
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Mirror lifecycle events onto the given log queue
    pub fn with_log_endpoint(mut self, log_endpoint: Endpoint) -> Self {
        self.log_endpoint = Some(log_endpoint);
        self
    }

    /// Transaction options every transport transaction runs under
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.queue_isolation_level,
            timeout: self.transaction_timeout,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
