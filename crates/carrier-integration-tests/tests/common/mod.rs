//! Shared helpers for transport scenarios

use carrier_queue::{Endpoint, InMemoryQueueEngine, QueueEngine};
use carrier_transport::{
    CurrentMessageInformation, JsonMessageSerializer, Transport, TransportConfig, TransportError,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lifecycle events as observed by a test subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Arrived(Option<String>),
    BeforeCommit,
    Completed(Option<String>),
    Failure(String),
    SerializationFault(String),
    Sent,
}

/// Collects the exact order of lifecycle events across subscribers
#[derive(Clone, Default)]
pub struct EventRecorder {
    observed: Arc<Mutex<Vec<Observed>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Observed) {
        if let Ok(mut observed) = self.observed.lock() {
            observed.push(event);
        }
    }

    pub fn snapshot(&self) -> Vec<Observed> {
        self.observed
            .lock()
            .map(|observed| observed.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&Observed) -> bool) -> usize {
        self.snapshot().iter().filter(|o| predicate(o)).count()
    }

    /// Wire this recorder into every lifecycle slot of the transport
    pub fn attach(&self, transport: &Transport) {
        let events = transport.events();

        let recorder = self.clone();
        events.on_before_message_transaction_commit(Arc::new(
            move |_: &CurrentMessageInformation| {
                recorder.record(Observed::BeforeCommit);
                Ok(())
            },
        ));

        let recorder = self.clone();
        events.on_message_processing_completed(Arc::new(
            move |_: &CurrentMessageInformation, error: Option<&TransportError>| {
                recorder.record(Observed::Completed(error.map(|e| e.to_string())));
                Ok(())
            },
        ));

        let recorder = self.clone();
        events.on_message_processing_failure(Arc::new(
            move |_: &CurrentMessageInformation, error: &TransportError| {
                recorder.record(Observed::Failure(error.to_string()));
                Ok(())
            },
        ));

        let recorder = self.clone();
        events.on_message_serialization_exception(Arc::new(
            move |_: &CurrentMessageInformation, error: &TransportError| {
                recorder.record(Observed::SerializationFault(error.to_string()));
                Ok(())
            },
        ));

        let recorder = self.clone();
        events.on_message_sent(Arc::new(move |_: &CurrentMessageInformation| {
            recorder.record(Observed::Sent);
            Ok(())
        }));
    }
}

/// Endpoint on the shared in-memory engine
pub fn test_endpoint(queue: &str) -> Endpoint {
    Endpoint::parse(&format!("carrier://localhost:2200/{}", queue))
        .expect("test endpoint must parse")
}

/// Install a subscriber so `RUST_LOG` surfaces transport internals when
/// a scenario misbehaves
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
}

/// Build a transport over a fresh in-memory engine, tuned for fast tests
pub fn test_transport(
    queue: &str,
    configure: impl FnOnce(TransportConfig) -> TransportConfig,
) -> (Arc<InMemoryQueueEngine>, Transport) {
    init_tracing();
    let engine = Arc::new(InMemoryQueueEngine::default());
    let config = configure(
        TransportConfig::new(test_endpoint(queue))
            .with_scheduler_tick(Duration::from_millis(50)),
    );
    let transport = Transport::new(
        config,
        engine.clone() as Arc<dyn QueueEngine>,
        Arc::new(JsonMessageSerializer),
    );
    (engine, transport)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
