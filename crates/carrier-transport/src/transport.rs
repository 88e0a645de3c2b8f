//! The transport: worker pool, lifecycle, and the send path.

use crate::config::TransportConfig;
use crate::context::CurrentMessageInformation;
use crate::dispatcher::Dispatcher;
use crate::error::{SerializationError, TransportError};
use crate::error_action::ErrorAction;
use crate::events::TransportEvents;
use crate::logging::MessageLoggingModule;
use crate::serializer::{LogicalMessage, MessageSerializer};
use crate::timeout::TimeoutScheduler;
use carrier_queue::{
    Endpoint, MessageType, QueueEngine, QueueName, QueueTransaction, ReceivedMessage, SubQueue,
    TransactionOptions, TransportMessage,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often a refused queue-manager teardown is retried before forcing
const DISPOSE_ATTEMPTS: u32 = 5;
const DISPOSE_BACKOFF: Duration = Duration::from_millis(50);

/// Durable, transactional message-bus transport.
///
/// `start` opens the local queue, creates the `timeout`, `discarded`,
/// and `errors` sub-queues, starts the deferred-delivery scheduler, and
/// spawns the worker pool. Each worker peeks, receives under a local
/// transaction, dispatches to subscribers, and commits or rolls back
/// atomically with the queue state.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use carrier_queue::{Endpoint, InMemoryQueueEngine};
/// use carrier_transport::{
///     CurrentMessageInformation, JsonMessageSerializer, LogicalMessage, Transport,
///     TransportConfig,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = Endpoint::parse("carrier://localhost:2200/orders")?;
/// let transport = Transport::new(
///     TransportConfig::new(endpoint.clone()).with_thread_count(2),
///     Arc::new(InMemoryQueueEngine::default()),
///     Arc::new(JsonMessageSerializer),
/// );
///
/// transport.events().on_message_arrived(Arc::new(|info: &CurrentMessageInformation| {
///     println!("got {}", info.message_type_name().unwrap_or("?"));
///     Ok(true)
/// }));
///
/// transport.start().await?;
/// transport
///     .send(&endpoint, vec![LogicalMessage::new("Greeting", "hello".into())])
///     .await?;
/// transport.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct Transport {
    config: TransportConfig,
    engine: Arc<dyn QueueEngine>,
    serializer: Arc<dyn MessageSerializer>,
    events: Arc<TransportEvents>,
    error_action: Arc<ErrorAction>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<TimeoutScheduler>,
    logging: Mutex<Option<MessageLoggingModule>>,
    running: Arc<AtomicBool>,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    /// Wire a transport over the given engine and serializer
    pub fn new(
        config: TransportConfig,
        engine: Arc<dyn QueueEngine>,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Self {
        let events = Arc::new(TransportEvents::new());
        let error_action = Arc::new(ErrorAction::new(config.number_of_retries));
        let dispatcher = Arc::new(Dispatcher::new(
            events.clone(),
            serializer.clone(),
            error_action.clone(),
            config.endpoint.clone(),
        ));
        let scheduler = Arc::new(TimeoutScheduler::new(
            engine.clone(),
            config.endpoint.queue().clone(),
            config.scheduler_tick,
        ));

        Self {
            config,
            engine,
            serializer,
            events,
            error_action,
            dispatcher,
            scheduler,
            logging: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The lifecycle event registry
    pub fn events(&self) -> &TransportEvents {
        &self.events
    }

    /// The local endpoint this transport listens on
    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    /// Failure counts recorded by the error action, keyed by message id
    pub fn failure_attempts(&self, id: Uuid) -> u32 {
        self.error_action.attempts(id)
    }

    /// Wait until the logging module has written every record observed so
    /// far. A no-op when no log endpoint is configured.
    pub async fn flush_log(&self) {
        let sender = self
            .logging
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|module| module.command_sender()));
        if let Some(sender) = sender {
            let (ack, done) = tokio::sync::oneshot::channel();
            if sender.send(crate::logging::Command::Flush(ack)).is_ok() {
                let _ = done.await;
            }
        }
    }

    /// Open the queue, create sub-queues, start the scheduler, spawn the
    /// worker pool, and fire `Started`. Must be called exactly once.
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let queue = self.config.endpoint.queue().clone();
        self.engine.ensure_queue(&queue).await?;
        for sub in SubQueue::ALL {
            self.engine.ensure_subqueue(&queue, sub).await?;
        }

        if let Some(log_endpoint) = self.config.log_endpoint.clone() {
            let module = MessageLoggingModule::init(
                self.engine.clone(),
                &self.events,
                log_endpoint,
                self.config.transaction_options(),
            )
            .await?;
            if let Ok(mut logging) = self.logging.lock() {
                *logging = Some(module);
            }
        }

        self.scheduler.start().await?;
        self.running.store(true, Ordering::SeqCst);

        let mut workers = self.workers.lock().map_err(|_| TransportError::Queue(
            carrier_queue::QueueError::Engine {
                message: "worker registry poisoned".to_string(),
            },
        ))?;
        for worker in 0..self.config.thread_count {
            workers.push(tokio::spawn(worker_loop(WorkerContext {
                worker,
                queue: queue.clone(),
                engine: self.engine.clone(),
                dispatcher: self.dispatcher.clone(),
                scheduler: self.scheduler.clone(),
                running: self.running.clone(),
                options: self.config.transaction_options(),
                peek_timeout: self.config.peek_timeout,
                receive_timeout: self.config.receive_timeout,
            })));
        }
        drop(workers);

        info!(
            endpoint = %self.config.endpoint,
            workers = self.config.thread_count,
            "transport started"
        );
        self.events.fire_started();
        Ok(())
    }

    /// Clear the run flag, dispose the scheduler and queue manager, then
    /// join all workers. Each worker finishes at most one in-flight
    /// dispatch before exiting.
    pub async fn dispose(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.scheduler.dispose().await;

        let logging = self.logging.lock().ok().and_then(|mut slot| slot.take());
        if let Some(logging) = logging {
            logging.dispose(&self.events).await;
        }

        let mut disposed = false;
        for attempt in 1..=DISPOSE_ATTEMPTS {
            match self.engine.dispose(false).await {
                Ok(()) => {
                    disposed = true;
                    break;
                }
                Err(e) if e.is_transient() => {
                    debug!(attempt, error = %e, "queue manager busy, retrying teardown");
                    tokio::time::sleep(DISPOSE_BACKOFF).await;
                }
                Err(e) => {
                    warn!(error = %e, "queue manager teardown failed");
                    break;
                }
            }
        }
        if !disposed {
            if let Err(e) = self.engine.dispose(true).await {
                error!(error = %e, "forced queue manager teardown failed");
            }
        }

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut workers| workers.drain(..).collect())
            .unwrap_or_default();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker ended abnormally");
            }
        }

        info!(endpoint = %self.config.endpoint, "transport disposed");
    }

    /// Send a logical message sequence to a destination queue.
    ///
    /// The send runs in its own transaction; `MessageSent` fires
    /// best-effort after the commit. Returns the fresh message id.
    pub async fn send(
        &self,
        destination: &Endpoint,
        messages: Vec<LogicalMessage>,
    ) -> Result<Uuid, TransportError> {
        self.send_internal(None, destination, messages, None).await
    }

    /// Send a sequence whose delivery is deferred until
    /// `process_again_at`.
    ///
    /// The message travels as a `timeout` kind; the destination parks it
    /// in its `timeout` sub-queue until the send-time elapses.
    pub async fn send_at(
        &self,
        destination: &Endpoint,
        process_again_at: DateTime<Utc>,
        messages: Vec<LogicalMessage>,
    ) -> Result<Uuid, TransportError> {
        let customize = move |message: &mut TransportMessage| {
            message.set_time_to_send(&process_again_at);
            message.set_message_type(MessageType::Timeout);
        };
        self.send_internal(None, destination, messages, Some(&customize))
            .await
    }

    /// Enlist a send in a caller-supplied open transaction.
    ///
    /// The enqueue becomes visible if and only if `tx` commits; its
    /// isolation level wins over the transport's configured one, so the
    /// send composes into the caller's larger unit of work.
    pub async fn send_in(
        &self,
        tx: &QueueTransaction,
        destination: &Endpoint,
        messages: Vec<LogicalMessage>,
    ) -> Result<Uuid, TransportError> {
        self.send_internal(Some(tx), destination, messages, None)
            .await
    }

    /// Reply to the message currently being dispatched.
    ///
    /// Targets the `source` URI of the dispatch context; only valid
    /// inside a dispatch whose source header was readable.
    pub async fn reply(
        &self,
        info: &CurrentMessageInformation,
        messages: Vec<LogicalMessage>,
    ) -> Result<Uuid, TransportError> {
        let source = info.source.clone().ok_or(TransportError::NoReplyAddress)?;
        self.send(&source, messages).await
    }

    async fn send_internal(
        &self,
        ambient: Option<&QueueTransaction>,
        destination: &Endpoint,
        messages: Vec<LogicalMessage>,
        customize: Option<&(dyn Fn(&mut TransportMessage) + Send + Sync)>,
    ) -> Result<Uuid, TransportError> {
        if messages.is_empty() {
            return Err(SerializationError::EmptySequence.into());
        }

        let id = Uuid::new_v4();
        let payload = self.serializer.serialize(&messages)?;
        let mut message = TransportMessage::new(payload);
        message.set_message_id(id);
        message.set_source(&self.config.endpoint);
        message.set_message_type(messages[0].message_type());
        if let Some(customize) = customize {
            customize(&mut message);
        }

        match ambient {
            Some(tx) => {
                // The caller's commit decides visibility; MessageSent is
                // theirs to observe through their own completion
                tx.enqueue(destination.clone(), message);
            }
            None => {
                let tx = QueueTransaction::begin(
                    self.engine.clone(),
                    self.config.transaction_options(),
                );
                tx.enqueue(destination.clone(), message);
                tx.commit().await?;

                let info = CurrentMessageInformation {
                    message_id: Some(id),
                    source: Some(self.config.endpoint.clone()),
                    destination: Some(destination.clone()),
                    current_message: messages.first().cloned(),
                    all_messages: Arc::new(messages),
                    transport_message_id: None,
                };
                self.events.fire_message_sent(&info);
            }
        }

        debug!(message_id = %id, destination = %destination, "message sent");
        Ok(id)
    }
}

// ============================================================================
// Worker loop
// ============================================================================

struct WorkerContext {
    worker: usize,
    queue: QueueName,
    engine: Arc<dyn QueueEngine>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<TimeoutScheduler>,
    running: Arc<AtomicBool>,
    options: TransactionOptions,
    peek_timeout: Duration,
    receive_timeout: Duration,
}

/// The dequeue-dispatch-commit loop run by every worker
async fn worker_loop(ctx: WorkerContext) {
    debug!(worker = ctx.worker, queue = %ctx.queue, "worker started");

    while ctx.running.load(Ordering::SeqCst) {
        match ctx.engine.peek(&ctx.queue, ctx.peek_timeout).await {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) if e.is_shutdown() => break,
            Err(e) => {
                error!(worker = ctx.worker, error = %e, "peek failed, worker exiting");
                break;
            }
        }

        if !ctx.running.load(Ordering::SeqCst) {
            break;
        }

        let tx = QueueTransaction::begin(ctx.engine.clone(), ctx.options.clone());
        let received = match ctx
            .engine
            .receive(&ctx.queue, ctx.receive_timeout, &tx)
            .await
        {
            // A peer worker won the race for the peeked message
            Ok(None) => continue,
            Err(e) if e.is_shutdown() => break,
            Err(e) => {
                error!(worker = ctx.worker, error = %e, "receive failed, worker exiting");
                break;
            }
            Ok(Some(received)) => received,
        };

        match received.message.message_type() {
            MessageType::Shutdown => {
                if let Err(e) = tx.commit().await {
                    warn!(worker = ctx.worker, error = %e, "failed to consume shutdown marker");
                }
            }
            MessageType::Administrative => {
                ctx.dispatcher.process_message(received, tx, true).await;
            }
            MessageType::Timeout => {
                handle_timeout_message(&ctx, received, tx).await;
            }
            MessageType::Ordinary | MessageType::LoadBalancer => {
                ctx.dispatcher.process_message(received, tx, false).await;
            }
        }
    }

    debug!(worker = ctx.worker, "worker exited");
}

/// Park a future-dated message, or dispatch it when its time has come
async fn handle_timeout_message(ctx: &WorkerContext, received: ReceivedMessage, tx: QueueTransaction) {
    match (received.message.message_id(), received.message.time_to_send()) {
        (Some(id), Some(Ok(at))) if at > Utc::now() => {
            ctx.scheduler.register(at, id);
            tx.move_to_subqueue(
                received.receipt.clone(),
                SubQueue::Timeout,
                received.message.clone(),
            );
            match tx.commit().await {
                Ok(()) => debug!(message_id = %id, send_time = %at, "message parked until send-time"),
                Err(e) => warn!(message_id = %id, error = %e, "failed to park deferred message"),
            }
        }
        (_, Some(Err(e))) => {
            // An unreadable send-time never becomes due; quarantine it
            warn!(
                worker = ctx.worker,
                error = %e,
                "timeout message with unreadable send-time, quarantining"
            );
            let poison = received.message.clone();
            tx.move_to_subqueue(received.receipt.clone(), SubQueue::Errors, poison);
            if let Err(e) = tx.commit().await {
                warn!(error = %e, "failed to quarantine malformed timeout message");
            }
        }
        // Due already, or not enough headers to defer: ordinary dispatch
        _ => ctx.dispatcher.process_message(received, tx, false).await,
    }
}
