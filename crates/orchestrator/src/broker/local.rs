//! In-process broker
//!
//! One unbounded queue per topic, one consumer task per subscribed topic and
//! a shared semaphore bounding concurrent deliveries across all topics.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::redelivery::duration_millis;
use super::{BrokerError, QueueBroker, QueueHandler, RedeliveryPolicy};
use crate::context::Context;
use crate::schema::WorkflowSchemaStepTopic;
use crate::workflow::{DeliveryStatus, WorkflowEvent};

/// Local broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBrokerConfig {
    /// Maximum concurrent deliveries across all topics
    pub max_concurrency: usize,

    /// Redelivery backoff for failed deliveries
    pub redelivery: RedeliveryPolicy,

    /// How long shutdown waits for in-flight deliveries
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Settled event ids whose delivery status is remembered
    ///
    /// Past this many, the oldest settled ids are forgotten and a resend
    /// of one of them is delivered as [`DeliveryStatus::New`].
    pub delivery_retention: usize,
}

impl Default for LocalBrokerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            redelivery: RedeliveryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
            delivery_retention: 10_000,
        }
    }
}

impl LocalBrokerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `FLOWLINE_BROKER_MAX_CONCURRENCY`: concurrent deliveries (default: 16)
    /// - `FLOWLINE_BROKER_MAX_ATTEMPTS`: deliveries per message before dead-lettering (default: 5)
    /// - `FLOWLINE_BROKER_SHUTDOWN_TIMEOUT_MS`: drain timeout on shutdown (default: 30000)
    /// - `FLOWLINE_BROKER_DELIVERY_RETENTION`: settled delivery statuses kept (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrency = std::env::var("FLOWLINE_BROKER_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_concurrency);

        let max_attempts = std::env::var("FLOWLINE_BROKER_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.redelivery.max_attempts);

        let shutdown_timeout = std::env::var("FLOWLINE_BROKER_SHUTDOWN_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_timeout);

        let delivery_retention = std::env::var("FLOWLINE_BROKER_DELIVERY_RETENTION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.delivery_retention);

        Self {
            redelivery: defaults.redelivery.with_max_attempts(max_attempts),
            shutdown_timeout,
            ..defaults
        }
        .with_max_concurrency(max_concurrency)
        .with_delivery_retention(delivery_retention)
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_delivery_retention(mut self, retention: usize) -> Self {
        self.delivery_retention = retention.max(1);
        self
    }
}

/// Local broker status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalBrokerStatus {
    /// Accepting messages, not consuming yet
    Stopped,
    /// Consuming subscribed topics
    Running,
    /// Finishing in-flight deliveries, no longer accepting messages
    Draining,
    /// Shut down
    Closed,
}

/// A message whose deliveries were exhausted
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub topic: WorkflowSchemaStepTopic,
    pub event: WorkflowEvent,
    pub attempts: u32,
    pub last_error: String,
    pub dead_at: DateTime<Utc>,
}

struct Envelope {
    topic: WorkflowSchemaStepTopic,
    event: WorkflowEvent,
    attempt: u32,
}

struct TopicQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Option<mpsc::UnboundedReceiver<Envelope>>,
}

impl TopicQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// State shared with consumer and delivery tasks
struct Shared {
    config: LocalBrokerConfig,
    queues: DashMap<String, TopicQueue>,
    deliveries: DashMap<Uuid, DeliveryStatus>,
    /// Settled event ids, oldest first
    settled: Mutex<VecDeque<Uuid>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    /// Messages queued, in flight or waiting for redelivery
    pending: AtomicUsize,
    shutdown: CancellationToken,
    context: Context,
}

impl Shared {
    fn enqueue(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let queue = self
            .queues
            .entry(envelope.topic.as_str().to_string())
            .or_insert_with(TopicQueue::new);

        queue.tx.send(envelope).map_err(|_| BrokerError::Closed)
    }

    async fn deliver(self: Arc<Self>, handler: Arc<dyn QueueHandler>, envelope: Envelope) {
        let event_id = envelope.event.id;
        let status = self
            .deliveries
            .get(&event_id)
            .map(|s| *s)
            .unwrap_or_default();
        let ctx = self.context.for_request(envelope.event.request_id());

        debug!(
            %event_id,
            topic = %envelope.topic,
            attempt = envelope.attempt,
            ?status,
            "Delivering message"
        );

        // A panicking handler only unwinds its own task
        let event = envelope.event.clone();
        let outcome =
            tokio::spawn(async move { handler.handle(&ctx, &event, status).await }).await;

        let error = match outcome {
            Ok(Ok(())) => {
                self.deliveries.insert(event_id, DeliveryStatus::Handled);
                self.settle(event_id);
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(join_err) => {
                let message = panic_message(join_err);
                error!(%event_id, topic = %envelope.topic, "Handler panicked: {}", message);
                format!("handler panicked: {message}")
            }
        };

        self.deliveries.insert(event_id, DeliveryStatus::HandledWithError);
        self.redeliver_or_bury(envelope, error);
    }

    /// Remember a settled event id, forgetting the oldest past the retention
    fn settle(&self, event_id: Uuid) {
        let mut settled = self.settled.lock();
        settled.push_back(event_id);
        while settled.len() > self.config.delivery_retention {
            if let Some(oldest) = settled.pop_front() {
                // Still tracked under a newer settlement
                if !settled.contains(&oldest) {
                    self.deliveries.remove(&oldest);
                }
            }
        }
    }

    fn redeliver_or_bury(self: Arc<Self>, envelope: Envelope, error: String) {
        let policy = &self.config.redelivery;
        let event_id = envelope.event.id;

        if !policy.has_attempts_remaining(envelope.attempt) || self.shutdown.is_cancelled() {
            warn!(
                event_id = %envelope.event.id,
                topic = %envelope.topic,
                attempts = envelope.attempt,
                %error,
                "Delivery attempts exhausted, dead-lettering message"
            );
            self.dead_letters.lock().push(DeadLetter {
                topic: envelope.topic,
                event: envelope.event,
                attempts: envelope.attempt,
                last_error: error,
                dead_at: Utc::now(),
            });
            self.settle(event_id);
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        let next_attempt = envelope.attempt + 1;
        let delay = policy.delay_for_attempt(next_attempt);

        warn!(
            event_id = %envelope.event.id,
            topic = %envelope.topic,
            attempt = envelope.attempt,
            delay_ms = delay.as_millis() as u64,
            %error,
            "Delivery failed, scheduling redelivery"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let redelivery = Envelope { attempt: next_attempt, ..envelope };
                    if let Err(e) = self.enqueue(redelivery) {
                        error!("Failed to requeue message: {}", e);
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                _ = self.shutdown.cancelled() => {
                    debug!(event_id = %envelope.event.id, "Redelivery dropped on shutdown");
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });
    }
}

/// In-process at-least-once broker
///
/// Messages sent before [`LocalBroker::start`] are buffered per topic.
/// Every delivery carries the [`DeliveryStatus`] last recorded for the
/// event id, so sending an already handled event again delivers it as
/// [`DeliveryStatus::Handled`].
///
/// # Example
///
/// ```ignore
/// use flowline_orchestrator::broker::{LocalBroker, LocalBrokerConfig};
///
/// let broker = Arc::new(LocalBroker::new(LocalBrokerConfig::from_env()));
/// broker.subscribe("order.charge", orchestrator.queue_event_handler())?;
/// broker.start()?;
///
/// // ... later, graceful shutdown
/// broker.shutdown().await?;
/// ```
pub struct LocalBroker {
    shared: Arc<Shared>,
    handlers: RwLock<HashMap<String, Arc<dyn QueueHandler>>>,
    in_flight: Arc<Semaphore>,
    status: RwLock<LocalBrokerStatus>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalBroker {
    pub fn new(config: LocalBrokerConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            shared: Arc::new(Shared {
                config,
                queues: DashMap::new(),
                deliveries: DashMap::new(),
                settled: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
                context: Context::new(),
            }),
            handlers: RwLock::new(HashMap::new()),
            in_flight,
            status: RwLock::new(LocalBrokerStatus::Stopped),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Register the handler consuming `topic`
    ///
    /// Subscribing while running starts consuming the topic immediately.
    pub fn subscribe(
        &self,
        topic: impl Into<WorkflowSchemaStepTopic>,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<(), BrokerError> {
        let topic = topic.into();

        {
            let mut handlers = self.handlers.write();
            if handlers.contains_key(topic.as_str()) {
                return Err(BrokerError::AlreadySubscribed(topic.to_string()));
            }
            handlers.insert(topic.to_string(), Arc::clone(&handler));
        }

        debug!(%topic, "Subscribed handler");

        if self.status() == LocalBrokerStatus::Running {
            self.spawn_consumer(topic.as_str(), handler);
        }
        Ok(())
    }

    /// Start consuming every subscribed topic
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), BrokerError> {
        {
            let mut status = self.status.write();
            match *status {
                LocalBrokerStatus::Running => return Err(BrokerError::AlreadyRunning),
                LocalBrokerStatus::Draining | LocalBrokerStatus::Closed => {
                    return Err(BrokerError::Closed)
                }
                LocalBrokerStatus::Stopped => *status = LocalBrokerStatus::Running,
            }
        }

        let handlers = self.handlers.read().clone();
        info!(
            topics = handlers.len(),
            max_concurrency = self.shared.config.max_concurrency,
            "Starting local broker"
        );

        for (topic, handler) in handlers {
            self.spawn_consumer(&topic, handler);
        }
        Ok(())
    }

    /// Stop consuming and wait for in-flight deliveries
    ///
    /// Queued messages that were never delivered are discarded.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        {
            let mut status = self.status.write();
            if *status == LocalBrokerStatus::Closed {
                return Ok(());
            }
            *status = LocalBrokerStatus::Draining;
        }

        info!("Initiating graceful shutdown");
        self.shared.shutdown.cancel();

        let max = self.shared.config.max_concurrency;
        let deadline = tokio::time::Instant::now() + self.shared.config.shutdown_timeout;

        loop {
            let available = self.in_flight.available_permits();
            if available == max {
                debug!("All deliveries completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = max - available, "Shutdown timeout reached");
                *self.status.write() = LocalBrokerStatus::Closed;
                return Err(BrokerError::ShutdownTimeout);
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for consumer in self.consumers.lock().drain(..) {
            consumer.abort();
        }

        *self.status.write() = LocalBrokerStatus::Closed;
        info!("Local broker stopped");
        Ok(())
    }

    pub fn status(&self) -> LocalBrokerStatus {
        *self.status.read()
    }

    /// Messages queued, in flight or waiting for redelivery
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every sent message is acknowledged or dead-lettered
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return Err(BrokerError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Event ids whose delivery status is currently tracked
    pub fn tracked_deliveries(&self) -> usize {
        self.shared.deliveries.len()
    }

    /// Last recorded delivery status of an event
    pub fn delivery_status(&self, event_id: Uuid) -> Option<DeliveryStatus> {
        self.shared.deliveries.get(&event_id).map(|s| *s)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().clone()
    }

    fn spawn_consumer(&self, topic: &str, handler: Arc<dyn QueueHandler>) {
        let rx = self
            .shared
            .queues
            .entry(topic.to_string())
            .or_insert_with(TopicQueue::new)
            .rx
            .take();

        let Some(mut rx) = rx else {
            warn!(%topic, "Topic already has a consumer");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let in_flight = Arc::clone(&self.in_flight);
        let topic = topic.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                let permit = tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => break,
                    permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    shared.deliver(handler, envelope).await;
                    drop(permit);
                });
            }

            debug!(%topic, "Consumer loop exited");
        });

        self.consumers.lock().push(handle);
    }
}

#[async_trait]
impl QueueBroker for LocalBroker {
    async fn send(
        &self,
        topic: &WorkflowSchemaStepTopic,
        event: &WorkflowEvent,
    ) -> Result<(), BrokerError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            topic: topic.clone(),
            event: event.clone(),
            attempt: 1,
        };

        if let Err(e) = self.shared.enqueue(envelope) {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        debug!(%topic, event_id = %event.id, "Message queued");
        Ok(())
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::HandlerFn;
    use std::sync::atomic::AtomicU32;

    fn fast_config(max_attempts: u32) -> LocalBrokerConfig {
        LocalBrokerConfig::default()
            .with_redelivery(RedeliveryPolicy::fixed(Duration::from_millis(1), max_attempts))
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    struct Panicking {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl QueueHandler for Panicking {
        async fn handle(
            &self,
            _ctx: &Context,
            _event: &WorkflowEvent,
            _status: DeliveryStatus,
        ) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            panic!("worker bug")
        }
    }

    fn event(step: &str) -> WorkflowEvent {
        WorkflowEvent::builder(Uuid::now_v7(), "s", step).build()
    }

    #[test]
    fn test_default_config() {
        let config = LocalBrokerConfig::default();
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.redelivery.max_attempts, 5);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.delivery_retention, 10_000);
        assert_eq!(config.clone().with_delivery_retention(0).delivery_retention, 1);
        assert_eq!(config.with_max_concurrency(0).max_concurrency, 1);
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let config =
            LocalBrokerConfig::default().with_shutdown_timeout(Duration::from_millis(1500));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["shutdown_timeout"], 1500);
        assert_eq!(value["redelivery"]["initial_interval"], 100);

        let decoded: LocalBrokerConfig = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(decoded.delivery_retention, 10_000);
    }

    #[tokio::test]
    async fn test_buffered_messages_are_delivered_after_start() {
        let broker = LocalBroker::new(fast_config(3));
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        broker
            .subscribe(
                "topic.a",
                Arc::new(HandlerFn::new(move |_ctx, event: WorkflowEvent, status| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push((event.id, status));
                        Ok(())
                    }
                })),
            )
            .unwrap();

        let first = event("a");
        broker.send(&"topic.a".into(), &first).await.unwrap();
        assert_eq!(broker.pending(), 1);

        broker.start().unwrap();
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();

        assert_eq!(*received.lock(), vec![(first.id, DeliveryStatus::New)]);
        assert_eq!(broker.delivery_status(first.id), Some(DeliveryStatus::Handled));

        broker.shutdown().await.unwrap();
        assert_eq!(broker.status(), LocalBrokerStatus::Closed);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_redelivered_with_error_status() {
        let broker = LocalBroker::new(fast_config(3));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(AtomicU32::new(0));

        let sink = Arc::clone(&statuses);
        let counter = Arc::clone(&attempts);
        broker
            .subscribe(
                "topic.a",
                Arc::new(HandlerFn::new(move |_ctx, _event, status| {
                    let sink = Arc::clone(&sink);
                    let counter = Arc::clone(&counter);
                    async move {
                        sink.lock().push(status);
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            anyhow::bail!("transient");
                        }
                        Ok(())
                    }
                })),
            )
            .unwrap();
        broker.start().unwrap();

        broker.send(&"topic.a".into(), &event("a")).await.unwrap();
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();

        assert_eq!(
            *statuses.lock(),
            vec![DeliveryStatus::New, DeliveryStatus::HandledWithError]
        );
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered() {
        let broker = LocalBroker::new(fast_config(2));
        broker
            .subscribe(
                "topic.a",
                Arc::new(HandlerFn::new(|_ctx, _event, _status| async {
                    Err(anyhow::anyhow!("always fails"))
                })),
            )
            .unwrap();
        broker.start().unwrap();

        let message = event("a");
        broker.send(&"topic.a".into(), &message).await.unwrap();
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].event.id, message.id);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error, "always fails");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_redelivered_then_dead_lettered() {
        let broker = LocalBroker::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        broker
            .subscribe(
                "topic.a",
                Arc::new(Panicking {
                    attempts: Arc::clone(&attempts),
                }),
            )
            .unwrap();
        broker.start().unwrap();

        let message = event("a");
        broker.send(&"topic.a".into(), &message).await.unwrap();
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(broker.pending(), 0);
        assert_eq!(
            broker.delivery_status(message.id),
            Some(DeliveryStatus::HandledWithError)
        );
        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].last_error.contains("worker bug"));

        broker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_tracking_is_bounded() {
        let broker = LocalBroker::new(fast_config(1).with_delivery_retention(10));
        broker
            .subscribe(
                "topic.a",
                Arc::new(HandlerFn::new(|_ctx, _event, _status| async { Ok(()) })),
            )
            .unwrap();
        broker.start().unwrap();

        let mut sent = Vec::new();
        for _ in 0..100 {
            let message = event("a");
            broker.send(&"topic.a".into(), &message).await.unwrap();
            sent.push(message.id);
        }
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();

        assert_eq!(broker.tracked_deliveries(), 10);
        let remembered = sent
            .iter()
            .filter(|id| broker.delivery_status(**id) == Some(DeliveryStatus::Handled))
            .count();
        assert_eq!(remembered, 10);
    }

    #[tokio::test]
    async fn test_resent_handled_event_is_delivered_as_handled() {
        let broker = LocalBroker::new(fast_config(1));
        let statuses = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&statuses);
        broker
            .subscribe(
                "topic.a",
                Arc::new(HandlerFn::new(move |_ctx, _event, status| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push(status);
                        Ok(())
                    }
                })),
            )
            .unwrap();
        broker.start().unwrap();

        let message = event("a");
        broker.send(&"topic.a".into(), &message).await.unwrap();
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();
        broker.send(&"topic.a".into(), &message).await.unwrap();
        broker.wait_idle(Duration::from_secs(2)).await.unwrap();

        assert_eq!(
            *statuses.lock(),
            vec![DeliveryStatus::New, DeliveryStatus::Handled]
        );
    }

    #[tokio::test]
    async fn test_subscribe_twice_conflicts() {
        let broker = LocalBroker::new(LocalBrokerConfig::default());
        let handler: Arc<dyn QueueHandler> =
            Arc::new(HandlerFn::new(|_ctx, _event, _status| async { Ok(()) }));

        broker.subscribe("topic.a", Arc::clone(&handler)).unwrap();
        assert!(matches!(
            broker.subscribe("topic.a", handler),
            Err(BrokerError::AlreadySubscribed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_rejected() {
        let broker = LocalBroker::new(LocalBrokerConfig::default());
        broker.start().unwrap();
        broker.shutdown().await.unwrap();

        let result = broker.send(&"topic.a".into(), &event("a")).await;
        assert!(matches!(result, Err(BrokerError::Closed)));
        assert!(matches!(broker.start(), Err(BrokerError::Closed)));
    }
}
