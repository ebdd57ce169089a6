//! Message broker seam
//!
//! The orchestrator publishes step events through a [`QueueBroker`] and is
//! driven by deliveries to a [`QueueHandler`]. Delivery is at-least-once:
//! a handler error asks the broker to redeliver, `Ok` acknowledges.
//!
//! [`LocalBroker`] is an in-process implementation with per-topic queues,
//! bounded concurrency, backoff redelivery and a dead-letter list.

mod local;
mod redelivery;

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{Classify, ErrorKind};
use crate::schema::WorkflowSchemaStepTopic;
use crate::workflow::{DeliveryStatus, WorkflowEvent};

pub use local::{DeadLetter, LocalBroker, LocalBrokerConfig, LocalBrokerStatus};
pub use redelivery::RedeliveryPolicy;

/// Broker errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker no longer accepts messages
    #[error("broker is shut down")]
    Closed,

    /// Broker already running
    #[error("broker is already running")]
    AlreadyRunning,

    /// A handler is already subscribed to the topic
    #[error("topic already has a subscriber: {0}")]
    AlreadySubscribed(String),

    /// The event could not be encoded for the wire
    #[error("failed to encode event: {0}")]
    Encode(String),

    /// The transport rejected the message
    #[error("publish failed: {0}")]
    Publish(String),

    /// In-flight deliveries did not finish in time
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

impl BrokerError {
    /// Wrap a transport failure
    pub fn publish(err: impl std::fmt::Display) -> Self {
        Self::Publish(err.to_string())
    }
}

impl Classify for BrokerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed | Self::Publish(_) => ErrorKind::Io,
            Self::AlreadyRunning | Self::AlreadySubscribed(_) => ErrorKind::Conflict,
            Self::Encode(_) => ErrorKind::Internal,
            Self::ShutdownTimeout => ErrorKind::Timeout,
        }
    }
}

/// Publishes step events to topics
#[async_trait]
pub trait QueueBroker: Send + Sync + 'static {
    async fn send(
        &self,
        topic: &WorkflowSchemaStepTopic,
        event: &WorkflowEvent,
    ) -> Result<(), BrokerError>;
}

/// Consumes delivered step events
///
/// Returning an error asks the broker to redeliver the message; returning
/// `Ok` acknowledges it.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &Context,
        event: &WorkflowEvent,
        status: DeliveryStatus,
    ) -> anyhow::Result<()>;
}

/// Adapts a closure to [`QueueHandler`]
///
/// # Example
///
/// ```
/// use flowline_orchestrator::broker::HandlerFn;
///
/// let handler = HandlerFn::new(|_ctx, event, _status| async move {
///     tracing::info!(event_id = %event.id, "received");
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub struct HandlerFn<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> HandlerFn<F, Fut>
where
    F: Fn(Context, WorkflowEvent, DeliveryStatus) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> QueueHandler for HandlerFn<F, Fut>
where
    F: Fn(Context, WorkflowEvent, DeliveryStatus) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &Context,
        event: &WorkflowEvent,
        status: DeliveryStatus,
    ) -> anyhow::Result<()> {
        (self.f)(ctx.clone(), event.clone(), status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_handler_fn_receives_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = HandlerFn::new(move |ctx, event, status| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(ctx.request_id(), Some("req-1"));
                assert_eq!(event.workflow.step, "a");
                assert_eq!(status, DeliveryStatus::HandledWithError);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event = WorkflowEvent::builder(Uuid::now_v7(), "s", "a").build();
        let ctx = Context::new().with_request_id("req-1");
        handler
            .handle(&ctx, &event, DeliveryStatus::HandledWithError)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(BrokerError::publish("refused").kind(), ErrorKind::Io);
        assert_eq!(BrokerError::AlreadyRunning.kind(), ErrorKind::Conflict);
        assert_eq!(BrokerError::ShutdownTimeout.kind(), ErrorKind::Timeout);
    }
}
