//! Queue handlers wiring deliveries into the orchestrator

use async_trait::async_trait;
use tracing::{error, warn};

use crate::broker::QueueHandler;
use crate::context::Context;
use crate::error::{find_processing_error, ProcessingError};
use crate::workflow::{DeliveryStatus, WorkflowEvent};

use super::orchestrator::{Orchestrator, OrchestratorError};

/// Delivers step events to [`Orchestrator::handle_workflow_event`]
#[derive(Clone)]
pub struct WorkflowEventHandler {
    orchestrator: Orchestrator,
}

impl WorkflowEventHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl QueueHandler for WorkflowEventHandler {
    async fn handle(
        &self,
        ctx: &Context,
        event: &WorkflowEvent,
        status: DeliveryStatus,
    ) -> anyhow::Result<()> {
        self.orchestrator
            .handle_workflow_event(ctx, event, status)
            .await
            .map_err(anyhow::Error::from)
    }
}

/// Decides which handler failures reach the broker
///
/// Only failures carrying a retryable [`ProcessingError`] are returned (as
/// their original error), so the broker redelivers them. Everything else is
/// logged and acknowledged. With `no_retry_on_error` set, every failure is
/// acknowledged.
pub struct RetryDecorator<H> {
    inner: H,
    no_retry_on_error: bool,
}

impl<H: QueueHandler> RetryDecorator<H> {
    pub fn new(inner: H, no_retry_on_error: bool) -> Self {
        Self {
            inner,
            no_retry_on_error,
        }
    }
}

#[async_trait]
impl<H: QueueHandler> QueueHandler for RetryDecorator<H> {
    async fn handle(
        &self,
        ctx: &Context,
        event: &WorkflowEvent,
        status: DeliveryStatus,
    ) -> anyhow::Result<()> {
        let Err(err) = self.inner.handle(ctx, event, status).await else {
            return Ok(());
        };

        let retry = find_processing_error(&err).is_some_and(ProcessingError::retry);

        if retry && !self.no_retry_on_error {
            warn!(
                event_id = %event.id,
                workflow_id = %event.workflow.id,
                error = %format!("{err:#}"),
                "event processing failed, requesting redelivery"
            );
            return Err(into_original(err));
        }

        error!(
            event_id = %event.id,
            workflow_id = %event.workflow.id,
            retryable = retry,
            error = %format!("{err:#}"),
            "event processing failed, acknowledging"
        );
        Ok(())
    }
}

/// Unwrap the error a retryable [`ProcessingError`] was built from
fn into_original(err: anyhow::Error) -> anyhow::Error {
    let err = match err.downcast::<ProcessingError>() {
        Ok(processing) => return processing.into_original(),
        Err(err) => err,
    };
    match err.downcast::<OrchestratorError>() {
        Ok(OrchestratorError::Processing(processing)) => processing.into_original(),
        Ok(OrchestratorError::Worker(inner)) => into_original(inner),
        Ok(other) => other.into(),
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::HandlerFn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn event() -> WorkflowEvent {
        WorkflowEvent::builder(Uuid::now_v7(), "orders", "reserve").build()
    }

    struct Failing(fn() -> anyhow::Error);

    #[async_trait]
    impl QueueHandler for Failing {
        async fn handle(
            &self,
            _: &Context,
            _: &WorkflowEvent,
            _: DeliveryStatus,
        ) -> anyhow::Result<()> {
            Err((self.0)())
        }
    }

    fn failing(make: fn() -> anyhow::Error) -> Failing {
        Failing(make)
    }

    #[tokio::test]
    async fn test_ok_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = HandlerFn::new(move |_ctx, _event, _status| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        });

        let decorator = RetryDecorator::new(inner, false);
        decorator
            .handle(&Context::new(), &event(), DeliveryStatus::New)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_returns_original() {
        let decorator = RetryDecorator::new(
            failing(|| ProcessingError::retryable(anyhow::anyhow!("db down")).into()),
            false,
        );

        let err = decorator
            .handle(&Context::new(), &event(), DeliveryStatus::New)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "db down");
        assert!(find_processing_error(&err).is_none());
    }

    #[tokio::test]
    async fn test_retryable_inside_orchestrator_error() {
        let decorator = RetryDecorator::new(
            failing(|| {
                OrchestratorError::Internal("store unavailable".into())
                    .retryable()
                    .into()
            }),
            false,
        );

        let err = decorator
            .handle(&Context::new(), &event(), DeliveryStatus::New)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "internal error: store unavailable");
    }

    #[tokio::test]
    async fn test_permanent_and_plain_errors_are_acknowledged() {
        let permanent = RetryDecorator::new(
            failing(|| ProcessingError::permanent(anyhow::anyhow!("bad input")).into()),
            false,
        );
        let plain = RetryDecorator::new(failing(|| anyhow::anyhow!("boom")), false);

        assert!(permanent
            .handle(&Context::new(), &event(), DeliveryStatus::New)
            .await
            .is_ok());
        assert!(plain
            .handle(&Context::new(), &event(), DeliveryStatus::New)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_kill_switch_acknowledges_retryable() {
        let decorator = RetryDecorator::new(
            failing(|| ProcessingError::retryable(anyhow::anyhow!("db down")).into()),
            true,
        );

        assert!(decorator
            .handle(&Context::new(), &event(), DeliveryStatus::New)
            .await
            .is_ok());
    }
}
