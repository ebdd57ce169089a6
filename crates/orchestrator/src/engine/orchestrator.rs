//! Workflow orchestrator
//!
//! The `Orchestrator` is responsible for:
//! - Registering workflow schemas
//! - Starting and restarting workflows by publishing step events
//! - Processing delivered step events: running the step's worker, recording
//!   the step and advancing to the next step or completing the workflow

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::broker::{BrokerError, QueueBroker, QueueHandler};
use crate::config::OrchestratorConfig;
use crate::context::{Context, ContextError};
use crate::error::{Classify, ErrorKind, ProcessingError};
use crate::persistence::{StoreError, WorkflowForceUpdate, WorkflowStore, WorkflowUpdate};
use crate::schema::{
    WorkflowSchema, WorkflowSchemaName, WorkflowSchemaStep, WorkflowSchemaStepName,
    WorkflowSchemaStepTopic,
};
use crate::workflow::{DeliveryStatus, Workflow, WorkflowEvent, WorkflowStatus, WorkflowStep};

use super::handler::{RetryDecorator, WorkflowEventHandler};
use super::registry::{RegistryError, SchemaRegistry};

/// Errors from orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Schema lookup or registration failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The schema has no step with this name
    #[error("step {step} not found in workflow schema {schema}")]
    StepNotFound { schema: String, step: String },

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Broker error
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The operation's context was cancelled or timed out
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Failure carrying an explicit redelivery decision
    #[error("{0}")]
    Processing(#[source] ProcessingError),

    /// The step's worker failed
    #[error("{0:#}")]
    Worker(#[source] anyhow::Error),

    /// Invariant broken inside the orchestrator
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Wrap as a failure the broker should redeliver
    pub fn retryable(self) -> Self {
        Self::Processing(ProcessingError::retryable(self))
    }

    /// Whether this error asks for redelivery
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Processing(err) => err.retry(),
            Self::Worker(err) => crate::error::find_processing_error(err)
                .is_some_and(ProcessingError::retry),
            _ => false,
        }
    }
}

impl Classify for OrchestratorError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(e) => e.kind(),
            Self::StepNotFound { .. } => ErrorKind::NotExist,
            Self::Store(e) => e.kind(),
            Self::Broker(e) => e.kind(),
            Self::Context(e) => e.kind(),
            Self::Processing(e) => ErrorKind::of(e.original_error()),
            Self::Worker(e) => ErrorKind::of(e),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

struct Inner {
    registry: Arc<SchemaRegistry>,
    broker: Arc<dyn QueueBroker>,
    store: Arc<dyn WorkflowStore>,
    config: OrchestratorConfig,
}

/// Workflow orchestrator
///
/// Cheap to clone; clones share the registry, broker and store.
///
/// # Example
///
/// ```ignore
/// use flowline_orchestrator::prelude::*;
///
/// let orchestrator = Orchestrator::new(
///     Arc::new(SchemaRegistry::new()),
///     broker.clone(),
///     Arc::new(InMemoryWorkflowStore::new()),
///     OrchestratorConfig::from_env(),
/// );
/// orchestrator.add_workflow_schema(schema)?;
///
/// // Deliver step events to the orchestrator
/// broker.subscribe("order.reserve", orchestrator.queue_event_handler())?;
///
/// let workflow_id = orchestrator.start(&Context::new(), "order", Some(input)).await?;
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        broker: Arc<dyn QueueBroker>,
        store: Arc<dyn WorkflowStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                broker,
                store,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Register a schema; fails with a conflict if the name is taken
    pub fn add_workflow_schema(&self, schema: WorkflowSchema) -> Result<(), OrchestratorError> {
        let name = schema.name().clone();
        self.inner.registry.add(schema)?;
        info!(schema = %name, "registered workflow schema");
        Ok(())
    }

    /// Unregister a schema; returns whether it was registered
    pub fn remove_workflow_schema(&self, name: &str) -> bool {
        let removed = self.inner.registry.remove(name);
        if removed {
            info!(schema = %name, "removed workflow schema");
        }
        removed
    }

    pub fn workflow_schema(&self, name: &str) -> Result<WorkflowSchema, OrchestratorError> {
        Ok(self.inner.registry.get(name)?)
    }

    /// Start a new workflow from the schema's first step
    #[instrument(skip(self, ctx, payload))]
    pub async fn start(
        &self,
        ctx: &Context,
        schema_name: &str,
        payload: Option<Value>,
    ) -> Result<Uuid, OrchestratorError> {
        let schema = self.workflow_schema(schema_name)?;
        let step = schema.first_step();
        self.run_workflow(ctx, None, &schema, step, None, payload).await
    }

    /// Start a new workflow from an arbitrary step, optionally linked to a parent
    #[instrument(skip(self, ctx, payload))]
    pub async fn start_from(
        &self,
        ctx: &Context,
        schema_name: &str,
        step_name: &str,
        parent_id: Option<Uuid>,
        payload: Option<Value>,
    ) -> Result<Uuid, OrchestratorError> {
        let (schema, step) = self.resolve_step(schema_name, step_name)?;
        self.run_workflow(ctx, None, &schema, step, parent_id, payload).await
    }

    /// Re-run an existing workflow from the schema's first step
    #[instrument(skip(self, ctx, payload))]
    pub async fn restart(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        schema_name: &str,
        payload: Option<Value>,
    ) -> Result<Uuid, OrchestratorError> {
        let schema = self.workflow_schema(schema_name)?;
        let step = schema.first_step();
        self.run_workflow(ctx, Some(workflow_id), &schema, step, None, payload).await
    }

    /// Re-run an existing workflow from an arbitrary step
    #[instrument(skip(self, ctx, payload))]
    pub async fn restart_from(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        schema_name: &str,
        step_name: &str,
        payload: Option<Value>,
    ) -> Result<Uuid, OrchestratorError> {
        let (schema, step) = self.resolve_step(schema_name, step_name)?;
        self.run_workflow(ctx, Some(workflow_id), &schema, step, None, payload).await
    }

    /// Handler to subscribe to every step topic
    ///
    /// Wraps [`Orchestrator::handle_workflow_event`] so that only errors
    /// explicitly marked retryable reach the broker.
    pub fn queue_event_handler(&self) -> Arc<dyn QueueHandler> {
        Arc::new(RetryDecorator::new(
            WorkflowEventHandler::new(self.clone()),
            self.inner.config.no_retry_on_error,
        ))
    }

    /// Process one delivered step event
    ///
    /// Every failure is recorded on the workflow (best-effort) before it is
    /// returned. Store failures before the worker runs come back retryable;
    /// worker, publish and lookup failures come back as they are.
    #[instrument(
        skip_all,
        fields(
            event_id = %event.id,
            workflow_id = %event.workflow.id,
            schema = %event.workflow.schema,
            step = %event.workflow.step,
        )
    )]
    pub async fn handle_workflow_event(
        &self,
        ctx: &Context,
        event: &WorkflowEvent,
        status: DeliveryStatus,
    ) -> Result<(), OrchestratorError> {
        if status == DeliveryStatus::Handled {
            info!("event already handled, skipping");
            return Ok(());
        }

        let workflow_id = event.workflow.id;

        let (schema, step) =
            match self.resolve_step(event.workflow.schema.as_str(), event.workflow.step.as_str()) {
                Ok(found) => found,
                Err(err) => {
                    self.save_workflow_error(ctx, workflow_id, &err).await;
                    return Err(err);
                }
            };

        let mut workflow = match self
            .store_call(ctx, self.inner.store.get_workflow_by_id(workflow_id))
            .await
        {
            Ok(workflow) => workflow,
            Err(err) if err.kind() == ErrorKind::NotExist => return Err(err),
            Err(err) => return Err(self.fail_retryable(ctx, workflow_id, err).await),
        };

        if workflow.status != WorkflowStatus::InProgress {
            debug!(status = %workflow.status, "resetting workflow to in progress");
            let reset = self.inner.store.update_workflow_force(
                workflow_id,
                WorkflowForceUpdate::in_progress(),
            );
            if let Err(err) = self.store_call(ctx, reset).await {
                return Err(self.fail_retryable(ctx, workflow_id, err).await);
            }
            workflow.status = WorkflowStatus::InProgress;
            workflow.error = None;
            workflow.error_kind = None;
        }

        let steps = match self.append_workflow_step(ctx, &workflow, event).await {
            Ok(steps) => steps,
            Err(err) => return Err(self.fail_retryable(ctx, workflow_id, err).await),
        };

        if let Err(err) = self
            .process_workflow_event(ctx, &schema, step.as_ref(), event, steps)
            .await
        {
            self.save_workflow_error(ctx, workflow_id, &err).await;
            return Err(err);
        }

        Ok(())
    }

    async fn run_workflow(
        &self,
        ctx: &Context,
        existing_id: Option<Uuid>,
        schema: &WorkflowSchema,
        step: Arc<dyn WorkflowSchemaStep>,
        parent_id: Option<Uuid>,
        payload: Option<Value>,
    ) -> Result<Uuid, OrchestratorError> {
        let workflow_id = match existing_id {
            Some(id) => id,
            None => {
                let id = self.inner.store.new_id();
                let workflow = Workflow::new(id, schema.name().clone(), payload.clone())
                    .with_parent(parent_id)
                    .with_request_id(ctx.request_id().map(str::to_string));

                self.store_call(ctx, self.inner.store.create_workflow(&workflow))
                    .await?;
                id
            }
        };

        let event = self.build_event(ctx, workflow_id, schema.name(), step.name(), payload);

        if let Err(err) = self.publish(ctx, step.topic(), &event).await {
            error!(%workflow_id, step = %step.name(), error = %err, "failed to publish step event");
            self.save_workflow_error(ctx, workflow_id, &err).await;
            return Err(err);
        }

        info!(
            %workflow_id,
            schema = %schema.name(),
            step = %step.name(),
            "workflow step published"
        );
        Ok(workflow_id)
    }

    /// Record the delivered step, replacing the last entry if it is the same step
    async fn append_workflow_step(
        &self,
        ctx: &Context,
        workflow: &Workflow,
        event: &WorkflowEvent,
    ) -> Result<Vec<WorkflowStep>, OrchestratorError> {
        let entry = WorkflowStep::new(
            event.workflow.step.clone(),
            event.workflow.step_payload.clone(),
            self.inner.config.version(),
        );

        let mut steps = workflow.steps.clone();
        match steps.last_mut() {
            Some(last) if last.name == entry.name => *last = entry,
            _ => steps.push(entry),
        }

        self.store_call(ctx, self.inner.store.put_workflow_steps(workflow.id, &steps))
            .await?;
        Ok(steps)
    }

    async fn process_workflow_event(
        &self,
        ctx: &Context,
        schema: &WorkflowSchema,
        step: &dyn WorkflowSchemaStep,
        event: &WorkflowEvent,
        steps: Vec<WorkflowStep>,
    ) -> Result<(), OrchestratorError> {
        let workflow_id = event.workflow.id;
        let worker = step.worker().ok_or_else(|| {
            OrchestratorError::Internal(format!("step {} has no worker", step.name()))
        })?;

        let result = worker
            .run(ctx, event)
            .await
            .map_err(OrchestratorError::Worker)?;

        let Some(next) = schema.next_step(step.name().as_str()) else {
            let complete = self
                .inner
                .store
                .set_workflow_status(workflow_id, WorkflowStatus::Success);
            if let Err(err) = self.store_call(ctx, complete).await {
                error!(
                    %workflow_id,
                    error = %err,
                    "workflow finished but its status was not saved"
                );
                return Err(OrchestratorError::Internal(format!(
                    "workflow finished but its status was not saved: {err}"
                )));
            }
            info!(%workflow_id, "workflow completed");
            return Ok(());
        };

        let next_event =
            self.build_event(ctx, workflow_id, schema.name(), next.name(), result.clone());

        if let Err(err) = self.publish(ctx, next.topic(), &next_event).await {
            error!(
                %workflow_id,
                next_step = %next.name(),
                error = %err,
                "failed to publish next step event"
            );
            self.save_pending_step(ctx, workflow_id, steps, next.name(), result).await;
            return Err(err);
        }

        debug!(%workflow_id, next_step = %next.name(), "advanced to next step");
        Ok(())
    }

    /// Keep a computed but unpublished next-step payload so a restart can resume from it
    async fn save_pending_step(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        mut steps: Vec<WorkflowStep>,
        next: &WorkflowSchemaStepName,
        data: Option<Value>,
    ) {
        steps.push(WorkflowStep::new(
            next.clone(),
            data,
            self.inner.config.version(),
        ));

        let update = self
            .inner
            .store
            .update_workflow_not_nil(workflow_id, WorkflowUpdate::steps(steps));
        if let Err(err) = self.store_call(ctx, update).await {
            warn!(%workflow_id, error = %err, "failed to save pending step");
        }
    }

    /// Mark the workflow failed; a failure to do so is only logged
    async fn save_workflow_error(&self, ctx: &Context, workflow_id: Uuid, err: &OrchestratorError) {
        let update = self.inner.store.update_workflow_force(
            workflow_id,
            WorkflowForceUpdate::failed(err.to_string(), err.kind()),
        );
        if let Err(save_err) = self.store_call(ctx, update).await {
            warn!(
                %workflow_id,
                error = %save_err,
                original = %err,
                "failed to save workflow error"
            );
        }
    }

    async fn fail_retryable(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        err: OrchestratorError,
    ) -> OrchestratorError {
        self.save_workflow_error(ctx, workflow_id, &err).await;
        err.retryable()
    }

    fn resolve_step(
        &self,
        schema_name: &str,
        step_name: &str,
    ) -> Result<(WorkflowSchema, Arc<dyn WorkflowSchemaStep>), OrchestratorError> {
        let schema = self.workflow_schema(schema_name)?;
        let step = schema
            .step(step_name)
            .ok_or_else(|| OrchestratorError::StepNotFound {
                schema: schema_name.to_string(),
                step: step_name.to_string(),
            })?;
        Ok((schema, step))
    }

    fn build_event(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        schema: &WorkflowSchemaName,
        step: &WorkflowSchemaStepName,
        payload: Option<Value>,
    ) -> WorkflowEvent {
        WorkflowEvent::builder(workflow_id, schema.clone(), step.clone())
            .payload(payload)
            .request_id(ctx.request_id())
            .metadata(self.inner.config.event_metadata.clone())
            .debug(self.inner.config.debug_events)
            .build()
    }

    async fn publish(
        &self,
        ctx: &Context,
        topic: &WorkflowSchemaStepTopic,
        event: &WorkflowEvent,
    ) -> Result<(), OrchestratorError> {
        ctx.scope(self.inner.broker.send(topic, event)).await??;
        Ok(())
    }

    async fn store_call<T, F>(&self, ctx: &Context, fut: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(ctx.scope(fut).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::find_processing_error;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            OrchestratorError::from(RegistryError::NotFound("x".into())).kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            OrchestratorError::StepNotFound {
                schema: "s".into(),
                step: "a".into()
            }
            .kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            OrchestratorError::from(ContextError::DeadlineExceeded).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            OrchestratorError::Internal("x".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_retryable_store_error_keeps_kind() {
        let err =
            OrchestratorError::from(StoreError::Database("connection reset".into())).retryable();

        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "store error: database error: connection reset");
    }

    #[test]
    fn test_worker_processing_error_is_found_through_chain() {
        let worker_err: anyhow::Error =
            ProcessingError::retryable(anyhow::anyhow!("rate limited")).into();
        let err = anyhow::Error::from(OrchestratorError::Worker(worker_err));

        let found = find_processing_error(&err).expect("processing error in chain");
        assert!(found.retry());
    }

    #[test]
    fn test_plain_worker_error_is_not_retryable() {
        let err = OrchestratorError::Worker(anyhow::anyhow!("card declined"));
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "card declined");
    }
}
