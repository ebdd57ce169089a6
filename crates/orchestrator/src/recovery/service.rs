//! Recovery service

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::context::{Context, ContextError};
use crate::engine::{Orchestrator, OrchestratorError};
use crate::error::{Classify, ErrorKind};
use crate::persistence::{Paging, SearchParams, StoreError, WorkflowStore};
use crate::workflow::{Workflow, WorkflowHistory, WorkflowHistoryType, WorkflowStatus};

/// Errors from restart flows
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("workflow is not in FAILED status")]
    NotFailed,

    #[error("workflow is not in SUCCESS status")]
    NotSuccess,

    /// Neither the workflow input nor its last step carries data to restart with
    #[error("workflow has no input or step data to restart with")]
    MissingData,

    #[error("step name and payload are required")]
    StepAndPayloadRequired,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl Classify for RecoveryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFailed | Self::NotSuccess => ErrorKind::BadValidation,
            Self::MissingData | Self::StepAndPayloadRequired => ErrorKind::Validation,
            Self::Store(e) => e.kind(),
            Self::Orchestrator(e) => e.kind(),
            Self::Context(e) => e.kind(),
        }
    }
}

/// Business rules for restarting workflows, on top of an [`Orchestrator`]
#[derive(Clone)]
pub struct RecoveryService {
    orchestrator: Orchestrator,
}

impl RecoveryService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    fn store(&self) -> &Arc<dyn WorkflowStore> {
        self.orchestrator.store()
    }

    /// Re-run a FAILED workflow from its last executed step
    ///
    /// The restart payload is `payload` if given, else the last step's data,
    /// else the workflow input. Returns the workflow's own id.
    #[instrument(skip(self, ctx, payload))]
    pub async fn restart_workflow(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        payload: Option<Value>,
    ) -> Result<Uuid, RecoveryError> {
        let workflow = self.workflow(ctx, workflow_id).await?;

        if workflow.status != WorkflowStatus::Failed {
            return Err(RecoveryError::NotFailed);
        }

        let last_step = workflow.last_step();
        let previous = last_step.and_then(|step| step.data.clone());
        if workflow.input.is_none() && previous.is_none() {
            return Err(RecoveryError::MissingData);
        }

        let step_name = match last_step {
            Some(step) => step.name.clone(),
            None => self
                .orchestrator
                .workflow_schema(workflow.schema_name.as_str())?
                .first_step()
                .name()
                .clone(),
        };

        let restart_payload = payload
            .or_else(|| previous.clone())
            .or_else(|| workflow.input.clone());

        self.orchestrator
            .restart_from(
                ctx,
                workflow_id,
                workflow.schema_name.as_str(),
                step_name.as_str(),
                restart_payload.clone(),
            )
            .await?;

        info!(%workflow_id, step = %step_name, "workflow restarted");

        let history = WorkflowHistory::snapshot(
            self.store().new_id(),
            WorkflowHistoryType::Restart,
            &workflow,
            step_name,
            restart_payload,
            previous,
            ctx.request_id().map(str::to_string),
        );
        self.save_history(ctx, history).await;

        Ok(workflow_id)
    }

    /// Start a new workflow, linked to a SUCCESS one, from `step_name`
    ///
    /// Returns the id of the new workflow.
    #[instrument(skip(self, ctx, payload))]
    pub async fn restart_workflow_from(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        step_name: &str,
        payload: Option<Value>,
    ) -> Result<Uuid, RecoveryError> {
        let payload = match payload {
            Some(payload) if !step_name.is_empty() => payload,
            _ => return Err(RecoveryError::StepAndPayloadRequired),
        };

        let workflow = self.workflow(ctx, workflow_id).await?;

        if workflow.status != WorkflowStatus::Success {
            return Err(RecoveryError::NotSuccess);
        }

        let previous = match workflow.find_step(step_name) {
            Some(step) => step.data.clone(),
            None => workflow.input.clone(),
        };

        let new_id = self
            .orchestrator
            .start_from(
                ctx,
                workflow.schema_name.as_str(),
                step_name,
                Some(workflow_id),
                Some(payload.clone()),
            )
            .await?;

        info!(%workflow_id, %new_id, step = %step_name, "workflow restarted from step");

        let history = WorkflowHistory::snapshot(
            self.store().new_id(),
            WorkflowHistoryType::RestartFrom,
            &workflow,
            step_name.into(),
            Some(payload),
            previous,
            ctx.request_id().map(str::to_string),
        );
        self.save_history(ctx, history).await;

        Ok(new_id)
    }

    pub async fn workflow(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
    ) -> Result<Workflow, RecoveryError> {
        Ok(ctx.scope(self.store().get_workflow_by_id(workflow_id)).await??)
    }

    pub async fn search_workflows(
        &self,
        ctx: &Context,
        params: &SearchParams,
    ) -> Result<(Vec<Workflow>, Paging), RecoveryError> {
        Ok(ctx.scope(self.store().search_workflows(params)).await??)
    }

    /// Restart audit trail of a workflow, oldest first
    pub async fn workflow_histories(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowHistory>, RecoveryError> {
        Ok(ctx
            .scope(self.store().list_workflow_histories(workflow_id))
            .await??)
    }

    async fn save_history(&self, ctx: &Context, history: WorkflowHistory) {
        let workflow_id = history.workflow_id;
        match ctx.scope(self.store().create_workflow_history(&history)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%workflow_id, error = %err, "failed to save workflow history"),
            Err(err) => warn!(%workflow_id, error = %err, "failed to save workflow history"),
        }
    }
}
