//! WorkflowStore trait definition

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Classify, ErrorKind};
use crate::workflow::{Workflow, WorkflowHistory, WorkflowStatus, WorkflowStep};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Unique key already taken
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkflowNotFound(_))
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::WorkflowNotFound(_) => ErrorKind::NotExist,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Database(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Overwrite of the status / error fields; `None` clears a field
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowForceUpdate {
    pub status: WorkflowStatus,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl WorkflowForceUpdate {
    /// Back to `IN_PROGRESS` with the error fields cleared
    pub fn in_progress() -> Self {
        Self {
            status: WorkflowStatus::InProgress,
            error: None,
            error_kind: None,
        }
    }

    /// `FAILED`, recording `error` and its classified kind
    pub fn failed(error: impl Into<String>, error_kind: ErrorKind) -> Self {
        Self {
            status: WorkflowStatus::Failed,
            error: Some(error.into()),
            error_kind: Some(error_kind),
        }
    }
}

/// Partial update; only fields that are `Some` are written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowUpdate {
    pub status: Option<WorkflowStatus>,
    pub input: Option<Value>,
    pub steps: Option<Vec<WorkflowStep>>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub request_id: Option<String>,
}

impl WorkflowUpdate {
    pub fn steps(steps: Vec<WorkflowStep>) -> Self {
        Self {
            steps: Some(steps),
            ..Default::default()
        }
    }

    /// Apply onto an in-memory record
    pub fn apply(self, workflow: &mut Workflow) {
        if let Some(status) = self.status {
            workflow.status = status;
        }
        if let Some(input) = self.input {
            workflow.input = Some(input);
        }
        if let Some(steps) = self.steps {
            workflow.steps = steps;
        }
        if let Some(error) = self.error {
            workflow.error = Some(error);
        }
        if let Some(kind) = self.error_kind {
            workflow.error_kind = Some(kind);
        }
        if let Some(request_id) = self.request_id {
            workflow.request_id = Some(request_id);
        }
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// Page information returned with search results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    /// Number of matches before pagination
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}

/// Filter for searching workflows; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub schema_name: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub parent_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub pagination: Pagination,
}

impl SearchParams {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.schema_name
            .as_deref()
            .map_or(true, |name| workflow.schema_name == name)
            && self.status.map_or(true, |status| workflow.status == status)
            && self
                .parent_id
                .map_or(true, |parent| workflow.parent_id == Some(parent))
            && self
                .request_id
                .as_deref()
                .map_or(true, |rid| workflow.request_id.as_deref() == Some(rid))
    }
}

/// Persistence of workflows and their restart history
///
/// Implementations must be thread-safe and support concurrent access.
/// Every operation on a missing workflow fails with
/// [`StoreError::WorkflowNotFound`].
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Allocate an id for a new workflow
    fn new_id(&self) -> Uuid {
        Uuid::now_v7()
    }

    async fn get_workflow_by_id(&self, id: Uuid) -> Result<Workflow, StoreError>;

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn set_workflow_status(&self, id: Uuid, status: WorkflowStatus)
        -> Result<(), StoreError>;

    /// Overwrite status, error and error kind, including clearing them
    async fn update_workflow_force(
        &self,
        id: Uuid,
        update: WorkflowForceUpdate,
    ) -> Result<(), StoreError>;

    /// Merge the fields present in `update`
    async fn update_workflow_not_nil(
        &self,
        id: Uuid,
        update: WorkflowUpdate,
    ) -> Result<(), StoreError>;

    /// Replace the recorded step list
    async fn put_workflow_steps(
        &self,
        id: Uuid,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError>;

    /// Matching workflows, newest first
    async fn search_workflows(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<Workflow>, Paging), StoreError>;

    async fn create_workflow_history(&self, history: &WorkflowHistory) -> Result<(), StoreError>;

    /// History records of a workflow, oldest first
    async fn list_workflow_histories(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowHistory>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            StoreError::WorkflowNotFound(Uuid::nil()).kind(),
            ErrorKind::NotExist
        );
        assert_eq!(StoreError::Database("down".into()).kind(), ErrorKind::Io);
        assert_eq!(StoreError::Conflict("dup".into()).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_update_merges_present_fields_only() {
        let mut workflow = Workflow::new(Uuid::now_v7(), "s", Some(json!(1)));
        workflow.error = Some("boom".into());

        WorkflowUpdate {
            status: Some(WorkflowStatus::Failed),
            ..Default::default()
        }
        .apply(&mut workflow);

        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert_eq!(workflow.input, Some(json!(1)));
        assert_eq!(workflow.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_search_params_match() {
        let parent = Uuid::now_v7();
        let workflow = Workflow::new(Uuid::now_v7(), "orders", None)
            .with_parent(Some(parent))
            .with_request_id(Some("req".into()));

        assert!(SearchParams::default().matches(&workflow));
        assert!(SearchParams {
            schema_name: Some("orders".into()),
            parent_id: Some(parent),
            request_id: Some("req".into()),
            status: Some(WorkflowStatus::InProgress),
            ..Default::default()
        }
        .matches(&workflow));
        assert!(!SearchParams {
            status: Some(WorkflowStatus::Success),
            ..Default::default()
        }
        .matches(&workflow));
    }
}
