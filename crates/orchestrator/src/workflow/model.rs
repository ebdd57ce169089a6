//! Persisted workflow records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::schema::{WorkflowSchemaName, WorkflowSchemaStepName};

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// A step event is published or being processed
    InProgress,

    /// Processing stopped on an error
    Failed,

    /// The last step completed
    Success,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Failed => "FAILED",
            Self::Success => "SUCCESS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(Self::InProgress),
            "FAILED" => Some(Self::Failed),
            "SUCCESS" => Some(Self::Success),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata recorded alongside each executed step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    /// Version of the orchestrator that recorded the step
    pub version: String,
}

/// One executed step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub created_at: DateTime<Utc>,
    pub name: WorkflowSchemaStepName,
    /// Payload the step was run with (or, for a pending entry, the payload
    /// computed for it but never published)
    pub data: Option<Value>,
    pub metadata: StepMetadata,
}

impl WorkflowStep {
    pub fn new(
        name: impl Into<WorkflowSchemaStepName>,
        data: Option<Value>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            created_at: Utc::now(),
            name: name.into(),
            data,
            metadata: StepMetadata {
                version: version.into(),
            },
        }
    }
}

/// A workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Workflow this one was restarted from, if any
    pub parent_id: Option<Uuid>,
    pub schema_name: WorkflowSchemaName,
    pub status: WorkflowStatus,
    /// Payload the workflow was started with
    pub input: Option<Value>,
    /// Executed steps, oldest first
    pub steps: Vec<WorkflowStep>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub request_id: Option<String>,
}

impl Workflow {
    /// A fresh `IN_PROGRESS` workflow
    pub fn new(id: Uuid, schema_name: impl Into<WorkflowSchemaName>, input: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            parent_id: None,
            schema_name: schema_name.into(),
            status: WorkflowStatus::InProgress,
            input,
            steps: vec![],
            error: None,
            error_kind: None,
            request_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Most recently recorded step
    pub fn last_step(&self) -> Option<&WorkflowStep> {
        self.steps.last()
    }

    /// Most recent entry recorded for `name`
    pub fn find_step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().rev().find(|s| s.name == name)
    }
}

/// Kind of recovery recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowHistoryType {
    /// A failed workflow re-run in place from its last step
    Restart,

    /// A successful workflow re-run as a new child from a chosen step
    RestartFrom,
}

impl WorkflowHistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "RESTART",
            Self::RestartFrom => "RESTART_FROM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RESTART" => Some(Self::Restart),
            "RESTART_FROM" => Some(Self::RestartFrom),
            _ => None,
        }
    }
}

/// Append-only audit record written on every restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub history_type: WorkflowHistoryType,
    /// Payload the workflow was restarted with
    pub input: Option<Value>,
    /// Payload the restarted step had before
    pub input_previous: Option<Value>,
    pub step_name: WorkflowSchemaStepName,
    pub workflow_id: Uuid,
    pub workflow_status: WorkflowStatus,
    pub workflow_error: Option<String>,
    pub workflow_error_kind: Option<ErrorKind>,
    pub request_id: Option<String>,
}

impl WorkflowHistory {
    /// Snapshot `workflow` as it was when the restart was requested
    pub fn snapshot(
        id: Uuid,
        history_type: WorkflowHistoryType,
        workflow: &Workflow,
        step_name: WorkflowSchemaStepName,
        input: Option<Value>,
        input_previous: Option<Value>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            history_type,
            input,
            input_previous,
            step_name,
            workflow_id: workflow.id,
            workflow_status: workflow.status,
            workflow_error: workflow.error.clone(),
            workflow_error_kind: workflow.error_kind,
            request_id,
        }
    }
}
