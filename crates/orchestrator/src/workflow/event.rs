//! Step events exchanged through the broker

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::{WorkflowSchemaName, WorkflowSchemaStepName};

/// Correlation header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Which workflow / step an event drives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWorkflow {
    pub id: Uuid,
    pub schema: WorkflowSchemaName,
    pub step: WorkflowSchemaStepName,
    /// Opaque payload handed to the step's worker unchanged
    #[serde(default)]
    pub step_payload: Option<Value>,
}

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub version: String,
    pub module: String,
    #[serde(default)]
    pub build_date: Option<String>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            module: env!("CARGO_PKG_NAME").to_string(),
            build_date: None,
        }
    }
}

/// A step event
///
/// Wire shape:
///
/// ```json
/// {
///   "id": "…",
///   "header": { "request_id": "…" },
///   "workflow": { "id": "…", "schema": "order", "step": "charge", "step_payload": {} },
///   "metadata": { "version": "0.1.0", "module": "flowline-orchestrator", "build_date": null },
///   "debug": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: Uuid,
    #[serde(default)]
    pub header: EventHeader,
    pub workflow: EventWorkflow,
    #[serde(default)]
    pub metadata: EventMetadata,
    #[serde(default)]
    pub debug: bool,
}

impl WorkflowEvent {
    /// Start building an event with a fresh id
    pub fn builder(
        workflow_id: Uuid,
        schema: impl Into<WorkflowSchemaName>,
        step: impl Into<WorkflowSchemaStepName>,
    ) -> WorkflowEventBuilder {
        WorkflowEventBuilder {
            event: WorkflowEvent {
                id: Uuid::now_v7(),
                header: EventHeader::default(),
                workflow: EventWorkflow {
                    id: workflow_id,
                    schema: schema.into(),
                    step: step.into(),
                    step_payload: None,
                },
                metadata: EventMetadata::default(),
                debug: false,
            },
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow.id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header.request_id.as_deref()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Builder for [`WorkflowEvent`]
#[derive(Debug, Clone)]
pub struct WorkflowEventBuilder {
    event: WorkflowEvent,
}

impl WorkflowEventBuilder {
    pub fn payload(mut self, payload: Option<Value>) -> Self {
        self.event.workflow.step_payload = payload;
        self
    }

    pub fn request_id(mut self, request_id: Option<&str>) -> Self {
        self.event.header.request_id = request_id.map(str::to_string);
        self
    }

    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.event.metadata = metadata;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.event.debug = debug;
        self
    }

    pub fn build(self) -> WorkflowEvent {
        self.event
    }
}

/// Delivery-tracking status supplied by the broker integration per message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// First delivery, or a previous attempt never finished
    #[default]
    New,

    /// A previous delivery was handled successfully
    Handled,

    /// A previous delivery returned an error
    HandledWithError,
}
