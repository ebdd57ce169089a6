//! Workflow records and events
//!
//! This module contains the runtime data model:
//! - [`Workflow`] - persisted workflow instance with its executed steps
//! - [`WorkflowHistory`] - append-only restart audit record
//! - [`WorkflowEvent`] - step event published to and delivered by the broker
//! - [`DeliveryStatus`] - per-message delivery tracking state

mod event;
mod model;

pub use event::{
    DeliveryStatus, EventHeader, EventMetadata, EventWorkflow, WorkflowEvent, WorkflowEventBuilder,
};
pub use model::{
    StepMetadata, Workflow, WorkflowHistory, WorkflowHistoryType, WorkflowStatus, WorkflowStep,
};
