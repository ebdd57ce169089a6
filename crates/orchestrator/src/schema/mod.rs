//! Workflow schemas
//!
//! This module contains the static workflow model:
//! - [`WorkflowSchema`] - validated, immutable ordered list of steps
//! - [`WorkflowSchemaStep`] trait and its plain [`LinearStep`] implementation
//! - [`Worker`] trait, the business-logic extension point
//! - [`ValidationErrors`] - every schema violation from one validation pass

mod definition;
mod step;
mod validation;

pub use definition::WorkflowSchema;
pub use step::{
    LinearStep, Worker, WorkerFn, WorkflowSchemaName, WorkflowSchemaStep, WorkflowSchemaStepName,
    WorkflowSchemaStepTopic,
};
pub use validation::ValidationErrors;
