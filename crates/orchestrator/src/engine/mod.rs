//! Workflow orchestration engine
//!
//! The engine module provides the [`Orchestrator`], which starts workflows
//! by publishing step events and advances them as deliveries come back
//! through the [`RetryDecorator`]-wrapped [`WorkflowEventHandler`].

mod handler;
mod orchestrator;
mod registry;

pub use handler::{RetryDecorator, WorkflowEventHandler};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use registry::{RegistryError, SchemaRegistry};
