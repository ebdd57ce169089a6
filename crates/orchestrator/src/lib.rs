//! # Flowline Orchestrator
//!
//! Event-driven workflow orchestration over a message broker.
//!
//! ## Features
//!
//! - **Validated schemas**: Ordered named steps bound to broker topics, with every violation reported at once
//! - **Idempotent step advancement**: Redelivered events replace, never duplicate, the recorded step
//! - **Explicit retries**: Only failures marked retryable are redelivered by the broker
//! - **Recovery**: Restart failed workflows or re-run successful ones from any step, with audit history
//! - **Pluggable storage**: In-memory store for tests, PostgreSQL store for production
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RecoveryService / callers                   │
//! │  (start, restart, restart-from)                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │  (schema registry, step event state machine)                │
//! └─────────────────────────────────────────────────────────────┘
//!            │ publish                        ▲ deliver
//!            ▼                                │
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │       QueueBroker        │──▶│  RetryDecorator<EventHandler> │
//! │  (LocalBroker, ...)      │   │  (redeliver vs acknowledge)   │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowStore                          │
//! │  (PostgreSQL: flowline_workflows, workflow histories)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowline_orchestrator::prelude::*;
//!
//! let reserve = Arc::new(WorkerFn::new(|event| async move {
//!     Ok(Some(json!({ "reserved": event.workflow.step_payload })))
//! }));
//! let charge = Arc::new(WorkerFn::new(|_event| async move { Ok(None) }));
//!
//! let schema = WorkflowSchema::linear("order", [
//!     LinearStep::new("reserve", "order.reserve", reserve),
//!     LinearStep::new("charge", "order.charge", charge),
//! ])?;
//!
//! let broker = Arc::new(LocalBroker::new(LocalBrokerConfig::from_env()));
//! let orchestrator = Orchestrator::new(
//!     Arc::new(SchemaRegistry::new()),
//!     broker.clone(),
//!     Arc::new(InMemoryWorkflowStore::new()),
//!     OrchestratorConfig::from_env(),
//! );
//! orchestrator.add_workflow_schema(schema)?;
//!
//! for topic in ["order.reserve", "order.charge"] {
//!     broker.subscribe(topic, orchestrator.queue_event_handler())?;
//! }
//! broker.start()?;
//!
//! let id = orchestrator.start(&Context::new(), "order", Some(json!({"sku": 1}))).await?;
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod recovery;
pub mod schema;
pub mod telemetry;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::broker::{
        HandlerFn, LocalBroker, LocalBrokerConfig, QueueBroker, QueueHandler, RedeliveryPolicy,
    };
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{Context, ContextError};
    pub use crate::engine::{Orchestrator, OrchestratorError, SchemaRegistry};
    pub use crate::error::{find_processing_error, Classify, ErrorKind, ProcessingError};
    pub use crate::persistence::{
        InMemoryWorkflowStore, PostgresWorkflowStore, SearchParams, StoreError, WorkflowStore,
    };
    pub use crate::recovery::{RecoveryError, RecoveryService};
    pub use crate::schema::{LinearStep, Worker, WorkerFn, WorkflowSchema, WorkflowSchemaStep};
    pub use crate::workflow::{DeliveryStatus, Workflow, WorkflowEvent, WorkflowStatus};
}

// Re-export key types at crate root
pub use broker::{LocalBroker, LocalBrokerConfig, QueueBroker, QueueHandler, RedeliveryPolicy};
pub use config::OrchestratorConfig;
pub use context::{Context, ContextError};
pub use engine::{Orchestrator, OrchestratorError, RetryDecorator, SchemaRegistry};
pub use error::{find_processing_error, Classify, ErrorKind, ProcessingError, TransformersChain};
pub use persistence::{InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore};
pub use recovery::{RecoveryError, RecoveryService};
pub use schema::{LinearStep, ValidationErrors, Worker, WorkerFn, WorkflowSchema};
pub use workflow::{DeliveryStatus, Workflow, WorkflowEvent, WorkflowHistory, WorkflowStatus};
