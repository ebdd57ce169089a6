//! Schema steps and the worker extension point

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::workflow::WorkflowEvent;

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

name_type!(
    /// Name of a workflow schema
    WorkflowSchemaName
);
name_type!(
    /// Name of a step within a schema
    WorkflowSchemaStepName
);
name_type!(
    /// Broker topic a step's events are published to
    WorkflowSchemaStepTopic
);

/// Business logic executed when a step's event is delivered
///
/// The returned payload becomes the `step_payload` of the next step's event.
/// Errors are terminal unless wrapped in a retryable
/// [`ProcessingError`](crate::ProcessingError): a worker that already ran may
/// have had side effects, so only the worker itself can authorise a rerun.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, ctx: &Context, event: &WorkflowEvent) -> anyhow::Result<Option<Value>>;
}

/// Adapter turning an async closure into a [`Worker`]
///
/// # Example
///
/// ```
/// use flowline_orchestrator::schema::WorkerFn;
///
/// let worker = WorkerFn::new(|event| async move {
///     Ok(event.workflow.step_payload)
/// });
/// ```
pub struct WorkerFn<F> {
    f: F,
}

impl<F, Fut> WorkerFn<F>
where
    F: Fn(WorkflowEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Worker for WorkerFn<F>
where
    F: Fn(WorkflowEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send,
{
    async fn run(&self, _ctx: &Context, event: &WorkflowEvent) -> anyhow::Result<Option<Value>> {
        (self.f)(event.clone()).await
    }
}

/// A step of a workflow schema
pub trait WorkflowSchemaStep: Send + Sync + fmt::Debug {
    fn name(&self) -> &WorkflowSchemaStepName;

    fn topic(&self) -> &WorkflowSchemaStepTopic;

    /// `None` only for steps that never passed schema validation
    fn worker(&self) -> Option<Arc<dyn Worker>>;
}

/// Plain-field step used by linear schemas
#[derive(Clone)]
pub struct LinearStep {
    name: WorkflowSchemaStepName,
    topic: WorkflowSchemaStepTopic,
    worker: Option<Arc<dyn Worker>>,
}

impl LinearStep {
    pub fn new(
        name: impl Into<WorkflowSchemaStepName>,
        topic: impl Into<WorkflowSchemaStepTopic>,
        worker: Arc<dyn Worker>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            worker: Some(worker),
        }
    }

    /// A step with no worker attached; rejected by schema validation
    pub fn without_worker(
        name: impl Into<WorkflowSchemaStepName>,
        topic: impl Into<WorkflowSchemaStepTopic>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            worker: None,
        }
    }
}

impl WorkflowSchemaStep for LinearStep {
    fn name(&self) -> &WorkflowSchemaStepName {
        &self.name
    }

    fn topic(&self) -> &WorkflowSchemaStepTopic {
        &self.topic
    }

    fn worker(&self) -> Option<Arc<dyn Worker>> {
        self.worker.clone()
    }
}

impl fmt::Debug for LinearStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearStep")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("has_worker", &self.worker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_equality() {
        let name = WorkflowSchemaStepName::from("validate");
        assert_eq!(name, "validate");
        assert_eq!(name, WorkflowSchemaStepName::new(String::from("validate")));
        assert!(WorkflowSchemaName::from("").is_empty());
    }

    #[test]
    fn test_name_serializes_as_string() {
        let topic = WorkflowSchemaStepTopic::from("orders.validate");
        assert_eq!(
            serde_json::to_value(&topic).unwrap(),
            serde_json::json!("orders.validate")
        );
    }

    #[tokio::test]
    async fn test_worker_fn_runs_closure() {
        let worker = WorkerFn::new(|event: WorkflowEvent| async move {
            Ok(Some(serde_json::json!({ "seen": event.workflow.step })))
        });
        let event = WorkflowEvent::builder(uuid::Uuid::now_v7(), "s", "a").build();

        let out = worker.run(&Context::new(), &event).await.unwrap();
        assert_eq!(out, Some(serde_json::json!({ "seen": "a" })));
    }
}
