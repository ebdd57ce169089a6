//! Validated workflow schema

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::step::{LinearStep, WorkflowSchemaName, WorkflowSchemaStep};
use super::validation::ValidationErrors;

/// An immutable, validated ordered list of steps
///
/// A schema is validated once, in [`WorkflowSchema::new`]; every schema value
/// in existence is therefore valid and the orchestrator never re-checks it.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use flowline_orchestrator::schema::{LinearStep, WorkerFn, WorkflowSchema};
///
/// let worker = Arc::new(WorkerFn::new(|event| async move { Ok(event.workflow.step_payload) }));
/// let schema = WorkflowSchema::linear(
///     "order",
///     [
///         LinearStep::new("reserve", "order.reserve", worker.clone()),
///         LinearStep::new("charge", "order.charge", worker),
///     ],
/// )
/// .expect("valid schema");
///
/// assert_eq!(schema.first_step().name(), "reserve");
/// assert_eq!(schema.next_step("reserve").unwrap().name(), "charge");
/// assert!(schema.next_step("charge").is_none());
/// ```
#[derive(Clone)]
pub struct WorkflowSchema {
    name: WorkflowSchemaName,
    steps: Arc<[Arc<dyn WorkflowSchemaStep>]>,
}

impl WorkflowSchema {
    /// Validate and build a schema
    ///
    /// All violations are collected into one [`ValidationErrors`]:
    /// empty name, no steps, a step with an empty name / empty topic / no
    /// worker, and duplicated step names or topics.
    pub fn new<I>(name: impl Into<WorkflowSchemaName>, steps: I) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = Arc<dyn WorkflowSchemaStep>>,
    {
        let name = name.into();
        let steps: Vec<Arc<dyn WorkflowSchemaStep>> = steps.into_iter().collect();

        let mut errors = ValidationErrors::new();

        if name.is_empty() {
            errors.add("name", "workflow schema name is required");
        }
        if steps.is_empty() {
            errors.add("steps", "at least one step is required");
        }

        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut topics: HashMap<&str, usize> = HashMap::new();

        for (i, step) in steps.iter().enumerate() {
            if step.name().is_empty() {
                errors.add(format!("steps[{i}].name"), "step name is required");
            } else if let Some(first) = names.insert(step.name().as_str(), i) {
                names.insert(step.name().as_str(), first);
                errors.add(
                    format!("steps[{i}].name"),
                    format!("duplicate step name {:?} (also steps[{first}])", step.name().as_str()),
                );
            }

            if step.topic().is_empty() {
                errors.add(format!("steps[{i}].topic"), "step topic is required");
            } else if let Some(first) = topics.insert(step.topic().as_str(), i) {
                topics.insert(step.topic().as_str(), first);
                errors.add(
                    format!("steps[{i}].topic"),
                    format!(
                        "duplicate step topic {:?} (also steps[{first}])",
                        step.topic().as_str()
                    ),
                );
            }

            if step.worker().is_none() {
                errors.add(format!("steps[{i}].worker"), "step worker is required");
            }
        }

        errors.into_result()?;

        Ok(Self {
            name,
            steps: steps.into(),
        })
    }

    /// Build a schema out of [`LinearStep`]s
    pub fn linear<I>(
        name: impl Into<WorkflowSchemaName>,
        steps: I,
    ) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = LinearStep>,
    {
        Self::new(
            name,
            steps
                .into_iter()
                .map(|step| Arc::new(step) as Arc<dyn WorkflowSchemaStep>),
        )
    }

    pub fn name(&self) -> &WorkflowSchemaName {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn WorkflowSchemaStep>] {
        &self.steps
    }

    /// Look up a step by name
    pub fn step(&self, name: &str) -> Option<Arc<dyn WorkflowSchemaStep>> {
        self.steps.iter().find(|s| s.name() == name).cloned()
    }

    /// The step following `current`
    ///
    /// Returns `None` both when `current` is the last step and when it is not
    /// part of the schema. Callers holding an unverified name must check
    /// [`WorkflowSchema::step`] first to tell the two apart.
    pub fn next_step(&self, current: &str) -> Option<Arc<dyn WorkflowSchemaStep>> {
        let position = self.steps.iter().position(|s| s.name() == current)?;
        self.steps.get(position + 1).cloned()
    }

    /// The first step; validation guarantees there is one
    pub fn first_step(&self) -> Arc<dyn WorkflowSchemaStep> {
        Arc::clone(&self.steps[0])
    }
}

impl fmt::Debug for WorkflowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowSchema")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name().as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
