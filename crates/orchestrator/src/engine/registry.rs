//! Registry of workflow schemas known to an orchestrator

use parking_lot::RwLock;

use crate::error::{Classify, ErrorKind};
use crate::schema::{WorkflowSchema, WorkflowSchemaName};

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A schema with this name is already registered
    #[error("workflow schema already registered: {0}")]
    AlreadyExists(WorkflowSchemaName),

    /// No schema with this name
    #[error("workflow schema not found: {0}")]
    NotFound(String),
}

impl Classify for RegistryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotExist,
        }
    }
}

/// Set of schemas unique by name
///
/// Shared between orchestrators through an `Arc`. The lock is only held to
/// scan or mutate the list, never across an await point.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<Vec<WorkflowSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema; fails if the name is taken
    pub fn add(&self, schema: WorkflowSchema) -> Result<(), RegistryError> {
        let mut schemas = self.schemas.write();
        if schemas.iter().any(|s| s.name() == schema.name()) {
            return Err(RegistryError::AlreadyExists(schema.name().clone()));
        }
        schemas.push(schema);
        Ok(())
    }

    /// Remove a schema; returns whether it was registered
    pub fn remove(&self, name: &str) -> bool {
        let mut schemas = self.schemas.write();
        let before = schemas.len();
        schemas.retain(|s| s.name() != name);
        schemas.len() != before
    }

    pub fn get(&self, name: &str) -> Result<WorkflowSchema, RegistryError> {
        self.schemas
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Registered schema names, in registration order
    pub fn names(&self) -> Vec<WorkflowSchemaName> {
        self.schemas.read().iter().map(|s| s.name().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LinearStep, WorkerFn};
    use std::sync::Arc;

    fn schema(name: &str) -> WorkflowSchema {
        let worker = Arc::new(WorkerFn::new(|_event| async { Ok(None) }));
        WorkflowSchema::linear(name, [LinearStep::new("a", format!("{name}.a"), worker)])
            .expect("valid schema")
    }

    #[test]
    fn test_add_and_get() {
        let registry = SchemaRegistry::new();
        registry.add(schema("orders")).unwrap();

        assert_eq!(registry.get("orders").unwrap().name(), "orders");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_conflicts() {
        let registry = SchemaRegistry::new();
        registry.add(schema("orders")).unwrap();

        let err = registry.add(schema("orders")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_missing_schema_is_not_exist() {
        let registry = SchemaRegistry::new();
        let err = registry.get("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);
    }

    #[test]
    fn test_remove() {
        let registry = SchemaRegistry::new();
        registry.add(schema("orders")).unwrap();
        registry.add(schema("billing")).unwrap();

        assert!(registry.remove("orders"));
        assert!(!registry.remove("orders"));
        assert_eq!(registry.names(), vec![WorkflowSchemaName::from("billing")]);
    }
}
