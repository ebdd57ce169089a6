//! In-memory implementation of WorkflowStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::workflow::{Workflow, WorkflowHistory, WorkflowStatus, WorkflowStep};

/// In-memory implementation of WorkflowStore
///
/// This is primarily for testing. It stores all data in memory and
/// provides the same semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use flowline_orchestrator::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// assert_eq!(store.workflow_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    histories: RwLock<Vec<WorkflowHistory>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of workflows
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Get the number of history records
    pub fn history_count(&self) -> usize {
        self.histories.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.histories.write().clear();
    }

    fn modify<F>(&self, id: Uuid, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Workflow),
    {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;
        f(workflow);
        workflow.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow_by_id(&self, id: Uuid) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&workflow.id) {
            return Err(StoreError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn set_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        self.modify(id, |w| w.status = status)
    }

    async fn update_workflow_force(
        &self,
        id: Uuid,
        update: WorkflowForceUpdate,
    ) -> Result<(), StoreError> {
        self.modify(id, |w| {
            w.status = update.status;
            w.error = update.error;
            w.error_kind = update.error_kind;
        })
    }

    async fn update_workflow_not_nil(
        &self,
        id: Uuid,
        update: WorkflowUpdate,
    ) -> Result<(), StoreError> {
        self.modify(id, |w| update.apply(w))
    }

    async fn put_workflow_steps(
        &self,
        id: Uuid,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError> {
        self.modify(id, |w| w.steps = steps.to_vec())
    }

    async fn search_workflows(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<Workflow>, Paging), StoreError> {
        let workflows = self.workflows.read();

        let mut matching: Vec<&Workflow> =
            workflows.values().filter(|w| params.matches(w)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(params.pagination.offset as usize)
            .take(params.pagination.limit as usize)
            .cloned()
            .collect();

        Ok((
            page,
            Paging {
                total,
                offset: params.pagination.offset,
                limit: params.pagination.limit,
            },
        ))
    }

    async fn create_workflow_history(&self, history: &WorkflowHistory) -> Result<(), StoreError> {
        if !self.workflows.read().contains_key(&history.workflow_id) {
            return Err(StoreError::WorkflowNotFound(history.workflow_id));
        }
        self.histories.write().push(history.clone());
        Ok(())
    }

    async fn list_workflow_histories(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowHistory>, StoreError> {
        Ok(self
            .histories
            .read()
            .iter()
            .filter(|h| h.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::workflow::WorkflowHistoryType;
    use serde_json::json;

    fn workflow(schema: &str) -> Workflow {
        Workflow::new(Uuid::now_v7(), schema, Some(json!({ "n": 1 })))
    }

    #[tokio::test]
    async fn test_create_and_get_workflow() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow("orders");

        store.create_workflow(&wf).await.unwrap();

        let loaded = store.get_workflow_by_id(wf.id).await.unwrap();
        assert_eq!(loaded, wf);
        assert_eq!(store.workflow_count(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow("orders");

        store.create_workflow(&wf).await.unwrap();
        let err = store.create_workflow(&wf).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_missing_workflow_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let id = Uuid::now_v7();

        assert!(store.get_workflow_by_id(id).await.unwrap_err().is_not_found());
        assert!(store
            .set_workflow_status(id, WorkflowStatus::Success)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .put_workflow_steps(id, &[])
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_force_update_clears_error_fields() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow("orders");
        store.create_workflow(&wf).await.unwrap();

        store
            .update_workflow_force(wf.id, WorkflowForceUpdate::failed("boom", ErrorKind::Io))
            .await
            .unwrap();
        let failed = store.get_workflow_by_id(wf.id).await.unwrap();
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.error_kind, Some(ErrorKind::Io));

        store
            .update_workflow_force(wf.id, WorkflowForceUpdate::in_progress())
            .await
            .unwrap();
        let cleared = store.get_workflow_by_id(wf.id).await.unwrap();
        assert_eq!(cleared.status, WorkflowStatus::InProgress);
        assert!(cleared.error.is_none());
        assert!(cleared.error_kind.is_none());
    }

    #[tokio::test]
    async fn test_not_nil_update_keeps_absent_fields() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow("orders");
        store.create_workflow(&wf).await.unwrap();

        let steps = vec![WorkflowStep::new("a", Some(json!(2)), "0.1.0")];
        store
            .update_workflow_not_nil(wf.id, WorkflowUpdate::steps(steps.clone()))
            .await
            .unwrap();

        let loaded = store.get_workflow_by_id(wf.id).await.unwrap();
        assert_eq!(loaded.steps, steps);
        assert_eq!(loaded.input, wf.input);
        assert_eq!(loaded.status, WorkflowStatus::InProgress);
    }

    #[tokio::test]
    async fn test_search_filters_and_paginates() {
        let store = InMemoryWorkflowStore::new();
        for _ in 0..3 {
            store.create_workflow(&workflow("orders")).await.unwrap();
        }
        store.create_workflow(&workflow("billing")).await.unwrap();

        let (page, paging) = store
            .search_workflows(&SearchParams {
                schema_name: Some("orders".into()),
                pagination: Pagination {
                    offset: 1,
                    limit: 1,
                },
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(paging.total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].schema_name, "orders");
    }

    #[tokio::test]
    async fn test_histories_are_listed_per_workflow() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow("orders");
        store.create_workflow(&wf).await.unwrap();

        let history = WorkflowHistory::snapshot(
            Uuid::now_v7(),
            WorkflowHistoryType::Restart,
            &wf,
            "a".into(),
            Some(json!(1)),
            None,
            None,
        );
        store.create_workflow_history(&history).await.unwrap();

        assert_eq!(store.list_workflow_histories(wf.id).await.unwrap(), vec![history]);
        assert!(store
            .list_workflow_histories(Uuid::now_v7())
            .await
            .unwrap()
            .is_empty());
    }
}
