//! Persistence layer for workflows
//!
//! This module provides:
//! - [`WorkflowStore`] trait for workflow and restart-history persistence
//! - [`InMemoryWorkflowStore`] for testing
//! - [`PostgresWorkflowStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use store::{
    Pagination, Paging, SearchParams, StoreError, WorkflowForceUpdate, WorkflowStore,
    WorkflowUpdate,
};
