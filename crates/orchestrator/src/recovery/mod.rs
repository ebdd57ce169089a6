//! Restart flows for finished workflows
//!
//! - [`RecoveryService::restart_workflow`] re-runs a FAILED workflow's own
//!   record from its last executed step
//! - [`RecoveryService::restart_workflow_from`] starts a new workflow, linked
//!   to a SUCCESS one through `parent_id`, from an arbitrary step
//!
//! Both write an append-only [`WorkflowHistory`](crate::workflow::WorkflowHistory)
//! entry once the restart was published.

mod service;

pub use service::{RecoveryError, RecoveryService};
