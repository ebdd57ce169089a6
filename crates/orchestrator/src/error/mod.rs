//! Error classification
//!
//! This module provides:
//! - [`ErrorKind`] - coarse kinds persisted on failed workflows, mapped to HTTP codes
//! - [`ProcessingError`] - explicit retry marker read by the retry decorator
//! - [`TransformersChain`] - pluggable policy turning errors into retryable ones

mod kind;
mod processing;
mod transform;

pub use kind::{Classify, ErrorKind};
pub use processing::{find_processing_error, ProcessingError};
pub use transform::{ByHttpCode, ByMessage, ErrorTransformer, Transformed, TransformersChain};

pub(crate) use kind::sqlx_kind;
