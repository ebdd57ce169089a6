//! Per-operation context
//!
//! A [`Context`] travels with every orchestrator call. It carries the
//! correlation id of the originating request and a cancellation token with an
//! optional deadline. Every store and broker round trip is awaited through
//! [`Context::scope`], so cancelling the context (or passing its deadline)
//! aborts the in-flight call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error returned when a scoped operation is aborted by its context
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// The context's deadline elapsed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Context for a single orchestrator operation
///
/// Cloning a context shares its cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    request_id: Option<String>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Create an empty context (no request id, never cancelled)
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a request correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Abort scoped operations once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Request correlation id, if any
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The cancellation token shared by clones of this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether the context was cancelled or its deadline passed
    pub fn is_done(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Derive a context for a delivered message, keeping cancellation but
    /// taking the request id carried by the message.
    pub fn for_request(&self, request_id: Option<&str>) -> Self {
        Self {
            request_id: request_id.map(str::to_string),
            cancellation: self.cancellation.clone(),
            deadline: self.deadline,
        }
    }

    /// Run `fut` unless the context is cancelled or times out first
    pub async fn scope<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if self.cancellation.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => Err(ContextError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(ContextError::DeadlineExceeded),
                output = fut => Ok(output),
            },
            None => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => Err(ContextError::Cancelled),
                output = fut => Ok(output),
            },
        }
    }
}
