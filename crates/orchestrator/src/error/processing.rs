//! Retry marker for broker redelivery

use std::fmt;

/// An error carrying an explicit redelivery decision
///
/// `ProcessingError` never gets persisted. It only travels from the worker /
/// handler layer up to the retry decorator, which turns `retry == true` into
/// a broker redelivery and everything else into an acknowledgement.
///
/// # Example
///
/// ```
/// use flowline_orchestrator::ProcessingError;
///
/// let err = ProcessingError::retryable(anyhow::anyhow!("upstream unavailable"));
/// assert!(err.retry());
/// assert_eq!(err.to_string(), "upstream unavailable");
/// ```
pub struct ProcessingError {
    source: anyhow::Error,
    retry: bool,
}

impl ProcessingError {
    /// Wrap an error with an explicit retry decision
    pub fn new(source: impl Into<anyhow::Error>, retry: bool) -> Self {
        Self {
            source: source.into(),
            retry,
        }
    }

    /// Wrap an error the broker should redeliver
    pub fn retryable(source: impl Into<anyhow::Error>) -> Self {
        Self::new(source, true)
    }

    /// Wrap an error that must not be redelivered
    pub fn permanent(source: impl Into<anyhow::Error>) -> Self {
        Self::new(source, false)
    }

    /// Whether the broker should redeliver the message
    pub fn retry(&self) -> bool {
        self.retry
    }

    /// The wrapped error
    pub fn original_error(&self) -> &anyhow::Error {
        &self.source
    }

    /// Unwrap into the original error
    pub fn into_original(self) -> anyhow::Error {
        self.source
    }
}

impl fmt::Debug for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingError")
            .field("source", &self.source)
            .field("retry", &self.retry)
            .finish()
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Find a [`ProcessingError`] anywhere in an error's chain
pub fn find_processing_error(err: &anyhow::Error) -> Option<&ProcessingError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProcessingError>())
}
