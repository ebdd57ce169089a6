//! Error transformers deciding which failures the broker should redeliver
//!
//! Workers hand their errors to a [`TransformersChain`] before returning them.
//! Each [`ErrorTransformer`] either wraps the error in a retryable
//! [`ProcessingError`] or leaves it untouched; the first transformer that
//! changes the error wins.

use std::collections::HashSet;

use super::kind::ErrorKind;
use super::processing::{find_processing_error, ProcessingError};
use crate::context::Context;

/// Outcome of a single transformer
#[derive(Debug)]
pub enum Transformed {
    /// The transformer produced a different error
    Changed(anyhow::Error),

    /// The transformer did not apply; the input is handed back as-is
    Unchanged(anyhow::Error),
}

impl Transformed {
    /// Whether the transformer changed the error
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }

    /// The resulting error, changed or not
    pub fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Changed(err) | Self::Unchanged(err) => err,
        }
    }
}

/// Strategy turning an arbitrary error into a (possibly) retryable one
pub trait ErrorTransformer: Send + Sync {
    fn transform(&self, ctx: &Context, err: anyhow::Error) -> Transformed;
}

fn already_retryable(err: &anyhow::Error) -> bool {
    find_processing_error(err).is_some_and(ProcessingError::retry)
}

/// Marks errors retryable when their kind maps to one of the configured HTTP codes
#[derive(Debug, Clone, Default)]
pub struct ByHttpCode {
    retry_codes: HashSet<u16>,
}

impl ByHttpCode {
    pub fn new(retry_codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            retry_codes: retry_codes.into_iter().collect(),
        }
    }
}

impl ErrorTransformer for ByHttpCode {
    fn transform(&self, _ctx: &Context, err: anyhow::Error) -> Transformed {
        if already_retryable(&err) {
            return Transformed::Unchanged(err);
        }

        let code = ErrorKind::of(&err).http_status();
        if self.retry_codes.contains(&code) {
            Transformed::Changed(ProcessingError::retryable(err).into())
        } else {
            Transformed::Unchanged(err)
        }
    }
}

/// Marks errors retryable when their lowercased text matches a configured message
#[derive(Debug, Clone, Default)]
pub struct ByMessage {
    messages: HashSet<String>,
}

impl ByMessage {
    /// Messages are compared case-insensitively against the whole error text
    pub fn new<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            messages: messages
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl ErrorTransformer for ByMessage {
    fn transform(&self, _ctx: &Context, err: anyhow::Error) -> Transformed {
        if already_retryable(&err) {
            return Transformed::Unchanged(err);
        }

        if self.messages.contains(&err.to_string().to_lowercase()) {
            Transformed::Changed(ProcessingError::retryable(err).into())
        } else {
            Transformed::Unchanged(err)
        }
    }
}

/// Ordered, short-circuiting list of transformers
///
/// # Example
///
/// ```
/// use flowline_orchestrator::error::{ByHttpCode, ByMessage, TransformersChain};
/// use flowline_orchestrator::{find_processing_error, Context};
///
/// let chain = TransformersChain::new()
///     .with(ByHttpCode::new([503, 504]))
///     .with(ByMessage::new(["Rate limited"]));
///
/// let err = chain.transform(&Context::new(), anyhow::anyhow!("rate limited"));
/// assert!(find_processing_error(&err).is_some_and(|p| p.retry()));
/// ```
#[derive(Default)]
pub struct TransformersChain {
    transformers: Vec<Box<dyn ErrorTransformer>>,
}

impl TransformersChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transformer to the end of the chain
    pub fn with(mut self, transformer: impl ErrorTransformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Run the chain; returns the first changed error, or the input unchanged
    pub fn transform(&self, ctx: &Context, err: anyhow::Error) -> anyhow::Error {
        let mut current = err;
        for transformer in &self.transformers {
            match transformer.transform(ctx, current) {
                Transformed::Changed(changed) => return changed,
                Transformed::Unchanged(unchanged) => current = unchanged,
            }
        }
        current
    }
}

impl ErrorTransformer for TransformersChain {
    fn transform(&self, ctx: &Context, err: anyhow::Error) -> Transformed {
        let mut current = err;
        for transformer in &self.transformers {
            match transformer.transform(ctx, current) {
                changed @ Transformed::Changed(_) => return changed,
                Transformed::Unchanged(unchanged) => current = unchanged,
            }
        }
        Transformed::Unchanged(current)
    }
}

impl std::fmt::Debug for TransformersChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformersChain")
            .field("len", &self.transformers.len())
            .finish()
    }
}
