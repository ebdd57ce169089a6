//! Error kinds and their HTTP code mapping

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::ContextError;

/// Coarse classification of an error
///
/// Kinds are what gets persisted on a failed workflow and what the
/// [`ByHttpCode`](super::ByHttpCode) transformer matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed validation
    Validation,

    /// Input was well formed but violates a business precondition
    BadValidation,

    /// Target already exists or is in a conflicting state
    Conflict,

    /// Target does not exist (includes "no rows")
    NotExist,

    /// Caller is not allowed to perform the operation
    Permission,

    /// Transport or storage I/O failure
    Io,

    /// Deadline exceeded or operation cancelled
    Timeout,

    /// Invariant broken inside the orchestrator
    Internal,

    /// Anything not recognised
    Other,
}

impl ErrorKind {
    /// HTTP status code conventionally associated with this kind
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::BadValidation => 422,
            Self::Conflict => 409,
            Self::NotExist => 404,
            Self::Permission => 403,
            Self::Io => 503,
            Self::Timeout => 504,
            Self::Internal | Self::Other => 500,
        }
    }

    /// Stable string form, as stored in the `error_kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::BadValidation => "bad_validation",
            Self::Conflict => "conflict",
            Self::NotExist => "not_exist",
            Self::Permission => "permission",
            Self::Io => "io",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Other => "other",
        }
    }

    /// Parse the string form produced by [`ErrorKind::as_str`]
    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "validation" => Self::Validation,
            "bad_validation" => Self::BadValidation,
            "conflict" => Self::Conflict,
            "not_exist" => Self::NotExist,
            "permission" => Self::Permission,
            "io" => Self::Io,
            "timeout" => Self::Timeout,
            "internal" => Self::Internal,
            "other" => Self::Other,
            _ => return None,
        };
        Some(kind)
    }

    /// Classify an `anyhow` error by walking its source chain
    pub fn of(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(known_kind)
            .unwrap_or_else(|| Self::from_message(&err.to_string()))
    }

    /// Classify any standard error by walking its source chain
    pub fn of_error(err: &(dyn StdError + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(kind) = known_kind(e) {
                return kind;
            }
            current = e.source();
        }
        Self::from_message(&err.to_string())
    }

    /// Last-resort classification from raw error text
    pub fn from_message(message: &str) -> Self {
        let text = message.to_lowercase();

        if text.contains("not found") || text.contains("no rows") || text.contains("does not exist")
        {
            Self::NotExist
        } else if text.contains("already exists")
            || text.contains("duplicate")
            || text.contains("conflict")
        {
            Self::Conflict
        } else if text.contains("permission denied")
            || text.contains("unauthorized")
            || text.contains("forbidden")
        {
            Self::Permission
        } else if text.contains("timed out")
            || text.contains("timeout")
            || text.contains("deadline exceeded")
        {
            Self::Timeout
        } else if text.contains("connection")
            || text.contains("broken pipe")
            || text.contains("i/o")
            || text.contains("unavailable")
        {
            Self::Io
        } else if text.contains("invalid") || text.contains("validation") {
            Self::Validation
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know their own kind
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

fn known_kind(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    use crate::broker::BrokerError;
    use crate::engine::{OrchestratorError, RegistryError};
    use crate::persistence::StoreError;
    use crate::recovery::RecoveryError;
    use crate::schema::ValidationErrors;

    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<BrokerError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<RegistryError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<RecoveryError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<ValidationErrors>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<ContextError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<sqlx::Error>() {
        return Some(sqlx_kind(e));
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return Some(io_kind(e));
    }
    None
}

impl Classify for ContextError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Timeout
    }
}

pub(crate) fn io_kind(err: &std::io::Error) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotExist,
        std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        std::io::ErrorKind::AlreadyExists => ErrorKind::Conflict,
        std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
            ErrorKind::Validation
        }
        _ => ErrorKind::Io,
    }
}

pub(crate) fn sqlx_kind(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::RowNotFound => ErrorKind::NotExist,
        sqlx::Error::Io(e) => io_kind(e),
        sqlx::Error::PoolTimedOut => ErrorKind::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => ErrorKind::Io,
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                ErrorKind::Conflict
            } else if db.is_foreign_key_violation() || db.is_check_violation() {
                ErrorKind::Validation
            } else {
                ErrorKind::Other
            }
        }
        _ => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::NotExist.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::Io.http_status(), 503);
        assert_eq!(ErrorKind::Other.http_status(), 500);
    }

    #[test]
    fn test_parse_round_trips_as_str() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::BadValidation,
            ErrorKind::Conflict,
            ErrorKind::NotExist,
            ErrorKind::Permission,
            ErrorKind::Io,
            ErrorKind::Timeout,
            ErrorKind::Internal,
            ErrorKind::Other,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("nope"), None);
    }

    #[test]
    fn test_from_message() {
        assert_eq!(ErrorKind::from_message("No rows in result set"), ErrorKind::NotExist);
        assert_eq!(ErrorKind::from_message("permission denied for table"), ErrorKind::Permission);
        assert_eq!(ErrorKind::from_message("connection reset by peer"), ErrorKind::Io);
        assert_eq!(ErrorKind::from_message("something odd"), ErrorKind::Other);
    }

    #[test]
    fn test_of_walks_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = anyhow::Error::new(io).context("publishing step event");
        assert_eq!(ErrorKind::of(&err), ErrorKind::Permission);
    }

    #[test]
    fn test_context_errors_are_timeouts() {
        assert_eq!(ContextError::Cancelled.kind(), ErrorKind::Timeout);
        let err = anyhow::Error::new(ContextError::Cancelled).context("loading workflow");
        assert_eq!(ErrorKind::of(&err), ErrorKind::Timeout);
    }

    #[test]
    fn test_of_sqlx_row_not_found() {
        let err = anyhow::Error::new(sqlx::Error::RowNotFound);
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotExist);
    }
}
