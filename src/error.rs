//! Engine-level error types.

use crate::client::CrmError;
use crate::db::DbError;
use crate::report::validate::FieldError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by report execution.
///
/// Cache failures never appear here: the memoizer degrades them to misses
/// or skipped writes without changing the correctness of the result.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No report registered under the requested key.
    #[error("unknown report: {0}")]
    UnknownReport(String),

    /// One entry per invalid field. Validation never stops at the first
    /// violation, and no upstream or database call is attempted.
    #[error("validation failed for {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// Typed upstream failure (unavailable vs non-2xx, see [`CrmError`]).
    #[error(transparent)]
    Crm(#[from] CrmError),

    /// Wrapped relational store failure; raw driver errors never leak.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Report body failure that fits no other variant.
    #[error("report execution failed: {0}")]
    Internal(String),
}

impl EngineError {
    /// Upstream-unavailable failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Crm(e) if e.is_retryable())
    }

    pub fn validation_errors(&self) -> Option<&[FieldError]> {
        match self {
            EngineError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
