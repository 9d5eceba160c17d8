//! Engine errors

use attend_store::StoreError;
use attend_util::AttendError;
use thiserror::Error;

/// Failures of an engine operation. Business rejections are not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    /// The caller does not administer the activity's site
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("INVALID_TRANSITION: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<EngineError> for AttendError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(_) => AttendError::not_found(e.to_string()),
            EngineError::PermissionDenied(msg) => AttendError::permission(msg),
            EngineError::InvalidTransition { .. } => AttendError::validation(e.to_string()),
            EngineError::Store(store) => AttendError::store(store.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
