//! Persistence layer for attendd
//!
//! Provides:
//! - Catalog and roster tables (seeded, read-mostly)
//! - Participations with a uniqueness guard on live rows
//! - Attendance windows with supersession
//! - Attendance rows (one per session and participant) and hour records
//! - Audit log (append-only)

mod audit;
mod seed;
mod sqlite;
mod traits;

pub use audit::*;
pub use seed::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness constraint rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<StoreError> for attend_util::AttendError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => attend_util::AttendError::not_found(what),
            other => attend_util::AttendError::store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<attend_api::UnknownVariant> for StoreError {
    fn from(e: attend_api::UnknownVariant) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
