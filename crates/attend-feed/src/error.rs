//! Feed errors

use std::time::Duration;
use thiserror::Error;

/// Failures reaching or reading an upstream
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(#[from] attend_store::StoreError),
}

impl FeedError {
    /// Whether the same request may succeed if tried again later
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Transport(_) | FeedError::Timeout(_) => true,
            FeedError::Status(code) => *code >= 500 || *code == 429,
            FeedError::Decode(_) | FeedError::Store(_) => false,
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FeedError::Status(status.as_u16())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Decode(e.to_string())
    }
}

impl From<FeedError> for attend_util::AttendError {
    fn from(e: FeedError) -> Self {
        attend_util::AttendError::transport(e.to_string())
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
