//! IPC layer for attendd
//!
//! Provides:
//! - Unix domain socket server
//! - NDJSON (newline-delimited JSON) protocol
//! - Client connection management and event broadcast
//! - Peer UID authentication
//! - A change-token poll transport over the socket

mod client;
mod poll;
mod server;

pub use client::*;
pub use poll::*;
pub use server::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl From<IpcError> for attend_util::AttendError {
    fn from(e: IpcError) -> Self {
        attend_util::AttendError::ipc(e.to_string())
    }
}

pub type IpcResult<T> = Result<T, IpcError>;
