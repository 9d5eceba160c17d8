//! Shared utilities for attendd
//!
//! This crate provides:
//! - ID types (RecordId, SessionId, WindowToken, ClientId, ...)
//! - Clock abstraction and session time helpers
//! - Error types
//! - Request gating (rate limiting, refresh debouncing)
//! - Default paths for socket, database and config

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
