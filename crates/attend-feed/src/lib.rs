//! Session feed plumbing for attendd
//!
//! This crate merges independently paginated upstream collections into one
//! time-ordered feed, and polls resources with change tokens. Upstreams are
//! reached through the [`PageSource`] and [`PollTransport`] traits, so the
//! merge and poll logic runs unchanged against HTTP, the local store or a
//! mock.

mod error;
mod http;
mod merger;
mod mock;
mod poller;
mod source;
mod store_source;
mod views;

pub use error::*;
pub use http::*;
pub use merger::*;
pub use mock::*;
pub use poller::*;
pub use source::*;
pub use store_source::*;
pub use views::*;
