//! Protocol types for attendd
//!
//! This crate defines the stable API between attendd and clients:
//! - Domain records and their stable wire strings
//! - Eligibility outcomes and rejection codes
//! - Commands, responses and read models
//! - Session feed pages and snapshots
//! - Events (service -> clients)

mod commands;
mod events;
mod feed;
mod records;
mod types;
mod views;

pub use commands::*;
pub use events::*;
pub use feed::*;
pub use records::*;
pub use types::*;
pub use views::*;

/// Current API version
pub const API_VERSION: u32 = 1;
