//! Enrollment and attendance engine for attendd
//!
//! Pure rules live in their own modules and take `now` as an argument:
//! - Eligibility evaluation (who may join which activity)
//! - Attendance windows (QR and roster) and check-in admission
//! - Validation of pending attendance into credited minutes
//! - Relative-time classification of sessions
//!
//! [`CoreEngine`] ties them to the store and the clock.

mod checkin;
mod classify;
mod eligibility;
mod engine;
mod error;
mod events;
mod validator;
mod window;

pub use checkin::*;
pub use classify::*;
pub use eligibility::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use validator::*;
pub use window::*;
