//! Enumerations and outcome codes shared across the attendd API
//!
//! Wire strings are stable: clients match on them, so renaming a variant
//! must keep its `serde(rename)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// database and wire representation is the same fixed string.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        type_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// A stored or received string did not match any known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {type_name} value: {value:?}")]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
}

/// Lifecycle of a project or event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    #[serde(rename = "PLANIFICADO")]
    Planned,
    #[serde(rename = "EN_CURSO")]
    InProgress,
    #[serde(rename = "CERRADO")]
    Closed,
    #[serde(rename = "CANCELADO")]
    Cancelled,
}

string_enum!(ActivityState {
    Planned => "PLANIFICADO",
    InProgress => "EN_CURSO",
    Closed => "CERRADO",
    Cancelled => "CANCELADO",
});

impl ActivityState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivityState::Closed | ActivityState::Cancelled)
    }

    /// Only planned or running activities accept participants
    pub fn accepts_participants(&self) -> bool {
        matches!(self, ActivityState::Planned | ActivityState::InProgress)
    }
}

/// Lifecycle of an academic period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodState {
    #[serde(rename = "PLANIFICADO")]
    Planned,
    #[serde(rename = "EN_CURSO")]
    InProgress,
    #[serde(rename = "CERRADO")]
    Closed,
}

string_enum!(PeriodState {
    Planned => "PLANIFICADO",
    InProgress => "EN_CURSO",
    Closed => "CERRADO",
});

/// Project subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectType {
    /// Open enrollment
    #[serde(rename = "LIBRE")]
    Free,
    /// Gated by academic level, chained across periods
    #[serde(rename = "VINCULADO")]
    Linked,
}

string_enum!(ProjectType {
    Free => "LIBRE",
    Linked => "VINCULADO",
});

/// Status of a participant's academic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "ACTIVO")]
    Active,
    #[serde(rename = "SUSPENDIDO")]
    Suspended,
    #[serde(rename = "EGRESADO")]
    Graduated,
    #[serde(rename = "RETIRADO")]
    Withdrawn,
}

string_enum!(RecordStatus {
    Active => "ACTIVO",
    Suspended => "SUSPENDIDO",
    Graduated => "EGRESADO",
    Withdrawn => "RETIRADO",
});

/// State of a participation (enrollment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipationState {
    #[serde(rename = "INSCRITO")]
    Enrolled,
    #[serde(rename = "CONFIRMADO")]
    Confirmed,
    #[serde(rename = "FINALIZADO")]
    Finished,
    #[serde(rename = "RETIRADO")]
    Withdrawn,
    #[serde(rename = "CANCELADO")]
    Cancelled,
}

string_enum!(ParticipationState {
    Enrolled => "INSCRITO",
    Confirmed => "CONFIRMADO",
    Finished => "FINALIZADO",
    Withdrawn => "RETIRADO",
    Cancelled => "CANCELADO",
});

impl ParticipationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipationState::Finished
                | ParticipationState::Withdrawn
                | ParticipationState::Cancelled
        )
    }

    /// Whether `self -> next` is an allowed transition
    pub fn can_transition_to(&self, next: ParticipationState) -> bool {
        use ParticipationState::*;
        match (self, next) {
            (Enrolled, Confirmed) => true,
            (Enrolled | Confirmed, Finished) => true,
            (Enrolled | Confirmed, Withdrawn | Cancelled) => true,
            _ => false,
        }
    }
}

/// How an attendance row was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceMethod {
    #[serde(rename = "QR")]
    Qr,
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "MANUAL_JUSTIFICADA")]
    ManualJustified,
    #[serde(rename = "IMPORTADO")]
    Imported,
    #[serde(rename = "AJUSTE")]
    Adjustment,
}

string_enum!(AttendanceMethod {
    Qr => "QR",
    Manual => "MANUAL",
    ManualJustified => "MANUAL_JUSTIFICADA",
    Imported => "IMPORTADO",
    Adjustment => "AJUSTE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceState {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "VALIDADO")]
    Validated,
    #[serde(rename = "ANULADO")]
    Annulled,
}

string_enum!(AttendanceState {
    Pending => "PENDIENTE",
    Validated => "VALIDADO",
    Annulled => "ANULADO",
});

/// Kind of check-in window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Qr,
    Manual,
}

string_enum!(WindowKind {
    Qr => "qr",
    Manual => "manual",
});

/// Relative-time bucket of a session occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemporalState {
    Soon,
    Now,
    Recent,
    Later,
    Past,
}

impl TemporalState {
    pub fn is_upcoming(&self) -> bool {
        matches!(self, TemporalState::Soon | TemporalState::Later)
    }

    pub fn is_history(&self) -> bool {
        matches!(self, TemporalState::Recent | TemporalState::Past)
    }
}

/// Presence computed for a roster row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputedPresence {
    #[serde(rename = "PRESENTE")]
    Present,
    #[serde(rename = "FALTA")]
    Absent,
    /// Session not over and no attendance yet
    #[serde(rename = "")]
    Undetermined,
}

/// Rejection codes returned by eligibility evaluation, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    NoCurrentPeriod,
    NotEnrolledCurrentPeriod,
    StudentNotActive,
    DifferentEpSede,
    ProjectNotActive,
    AlreadyEnrolled,
    /// Event requires enrollment and its window is closed or it is full
    EnrollmentClosed,
    LevelMismatch,
    PendingLinkedPrev,
}

string_enum!(RejectCode {
    NoCurrentPeriod => "NO_CURRENT_PERIOD",
    NotEnrolledCurrentPeriod => "NOT_ENROLLED_CURRENT_PERIOD",
    StudentNotActive => "STUDENT_NOT_ACTIVE",
    DifferentEpSede => "DIFFERENT_EP_SEDE",
    ProjectNotActive => "PROJECT_NOT_ACTIVE",
    AlreadyEnrolled => "ALREADY_ENROLLED",
    EnrollmentClosed => "ENROLLMENT_CLOSED",
    LevelMismatch => "LEVEL_MISMATCH",
    PendingLinkedPrev => "PENDING_LINKED_PREV",
});

impl RejectCode {
    /// Human-readable explanation
    pub fn message(&self) -> &'static str {
        match self {
            RejectCode::NoCurrentPeriod => "There is no active academic period",
            RejectCode::NotEnrolledCurrentPeriod => {
                "The academic record is not matriculated in the current period"
            }
            RejectCode::StudentNotActive => "The academic record is not active",
            RejectCode::DifferentEpSede => "The activity belongs to a different site",
            RejectCode::ProjectNotActive => "The activity is not open for participation",
            RejectCode::AlreadyEnrolled => "Already enrolled in this activity",
            RejectCode::EnrollmentClosed => "Enrollment for this event is closed or full",
            RejectCode::LevelMismatch => "The participant's level is not allowed",
            RejectCode::PendingLinkedPrev => {
                "A linked project from an earlier level is still pending"
            }
        }
    }
}

/// Result of evaluating a participant against an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "code", rename_all = "snake_case")]
pub enum Outcome {
    Enroll,
    Reject(RejectCode),
}

impl Outcome {
    pub fn is_enroll(&self) -> bool {
        matches!(self, Outcome::Enroll)
    }

    /// Stable string: `ENROLLED` or the rejection code
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Enroll => "ENROLLED",
            Outcome::Reject(code) => code.as_str(),
        }
    }
}

/// Why a participant showed up as an enrollment candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateReason {
    #[serde(rename = "ELEGIBLE_LIBRE")]
    EligibleFree,
    #[serde(rename = "ELEGIBLE_VINCULADO")]
    EligibleLinked,
    #[serde(rename = "ELEGIBLE_EVENTO")]
    EligibleEvent,
}

/// Structured reasons a check-in attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInRejection {
    /// No active window of the required kind for the session
    NoActiveWindow,
    /// Token does not belong to the active window (stale or forged)
    TokenMismatch,
    /// Window not usable yet
    WindowNotStarted,
    WindowExpired,
    UsageCapReached { max_uses: u32 },
    /// Geofenced window and no coordinates supplied
    LocationRequired,
    OutsideGeofence { distance_m: u32, radius_m: u32 },
    ParticipantNotFound,
    /// No live participation in the session's activity
    NotEligible,
    /// Attendance already finalized for this participant
    Duplicate,
    JustificationRequired,
}

impl CheckInRejection {
    pub fn code(&self) -> &'static str {
        match self {
            CheckInRejection::NoActiveWindow => "NO_ACTIVE_WINDOW",
            CheckInRejection::TokenMismatch => "TOKEN_MISMATCH",
            CheckInRejection::WindowNotStarted => "WINDOW_NOT_STARTED",
            CheckInRejection::WindowExpired => "WINDOW_EXPIRED",
            CheckInRejection::UsageCapReached { .. } => "USAGE_CAP_REACHED",
            CheckInRejection::LocationRequired => "LOCATION_REQUIRED",
            CheckInRejection::OutsideGeofence { .. } => "OUTSIDE_GEOFENCE",
            CheckInRejection::ParticipantNotFound => "PARTICIPANT_NOT_FOUND",
            CheckInRejection::NotEligible => "NOT_ELIGIBLE",
            CheckInRejection::Duplicate => "DUPLICATE",
            CheckInRejection::JustificationRequired => "JUSTIFICATION_REQUIRED",
        }
    }
}

/// Reasons a window could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowRejection {
    /// The session (plus grace) is already over
    SessionEnded,
    /// The owning activity is closed or cancelled
    ActivityNotActive,
    /// Geofence radius must be positive
    InvalidGeofence,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Staff: manages windows, rosters, validation and bulk enrollment
    Staff,
    /// Participant-facing client: enroll, check in, read own progress
    Participant,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_enroll(&self) -> bool {
        matches!(self, ClientRole::Staff | ClientRole::Participant)
    }

    pub fn can_check_in(&self) -> bool {
        matches!(self, ClientRole::Staff | ClientRole::Participant)
    }

    pub fn can_manage_sessions(&self) -> bool {
        matches!(self, ClientRole::Staff)
    }
}
