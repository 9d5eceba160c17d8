//! Domain records: catalog, roster, enrollment and attendance rows

use attend_util::{
    session_bounds, AttendanceId, EventId, HourRecordId, ParticipationId, PeriodId, ProcessId,
    ProjectId, RecordId, SessionId, SiteId, WindowToken,
};
use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    ActivityState, AttendanceMethod, AttendanceState, ParticipationState, PeriodState,
    ProjectType, RecordStatus, WindowKind,
};

/// Discriminant of an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Project,
    Event,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Project => "project",
            ActivityKind::Event => "event",
        }
    }

    /// Prefix used in feed keys (`P-12`, `E-4`)
    pub fn key_prefix(&self) -> char {
        match self {
            ActivityKind::Project => 'P',
            ActivityKind::Event => 'E',
        }
    }
}

/// Reference to a project or an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ActivityRef {
    Project(ProjectId),
    Event(EventId),
}

impl ActivityRef {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityRef::Project(_) => ActivityKind::Project,
            ActivityRef::Event(_) => ActivityKind::Event,
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            ActivityRef::Project(id) => id.get(),
            ActivityRef::Event(id) => id.get(),
        }
    }

    pub fn from_parts(kind: ActivityKind, id: i64) -> Self {
        match kind {
            ActivityKind::Project => ActivityRef::Project(ProjectId::new(id)),
            ActivityKind::Event => ActivityRef::Event(EventId::new(id)),
        }
    }
}

impl fmt::Display for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind().key_prefix(), self.raw_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub code: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub state: PeriodState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub code: String,
    pub title: String,
    pub project_type: ProjectType,
    /// Academic levels (cycles) admitted; only meaningful for linked projects
    #[serde(default)]
    pub levels: Vec<u8>,
    pub site_id: SiteId,
    pub period_id: PeriodId,
    pub state: ActivityState,
    /// Minimum minutes each participant must accumulate
    pub required_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub project_id: ProjectId,
    pub name: String,
    pub required_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActivity {
    pub id: EventId,
    pub code: String,
    pub title: String,
    pub site_id: SiteId,
    pub period_id: PeriodId,
    pub state: ActivityState,
    pub requires_enrollment: bool,
    pub capacity: Option<u32>,
    pub enrollment_from: Option<DateTime<Local>>,
    pub enrollment_to: Option<DateTime<Local>>,
}

/// What a session hangs from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SessionParent {
    Process(ProcessId),
    Event(EventId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub parent: SessionParent,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Session {
    /// Concrete `[ini, fin]`, with midnight crossing applied
    pub fn bounds(&self) -> (DateTime<Local>, DateTime<Local>) {
        session_bounds(self.date, self.start, self.end)
    }

    /// Scheduled length in whole minutes
    pub fn duration_minutes(&self) -> u32 {
        let (ini, fin) = self.bounds();
        (fin - ini).num_minutes().max(0) as u32
    }
}

/// A participant's academic record as seen by the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub record_id: RecordId,
    /// Institutional code typed by staff during manual check-in
    pub code: String,
    pub document: Option<String>,
    pub email: Option<String>,
    pub first_names: String,
    pub last_names: String,
    pub site_id: SiteId,
    /// Current academic level / cycle
    pub level: Option<u8>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub id: ParticipationId,
    pub record_id: RecordId,
    pub activity: ActivityRef,
    pub state: ParticipationState,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFence {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: u32,
}

/// A check-in window attached to one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceWindow {
    pub session_id: SessionId,
    pub kind: WindowKind,
    /// Present for QR windows only
    pub token: Option<WindowToken>,
    pub usable_from: DateTime<Local>,
    pub expires_at: DateTime<Local>,
    pub geo: Option<GeoFence>,
    pub max_uses: Option<u32>,
    pub uses: u32,
    /// Cleared when superseded by a newer window of the same kind
    pub active: bool,
    pub opened_at: DateTime<Local>,
}

impl AttendanceWindow {
    pub fn is_usable_at(&self, now: DateTime<Local>) -> bool {
        self.active && now >= self.usable_from && now <= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: AttendanceId,
    pub session_id: SessionId,
    pub record_id: RecordId,
    pub participation_id: Option<ParticipationId>,
    pub method: AttendanceMethod,
    pub state: AttendanceState,
    pub check_in_at: Option<DateTime<Local>>,
    /// Zero until validated
    pub minutes_validated: u32,
    /// Minutes to credit instead of the session duration
    pub override_minutes: Option<u32>,
    pub justification: Option<String>,
    /// QR token used, for audit
    pub window_token: Option<WindowToken>,
    pub created_at: DateTime<Local>,
}

/// Credit record for one session; later validation batches add to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRecord {
    pub id: HourRecordId,
    pub session_id: SessionId,
    pub activity: ActivityRef,
    pub process_id: Option<ProcessId>,
    pub attendances: u32,
    pub minutes_total: u32,
    pub created_at: DateTime<Local>,
}
