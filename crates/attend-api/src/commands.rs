//! Command types for the attendd protocol

use attend_util::{
    AttendanceId, ClientId, ParticipationId, ProjectId, RecordId, SessionId, SiteId, WindowToken,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    ActivityRef, AgendaCard, Attendance, AttendanceRow, BulkEnrollReport, Candidate,
    CheckInReceipt, CheckInRejection, ClientRole, EnrollResult, FeedSnapshot, GeoFence,
    HealthStatus, ManualWindowView, Outcome, Participation, ParticipationState, PeriodSelector,
    ProjectProgress,
    QrWindowView, SessionClassification, SessionParticipant, ValidationSummary, WindowRejection,
    API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    /// Site the caller administers; staff commands outside it are refused
    #[serde(default)]
    pub acting_site: Option<SiteId>,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            acting_site: None,
            command,
        }
    }

    pub fn for_site(mut self, site: SiteId) -> Self {
        self.acting_site = Some(site);
        self
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    PermissionDenied,
    /// Business rule refused the mutation (e.g. illegal state transition)
    Unprocessable,
    RateLimited,
    StoreError,
    InternalError,
}

impl ErrorCode {
    /// HTTP-equivalent status
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::PermissionDenied => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Unprocessable => 422,
            ErrorCode::RateLimited => 429,
            ErrorCode::StoreError | ErrorCode::InternalError => 500,
        }
    }
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Enrollment
    /// Dry-run eligibility without writing anything
    Evaluate {
        record_id: RecordId,
        activity: ActivityRef,
    },
    Enroll {
        record_id: RecordId,
        activity: ActivityRef,
    },
    TransitionParticipation {
        participation_id: ParticipationId,
        to: ParticipationState,
    },
    Candidates {
        activity: ActivityRef,
    },
    /// Enroll the given records, or every current candidate when `None`
    EnrollCandidates {
        activity: ActivityRef,
        #[serde(default)]
        record_ids: Option<Vec<RecordId>>,
    },

    // Windows and check-in
    OpenQrWindow {
        session_id: SessionId,
        #[serde(default)]
        geo: Option<GeoFence>,
        #[serde(default)]
        max_uses: Option<u32>,
    },
    OpenManualWindow {
        session_id: SessionId,
    },
    CheckInQr {
        session_id: SessionId,
        record_id: RecordId,
        token: WindowToken,
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
    },
    /// Roster lookup by institutional code, document or email
    CheckInManual {
        session_id: SessionId,
        code: String,
    },
    CheckInJustified {
        session_id: SessionId,
        code: String,
        justification: String,
        #[serde(default)]
        grant_minutes: bool,
    },

    // Validation and rosters
    Validate {
        session_id: SessionId,
        #[serde(default)]
        attendance_ids: Option<Vec<AttendanceId>>,
        #[serde(default)]
        create_hour_record: bool,
    },
    AnnulAttendance {
        attendance_id: AttendanceId,
    },
    /// Conditional read: answered with `not_modified` while the etag matches
    ListAttendance {
        session_id: SessionId,
        #[serde(default)]
        if_none_match: Option<String>,
    },
    SessionParticipants {
        session_id: SessionId,
    },

    // Read models
    ClassifySession {
        session_id: SessionId,
        /// Evaluate at a specific time instead of now
        #[serde(default)]
        at: Option<DateTime<Local>>,
    },
    ProjectProgress {
        project_id: ProjectId,
        record_id: RecordId,
    },
    StaffAgenda {
        #[serde(default)]
        at: Option<DateTime<Local>>,
    },

    // Session feed (one view per connection)
    /// Start a feed view from page 1; a new filter discards the old view
    FeedLoad {
        #[serde(default)]
        period: PeriodSelector,
    },
    FeedMore,
    /// Stop paginating the view
    FeedClose,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,
    UnsubscribeEvents,
    GetHealth,
    Ping,
}

impl Command {
    /// Whether the command needs staff authority
    pub fn requires_staff(&self) -> bool {
        matches!(
            self,
            Command::TransitionParticipation { .. }
                | Command::Candidates { .. }
                | Command::EnrollCandidates { .. }
                | Command::OpenQrWindow { .. }
                | Command::OpenManualWindow { .. }
                | Command::CheckInManual { .. }
                | Command::CheckInJustified { .. }
                | Command::Validate { .. }
                | Command::AnnulAttendance { .. }
                | Command::ListAttendance { .. }
                | Command::SessionParticipants { .. }
                | Command::StaffAgenda { .. }
        )
    }

    /// Whether the command writes state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Enroll { .. }
                | Command::TransitionParticipation { .. }
                | Command::EnrollCandidates { .. }
                | Command::OpenQrWindow { .. }
                | Command::OpenManualWindow { .. }
                | Command::CheckInQr { .. }
                | Command::CheckInManual { .. }
                | Command::CheckInJustified { .. }
                | Command::Validate { .. }
                | Command::AnnulAttendance { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Evaluated { outcome: Outcome },
    Enrolled(EnrollResult),
    Participation(Participation),
    Candidates { candidates: Vec<Candidate> },
    BulkEnrolled(BulkEnrollReport),
    QrWindow(QrWindowView),
    ManualWindow(ManualWindowView),
    WindowRejected { reason: WindowRejection },
    CheckedIn(CheckInReceipt),
    CheckInRejected { rejection: CheckInRejection },
    Validated(ValidationSummary),
    Attendance(Attendance),
    AttendanceList { rows: Vec<AttendanceRow>, etag: String },
    NotModified { etag: String },
    Participants { participants: Vec<SessionParticipant> },
    Classification(SessionClassification),
    Progress(ProjectProgress),
    Agenda { cards: Vec<AgendaCard> },
    /// `refreshed` is false when the request was dropped by debounce or in-flight
    Feed { snapshot: FeedSnapshot, refreshed: bool },
    FeedClosed,
    Health(HealthStatus),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
