//! Store trait definitions

use attend_api::{
    ActivityRef, Attendance, AttendanceMethod, AttendanceState, AttendanceWindow, EventActivity,
    HourRecord, Participant, Participation, ParticipationState, Period, Process, Project,
    Session, SessionParent, WindowKind,
};
use attend_util::{
    AttendanceId, EventId, ParticipationId, PeriodId, ProcessId, ProjectId, RecordId, SessionId,
    SiteId, WindowToken,
};
use chrono::{DateTime, Local};

use crate::{AuditEvent, StoreResult};

/// Offset pagination over catalog listings, ordered by id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    pub period: Option<PeriodId>,
    pub site: Option<SiteId>,
    pub offset: u32,
    pub limit: u32,
}

/// Attendance row about to be written by a check-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendance {
    pub session_id: SessionId,
    pub record_id: RecordId,
    pub participation_id: Option<ParticipationId>,
    pub method: AttendanceMethod,
    pub state: AttendanceState,
    pub check_in_at: DateTime<Local>,
    pub minutes_validated: u32,
    pub override_minutes: Option<u32>,
    pub justification: Option<String>,
    pub window_token: Option<WindowToken>,
}

/// Window use to consume together with a check-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUse {
    pub session_id: SessionId,
    pub kind: WindowKind,
    /// Must still match the active window when the write happens
    pub token: Option<WindowToken>,
    pub max_uses: Option<u32>,
}

/// What an atomic check-in write did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInWrite {
    Created(Attendance),
    /// An existing pending row was refreshed; no window use consumed
    Updated(Attendance),
    /// Row exists and is validated or annulled
    AlreadyFinal(Attendance),
    /// The window was superseded between check and write
    WindowGone,
    /// Usage cap reached between check and write
    CapReached,
}

/// Hour record to emit with a validation batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHourRecord {
    pub activity: ActivityRef,
    pub process_id: Option<ProcessId>,
    pub created_at: DateTime<Local>,
}

/// Result of applying a validation batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedValidation {
    pub validated: u32,
    pub minutes_total: u32,
    /// The session's hour record after this batch, when one was requested
    pub hour_record: Option<HourRecord>,
    /// False when the batch was added to an existing record
    pub hour_record_created: bool,
}

/// Main store trait
pub trait Store: Send + Sync {
    // Catalog

    fn upsert_period(&self, period: &Period) -> StoreResult<()>;
    fn list_periods(&self) -> StoreResult<Vec<Period>>;

    fn upsert_project(&self, project: &Project) -> StoreResult<()>;
    fn get_project(&self, id: ProjectId) -> StoreResult<Option<Project>>;
    fn list_projects(&self, query: &CatalogQuery) -> StoreResult<Vec<Project>>;

    fn upsert_process(&self, process: &Process) -> StoreResult<()>;
    fn get_process(&self, id: ProcessId) -> StoreResult<Option<Process>>;
    fn list_processes(&self, project: ProjectId) -> StoreResult<Vec<Process>>;

    fn upsert_event(&self, event: &EventActivity) -> StoreResult<()>;
    fn get_event(&self, id: EventId) -> StoreResult<Option<EventActivity>>;
    fn list_events(&self, query: &CatalogQuery) -> StoreResult<Vec<EventActivity>>;

    fn upsert_session(&self, session: &Session) -> StoreResult<()>;
    fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;
    /// Sessions hanging directly from a process or event, by (date, start)
    fn list_sessions(&self, parent: SessionParent) -> StoreResult<Vec<Session>>;
    /// All sessions of an activity (a project's sessions span its processes)
    fn list_activity_sessions(&self, activity: ActivityRef) -> StoreResult<Vec<Session>>;

    // Roster

    fn upsert_participant(&self, participant: &Participant) -> StoreResult<()>;
    fn get_participant(&self, id: RecordId) -> StoreResult<Option<Participant>>;
    /// Resolve a human-entered code, document number or email
    fn find_participant(&self, needle: &str) -> StoreResult<Option<Participant>>;
    fn list_participants_by_site(&self, site: SiteId) -> StoreResult<Vec<Participant>>;
    fn set_matriculated(&self, record: RecordId, period: PeriodId) -> StoreResult<()>;
    fn is_matriculated(&self, record: RecordId, period: PeriodId) -> StoreResult<bool>;

    // Participations

    /// Insert an INSCRITO row; `StoreError::Conflict` if a live row exists
    fn insert_participation(
        &self,
        record: RecordId,
        activity: ActivityRef,
        at: DateTime<Local>,
    ) -> StoreResult<Participation>;
    fn get_participation(&self, id: ParticipationId) -> StoreResult<Option<Participation>>;
    /// The non-terminal participation for (record, activity), if any
    fn live_participation(
        &self,
        record: RecordId,
        activity: ActivityRef,
    ) -> StoreResult<Option<Participation>>;
    fn list_participations(&self, activity: ActivityRef) -> StoreResult<Vec<Participation>>;
    fn list_record_participations(&self, record: RecordId) -> StoreResult<Vec<Participation>>;
    fn count_live_participations(&self, activity: ActivityRef) -> StoreResult<u32>;
    /// Compare-and-set; returns false if the row was no longer in `from`
    fn transition_participation(
        &self,
        id: ParticipationId,
        from: ParticipationState,
        to: ParticipationState,
    ) -> StoreResult<bool>;

    // Windows

    /// Deactivate the active window of the same (session, kind) and insert this one
    fn replace_window(&self, window: &AttendanceWindow) -> StoreResult<()>;
    fn active_window(
        &self,
        session: SessionId,
        kind: WindowKind,
    ) -> StoreResult<Option<AttendanceWindow>>;

    // Attendance

    fn get_attendance(&self, id: AttendanceId) -> StoreResult<Option<Attendance>>;
    fn find_attendance(
        &self,
        session: SessionId,
        record: RecordId,
    ) -> StoreResult<Option<Attendance>>;
    fn list_attendance(&self, session: SessionId) -> StoreResult<Vec<Attendance>>;
    fn list_record_attendance(&self, record: RecordId) -> StoreResult<Vec<Attendance>>;
    /// Consume the window use (if any) and insert or refresh the row atomically
    fn record_check_in(
        &self,
        attendance: &NewAttendance,
        window_use: Option<&WindowUse>,
    ) -> StoreResult<CheckInWrite>;
    /// Promote the listed PENDIENTE rows, skipping any that moved on meanwhile
    fn apply_validation(
        &self,
        session: SessionId,
        minutes: &[(AttendanceId, u32)],
        hour_record: Option<&NewHourRecord>,
    ) -> StoreResult<AppliedValidation>;
    /// PENDIENTE -> ANULADO; false if the row was not pending
    fn annul_attendance(&self, id: AttendanceId) -> StoreResult<bool>;

    fn list_hour_records(&self, session: SessionId) -> StoreResult<Vec<HourRecord>>;

    // Audit log

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    fn is_healthy(&self) -> bool;
}
