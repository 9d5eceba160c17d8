//! Read models returned to clients

use attend_util::{AttendanceId, ProcessId, RecordId, SessionId, WindowToken};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    ActivityRef, Attendance, AttendanceMethod, AttendanceState, CandidateReason, ComputedPresence,
    GeoFence, Outcome, Participant, Participation, ParticipationState, Session,
    TemporalState,
};

/// Result of an enrollment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollResult {
    pub outcome: Outcome,
    /// The live participation (new, or the one that already existed after a race)
    pub participation: Option<Participation>,
}

/// A participant who would be enrolled if staff asked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub participant: Participant,
    pub reason: CandidateReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discarded {
    pub record_id: RecordId,
    /// A rejection code, or `NOT_FOUND` for unknown records
    pub code: String,
    pub reason: String,
}

/// Outcome of a bulk enrollment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEnrollReport {
    pub created: u32,
    pub already_enrolled: u32,
    pub discarded_total: u32,
    pub discarded: Vec<Discarded>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrWindowView {
    pub token: WindowToken,
    pub usable_from: DateTime<Local>,
    pub expires_at: DateTime<Local>,
    pub geo: Option<GeoFence>,
    pub max_uses: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualWindowView {
    pub usable_from: DateTime<Local>,
    pub expires_at: DateTime<Local>,
}

/// Successful check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInReceipt {
    pub attendance: Attendance,
    /// End of the window the check-in was accepted in
    pub window_end: Option<DateTime<Local>>,
    /// True when an existing pending row was updated instead of created
    pub updated: bool,
}

/// Result of validating a session's attendance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    #[serde(rename = "validadas")]
    pub validated: u32,
    #[serde(rename = "minutos_por_asistencia")]
    pub minutes_per_attendance: u32,
    #[serde(rename = "registro_horas_creado")]
    pub hour_record_created: bool,
}

/// One row of a session's attendance list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRow {
    pub id: AttendanceId,
    pub method: AttendanceMethod,
    pub state: AttendanceState,
    pub check_in_at: Option<DateTime<Local>>,
    pub minutes: u32,
    pub code: Option<String>,
    pub document: Option<String>,
    pub first_names: Option<String>,
    pub last_names: Option<String>,
}

/// A session roster row with computed presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParticipant {
    pub participant: Participant,
    pub participation_state: ParticipationState,
    pub attendance: Option<Attendance>,
    pub computed: ComputedPresence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClassification {
    pub session_id: SessionId,
    pub state: TemporalState,
    pub minutes_until_start: i64,
    pub minutes_since_end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessProgress {
    pub process_id: ProcessId,
    pub name: String,
    pub total_min: u32,
    pub validated_min: u32,
    pub pending_min: u32,
    pub sessions_total: u32,
    pub sessions_attended: u32,
    pub sessions_missed: u32,
}

/// A participant's standing against a project's minute target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProgress {
    pub required_min: u32,
    pub accumulated_min: u32,
    pub missing_min: u32,
    pub closed: bool,
    pub processes: Vec<ProcessProgress>,
}

/// Staff agenda card for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaCard {
    pub session: Session,
    pub activity: ActivityRef,
    pub title: String,
    pub temporal: TemporalState,
    pub enrolled: u32,
    pub attendances: u32,
    pub qr: Option<QrWindowView>,
    pub manual: Option<ManualWindowView>,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub policy_loaded: bool,
    pub store_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_summary_keeps_wire_names() {
        let summary = ValidationSummary {
            validated: 3,
            minutes_per_attendance: 60,
            hour_record_created: true,
        };
        let value = serde_json::to_value(summary).unwrap();
        assert_eq!(value["validadas"], 3);
        assert_eq!(value["minutos_por_asistencia"], 60);
        assert_eq!(value["registro_horas_creado"], true);
    }
}
