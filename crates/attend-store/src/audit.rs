//! Audit event types

use attend_api::{
    ActivityRef, AttendanceMethod, ParticipationState, RejectCode, WindowKind,
};
use attend_util::{AttendanceId, HourRecordId, ParticipationId, RecordId, SessionId};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// Catalog/roster seed applied
    SeedApplied { sessions: usize, participants: usize },

    ParticipationCreated {
        participation_id: ParticipationId,
        record_id: RecordId,
        activity: ActivityRef,
    },

    EnrollmentRejected {
        record_id: RecordId,
        activity: ActivityRef,
        code: RejectCode,
    },

    ParticipationTransitioned {
        participation_id: ParticipationId,
        from: ParticipationState,
        to: ParticipationState,
    },

    WindowOpened {
        session_id: SessionId,
        kind: WindowKind,
        expires_at: DateTime<Local>,
    },

    CheckInRecorded {
        session_id: SessionId,
        record_id: RecordId,
        method: AttendanceMethod,
        updated: bool,
    },

    CheckInRejected {
        session_id: SessionId,
        code: String,
    },

    AttendanceValidated {
        session_id: SessionId,
        validated: u32,
        minutes_total: u32,
    },

    AttendanceAnnulled { attendance_id: AttendanceId },

    HourRecordCreated {
        hour_record_id: HourRecordId,
        session_id: SessionId,
        minutes_total: u32,
    },

    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Set by the store on append
    pub id: i64,
    pub timestamp: DateTime<Local>,
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0,
            timestamp: attend_util::now(),
            event,
        }
    }

    pub fn at(event: AuditEventType, timestamp: DateTime<Local>) -> Self {
        Self {
            id: 0,
            timestamp,
            event,
        }
    }
}
