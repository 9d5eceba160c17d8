//! Core events emitted by the engine

use attend_api::{ActivityRef, AttendanceMethod, EventPayload, WindowKind};
use attend_util::{HourRecordId, ParticipationId, RecordId, SessionId};
use chrono::{DateTime, Local};

/// Events emitted by the core engine after a successful mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    ParticipationCreated {
        participation_id: ParticipationId,
        record_id: RecordId,
        activity: ActivityRef,
    },

    WindowOpened {
        session_id: SessionId,
        kind: WindowKind,
        expires_at: DateTime<Local>,
    },

    AttendanceRecorded {
        session_id: SessionId,
        record_id: RecordId,
        method: AttendanceMethod,
    },

    AttendanceValidated {
        session_id: SessionId,
        validated: u32,
    },

    HourRecordCreated {
        session_id: SessionId,
        hour_record_id: HourRecordId,
        minutes_total: u32,
    },
}

impl From<CoreEvent> for EventPayload {
    fn from(event: CoreEvent) -> Self {
        match event {
            CoreEvent::ParticipationCreated {
                participation_id,
                record_id,
                activity,
            } => EventPayload::ParticipationCreated {
                participation_id,
                record_id,
                activity,
            },
            CoreEvent::WindowOpened {
                session_id,
                kind,
                expires_at,
            } => EventPayload::WindowOpened {
                session_id,
                kind,
                expires_at,
            },
            CoreEvent::AttendanceRecorded {
                session_id,
                record_id,
                method,
            } => EventPayload::AttendanceRecorded {
                session_id,
                record_id,
                method,
            },
            CoreEvent::AttendanceValidated {
                session_id,
                validated,
            } => EventPayload::AttendanceValidated {
                session_id,
                validated,
            },
            CoreEvent::HourRecordCreated {
                session_id,
                hour_record_id,
                minutes_total,
            } => EventPayload::HourRecordCreated {
                session_id,
                hour_record_id,
                minutes_total,
            },
        }
    }
}
