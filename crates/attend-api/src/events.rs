//! Event types for attendd -> client streaming

use attend_util::{HourRecordId, ParticipationId, RecordId, SessionId};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{ActivityRef, AttendanceMethod, WindowKind, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: attend_util::now(),
            payload,
        }
    }
}

/// Change notifications pushed to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
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

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_util::EventId;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::ParticipationCreated {
            participation_id: ParticipationId::new(10),
            record_id: RecordId::new(2),
            activity: ActivityRef::Event(EventId::new(4)),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("participation_created"));
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(parsed.payload, EventPayload::ParticipationCreated { .. }));
    }
}
