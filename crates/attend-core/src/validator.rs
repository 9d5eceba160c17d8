//! Promotion of pending attendance into credited minutes

use attend_api::{Attendance, AttendanceState, Session};
use attend_util::AttendanceId;

/// Rows to promote and the minutes each one earns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationPlan {
    pub minutes: Vec<(AttendanceId, u32)>,
    /// Session length, credited to rows without an override
    pub session_minutes: u32,
}

impl ValidationPlan {
    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }
}

pub struct AttendanceValidator;

impl AttendanceValidator {
    /// Select the session's PENDIENTE rows (optionally restricted to `only`)
    /// and compute their minutes. Already validated or annulled rows are
    /// skipped, which makes re-validation a no-op.
    pub fn plan(
        session: &Session,
        rows: &[Attendance],
        only: Option<&[AttendanceId]>,
    ) -> ValidationPlan {
        let session_minutes = session.duration_minutes();
        let minutes = rows
            .iter()
            .filter(|a| a.session_id == session.id && a.state == AttendanceState::Pending)
            .filter(|a| only.is_none_or(|ids| ids.contains(&a.id)))
            .map(|a| (a.id, a.override_minutes.unwrap_or(session_minutes)))
            .collect();

        ValidationPlan {
            minutes,
            session_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::{AttendanceMethod, SessionParent};
    use attend_util::{ProcessId, RecordId, SessionId};
    use chrono::{Local, NaiveDate, NaiveTime, TimeZone};

    fn session() -> Session {
        Session {
            id: SessionId::new(3),
            parent: SessionParent::Process(ProcessId::new(1)),
            date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    fn row(id: i64, state: AttendanceState, override_minutes: Option<u32>) -> Attendance {
        let at = Local.with_ymd_and_hms(2025, 4, 14, 14, 5, 0).unwrap();
        Attendance {
            id: AttendanceId::new(id),
            session_id: SessionId::new(3),
            record_id: RecordId::new(id),
            participation_id: None,
            method: AttendanceMethod::Qr,
            state,
            check_in_at: Some(at),
            minutes_validated: 0,
            override_minutes,
            justification: None,
            window_token: None,
            created_at: at,
        }
    }

    #[test]
    fn pending_rows_get_session_duration_or_override() {
        let rows = vec![
            row(1, AttendanceState::Pending, None),
            row(2, AttendanceState::Pending, Some(0)),
            row(3, AttendanceState::Validated, None),
            row(4, AttendanceState::Annulled, None),
        ];
        let plan = AttendanceValidator::plan(&session(), &rows, None);
        assert_eq!(plan.session_minutes, 120);
        assert_eq!(
            plan.minutes,
            vec![(AttendanceId::new(1), 120), (AttendanceId::new(2), 0)]
        );
    }

    #[test]
    fn subset_restricts_selection() {
        let rows = vec![
            row(1, AttendanceState::Pending, None),
            row(2, AttendanceState::Pending, None),
        ];
        let only = [AttendanceId::new(2), AttendanceId::new(99)];
        let plan = AttendanceValidator::plan(&session(), &rows, Some(&only));
        assert_eq!(plan.minutes, vec![(AttendanceId::new(2), 120)]);
    }

    #[test]
    fn nothing_pending_is_empty() {
        let rows = vec![row(1, AttendanceState::Validated, None)];
        assert!(AttendanceValidator::plan(&session(), &rows, None).is_empty());
    }
}
