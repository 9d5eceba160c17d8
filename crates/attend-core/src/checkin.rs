//! Check-in admission rules
//!
//! Decisions here only read state. The write (window use plus attendance
//! row) happens atomically in the store, which re-checks the window.

use attend_api::{
    Attendance, AttendanceMethod, AttendanceState, AttendanceWindow, CheckInRejection, Session,
};
use attend_store::{CheckInWrite, NewAttendance, WindowUse};
use attend_util::{ParticipationId, RecordId, WindowToken};
use chrono::{DateTime, Local};

use crate::window::check_geofence;

/// QR credentials presented by a participant
#[derive(Debug, Clone, PartialEq)]
pub struct QrCredentials {
    pub token: WindowToken,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Stateless check-in rules
pub struct CheckInProcessor;

impl CheckInProcessor {
    /// Admit a QR check-in against the session's active QR window
    pub fn admit_qr(
        window: Option<&AttendanceWindow>,
        credentials: &QrCredentials,
        now: DateTime<Local>,
    ) -> Result<WindowUse, CheckInRejection> {
        let window = window
            .filter(|w| w.active)
            .ok_or(CheckInRejection::NoActiveWindow)?;

        if window.token.as_ref() != Some(&credentials.token) {
            return Err(CheckInRejection::TokenMismatch);
        }
        Self::check_timing(window, now)?;
        if let Some(max_uses) = window.max_uses
            && window.uses >= max_uses
        {
            return Err(CheckInRejection::UsageCapReached { max_uses });
        }
        if let Some(fence) = &window.geo {
            check_geofence(fence, credentials.lat, credentials.lng)?;
        }

        Ok(Self::window_use(window))
    }

    /// Admit a roster check-in against the session's active manual window
    pub fn admit_manual(
        window: Option<&AttendanceWindow>,
        now: DateTime<Local>,
    ) -> Result<WindowUse, CheckInRejection> {
        let window = window
            .filter(|w| w.active)
            .ok_or(CheckInRejection::NoActiveWindow)?;
        Self::check_timing(window, now)?;
        Ok(Self::window_use(window))
    }

    fn check_timing(window: &AttendanceWindow, now: DateTime<Local>) -> Result<(), CheckInRejection> {
        if now < window.usable_from {
            return Err(CheckInRejection::WindowNotStarted);
        }
        if now > window.expires_at {
            return Err(CheckInRejection::WindowExpired);
        }
        Ok(())
    }

    fn window_use(window: &AttendanceWindow) -> WindowUse {
        WindowUse {
            session_id: window.session_id,
            kind: window.kind,
            token: window.token.clone(),
            max_uses: window.max_uses,
        }
    }

    /// A finalized row blocks a second check-in; a pending one is refreshed
    pub fn check_existing(existing: Option<&Attendance>) -> Result<(), CheckInRejection> {
        match existing {
            Some(a) if a.state != AttendanceState::Pending => Err(CheckInRejection::Duplicate),
            _ => Ok(()),
        }
    }

    /// Row written by a QR or roster check-in
    pub fn pending_row(
        session: &Session,
        record_id: RecordId,
        participation_id: Option<ParticipationId>,
        method: AttendanceMethod,
        token: Option<WindowToken>,
        now: DateTime<Local>,
    ) -> NewAttendance {
        NewAttendance {
            session_id: session.id,
            record_id,
            participation_id,
            method,
            state: AttendanceState::Pending,
            check_in_at: now,
            minutes_validated: 0,
            override_minutes: None,
            justification: None,
            window_token: token,
        }
    }

    /// Row written by a staff override. Granting minutes validates it on the
    /// spot with the full session as its override; otherwise it waits for
    /// validation with a zero-minute override.
    pub fn justified_row(
        session: &Session,
        record_id: RecordId,
        participation_id: Option<ParticipationId>,
        justification: &str,
        grant_minutes: bool,
        now: DateTime<Local>,
    ) -> Result<NewAttendance, CheckInRejection> {
        let justification = justification.trim();
        if justification.is_empty() {
            return Err(CheckInRejection::JustificationRequired);
        }

        let (state, minutes_validated, override_minutes) = if grant_minutes {
            let minutes = session.duration_minutes();
            (AttendanceState::Validated, minutes, Some(minutes))
        } else {
            (AttendanceState::Pending, 0, Some(0))
        };

        Ok(NewAttendance {
            session_id: session.id,
            record_id,
            participation_id,
            method: AttendanceMethod::ManualJustified,
            state,
            check_in_at: now,
            minutes_validated,
            override_minutes,
            justification: Some(justification.to_string()),
            window_token: None,
        })
    }

    /// Map the store's write result onto a receipt or a rejection
    pub fn settle(
        write: CheckInWrite,
        max_uses: Option<u32>,
    ) -> Result<(Attendance, bool), CheckInRejection> {
        match write {
            CheckInWrite::Created(a) => Ok((a, false)),
            CheckInWrite::Updated(a) => Ok((a, true)),
            CheckInWrite::AlreadyFinal(_) => Err(CheckInRejection::Duplicate),
            CheckInWrite::WindowGone => Err(CheckInRejection::TokenMismatch),
            CheckInWrite::CapReached => Err(CheckInRejection::UsageCapReached {
                max_uses: max_uses.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::{GeoFence, SessionParent, WindowKind};
    use attend_util::{AttendanceId, EventId, SessionId};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 14, h, m, 0).unwrap()
    }

    fn session() -> Session {
        Session {
            id: SessionId::new(5),
            parent: SessionParent::Event(EventId::new(1)),
            date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        }
    }

    fn qr_window() -> AttendanceWindow {
        AttendanceWindow {
            session_id: SessionId::new(5),
            kind: WindowKind::Qr,
            token: Some(WindowToken::new("current")),
            usable_from: at(8, 45),
            expires_at: at(9, 15),
            geo: None,
            max_uses: Some(2),
            uses: 0,
            active: true,
            opened_at: at(8, 45),
        }
    }

    fn creds(token: &str) -> QrCredentials {
        QrCredentials {
            token: WindowToken::new(token),
            lat: None,
            lng: None,
        }
    }

    #[test]
    fn qr_rejections_in_order() {
        let w = qr_window();
        assert_eq!(
            CheckInProcessor::admit_qr(None, &creds("current"), at(9, 0)),
            Err(CheckInRejection::NoActiveWindow)
        );
        assert_eq!(
            CheckInProcessor::admit_qr(Some(&w), &creds("stale"), at(9, 0)),
            Err(CheckInRejection::TokenMismatch)
        );
        assert_eq!(
            CheckInProcessor::admit_qr(Some(&w), &creds("current"), at(8, 30)),
            Err(CheckInRejection::WindowNotStarted)
        );
        assert_eq!(
            CheckInProcessor::admit_qr(Some(&w), &creds("current"), at(9, 16)),
            Err(CheckInRejection::WindowExpired)
        );

        let full = AttendanceWindow { uses: 2, ..qr_window() };
        assert_eq!(
            CheckInProcessor::admit_qr(Some(&full), &creds("current"), at(9, 0)),
            Err(CheckInRejection::UsageCapReached { max_uses: 2 })
        );

        let usage = CheckInProcessor::admit_qr(Some(&w), &creds("current"), at(9, 0)).unwrap();
        assert_eq!(usage.token, Some(WindowToken::new("current")));
    }

    #[test]
    fn geofenced_window_needs_coordinates() {
        let w = AttendanceWindow {
            geo: Some(GeoFence {
                lat: -12.0560,
                lng: -77.0844,
                radius_m: 50,
            }),
            ..qr_window()
        };
        assert_eq!(
            CheckInProcessor::admit_qr(Some(&w), &creds("current"), at(9, 0)),
            Err(CheckInRejection::LocationRequired)
        );
        let near = QrCredentials {
            lat: Some(-12.0561),
            lng: Some(-77.0844),
            ..creds("current")
        };
        assert!(CheckInProcessor::admit_qr(Some(&w), &near, at(9, 0)).is_ok());
    }

    #[test]
    fn justified_row_requires_text() {
        assert_eq!(
            CheckInProcessor::justified_row(&session(), RecordId::new(1), None, "   ", true, at(12, 0)),
            Err(CheckInRejection::JustificationRequired)
        );
    }

    #[test]
    fn justified_row_with_and_without_minutes() {
        let granted = CheckInProcessor::justified_row(
            &session(),
            RecordId::new(1),
            None,
            " medical appointment ",
            true,
            at(12, 0),
        )
        .unwrap();
        assert_eq!(granted.state, AttendanceState::Validated);
        assert_eq!(granted.minutes_validated, 90);
        assert_eq!(granted.override_minutes, Some(90));
        assert_eq!(granted.justification.as_deref(), Some("medical appointment"));

        let pending = CheckInProcessor::justified_row(
            &session(),
            RecordId::new(1),
            None,
            "late bus",
            false,
            at(12, 0),
        )
        .unwrap();
        assert_eq!(pending.state, AttendanceState::Pending);
        assert_eq!(pending.override_minutes, Some(0));
    }

    #[test]
    fn finalized_attendance_is_duplicate() {
        let row = Attendance {
            id: AttendanceId::new(1),
            session_id: SessionId::new(5),
            record_id: RecordId::new(1),
            participation_id: None,
            method: AttendanceMethod::Qr,
            state: AttendanceState::Validated,
            check_in_at: Some(at(9, 0)),
            minutes_validated: 90,
            override_minutes: None,
            justification: None,
            window_token: None,
            created_at: at(9, 0),
        };
        assert_eq!(
            CheckInProcessor::check_existing(Some(&row)),
            Err(CheckInRejection::Duplicate)
        );
        let pending = Attendance {
            state: AttendanceState::Pending,
            ..row
        };
        assert!(CheckInProcessor::check_existing(Some(&pending)).is_ok());
        assert!(CheckInProcessor::check_existing(None).is_ok());
    }
}
