//! Command dispatch onto the core engine

use attend_api::{
    AttendanceRow, ClientRole, Command, ErrorCode, ErrorInfo, ResponsePayload,
};
use attend_core::{manual_view, qr_view, CoreEngine, QrCredentials};
use attend_util::{AttendError, RecordId, SiteId};
use sha2::{Digest, Sha256};

/// Refuse commands the caller's role may not issue.
///
/// A participant enrolls and scans only as `own_record`, the record its
/// account is bound to; an unbound participant can do neither.
pub fn authorize(
    command: &Command,
    role: ClientRole,
    own_record: Option<RecordId>,
) -> Result<(), AttendError> {
    let allowed = if command.requires_staff() {
        role.can_manage_sessions()
    } else {
        match command {
            Command::Enroll { .. } => role.can_enroll(),
            Command::CheckInQr { .. } => role.can_check_in(),
            _ => true,
        }
    };
    if !allowed {
        return Err(AttendError::permission(format!(
            "{:?} role cannot issue this command",
            role
        )));
    }

    if role == ClientRole::Participant {
        let record_id = match command {
            Command::Enroll { record_id, .. } | Command::CheckInQr { record_id, .. } => {
                Some(*record_id)
            }
            _ => None,
        };
        if let Some(record_id) = record_id
            && own_record != Some(record_id)
        {
            return Err(AttendError::permission(format!(
                "record {} is not bound to this account",
                record_id
            )));
        }
    }
    Ok(())
}

/// Weak validator: the first 64 bits of SHA-256 over the serialized rows
pub fn attendance_etag(rows: &[AttendanceRow]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(rows).unwrap_or_default());
    let digest = format!("{:x}", hasher.finalize());
    format!("W/\"{}\"", &digest[..16])
}

pub fn error_info(e: &AttendError) -> ErrorInfo {
    let code = match e {
        AttendError::NotFound(_) => ErrorCode::NotFound,
        AttendError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        AttendError::ValidationError(_) => ErrorCode::Unprocessable,
        AttendError::StoreError(_) => ErrorCode::StoreError,
        AttendError::RateLimited => ErrorCode::RateLimited,
        AttendError::ConfigError(_)
        | AttendError::TransportError(_)
        | AttendError::IpcError(_)
        | AttendError::Internal(_) => ErrorCode::InternalError,
    };
    ErrorInfo::new(code, e.to_string())
}

/// Run an engine command. Business rejections come back as payloads.
pub fn execute(
    engine: &mut CoreEngine,
    command: Command,
    acting_site: Option<SiteId>,
) -> Result<ResponsePayload, AttendError> {
    let payload = match command {
        Command::Evaluate {
            record_id,
            activity,
        } => ResponsePayload::Evaluated {
            outcome: engine.evaluate(record_id, activity, acting_site)?,
        },

        Command::Enroll {
            record_id,
            activity,
        } => ResponsePayload::Enrolled(engine.enroll(record_id, activity, acting_site)?),

        Command::TransitionParticipation {
            participation_id,
            to,
        } => ResponsePayload::Participation(engine.transition_participation(
            participation_id,
            to,
            acting_site,
        )?),

        Command::Candidates { activity } => ResponsePayload::Candidates {
            candidates: engine.candidates(activity, acting_site)?,
        },

        Command::EnrollCandidates {
            activity,
            record_ids,
        } => ResponsePayload::BulkEnrolled(engine.enroll_candidates(
            activity,
            record_ids,
            acting_site,
        )?),

        Command::OpenQrWindow {
            session_id,
            geo,
            max_uses,
        } => match engine.open_qr_window(session_id, geo, max_uses, acting_site)? {
            Ok(window) => match qr_view(&window) {
                Some(view) => ResponsePayload::QrWindow(view),
                None => return Err(AttendError::internal("QR window without token")),
            },
            Err(reason) => ResponsePayload::WindowRejected { reason },
        },

        Command::OpenManualWindow { session_id } => {
            match engine.open_manual_window(session_id, acting_site)? {
                Ok(window) => ResponsePayload::ManualWindow(manual_view(&window)),
                Err(reason) => ResponsePayload::WindowRejected { reason },
            }
        }

        Command::CheckInQr {
            session_id,
            record_id,
            token,
            lat,
            lng,
        } => {
            let credentials = QrCredentials { token, lat, lng };
            match engine.check_in_qr(session_id, record_id, credentials, acting_site)? {
                Ok(receipt) => ResponsePayload::CheckedIn(receipt),
                Err(rejection) => ResponsePayload::CheckInRejected { rejection },
            }
        }

        Command::CheckInManual { session_id, code } => {
            match engine.check_in_manual(session_id, &code, acting_site)? {
                Ok(receipt) => ResponsePayload::CheckedIn(receipt),
                Err(rejection) => ResponsePayload::CheckInRejected { rejection },
            }
        }

        Command::CheckInJustified {
            session_id,
            code,
            justification,
            grant_minutes,
        } => match engine.check_in_justified(
            session_id,
            &code,
            &justification,
            grant_minutes,
            acting_site,
        )? {
            Ok(receipt) => ResponsePayload::CheckedIn(receipt),
            Err(rejection) => ResponsePayload::CheckInRejected { rejection },
        },

        Command::Validate {
            session_id,
            attendance_ids,
            create_hour_record,
        } => ResponsePayload::Validated(engine.validate(
            session_id,
            attendance_ids.as_deref(),
            create_hour_record,
            acting_site,
        )?),

        Command::AnnulAttendance { attendance_id } => {
            ResponsePayload::Attendance(engine.annul_attendance(attendance_id, acting_site)?)
        }

        Command::ListAttendance {
            session_id,
            if_none_match,
        } => {
            let rows = engine.list_attendance(session_id, acting_site)?;
            let etag = attendance_etag(&rows);
            if if_none_match.as_deref() == Some(etag.as_str()) {
                ResponsePayload::NotModified { etag }
            } else {
                ResponsePayload::AttendanceList { rows, etag }
            }
        }

        Command::SessionParticipants { session_id } => ResponsePayload::Participants {
            participants: engine.session_participants(session_id, acting_site)?,
        },

        Command::ClassifySession { session_id, at } => {
            ResponsePayload::Classification(engine.classify_session(session_id, at)?)
        }

        Command::ProjectProgress {
            project_id,
            record_id,
        } => ResponsePayload::Progress(engine.project_progress(project_id, record_id, acting_site)?),

        Command::StaffAgenda { at } => ResponsePayload::Agenda {
            cards: engine.staff_agenda(at, acting_site)?,
        },

        Command::Ping => ResponsePayload::Pong,

        Command::FeedLoad { .. }
        | Command::FeedMore
        | Command::FeedClose
        | Command::SubscribeEvents
        | Command::UnsubscribeEvents
        | Command::GetHealth => {
            return Err(AttendError::internal("command is not handled by the engine"));
        }
    };

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::{
        ActivityRef, ActivityState, AttendanceMethod, AttendanceState, Outcome, Participant,
        Period, PeriodState, Process, Project, ProjectType, RecordStatus, Session, SessionParent,
    };
    use attend_config::Policy;
    use attend_store::{SqliteStore, Store};
    use attend_util::{
        AttendanceId, FixedClock, PeriodId, ProcessId, ProjectId, RecordId, SessionId, WindowToken,
    };
    use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
    use std::sync::Arc;

    fn engine() -> (CoreEngine, Arc<FixedClock>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .upsert_period(&Period {
                id: PeriodId::new(1),
                code: "2025-I".into(),
                starts_on: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                ends_on: NaiveDate::from_ymd_opt(2025, 7, 31).unwrap(),
                state: PeriodState::InProgress,
            })
            .unwrap();
        store
            .upsert_project(&Project {
                id: ProjectId::new(1),
                code: "VM-01".into(),
                title: "Huertos".into(),
                project_type: ProjectType::Free,
                levels: vec![],
                site_id: SiteId::new(1),
                period_id: PeriodId::new(1),
                state: ActivityState::InProgress,
                required_minutes: 60,
            })
            .unwrap();
        store
            .upsert_process(&Process {
                id: ProcessId::new(1),
                project_id: ProjectId::new(1),
                name: "Main".into(),
                required_minutes: 60,
            })
            .unwrap();
        store
            .upsert_session(&Session {
                id: SessionId::new(1),
                parent: SessionParent::Process(ProcessId::new(1)),
                date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
                start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            })
            .unwrap();
        store
            .upsert_participant(&Participant {
                record_id: RecordId::new(1),
                code: "2021-0001".into(),
                document: None,
                email: None,
                first_names: "Ana".into(),
                last_names: "Quispe".into(),
                site_id: SiteId::new(1),
                level: Some(3),
                status: RecordStatus::Active,
            })
            .unwrap();
        store
            .set_matriculated(RecordId::new(1), PeriodId::new(1))
            .unwrap();

        let clock = Arc::new(FixedClock::new(
            Local.with_ymd_and_hms(2025, 4, 14, 9, 0, 0).unwrap(),
        ));
        (CoreEngine::new(Policy::default(), store, clock.clone()), clock)
    }

    const PROJECT: ActivityRef = ActivityRef::Project(ProjectId::new(1));

    #[test]
    fn observers_cannot_enroll_or_manage() {
        let enroll = Command::Enroll {
            record_id: RecordId::new(1),
            activity: PROJECT,
        };
        assert!(authorize(&enroll, ClientRole::Participant, Some(RecordId::new(1))).is_ok());
        assert!(authorize(&enroll, ClientRole::Staff, None).is_ok());
        assert!(authorize(&enroll, ClientRole::Observer, Some(RecordId::new(1))).is_err());

        let validate = Command::Validate {
            session_id: SessionId::new(1),
            attendance_ids: None,
            create_hour_record: false,
        };
        assert!(authorize(&validate, ClientRole::Staff, None).is_ok());
        assert!(authorize(&validate, ClientRole::Participant, None).is_err());
        assert!(authorize(&Command::Ping, ClientRole::Observer, None).is_ok());
    }

    #[test]
    fn participants_act_only_as_their_own_record() {
        let own = Some(RecordId::new(1));
        let enroll_other = Command::Enroll {
            record_id: RecordId::new(2),
            activity: PROJECT,
        };
        let err = authorize(&enroll_other, ClientRole::Participant, own).unwrap_err();
        assert_eq!(error_info(&err).code, ErrorCode::PermissionDenied);

        let scan = |record| Command::CheckInQr {
            session_id: SessionId::new(1),
            record_id: RecordId::new(record),
            token: WindowToken::new("t"),
            lat: None,
            lng: None,
        };
        assert!(authorize(&scan(1), ClientRole::Participant, own).is_ok());
        assert!(authorize(&scan(2), ClientRole::Participant, own).is_err());
        assert!(authorize(&scan(1), ClientRole::Participant, None).is_err());

        // reads stay open
        let evaluate = Command::Evaluate {
            record_id: RecordId::new(2),
            activity: PROJECT,
        };
        assert!(authorize(&evaluate, ClientRole::Participant, own).is_ok());
    }

    #[test]
    fn errors_map_to_wire_codes() {
        assert_eq!(error_info(&AttendError::not_found("x")).code, ErrorCode::NotFound);
        assert_eq!(
            error_info(&AttendError::permission("x")).code.status(),
            403
        );
        assert_eq!(
            error_info(&AttendError::validation("INVALID_TRANSITION")).code,
            ErrorCode::Unprocessable
        );
    }

    #[test]
    fn enroll_then_rejection_payload() {
        let (mut engine, _) = engine();
        let first = execute(
            &mut engine,
            Command::Enroll {
                record_id: RecordId::new(1),
                activity: PROJECT,
            },
            None,
        )
        .unwrap();
        assert!(matches!(first, ResponsePayload::Enrolled(r) if r.outcome == Outcome::Enroll));

        let again = execute(
            &mut engine,
            Command::Evaluate {
                record_id: RecordId::new(1),
                activity: PROJECT,
            },
            None,
        )
        .unwrap();
        match again {
            ResponsePayload::Evaluated { outcome } => assert_eq!(outcome.code(), "ALREADY_ENROLLED"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn unknown_participant_is_not_found() {
        let (mut engine, _) = engine();
        let err = execute(
            &mut engine,
            Command::Evaluate {
                record_id: RecordId::new(404),
                activity: PROJECT,
            },
            None,
        )
        .unwrap_err();
        assert_eq!(error_info(&err).code.status(), 404);
    }

    #[test]
    fn foreign_site_is_forbidden() {
        let (mut engine, _) = engine();
        let err = execute(
            &mut engine,
            Command::Candidates { activity: PROJECT },
            Some(SiteId::new(9)),
        )
        .unwrap_err();
        assert_eq!(error_info(&err).code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn attendance_list_is_conditional() {
        let (mut engine, _) = engine();
        execute(
            &mut engine,
            Command::Enroll {
                record_id: RecordId::new(1),
                activity: PROJECT,
            },
            None,
        )
        .unwrap();

        let list = |engine: &mut CoreEngine, tag: Option<String>| {
            execute(
                engine,
                Command::ListAttendance {
                    session_id: SessionId::new(1),
                    if_none_match: tag,
                },
                None,
            )
            .unwrap()
        };

        let ResponsePayload::AttendanceList { rows, etag } = list(&mut engine, None) else {
            panic!("expected a list");
        };
        assert!(rows.is_empty());
        assert!(matches!(
            list(&mut engine, Some(etag.clone())),
            ResponsePayload::NotModified { .. }
        ));

        execute(
            &mut engine,
            Command::CheckInJustified {
                session_id: SessionId::new(1),
                code: "2021-0001".into(),
                justification: "Late bus".into(),
                grant_minutes: false,
            },
            None,
        )
        .unwrap();

        match list(&mut engine, Some(etag.clone())) {
            ResponsePayload::AttendanceList { rows, etag: fresh } => {
                assert_ne!(fresh, etag);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].method, AttendanceMethod::ManualJustified);
                assert_eq!(rows[0].state, AttendanceState::Pending);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn window_rejections_are_payloads() {
        let (mut engine, clock) = engine();
        clock.set(Local.with_ymd_and_hms(2025, 4, 14, 12, 0, 0).unwrap());
        let payload = execute(
            &mut engine,
            Command::OpenQrWindow {
                session_id: SessionId::new(1),
                geo: None,
                max_uses: None,
            },
            None,
        )
        .unwrap();
        assert!(matches!(payload, ResponsePayload::WindowRejected { .. }));

        let err = execute(
            &mut engine,
            Command::AnnulAttendance {
                attendance_id: AttendanceId::new(77),
            },
            None,
        )
        .unwrap_err();
        assert_eq!(error_info(&err).code, ErrorCode::NotFound);
    }

    #[test]
    fn etag_is_stable_for_same_rows() {
        assert_eq!(attendance_etag(&[]), attendance_etag(&[]));
        // fixed across builds and toolchains
        assert_eq!(attendance_etag(&[]), "W/\"4f53cda18c2baa0c\"");
    }
}
