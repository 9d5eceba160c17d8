//! Integration tests for attendd
//!
//! These drive the library crates the service is built from, over an
//! in-memory store seeded the way the service seeds it.

use attend_api::{
    ActivityKind, ActivityRef, AttendanceState, CheckInRejection, Outcome, Participant,
    ParticipationState, Period, PeriodState, RecordStatus, RejectCode, TemporalState,
};
use attend_config::{parse_config, Policy};
use attend_core::{CoreEngine, CoreEvent, QrCredentials, SessionTemporalClassifier};
use attend_feed::{build_snapshot, FeedFilter, PageSource, PagedFeedMerger, StoreSource};
use attend_store::{Seed, SqliteStore, Store};
use attend_util::{FixedClock, PeriodId, ProjectId, RecordId, SessionId, SiteId};
use chrono::{Duration as ChronoDuration, Local, TimeZone};
use std::sync::Arc;
use std::time::Duration;

const SEED: &str = r#"{
    "periods": [
        {"id": 1, "code": "2025-I", "starts_on": "2025-03-01", "ends_on": "2025-07-31", "state": "EN_CURSO"},
        {"id": 2, "code": "2025-II", "starts_on": "2025-08-15", "ends_on": "2025-12-20", "state": "PLANIFICADO"}
    ],
    "participants": [
        {"record_id": 1, "code": "2021-0001", "document": "70000001", "email": "ana@example.edu",
         "first_names": "Ana", "last_names": "Quispe", "site_id": 1, "level": 2, "status": "ACTIVO"},
        {"record_id": 2, "code": "2021-0002", "document": null, "email": null,
         "first_names": "Luis", "last_names": "Mamani", "site_id": 1, "level": 5, "status": "ACTIVO"},
        {"record_id": 3, "code": "2021-0003", "document": null, "email": null,
         "first_names": "Rosa", "last_names": "Huaman", "site_id": 2, "level": 5, "status": "ACTIVO"}
    ],
    "matriculations": [
        {"record_id": 1, "period_id": 1},
        {"record_id": 2, "period_id": 1},
        {"record_id": 3, "period_id": 1}
    ],
    "projects": [
        {"id": 10, "code": "VIN-10", "title": "Alfabetizacion", "project_type": "VINCULADO",
         "levels": [3], "site_id": 1, "period_id": 1, "state": "EN_CURSO", "required_minutes": 120},
        {"id": 11, "code": "LIB-11", "title": "Huertos", "project_type": "LIBRE",
         "site_id": 1, "period_id": 1, "state": "EN_CURSO", "required_minutes": 60},
        {"id": 20, "code": "VIN-20", "title": "Reforestacion", "project_type": "VINCULADO",
         "levels": [4], "site_id": 1, "period_id": 2, "state": "PLANIFICADO", "required_minutes": 120}
    ],
    "processes": [
        {"id": 100, "project_id": 10, "name": "Talleres", "required_minutes": 120},
        {"id": 110, "project_id": 11, "name": "Siembra", "required_minutes": 60}
    ],
    "events": [
        {"id": 5, "code": "EV-5", "title": "Charla abierta", "site_id": 1, "period_id": 1,
         "state": "EN_CURSO", "requires_enrollment": false, "capacity": null,
         "enrollment_from": null, "enrollment_to": null}
    ],
    "sessions": [
        {"id": 1000, "parent": {"kind": "process", "id": 100}, "date": "2025-04-14",
         "start": "09:00:00", "end": "10:00:00"},
        {"id": 1100, "parent": {"kind": "process", "id": 110}, "date": "2025-04-14",
         "start": "11:00:00", "end": "12:00:00"},
        {"id": 1101, "parent": {"kind": "process", "id": 110}, "date": "2025-04-10",
         "start": "08:00:00", "end": "09:00:00"},
        {"id": 500, "parent": {"kind": "event", "id": 5}, "date": "2025-04-14",
         "start": "09:30:00", "end": "10:30:00"}
    ]
}"#;

const VINCULADO: ActivityRef = ActivityRef::Project(ProjectId::new(10));
const LIBRE: ActivityRef = ActivityRef::Project(ProjectId::new(11));
const NEXT_VINCULADO: ActivityRef = ActivityRef::Project(ProjectId::new(20));

fn at(h: u32, m: u32) -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2025, 4, 14, h, m, 0).unwrap()
}

fn setup() -> (CoreEngine, Arc<dyn Store>, Arc<FixedClock>) {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    Seed::from_json(SEED).unwrap().apply(store.as_ref()).unwrap();
    let clock = Arc::new(FixedClock::new(at(8, 50)));
    let engine = CoreEngine::new(Policy::default(), store.clone(), clock.clone());
    (engine, store, clock)
}

fn promote(store: &Arc<dyn Store>, record: i64, level: u8) {
    let mut participant: Participant = store.get_participant(RecordId::new(record)).unwrap().unwrap();
    participant.level = Some(level);
    store.upsert_participant(&participant).unwrap();
}

#[test]
fn test_config_parsing() {
    let policy = parse_config(
        r#"
config_version = 1

[windows]
qr_lead_minutes = 10
qr_duration_minutes = 20

[feed]
page_size = 12
refresh_debounce_ms = 500

[[feed.sources]]
kind = "project"
url = "https://catalog.example.edu/api/projects"
"#,
    )
    .unwrap();

    assert_eq!(policy.windows.qr_lead, ChronoDuration::minutes(10));
    assert_eq!(policy.feed.page_size, 12);
    assert_eq!(policy.feed.refresh_debounce, Duration::from_millis(500));
    assert_eq!(policy.feed.sources.len(), 1);
    assert_eq!(policy.feed.sources[0].kind, ActivityKind::Project);
}

#[test]
fn test_level_mismatch_then_pending_linked_prev() {
    let (mut engine, store, clock) = setup();
    let ana = RecordId::new(1);

    // Level 2 against a level 3 linked project
    assert_eq!(
        engine.evaluate(ana, VINCULADO, None).unwrap(),
        Outcome::Reject(RejectCode::LevelMismatch)
    );

    // Promoted: enrolls, but never accumulates the required minutes
    promote(&store, 1, 3);
    let enrolled = engine.enroll(ana, VINCULADO, None).unwrap();
    assert_eq!(enrolled.outcome, Outcome::Enroll);

    // Next period: level 4, the earlier linked project still pending
    store
        .upsert_period(&Period {
            id: PeriodId::new(1),
            code: "2025-I".into(),
            starts_on: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            ends_on: chrono::NaiveDate::from_ymd_opt(2025, 7, 31).unwrap(),
            state: PeriodState::Closed,
        })
        .unwrap();
    store
        .upsert_period(&Period {
            id: PeriodId::new(2),
            code: "2025-II".into(),
            starts_on: chrono::NaiveDate::from_ymd_opt(2025, 8, 15).unwrap(),
            ends_on: chrono::NaiveDate::from_ymd_opt(2025, 12, 20).unwrap(),
            state: PeriodState::InProgress,
        })
        .unwrap();
    store.set_matriculated(ana, PeriodId::new(2)).unwrap();
    promote(&store, 1, 4);
    clock.set(Local.with_ymd_and_hms(2025, 9, 1, 10, 0, 0).unwrap());

    let outcome = engine.evaluate(ana, NEXT_VINCULADO, None).unwrap();
    assert_eq!(outcome, Outcome::Reject(RejectCode::PendingLinkedPrev));
    assert_eq!(outcome.code(), "PENDING_LINKED_PREV");

    // Evaluation is deterministic
    assert_eq!(engine.evaluate(ana, NEXT_VINCULADO, None).unwrap(), outcome);
}

#[test]
fn test_single_live_participation() {
    let (mut engine, store, _) = setup();
    let luis = RecordId::new(2);

    let first = engine.enroll(luis, LIBRE, None).unwrap();
    assert_eq!(first.outcome, Outcome::Enroll);
    let second = engine.enroll(luis, LIBRE, None).unwrap();
    assert_eq!(second.outcome, Outcome::Reject(RejectCode::AlreadyEnrolled));

    let live: Vec<_> = store
        .list_participations(LIBRE)
        .unwrap()
        .into_iter()
        .filter(|p| !p.state.is_terminal())
        .collect();
    assert_eq!(live.len(), 1);

    // Withdrawing frees the slot for a new enrollment
    engine
        .transition_participation(live[0].id, ParticipationState::Withdrawn, None)
        .unwrap();
    assert_eq!(
        engine.enroll(luis, LIBRE, None).unwrap().outcome,
        Outcome::Enroll
    );
}

#[test]
fn test_site_scoping() {
    let (engine, _, _) = setup();

    assert_eq!(
        engine.evaluate(RecordId::new(3), LIBRE, None).unwrap(),
        Outcome::Reject(RejectCode::DifferentEpSede)
    );
    assert!(engine
        .evaluate(RecordId::new(2), LIBRE, Some(SiteId::new(2)))
        .is_err());
}

#[test]
fn test_qr_flow_with_reopen() {
    let (mut engine, _, clock) = setup();
    let luis = RecordId::new(2);
    let session = SessionId::new(1100);
    engine.enroll(luis, LIBRE, None).unwrap();

    clock.set(at(10, 50));
    let first = engine.open_qr_window(session, None, None, None).unwrap().unwrap();
    let second = engine.open_qr_window(session, None, None, None).unwrap().unwrap();

    let stale = engine
        .check_in_qr(
            session,
            luis,
            QrCredentials {
                token: first.token.clone().unwrap(),
                lat: None,
                lng: None,
            },
            None,
        )
        .unwrap();
    assert!(matches!(
        stale,
        Err(CheckInRejection::TokenMismatch | CheckInRejection::NoActiveWindow)
    ));

    let receipt = engine
        .check_in_qr(
            session,
            luis,
            QrCredentials {
                token: second.token.clone().unwrap(),
                lat: None,
                lng: None,
            },
            None,
        )
        .unwrap()
        .unwrap();
    assert_eq!(receipt.attendance.state, AttendanceState::Pending);
    assert!(!receipt.updated);

    let events = engine.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::AttendanceRecorded { .. })));
}

#[test]
fn test_validate_is_idempotent() {
    let (mut engine, store, clock) = setup();
    let luis = RecordId::new(2);
    let session = SessionId::new(1100);
    engine.enroll(luis, LIBRE, None).unwrap();

    clock.set(at(10, 55));
    engine.open_manual_window(session, None).unwrap().unwrap();
    engine
        .check_in_manual(session, "2021-0002", None)
        .unwrap()
        .unwrap();

    clock.set(at(12, 5));
    let first = engine.validate(session, None, true, None).unwrap();
    assert_eq!(first.validated, 1);
    assert_eq!(first.minutes_per_attendance, 60);
    assert!(first.hour_record_created);

    let second = engine.validate(session, None, true, None).unwrap();
    assert_eq!(second.validated, 0);
    assert_eq!(store.list_hour_records(session).unwrap().len(), 1);

    let rows = engine.list_attendance(session, None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].minutes, 60);
    assert_eq!(rows[0].state, AttendanceState::Validated);

    let progress = engine
        .project_progress(ProjectId::new(11), luis, None)
        .unwrap();
    assert_eq!(progress.accumulated_min, 60);
    assert_eq!(progress.missing_min, 0);
}

#[test]
fn test_open_event_takes_roster_check_in() {
    let (mut engine, _, clock) = setup();
    let session = SessionId::new(500);

    clock.set(at(9, 25));
    engine.open_manual_window(session, None).unwrap().unwrap();

    // No participation needed: the event takes anyone on the roster
    let receipt = engine
        .check_in_manual(session, "ana@example.edu", None)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.attendance.record_id, RecordId::new(1));
    assert!(receipt.attendance.participation_id.is_none());

    // Same person by document: the pending row is refreshed, not duplicated
    let again = engine
        .check_in_manual(session, "70000001", None)
        .unwrap()
        .unwrap();
    assert!(again.updated);
    assert_eq!(again.attendance.id, receipt.attendance.id);

    clock.set(at(10, 40));
    engine.validate(session, None, false, None).unwrap();
    let late = engine.check_in_manual(session, "2021-0001", None).unwrap();
    assert_eq!(late.unwrap_err(), CheckInRejection::Duplicate);
}

#[test]
fn test_classifier_boundaries() {
    let (engine, _, _) = setup();
    let session = SessionId::new(1000);
    let state = |h, m| engine.classify_session(session, Some(at(h, m))).unwrap().state;

    assert_eq!(state(8, 57), TemporalState::Soon);
    assert_eq!(state(6, 0), TemporalState::Soon);
    assert_eq!(state(5, 59), TemporalState::Later);
    assert_eq!(state(9, 30), TemporalState::Now);
    assert_eq!(state(10, 5), TemporalState::Recent);
    assert_eq!(state(13, 1), TemporalState::Past);
}

#[tokio::test]
async fn test_feed_over_seeded_catalog() {
    let (_, store, _) = setup();
    let sources: Vec<Arc<dyn PageSource>> = vec![
        Arc::new(StoreSource::new(store.clone(), ActivityKind::Project)),
        Arc::new(StoreSource::new(store.clone(), ActivityKind::Event)),
    ];
    let mut merger = PagedFeedMerger::new(sources, 24, Duration::from_secs(2));
    merger.reset(FeedFilter {
        period: Some(PeriodId::new(1)),
        site: None,
    });

    let report = merger.fetch_next().await;
    assert_eq!(report.failed, 0);
    // Two projects with three sessions plus the event session
    assert_eq!(merger.items().len(), 4);
    assert!(!merger.has_more());

    let again = merger.fetch_next().await;
    assert_eq!(again.added, 0);

    let classifier = SessionTemporalClassifier::new(180);
    let snapshot = build_snapshot(merger.items(), &classifier, at(9, 40), merger.has_more());
    let current: Vec<_> = snapshot.current.iter().map(|i| i.session.id).collect();
    assert_eq!(current, vec![SessionId::new(1000), SessionId::new(500)]);
    assert_eq!(snapshot.hero.map(|h| h.session.id), Some(SessionId::new(1000)));
    assert_eq!(snapshot.upcoming.len(), 1);
    assert_eq!(snapshot.history.len(), 1);
    assert!(snapshot.items.iter().any(|i| i.key == "E-5"));
}

#[test]
fn test_participant_status_gate() {
    let (engine, store, _) = setup();
    let mut luis = store.get_participant(RecordId::new(2)).unwrap().unwrap();
    luis.status = RecordStatus::Suspended;
    store.upsert_participant(&luis).unwrap();

    assert_eq!(
        engine.evaluate(RecordId::new(2), LIBRE, None).unwrap(),
        Outcome::Reject(RejectCode::StudentNotActive)
    );
}

#[test]
fn test_seed_file_into_on_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let seed_path = dir.path().join("seed.json");
    let db_path = dir.path().join("attend.db");
    std::fs::write(&seed_path, SEED).unwrap();

    {
        let store = SqliteStore::open(&db_path).unwrap();
        let summary = Seed::load(&seed_path).unwrap().apply(&store).unwrap();
        assert_eq!(summary.activities, 4);
        assert_eq!(summary.sessions, 4);
    }

    // Reopening keeps the catalog, and re-seeding is harmless
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
    Seed::load(&seed_path).unwrap().apply(store.as_ref()).unwrap();
    assert!(store.is_healthy());
    assert_eq!(store.list_periods().unwrap().len(), 2);
    assert!(store
        .is_matriculated(RecordId::new(3), PeriodId::new(1))
        .unwrap());
    assert_eq!(
        store
            .find_participant("2021-0002")
            .unwrap()
            .map(|p| p.record_id),
        Some(RecordId::new(2))
    );
}
