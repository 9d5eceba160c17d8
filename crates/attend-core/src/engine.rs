//! Core engine
//!
//! Orchestrates the pure rules in this crate against the store. Every
//! operation reads `now` from the injected clock once and uses it
//! throughout.

use attend_api::{
    ActivityRef, AgendaCard, Attendance, AttendanceMethod, AttendanceRow, AttendanceState,
    AttendanceWindow, BulkEnrollReport, Candidate, CheckInReceipt, CheckInRejection,
    ComputedPresence, Discarded, EnrollResult, GeoFence, ManualWindowView, Outcome, Participant,
    Participation, ParticipationState, ProcessProgress, ProjectProgress, ProjectType,
    QrWindowView, RejectCode, Session, SessionClassification, SessionParent, SessionParticipant,
    TemporalState, ValidationSummary, WindowKind, WindowRejection,
};
use attend_config::Policy;
use attend_store::{
    AuditEvent, AuditEventType, CatalogQuery, NewHourRecord, Store, StoreError,
};
use attend_util::{
    AttendanceId, Clock, ParticipationId, PeriodId, ProcessId, ProjectId, RecordId, SessionId,
    SiteId,
};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    current_period, evaluate, ActivityFacts, AttendanceValidator, AttendanceWindowManager,
    CheckInProcessor, CoreEvent, EngineError, EngineResult, LinkedProjectProgress,
    ParticipantFacts, QrCredentials, SessionTemporalClassifier,
};

/// Upper bound on catalog rows scanned for the staff agenda
const AGENDA_SCAN_LIMIT: u32 = 500;

/// What a session belongs to, resolved through its parent
#[derive(Debug, Clone)]
struct SessionContext {
    session: Session,
    activity: ActivityRef,
    title: String,
    site_id: SiteId,
    state: attend_api::ActivityState,
    process_id: Option<ProcessId>,
    /// Events without enrollment take attendance from anyone on the roster
    open_attendance: bool,
}

/// The core engine
pub struct CoreEngine {
    policy: Policy,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    windows: AttendanceWindowManager,
    classifier: SessionTemporalClassifier,
    events: Vec<CoreEvent>,
}

impl CoreEngine {
    pub fn new(policy: Policy, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        info!(
            qr_duration_min = policy.windows.qr_duration.num_minutes(),
            recent_window_min = policy.feed.recent_window_minutes,
            "Core engine initialized"
        );

        Self {
            windows: AttendanceWindowManager::new(policy.windows.clone()),
            classifier: SessionTemporalClassifier::new(policy.feed.recent_window_minutes),
            policy,
            store,
            clock,
            events: Vec::new(),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn classifier(&self) -> &SessionTemporalClassifier {
        &self.classifier
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Take the events produced since the last call
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    fn audit(&self, event: AuditEventType, now: DateTime<Local>) {
        let _ = self.store.append_audit(AuditEvent::at(event, now));
    }

    // Lookups

    fn authorize(acting_site: Option<SiteId>, site: SiteId) -> EngineResult<()> {
        match acting_site {
            Some(acting) if acting != site => Err(EngineError::PermissionDenied(format!(
                "site {} cannot act on site {}",
                acting, site
            ))),
            _ => Ok(()),
        }
    }

    fn participant(&self, record: RecordId) -> EngineResult<Participant> {
        self.store
            .get_participant(record)?
            .ok_or_else(|| EngineError::not_found(format!("participant {}", record)))
    }

    fn activity_facts(&self, activity: ActivityRef) -> EngineResult<(ActivityFacts, String)> {
        match activity {
            ActivityRef::Project(id) => {
                let project = self
                    .store
                    .get_project(id)?
                    .ok_or_else(|| EngineError::not_found(format!("project {}", id)))?;
                Ok((ActivityFacts::for_project(&project), project.title))
            }
            ActivityRef::Event(id) => {
                let event = self
                    .store
                    .get_event(id)?
                    .ok_or_else(|| EngineError::not_found(format!("event {}", id)))?;
                let live = self.store.count_live_participations(activity)?;
                Ok((ActivityFacts::for_event(&event, live), event.title))
            }
        }
    }

    fn session_context(&self, session_id: SessionId) -> EngineResult<SessionContext> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| EngineError::not_found(format!("session {}", session_id)))?;

        match session.parent {
            SessionParent::Process(process_id) => {
                let process = self
                    .store
                    .get_process(process_id)?
                    .ok_or_else(|| EngineError::not_found(format!("process {}", process_id)))?;
                let project = self.store.get_project(process.project_id)?.ok_or_else(|| {
                    EngineError::not_found(format!("project {}", process.project_id))
                })?;
                Ok(SessionContext {
                    session,
                    activity: ActivityRef::Project(project.id),
                    title: project.title,
                    site_id: project.site_id,
                    state: project.state,
                    process_id: Some(process_id),
                    open_attendance: false,
                })
            }
            SessionParent::Event(event_id) => {
                let event = self
                    .store
                    .get_event(event_id)?
                    .ok_or_else(|| EngineError::not_found(format!("event {}", event_id)))?;
                Ok(SessionContext {
                    session,
                    activity: ActivityRef::Event(event.id),
                    title: event.title,
                    site_id: event.site_id,
                    state: event.state,
                    process_id: None,
                    open_attendance: !event.requires_enrollment,
                })
            }
        }
    }

    fn participant_facts(
        &self,
        participant: &Participant,
        activity: ActivityRef,
        current: Option<PeriodId>,
    ) -> EngineResult<ParticipantFacts> {
        let record = participant.record_id;
        let matriculated = match current {
            Some(period) => self.store.is_matriculated(record, period)?,
            None => false,
        };
        let live_in_activity = self.store.live_participation(record, activity)?.is_some();

        Ok(ParticipantFacts {
            record_id: record,
            site_id: participant.site_id,
            status: participant.status,
            level: participant.level,
            current_period: current,
            matriculated,
            live_in_activity,
            linked_history: self.linked_history(record)?,
        })
    }

    fn current_period_id(&self) -> EngineResult<Option<PeriodId>> {
        let periods = self.store.list_periods()?;
        Ok(current_period(&periods).map(|p| p.id))
    }

    /// Linked projects the participant is in or finished, with their standing
    fn linked_history(&self, record: RecordId) -> EngineResult<Vec<LinkedProjectProgress>> {
        let mut history = Vec::new();
        for participation in self.store.list_record_participations(record)? {
            let ActivityRef::Project(project_id) = participation.activity else {
                continue;
            };
            if matches!(
                participation.state,
                ParticipationState::Withdrawn | ParticipationState::Cancelled
            ) {
                continue;
            }
            let Some(project) = self.store.get_project(project_id)? else {
                continue;
            };
            if project.project_type != ProjectType::Linked {
                continue;
            }

            history.push(LinkedProjectProgress {
                project_id,
                period_id: project.period_id,
                level: project.levels.iter().copied().min(),
                required_minutes: project.required_minutes,
                accumulated_minutes: self.validated_minutes(record, participation.activity)?,
                closed: participation.state == ParticipationState::Finished,
            });
        }
        Ok(history)
    }

    fn validated_minutes(&self, record: RecordId, activity: ActivityRef) -> EngineResult<u32> {
        let sessions: HashSet<SessionId> = self
            .store
            .list_activity_sessions(activity)?
            .into_iter()
            .map(|s| s.id)
            .collect();
        Ok(self
            .store
            .list_record_attendance(record)?
            .iter()
            .filter(|a| a.state == AttendanceState::Validated && sessions.contains(&a.session_id))
            .map(|a| a.minutes_validated)
            .sum())
    }

    // Enrollment

    /// Dry-run eligibility
    pub fn evaluate(
        &self,
        record: RecordId,
        activity: ActivityRef,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Outcome> {
        let now = self.now();
        let participant = self.participant(record)?;
        let (facts, _) = self.activity_facts(activity)?;
        Self::authorize(acting_site, facts.site_id)?;

        let current = self.current_period_id()?;
        let p = self.participant_facts(&participant, activity, current)?;
        Ok(evaluate(&p, &facts, now))
    }

    /// Evaluate and, if eligible, create an INSCRITO participation.
    ///
    /// The partial unique index on live participations is the real guard:
    /// losing a race to a concurrent enrollment returns the row that won.
    pub fn enroll(
        &mut self,
        record: RecordId,
        activity: ActivityRef,
        acting_site: Option<SiteId>,
    ) -> EngineResult<EnrollResult> {
        self.enroll_tracked(record, activity, acting_site)
            .map(|(result, _)| result)
    }

    /// Enroll, also reporting whether this call inserted the row
    fn enroll_tracked(
        &mut self,
        record: RecordId,
        activity: ActivityRef,
        acting_site: Option<SiteId>,
    ) -> EngineResult<(EnrollResult, bool)> {
        let now = self.now();
        let outcome = self.evaluate(record, activity, acting_site)?;

        if let Outcome::Reject(code) = outcome {
            debug!(record_id = %record, activity = %activity, code = %code, "Enrollment rejected");
            self.audit(
                AuditEventType::EnrollmentRejected {
                    record_id: record,
                    activity,
                    code,
                },
                now,
            );
            let result = EnrollResult {
                outcome,
                participation: None,
            };
            return Ok((result, false));
        }

        let (participation, created) = self.insert_participation(record, activity, now)?;
        let result = EnrollResult {
            outcome: Outcome::Enroll,
            participation: Some(participation),
        };
        Ok((result, created))
    }

    fn insert_participation(
        &mut self,
        record: RecordId,
        activity: ActivityRef,
        now: DateTime<Local>,
    ) -> EngineResult<(Participation, bool)> {
        match self.store.insert_participation(record, activity, now) {
            Ok(participation) => {
                info!(
                    participation_id = %participation.id,
                    record_id = %record,
                    activity = %activity,
                    "Participation created"
                );
                self.audit(
                    AuditEventType::ParticipationCreated {
                        participation_id: participation.id,
                        record_id: record,
                        activity,
                    },
                    now,
                );
                self.events.push(CoreEvent::ParticipationCreated {
                    participation_id: participation.id,
                    record_id: record,
                    activity,
                });
                Ok((participation, true))
            }
            Err(StoreError::Conflict(msg)) => {
                warn!(record_id = %record, activity = %activity, %msg, "Concurrent enrollment detected");
                let existing = self
                    .store
                    .live_participation(record, activity)?
                    .ok_or(EngineError::Store(StoreError::Conflict(msg)))?;
                Ok((existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn transition_participation(
        &mut self,
        id: ParticipationId,
        to: ParticipationState,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Participation> {
        let now = self.now();
        let participation = self
            .store
            .get_participation(id)?
            .ok_or_else(|| EngineError::not_found(format!("participation {}", id)))?;
        let (facts, _) = self.activity_facts(participation.activity)?;
        Self::authorize(acting_site, facts.site_id)?;

        let from = participation.state;
        if !from.can_transition_to(to) || !self.store.transition_participation(id, from, to)? {
            return Err(EngineError::invalid_transition(from, to));
        }

        info!(participation_id = %id, %from, %to, "Participation transitioned");
        self.audit(
            AuditEventType::ParticipationTransitioned {
                participation_id: id,
                from,
                to,
            },
            now,
        );

        Ok(Participation {
            state: to,
            ..participation
        })
    }

    /// Participants of the activity's site who would be enrolled now
    pub fn candidates(
        &self,
        activity: ActivityRef,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Vec<Candidate>> {
        let now = self.now();
        let (facts, _) = self.activity_facts(activity)?;
        Self::authorize(acting_site, facts.site_id)?;
        let current = self.current_period_id()?;

        let mut candidates = Vec::new();
        for participant in self.store.list_participants_by_site(facts.site_id)? {
            let p = self.participant_facts(&participant, activity, current)?;
            if evaluate(&p, &facts, now).is_enroll() {
                candidates.push(Candidate {
                    participant,
                    reason: facts.candidate_reason(),
                });
            }
        }
        Ok(candidates)
    }

    /// Enroll the listed records, or every current candidate
    pub fn enroll_candidates(
        &mut self,
        activity: ActivityRef,
        record_ids: Option<Vec<RecordId>>,
        acting_site: Option<SiteId>,
    ) -> EngineResult<BulkEnrollReport> {
        let ids = match record_ids {
            Some(ids) => ids,
            None => self
                .candidates(activity, acting_site)?
                .into_iter()
                .map(|c| c.participant.record_id)
                .collect(),
        };

        let mut report = BulkEnrollReport::default();
        for record in ids {
            let (result, created) = match self.enroll_tracked(record, activity, acting_site) {
                Ok(tracked) => tracked,
                Err(EngineError::NotFound(what)) => {
                    report.discarded.push(Discarded {
                        record_id: record,
                        code: "NOT_FOUND".into(),
                        reason: format!("{} not found", what),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            match result.outcome {
                Outcome::Enroll if created => report.created += 1,
                Outcome::Enroll | Outcome::Reject(RejectCode::AlreadyEnrolled) => {
                    report.already_enrolled += 1
                }
                Outcome::Reject(code) => report.discarded.push(Discarded {
                    record_id: record,
                    code: code.as_str().to_string(),
                    reason: code.message().to_string(),
                }),
            }
        }
        report.discarded_total = report.discarded.len() as u32;

        info!(
            activity = %activity,
            created = report.created,
            already_enrolled = report.already_enrolled,
            discarded = report.discarded_total,
            "Bulk enrollment finished"
        );
        Ok(report)
    }

    // Windows

    pub fn open_qr_window(
        &mut self,
        session_id: SessionId,
        geo: Option<GeoFence>,
        max_uses: Option<u32>,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Result<AttendanceWindow, WindowRejection>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();

        let window = match self.windows.plan_qr(&ctx.session, ctx.state, geo, max_uses, now) {
            Ok(window) => window,
            Err(rejection) => {
                debug!(session_id = %session_id, ?rejection, "QR window refused");
                return Ok(Err(rejection));
            }
        };
        self.store_window(&window, now)?;
        Ok(Ok(window))
    }

    pub fn open_manual_window(
        &mut self,
        session_id: SessionId,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Result<AttendanceWindow, WindowRejection>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();

        let window = match self.windows.plan_manual(&ctx.session, ctx.state, now) {
            Ok(window) => window,
            Err(rejection) => {
                debug!(session_id = %session_id, ?rejection, "Manual window refused");
                return Ok(Err(rejection));
            }
        };
        self.store_window(&window, now)?;
        Ok(Ok(window))
    }

    fn store_window(&mut self, window: &AttendanceWindow, now: DateTime<Local>) -> EngineResult<()> {
        self.store.replace_window(window)?;

        info!(
            session_id = %window.session_id,
            kind = %window.kind,
            usable_from = %window.usable_from,
            expires_at = %window.expires_at,
            "Window opened"
        );
        self.audit(
            AuditEventType::WindowOpened {
                session_id: window.session_id,
                kind: window.kind,
                expires_at: window.expires_at,
            },
            now,
        );
        self.events.push(CoreEvent::WindowOpened {
            session_id: window.session_id,
            kind: window.kind,
            expires_at: window.expires_at,
        });
        Ok(())
    }

    // Check-in

    /// Participation the attendance hangs from; `Ok(None)` for open events
    fn resolve_participation(
        &self,
        ctx: &SessionContext,
        record: RecordId,
    ) -> EngineResult<Result<Option<ParticipationId>, CheckInRejection>> {
        let live = self.store.live_participation(record, ctx.activity)?;
        Ok(match live {
            Some(p) => Ok(Some(p.id)),
            None if ctx.open_attendance => Ok(None),
            None => Err(CheckInRejection::NotEligible),
        })
    }

    pub fn check_in_qr(
        &mut self,
        session_id: SessionId,
        record: RecordId,
        credentials: QrCredentials,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Result<CheckInReceipt, CheckInRejection>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();

        let window = self.store.active_window(session_id, WindowKind::Qr)?;
        let usage = match CheckInProcessor::admit_qr(window.as_ref(), &credentials, now) {
            Ok(usage) => usage,
            Err(rejection) => return Ok(self.reject_check_in(session_id, rejection, now)),
        };
        if self.store.get_participant(record)?.is_none() {
            return Ok(self.reject_check_in(session_id, CheckInRejection::ParticipantNotFound, now));
        }
        let participation_id = match self.resolve_participation(&ctx, record)? {
            Ok(id) => id,
            Err(rejection) => return Ok(self.reject_check_in(session_id, rejection, now)),
        };

        let row = CheckInProcessor::pending_row(
            &ctx.session,
            record,
            participation_id,
            AttendanceMethod::Qr,
            Some(credentials.token),
            now,
        );
        self.write_check_in(row, Some(usage), window.map(|w| w.expires_at), now)
    }

    /// Roster check-in by institutional code, document or email
    pub fn check_in_manual(
        &mut self,
        session_id: SessionId,
        code: &str,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Result<CheckInReceipt, CheckInRejection>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();

        let window = self.store.active_window(session_id, WindowKind::Manual)?;
        let usage = match CheckInProcessor::admit_manual(window.as_ref(), now) {
            Ok(usage) => usage,
            Err(rejection) => return Ok(self.reject_check_in(session_id, rejection, now)),
        };
        let Some(participant) = self.store.find_participant(code)? else {
            return Ok(self.reject_check_in(session_id, CheckInRejection::ParticipantNotFound, now));
        };
        let participation_id = match self.resolve_participation(&ctx, participant.record_id)? {
            Ok(id) => id,
            Err(rejection) => return Ok(self.reject_check_in(session_id, rejection, now)),
        };

        let row = CheckInProcessor::pending_row(
            &ctx.session,
            participant.record_id,
            participation_id,
            AttendanceMethod::Manual,
            None,
            now,
        );
        self.write_check_in(row, Some(usage), window.map(|w| w.expires_at), now)
    }

    /// Staff override: no window needed, and no participation either
    pub fn check_in_justified(
        &mut self,
        session_id: SessionId,
        code: &str,
        justification: &str,
        grant_minutes: bool,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Result<CheckInReceipt, CheckInRejection>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();

        let Some(participant) = self.store.find_participant(code)? else {
            return Ok(self.reject_check_in(session_id, CheckInRejection::ParticipantNotFound, now));
        };
        let participation_id = self
            .store
            .live_participation(participant.record_id, ctx.activity)?
            .map(|p| p.id);

        let row = match CheckInProcessor::justified_row(
            &ctx.session,
            participant.record_id,
            participation_id,
            justification,
            grant_minutes,
            now,
        ) {
            Ok(row) => row,
            Err(rejection) => return Ok(self.reject_check_in(session_id, rejection, now)),
        };
        self.write_check_in(row, None, None, now)
    }

    fn write_check_in(
        &mut self,
        row: attend_store::NewAttendance,
        usage: Option<attend_store::WindowUse>,
        window_end: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) -> EngineResult<Result<CheckInReceipt, CheckInRejection>> {
        let existing = self.store.find_attendance(row.session_id, row.record_id)?;
        if let Err(rejection) = CheckInProcessor::check_existing(existing.as_ref()) {
            return Ok(self.reject_check_in(row.session_id, rejection, now));
        }

        let max_uses = usage.as_ref().and_then(|u| u.max_uses);
        let write = self.store.record_check_in(&row, usage.as_ref())?;
        let (attendance, updated) = match CheckInProcessor::settle(write, max_uses) {
            Ok(settled) => settled,
            Err(rejection) => return Ok(self.reject_check_in(row.session_id, rejection, now)),
        };

        info!(
            session_id = %attendance.session_id,
            record_id = %attendance.record_id,
            method = %attendance.method,
            updated,
            "Check-in recorded"
        );
        self.audit(
            AuditEventType::CheckInRecorded {
                session_id: attendance.session_id,
                record_id: attendance.record_id,
                method: attendance.method,
                updated,
            },
            now,
        );
        self.events.push(CoreEvent::AttendanceRecorded {
            session_id: attendance.session_id,
            record_id: attendance.record_id,
            method: attendance.method,
        });

        Ok(Ok(CheckInReceipt {
            attendance,
            window_end,
            updated,
        }))
    }

    fn reject_check_in<T>(
        &self,
        session_id: SessionId,
        rejection: CheckInRejection,
        now: DateTime<Local>,
    ) -> Result<T, CheckInRejection> {
        debug!(session_id = %session_id, code = rejection.code(), "Check-in rejected");
        self.audit(
            AuditEventType::CheckInRejected {
                session_id,
                code: rejection.code().to_string(),
            },
            now,
        );
        Err(rejection)
    }

    // Validation

    /// Promote PENDIENTE rows to VALIDADO; idempotent per row
    pub fn validate(
        &mut self,
        session_id: SessionId,
        only: Option<&[AttendanceId]>,
        create_hour_record: bool,
        acting_site: Option<SiteId>,
    ) -> EngineResult<ValidationSummary> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();

        let rows = self.store.list_attendance(session_id)?;
        let plan = AttendanceValidator::plan(&ctx.session, &rows, only);
        let hour_record = create_hour_record.then(|| NewHourRecord {
            activity: ctx.activity,
            process_id: ctx.process_id,
            created_at: now,
        });

        let applied = if plan.is_empty() {
            attend_store::AppliedValidation {
                validated: 0,
                minutes_total: 0,
                hour_record: None,
                hour_record_created: false,
            }
        } else {
            self.store
                .apply_validation(session_id, &plan.minutes, hour_record.as_ref())?
        };

        if applied.validated > 0 {
            info!(
                session_id = %session_id,
                validated = applied.validated,
                minutes_total = applied.minutes_total,
                "Attendance validated"
            );
            self.audit(
                AuditEventType::AttendanceValidated {
                    session_id,
                    validated: applied.validated,
                    minutes_total: applied.minutes_total,
                },
                now,
            );
            self.events.push(CoreEvent::AttendanceValidated {
                session_id,
                validated: applied.validated,
            });
        }
        if let Some(hr) = applied.hour_record.as_ref().filter(|_| applied.hour_record_created) {
            self.audit(
                AuditEventType::HourRecordCreated {
                    hour_record_id: hr.id,
                    session_id,
                    minutes_total: hr.minutes_total,
                },
                now,
            );
            self.events.push(CoreEvent::HourRecordCreated {
                session_id,
                hour_record_id: hr.id,
                minutes_total: hr.minutes_total,
            });
        }

        Ok(ValidationSummary {
            validated: applied.validated,
            minutes_per_attendance: plan.session_minutes,
            hour_record_created: applied.hour_record_created,
        })
    }

    /// PENDIENTE -> ANULADO
    pub fn annul_attendance(
        &mut self,
        id: AttendanceId,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Attendance> {
        let attendance = self
            .store
            .get_attendance(id)?
            .ok_or_else(|| EngineError::not_found(format!("attendance {}", id)))?;
        let ctx = self.session_context(attendance.session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;

        if !self.store.annul_attendance(id)? {
            return Err(EngineError::invalid_transition(
                attendance.state,
                AttendanceState::Annulled,
            ));
        }
        info!(attendance_id = %id, "Attendance annulled");
        self.audit(AuditEventType::AttendanceAnnulled { attendance_id: id }, self.now());

        Ok(Attendance {
            state: AttendanceState::Annulled,
            minutes_validated: 0,
            ..attendance
        })
    }

    // Read models

    pub fn list_attendance(
        &self,
        session_id: SessionId,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Vec<AttendanceRow>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;

        let mut rows = Vec::new();
        for a in self.store.list_attendance(session_id)? {
            let p = self.store.get_participant(a.record_id)?;
            rows.push(AttendanceRow {
                id: a.id,
                method: a.method,
                state: a.state,
                check_in_at: a.check_in_at,
                minutes: a.minutes_validated,
                code: p.as_ref().map(|p| p.code.clone()),
                document: p.as_ref().and_then(|p| p.document.clone()),
                first_names: p.as_ref().map(|p| p.first_names.clone()),
                last_names: p.as_ref().map(|p| p.last_names.clone()),
            });
        }
        Ok(rows)
    }

    /// Roster of the session's activity with computed presence
    pub fn session_participants(
        &self,
        session_id: SessionId,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Vec<SessionParticipant>> {
        let ctx = self.session_context(session_id)?;
        Self::authorize(acting_site, ctx.site_id)?;
        let now = self.now();
        let (_, fin) = ctx.session.bounds();

        let mut roster = Vec::new();
        for participation in self.store.list_participations(ctx.activity)? {
            if matches!(
                participation.state,
                ParticipationState::Withdrawn | ParticipationState::Cancelled
            ) {
                continue;
            }
            let Some(participant) = self.store.get_participant(participation.record_id)? else {
                continue;
            };
            let attendance = self
                .store
                .find_attendance(session_id, participation.record_id)?;
            let computed = match &attendance {
                Some(a) if a.state != AttendanceState::Annulled => ComputedPresence::Present,
                _ if now > fin => ComputedPresence::Absent,
                _ => ComputedPresence::Undetermined,
            };
            roster.push(SessionParticipant {
                participant,
                participation_state: participation.state,
                attendance,
                computed,
            });
        }
        roster.sort_by(|a, b| {
            (&a.participant.last_names, &a.participant.first_names)
                .cmp(&(&b.participant.last_names, &b.participant.first_names))
        });
        Ok(roster)
    }

    pub fn classify_session(
        &self,
        session_id: SessionId,
        at: Option<DateTime<Local>>,
    ) -> EngineResult<SessionClassification> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| EngineError::not_found(format!("session {}", session_id)))?;
        Ok(self.classifier.classify(at.unwrap_or_else(|| self.now()), &session))
    }

    /// Minutes accumulated toward a project's target, per process
    pub fn project_progress(
        &self,
        project_id: ProjectId,
        record: RecordId,
        acting_site: Option<SiteId>,
    ) -> EngineResult<ProjectProgress> {
        let project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| EngineError::not_found(format!("project {}", project_id)))?;
        Self::authorize(acting_site, project.site_id)?;
        self.participant(record)?;
        let now = self.now();

        let attendance = self.store.list_record_attendance(record)?;
        let mut processes = Vec::new();
        for process in self.store.list_processes(project_id)? {
            let mut progress = ProcessProgress {
                process_id: process.id,
                name: process.name.clone(),
                total_min: process.required_minutes,
                validated_min: 0,
                pending_min: 0,
                sessions_total: 0,
                sessions_attended: 0,
                sessions_missed: 0,
            };
            for session in self.store.list_sessions(SessionParent::Process(process.id))? {
                progress.sessions_total += 1;
                let row = attendance.iter().find(|a| a.session_id == session.id);
                match row.map(|a| a.state) {
                    Some(AttendanceState::Validated) => {
                        progress.sessions_attended += 1;
                        progress.validated_min += row.map_or(0, |a| a.minutes_validated);
                    }
                    Some(AttendanceState::Pending) => {
                        progress.sessions_attended += 1;
                        progress.pending_min += row
                            .and_then(|a| a.override_minutes)
                            .unwrap_or_else(|| session.duration_minutes());
                    }
                    _ if now > session.bounds().1 => progress.sessions_missed += 1,
                    _ => {}
                }
            }
            processes.push(progress);
        }

        let accumulated_min: u32 = processes.iter().map(|p| p.validated_min).sum();
        let missing_min = project.required_minutes.saturating_sub(accumulated_min);
        let finished = self
            .store
            .list_record_participations(record)?
            .iter()
            .any(|p| {
                p.activity == ActivityRef::Project(project_id)
                    && p.state == ParticipationState::Finished
            });

        Ok(ProjectProgress {
            required_min: project.required_minutes,
            accumulated_min,
            missing_min,
            closed: finished || missing_min == 0,
            processes,
        })
    }

    /// Sessions of running activities with live counts and open windows
    pub fn staff_agenda(
        &self,
        at: Option<DateTime<Local>>,
        acting_site: Option<SiteId>,
    ) -> EngineResult<Vec<AgendaCard>> {
        let now = at.unwrap_or_else(|| self.now());
        let query = CatalogQuery {
            period: None,
            site: acting_site,
            offset: 0,
            limit: AGENDA_SCAN_LIMIT,
        };

        let mut activities: Vec<(ActivityRef, String)> = Vec::new();
        for project in self.store.list_projects(&query)? {
            if project.state.accepts_participants() {
                activities.push((ActivityRef::Project(project.id), project.title));
            }
        }
        for event in self.store.list_events(&query)? {
            if event.state.accepts_participants() {
                activities.push((ActivityRef::Event(event.id), event.title));
            }
        }

        let mut cards = Vec::new();
        for (activity, title) in activities {
            let enrolled = self.store.count_live_participations(activity)?;
            for session in self.store.list_activity_sessions(activity)? {
                let attendances = self
                    .store
                    .list_attendance(session.id)?
                    .iter()
                    .filter(|a| a.state != AttendanceState::Annulled)
                    .count() as u32;
                let qr = self
                    .store
                    .active_window(session.id, WindowKind::Qr)?
                    .filter(|w| now <= w.expires_at)
                    .and_then(|w| qr_view(&w));
                let manual = self
                    .store
                    .active_window(session.id, WindowKind::Manual)?
                    .filter(|w| now <= w.expires_at)
                    .map(|w| manual_view(&w));

                cards.push(AgendaCard {
                    temporal: self.classifier.state(now, &session),
                    session,
                    activity,
                    title: title.clone(),
                    enrolled,
                    attendances,
                    qr,
                    manual,
                });
            }
        }

        cards.sort_by_key(|c| (agenda_rank(c.temporal), c.session.bounds().0));
        Ok(cards)
    }

    pub fn is_store_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}

fn agenda_rank(state: TemporalState) -> u8 {
    match state {
        TemporalState::Now => 0,
        TemporalState::Soon => 1,
        TemporalState::Later => 2,
        TemporalState::Recent => 3,
        TemporalState::Past => 4,
    }
}

/// Client view of a QR window; None for windows without a token
pub fn qr_view(window: &AttendanceWindow) -> Option<QrWindowView> {
    Some(QrWindowView {
        token: window.token.clone()?,
        usable_from: window.usable_from,
        expires_at: window.expires_at,
        geo: window.geo,
        max_uses: window.max_uses,
    })
}

pub fn manual_view(window: &AttendanceWindow) -> ManualWindowView {
    ManualWindowView {
        usable_from: window.usable_from,
        expires_at: window.expires_at,
    }
}
