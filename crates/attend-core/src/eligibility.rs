//! Enrollment eligibility
//!
//! [`evaluate`] is a pure function over facts gathered by the engine. The
//! first matching rule wins, so the order of the checks below is the
//! precedence callers see when several reasons apply at once.

use attend_api::{
    ActivityRef, ActivityState, CandidateReason, EventActivity, Outcome, Period, PeriodState,
    Project, ProjectType, RecordStatus, RejectCode,
};
use attend_util::{PeriodId, ProjectId, RecordId, SiteId};
use chrono::{DateTime, Local};

/// Participant side of an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantFacts {
    pub record_id: RecordId,
    pub site_id: SiteId,
    pub status: RecordStatus,
    pub level: Option<u8>,
    /// The running academic period, if one can be resolved
    pub current_period: Option<PeriodId>,
    /// Matriculated in `current_period`
    pub matriculated: bool,
    /// A non-terminal participation already exists for the activity
    pub live_in_activity: bool,
    /// Linked projects this participant joined in other periods
    pub linked_history: Vec<LinkedProjectProgress>,
}

/// Standing in a linked project the participant joined earlier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedProjectProgress {
    pub project_id: ProjectId,
    pub period_id: PeriodId,
    /// Lowest level the project admits
    pub level: Option<u8>,
    pub required_minutes: u32,
    pub accumulated_minutes: u32,
    /// Participation finished
    pub closed: bool,
}

impl LinkedProjectProgress {
    pub fn is_pending(&self) -> bool {
        !self.closed && self.accumulated_minutes < self.required_minutes
    }
}

/// Activity-specific gate applied after the common rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityRule {
    FreeProject,
    LinkedProject { levels: Vec<u8> },
    Event {
        requires_enrollment: bool,
        capacity: Option<u32>,
        enrollment_from: Option<DateTime<Local>>,
        enrollment_to: Option<DateTime<Local>>,
        /// Non-terminal participations right now
        live_count: u32,
    },
}

/// Activity side of an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFacts {
    pub activity: ActivityRef,
    pub site_id: SiteId,
    pub period_id: PeriodId,
    pub state: ActivityState,
    pub rule: ActivityRule,
}

impl ActivityFacts {
    pub fn for_project(project: &Project) -> Self {
        let rule = match project.project_type {
            ProjectType::Free => ActivityRule::FreeProject,
            ProjectType::Linked => ActivityRule::LinkedProject {
                levels: project.levels.clone(),
            },
        };
        Self {
            activity: ActivityRef::Project(project.id),
            site_id: project.site_id,
            period_id: project.period_id,
            state: project.state,
            rule,
        }
    }

    pub fn for_event(event: &EventActivity, live_count: u32) -> Self {
        Self {
            activity: ActivityRef::Event(event.id),
            site_id: event.site_id,
            period_id: event.period_id,
            state: event.state,
            rule: ActivityRule::Event {
                requires_enrollment: event.requires_enrollment,
                capacity: event.capacity,
                enrollment_from: event.enrollment_from,
                enrollment_to: event.enrollment_to,
                live_count,
            },
        }
    }

    /// Reason tag reported for an eligible candidate
    pub fn candidate_reason(&self) -> CandidateReason {
        match self.rule {
            ActivityRule::FreeProject => CandidateReason::EligibleFree,
            ActivityRule::LinkedProject { .. } => CandidateReason::EligibleLinked,
            ActivityRule::Event { .. } => CandidateReason::EligibleEvent,
        }
    }
}

/// Decide whether `participant` may join `activity` at `now`
pub fn evaluate(
    participant: &ParticipantFacts,
    activity: &ActivityFacts,
    now: DateTime<Local>,
) -> Outcome {
    match first_rejection(participant, activity, now) {
        Some(code) => Outcome::Reject(code),
        None => Outcome::Enroll,
    }
}

fn first_rejection(
    p: &ParticipantFacts,
    a: &ActivityFacts,
    now: DateTime<Local>,
) -> Option<RejectCode> {
    if p.current_period.is_none() {
        return Some(RejectCode::NoCurrentPeriod);
    }
    if !p.matriculated {
        return Some(RejectCode::NotEnrolledCurrentPeriod);
    }
    if p.status != RecordStatus::Active {
        return Some(RejectCode::StudentNotActive);
    }
    if p.site_id != a.site_id {
        return Some(RejectCode::DifferentEpSede);
    }
    if !a.state.accepts_participants() {
        return Some(RejectCode::ProjectNotActive);
    }
    if p.live_in_activity {
        return Some(RejectCode::AlreadyEnrolled);
    }

    match &a.rule {
        ActivityRule::FreeProject => None,
        ActivityRule::Event {
            requires_enrollment,
            capacity,
            enrollment_from,
            enrollment_to,
            live_count,
        } => {
            if !requires_enrollment {
                return None;
            }
            let before_open = enrollment_from.is_some_and(|from| now < from);
            let after_close = enrollment_to.is_some_and(|to| now > to);
            let full = capacity.is_some_and(|cap| *live_count >= cap);
            (before_open || after_close || full).then_some(RejectCode::EnrollmentClosed)
        }
        ActivityRule::LinkedProject { levels } => {
            let level_ok = p.level.is_some_and(|level| levels.contains(&level));
            if !level_ok {
                return Some(RejectCode::LevelMismatch);
            }
            let blocked = p.linked_history.iter().any(|prev| {
                prev.period_id != a.period_id
                    && prev.project_id.get() != a.activity.raw_id()
                    && prev.is_pending()
                    && match (prev.level, p.level) {
                        (Some(prev_level), Some(level)) => prev_level < level,
                        _ => true,
                    }
            });
            blocked.then_some(RejectCode::PendingLinkedPrev)
        }
    }
}

/// The running period: EN_CURSO
pub fn current_period(periods: &[Period]) -> Option<&Period> {
    periods.iter().find(|p| p.state == PeriodState::InProgress)
}

/// Period a view falls back to: the running one, else the first planned,
/// else whatever comes first
pub fn default_period(periods: &[Period]) -> Option<&Period> {
    current_period(periods)
        .or_else(|| periods.iter().find(|p| p.state == PeriodState::Planned))
        .or_else(|| periods.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_util::EventId;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 14, 9, 0, 0).unwrap()
    }

    fn participant(level: u8) -> ParticipantFacts {
        ParticipantFacts {
            record_id: RecordId::new(7),
            site_id: SiteId::new(1),
            status: RecordStatus::Active,
            level: Some(level),
            current_period: Some(PeriodId::new(2)),
            matriculated: true,
            live_in_activity: false,
            linked_history: vec![],
        }
    }

    fn linked(levels: Vec<u8>) -> ActivityFacts {
        ActivityFacts {
            activity: ActivityRef::Project(ProjectId::new(20)),
            site_id: SiteId::new(1),
            period_id: PeriodId::new(2),
            state: ActivityState::InProgress,
            rule: ActivityRule::LinkedProject { levels },
        }
    }

    fn event(capacity: Option<u32>, live_count: u32) -> ActivityFacts {
        ActivityFacts {
            activity: ActivityRef::Event(EventId::new(4)),
            site_id: SiteId::new(1),
            period_id: PeriodId::new(2),
            state: ActivityState::Planned,
            rule: ActivityRule::Event {
                requires_enrollment: true,
                capacity,
                enrollment_from: Some(now() - chrono::Duration::days(1)),
                enrollment_to: Some(now() + chrono::Duration::days(1)),
                live_count,
            },
        }
    }

    #[test]
    fn eligible_participant_enrolls() {
        assert_eq!(evaluate(&participant(3), &linked(vec![3]), now()), Outcome::Enroll);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut p = participant(2);
        p.current_period = None;
        p.matriculated = false;
        p.status = RecordStatus::Suspended;
        let a = linked(vec![3]);
        assert_eq!(evaluate(&p, &a, now()), Outcome::Reject(RejectCode::NoCurrentPeriod));

        p.current_period = Some(PeriodId::new(2));
        assert_eq!(
            evaluate(&p, &a, now()),
            Outcome::Reject(RejectCode::NotEnrolledCurrentPeriod)
        );

        p.matriculated = true;
        assert_eq!(evaluate(&p, &a, now()), Outcome::Reject(RejectCode::StudentNotActive));

        p.status = RecordStatus::Active;
        p.site_id = SiteId::new(9);
        assert_eq!(evaluate(&p, &a, now()), Outcome::Reject(RejectCode::DifferentEpSede));
    }

    #[test]
    fn terminal_activity_is_not_active() {
        let mut a = linked(vec![3]);
        a.state = ActivityState::Cancelled;
        let mut p = participant(3);
        p.live_in_activity = true;
        assert_eq!(evaluate(&p, &a, now()), Outcome::Reject(RejectCode::ProjectNotActive));
    }

    #[test]
    fn already_enrolled_precedes_level_checks() {
        let mut p = participant(1);
        p.live_in_activity = true;
        assert_eq!(
            evaluate(&p, &linked(vec![3]), now()),
            Outcome::Reject(RejectCode::AlreadyEnrolled)
        );
    }

    #[test]
    fn linked_chain_scenario() {
        // Level 2 participant against a level 3 project
        assert_eq!(
            evaluate(&participant(2), &linked(vec![3]), now()),
            Outcome::Reject(RejectCode::LevelMismatch)
        );

        // Promoted to level 3 with last period's level 2 project short of minutes
        let mut promoted = participant(3);
        promoted.linked_history.push(LinkedProjectProgress {
            project_id: ProjectId::new(10),
            period_id: PeriodId::new(1),
            level: Some(2),
            required_minutes: 600,
            accumulated_minutes: 240,
            closed: false,
        });
        assert_eq!(
            evaluate(&promoted, &linked(vec![3]), now()),
            Outcome::Reject(RejectCode::PendingLinkedPrev)
        );

        // Finishing it lifts the block
        promoted.linked_history[0].closed = true;
        assert_eq!(evaluate(&promoted, &linked(vec![3]), now()), Outcome::Enroll);
    }

    #[test]
    fn participant_without_level_mismatches_linked_project() {
        let mut p = participant(3);
        p.level = None;
        assert_eq!(
            evaluate(&p, &linked(vec![3]), now()),
            Outcome::Reject(RejectCode::LevelMismatch)
        );
    }

    #[test]
    fn event_enrollment_window_and_capacity() {
        let p = participant(1);
        assert_eq!(evaluate(&p, &event(Some(30), 29), now()), Outcome::Enroll);
        assert_eq!(
            evaluate(&p, &event(Some(30), 30), now()),
            Outcome::Reject(RejectCode::EnrollmentClosed)
        );
        assert_eq!(
            evaluate(&p, &event(None, 500), now() + chrono::Duration::days(2)),
            Outcome::Reject(RejectCode::EnrollmentClosed)
        );
    }

    #[test]
    fn open_event_ignores_window() {
        let mut a = event(Some(1), 5);
        if let ActivityRule::Event {
            requires_enrollment,
            ..
        } = &mut a.rule
        {
            *requires_enrollment = false;
        }
        assert_eq!(evaluate(&participant(1), &a, now()), Outcome::Enroll);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let p = participant(2);
        let a = linked(vec![3, 4]);
        assert_eq!(evaluate(&p, &a, now()), evaluate(&p, &a, now()));
    }

    #[test]
    fn default_period_selection() {
        let period = |id: i64, state| Period {
            id: PeriodId::new(id),
            code: format!("P{}", id),
            starts_on: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            state,
        };
        let periods = vec![
            period(1, PeriodState::Closed),
            period(2, PeriodState::Planned),
            period(3, PeriodState::InProgress),
        ];
        assert_eq!(default_period(&periods).unwrap().id, PeriodId::new(3));
        assert_eq!(default_period(&periods[..2]).unwrap().id, PeriodId::new(2));
        assert_eq!(default_period(&periods[..1]).unwrap().id, PeriodId::new(1));
        assert!(current_period(&periods[..2]).is_none());
    }
}
