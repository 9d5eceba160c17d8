//! Catalog and roster seeding
//!
//! The catalog, roster and matriculations are owned by external systems;
//! attendd imports a JSON snapshot of them at startup.

use attend_api::{EventActivity, Participant, Period, Process, Project, Session};
use attend_util::{PeriodId, RecordId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::{AuditEvent, AuditEventType, Store, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matriculation {
    pub record_id: RecordId,
    pub period_id: PeriodId,
}

/// Snapshot of external catalog and roster data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub periods: Vec<Period>,
    pub participants: Vec<Participant>,
    pub matriculations: Vec<Matriculation>,
    pub projects: Vec<Project>,
    pub processes: Vec<Process>,
    pub events: Vec<EventActivity>,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub periods: usize,
    pub participants: usize,
    pub activities: usize,
    pub sessions: usize,
}

impl Seed {
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Upsert everything into the store. Re-applying the same seed is harmless.
    pub fn apply(&self, store: &dyn Store) -> StoreResult<SeedSummary> {
        for period in &self.periods {
            store.upsert_period(period)?;
        }
        for participant in &self.participants {
            store.upsert_participant(participant)?;
        }
        for m in &self.matriculations {
            store.set_matriculated(m.record_id, m.period_id)?;
        }
        for project in &self.projects {
            store.upsert_project(project)?;
        }
        for process in &self.processes {
            store.upsert_process(process)?;
        }
        for event in &self.events {
            store.upsert_event(event)?;
        }
        for session in &self.sessions {
            store.upsert_session(session)?;
        }

        let summary = SeedSummary {
            periods: self.periods.len(),
            participants: self.participants.len(),
            activities: self.projects.len() + self.events.len(),
            sessions: self.sessions.len(),
        };

        let _ = store.append_audit(AuditEvent::new(AuditEventType::SeedApplied {
            sessions: summary.sessions,
            participants: summary.participants,
        }));
        info!(
            periods = summary.periods,
            participants = summary.participants,
            activities = summary.activities,
            sessions = summary.sessions,
            "Seed applied"
        );

        Ok(summary)
    }
}
