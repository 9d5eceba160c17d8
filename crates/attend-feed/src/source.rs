//! Page sources and the occurrences they flatten into

use async_trait::async_trait;
use attend_api::{ActivityKind, ActivityRef, FeedItem, FeedPage, FeedParent, Session, TemporalState};
use attend_util::{PeriodId, SessionId, SiteId};

use crate::FeedResult;

/// Filter applied by every source of a feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedFilter {
    /// `None` lists every period
    pub period: Option<PeriodId>,
    pub site: Option<SiteId>,
}

/// An independently paginated upstream collection of activities
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Kind of parent this source lists; part of the dedup key
    fn kind(&self) -> ActivityKind;

    /// Fetch 1-based page `page`
    async fn fetch(&self, page: u32, page_size: u32, filter: &FeedFilter) -> FeedResult<FeedPage>;
}

/// Dedup key of an occurrence across fetch cycles
pub type OccurrenceKey = (ActivityKind, SessionId);

/// One session of one parent activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub kind: ActivityKind,
    pub activity: ActivityRef,
    pub title: String,
    pub session: Session,
    pub session_index: u32,
    pub session_total: u32,
}

impl Occurrence {
    /// Flatten a parent into its sessions, numbered by (date, start)
    pub fn flatten(kind: ActivityKind, parent: &FeedParent) -> Vec<Occurrence> {
        let mut sessions = parent.sessions.clone();
        sessions.sort_by_key(|s| (s.date, s.start));
        let total = sessions.len() as u32;

        sessions
            .into_iter()
            .enumerate()
            .map(|(i, session)| Occurrence {
                kind,
                activity: parent.activity,
                title: parent.title.clone(),
                session,
                session_index: i as u32 + 1,
                session_total: total,
            })
            .collect()
    }

    pub fn key(&self) -> OccurrenceKey {
        (self.kind, self.session.id)
    }

    /// `P-{id}` / `E-{id}` of the parent
    pub fn feed_key(&self) -> String {
        self.activity.to_string()
    }

    pub fn to_item(&self, temporal: TemporalState) -> FeedItem {
        FeedItem {
            key: self.feed_key(),
            activity: self.activity,
            title: self.title.clone(),
            session: self.session.clone(),
            session_index: self.session_index,
            session_total: self.session_total,
            temporal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::SessionParent;
    use attend_util::{EventId, ProcessId, ProjectId};
    use chrono::{NaiveDate, NaiveTime};

    fn session(id: i64, day: u32, hour: u32) -> Session {
        Session {
            id: SessionId::new(id),
            parent: SessionParent::Process(ProcessId::new(1)),
            date: NaiveDate::from_ymd_opt(2025, 4, day).unwrap(),
            start: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
        }
    }

    #[test]
    fn sessions_are_numbered_chronologically() {
        let parent = FeedParent {
            activity: ActivityRef::Project(ProjectId::new(12)),
            title: "Huertos".into(),
            sessions: vec![session(3, 16, 9), session(1, 14, 9), session(2, 14, 15)],
        };
        let occ = Occurrence::flatten(ActivityKind::Project, &parent);

        let order: Vec<_> = occ.iter().map(|o| (o.session.id.get(), o.session_index)).collect();
        assert_eq!(order, vec![(1, 1), (2, 2), (3, 3)]);
        assert!(occ.iter().all(|o| o.session_total == 3));
        assert_eq!(occ[0].feed_key(), "P-12");
    }

    #[test]
    fn event_keys() {
        let parent = FeedParent {
            activity: ActivityRef::Event(EventId::new(4)),
            title: "Charla".into(),
            sessions: vec![session(9, 14, 10)],
        };
        let occ = Occurrence::flatten(ActivityKind::Event, &parent);
        assert_eq!(occ[0].feed_key(), "E-4");
        assert_eq!(occ[0].key(), (ActivityKind::Event, SessionId::new(9)));
    }
}
