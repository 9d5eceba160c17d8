//! Derived views over the accumulated feed
//!
//! Temporal state is computed at render time from `now`; the feed itself
//! stores only occurrences.

use attend_api::{FeedItem, FeedSnapshot, TemporalState};
use attend_core::SessionTemporalClassifier;
use chrono::{DateTime, Local};
use std::cmp::Reverse;

use crate::Occurrence;

/// Classify every occurrence at `now` and split the feed into views
pub fn build_snapshot(
    occurrences: &[Occurrence],
    classifier: &SessionTemporalClassifier,
    now: DateTime<Local>,
    has_more: bool,
) -> FeedSnapshot {
    let items: Vec<FeedItem> = occurrences
        .iter()
        .map(|o| o.to_item(classifier.state(now, &o.session)))
        .collect();

    let mut current: Vec<FeedItem> = items
        .iter()
        .filter(|i| i.temporal == TemporalState::Now)
        .cloned()
        .collect();
    current.sort_by_key(|i| i.session.bounds().1);

    let upcoming: Vec<FeedItem> = items
        .iter()
        .filter(|i| i.temporal.is_upcoming())
        .cloned()
        .collect();

    let mut history: Vec<FeedItem> = items
        .iter()
        .filter(|i| i.temporal.is_history())
        .cloned()
        .collect();
    history.sort_by_key(|i| Reverse(i.session.bounds().1));

    let hero = current
        .first()
        .or_else(|| upcoming.iter().find(|i| i.temporal == TemporalState::Soon))
        .or_else(|| upcoming.iter().find(|i| i.temporal == TemporalState::Later))
        .cloned();

    FeedSnapshot {
        items,
        current,
        hero,
        upcoming,
        history,
        has_more,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::{ActivityKind, ActivityRef, FeedParent, Session, SessionParent};
    use attend_util::{ProcessId, ProjectId, SessionId};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn session(id: i64, start: u32, end: u32) -> Session {
        Session {
            id: SessionId::new(id),
            parent: SessionParent::Process(ProcessId::new(1)),
            date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            start: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
        }
    }

    fn feed(sessions: Vec<Session>) -> Vec<Occurrence> {
        let parent = FeedParent {
            activity: ActivityRef::Project(ProjectId::new(1)),
            title: "Huertos".into(),
            sessions,
        };
        Occurrence::flatten(ActivityKind::Project, &parent)
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 14, h, m, 0).unwrap()
    }

    fn ids(items: &[FeedItem]) -> Vec<i64> {
        items.iter().map(|i| i.session.id.get()).collect()
    }

    #[test]
    fn views_split_by_temporal_state() {
        let occ = feed(vec![
            session(1, 6, 7),
            session(2, 9, 12),
            session(3, 10, 11),
            session(4, 13, 14),
            session(5, 20, 21),
            session(6, 1, 2),
        ]);
        let classifier = SessionTemporalClassifier::new(180);
        let snap = build_snapshot(&occ, &classifier, at(10, 30), true);

        assert_eq!(ids(&snap.current), vec![3, 2]);
        assert_eq!(snap.hero.as_ref().map(|h| h.session.id.get()), Some(3));
        assert_eq!(ids(&snap.upcoming), vec![4, 5]);
        assert_eq!(ids(&snap.history), vec![1, 6]);
        assert!(snap.has_more);
        assert_eq!(snap.items[0].key, "P-1");
        assert_eq!(snap.items[0].session_total, 6);
    }

    #[test]
    fn hero_falls_back_to_soon_then_later() {
        let classifier = SessionTemporalClassifier::new(180);
        let occ = feed(vec![session(1, 20, 21), session(2, 12, 13)]);
        let snap = build_snapshot(&occ, &classifier, at(10, 0), false);
        assert_eq!(snap.hero.map(|h| h.session.id.get()), Some(2));

        let occ = feed(vec![session(1, 20, 21)]);
        let snap = build_snapshot(&occ, &classifier, at(10, 0), false);
        assert_eq!(snap.hero.map(|h| h.temporal), Some(TemporalState::Later));

        let snap = build_snapshot(&occ, &classifier, at(23, 30), false);
        assert!(snap.hero.is_none());
    }
}
