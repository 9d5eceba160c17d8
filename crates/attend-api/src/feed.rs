//! Session feed wire types

use attend_util::PeriodId;
use serde::{Deserialize, Serialize};

use crate::{ActivityRef, Session, TemporalState};

/// Which academic period a feed is filtered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSelector {
    /// The running period, else the first planned one
    #[default]
    Current,
    All,
    Id(PeriodId),
}

/// An upstream parent entity with the sessions it schedules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedParent {
    pub activity: ActivityRef,
    pub title: String,
    pub sessions: Vec<Session>,
}

/// One page returned by a feed source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedParent>,
    /// Explicit continuation; absent when the source does not say
    #[serde(default)]
    pub next_page: Option<u32>,
}

/// A session occurrence as shown in the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// `P-{id}` or `E-{id}` of the parent activity
    pub key: String,
    pub activity: ActivityRef,
    pub title: String,
    pub session: Session,
    /// 1-based position among the parent's sessions ordered by (date, start)
    pub session_index: u32,
    pub session_total: u32,
    pub temporal: TemporalState,
}

/// The accumulated feed and its derived views
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Feed order: each fetched batch sorted by (date, start), appended
    pub items: Vec<FeedItem>,
    pub current: Vec<FeedItem>,
    pub hero: Option<FeedItem>,
    pub upcoming: Vec<FeedItem>,
    pub history: Vec<FeedItem>,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_selector_wire_format() {
        assert_eq!(serde_json::to_string(&PeriodSelector::Current).unwrap(), "\"current\"");
        assert_eq!(
            serde_json::to_string(&PeriodSelector::Id(PeriodId::new(3))).unwrap(),
            r#"{"id":3}"#
        );
    }

    #[test]
    fn page_without_continuation() {
        let page: FeedPage = serde_json::from_str(r#"{"items":[]}"#).unwrap();
        assert!(page.next_page.is_none());
    }
}
