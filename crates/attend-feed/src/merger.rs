//! Merge of independently paginated sources into one feed

use attend_api::FeedPage;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{FeedFilter, Occurrence, OccurrenceKey, PageSource};

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next_page: u32,
    has_more: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            next_page: 1,
            has_more: true,
        }
    }
}

/// What one fetch cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Occurrences appended to the feed
    pub added: usize,
    /// Sources skipped this cycle; they are asked again next cycle
    pub timed_out: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Stops pagination of a merger from outside
#[derive(Debug, Clone)]
pub struct FeedCancel(Arc<watch::Sender<bool>>);

impl FeedCancel {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Accumulates a deduplicated, append-only feed from N sources.
///
/// Each cycle pulls one page from every source that still has data,
/// drops occurrences seen before, sorts the new batch by (date, start)
/// and appends it. Earlier batches are never reordered.
pub struct PagedFeedMerger {
    sources: Vec<Arc<dyn PageSource>>,
    cursors: Vec<Cursor>,
    page_size: u32,
    source_timeout: Duration,
    filter: FeedFilter,
    seen: HashSet<OccurrenceKey>,
    items: Vec<Occurrence>,
    cancel: Arc<watch::Sender<bool>>,
}

impl PagedFeedMerger {
    pub fn new(sources: Vec<Arc<dyn PageSource>>, page_size: u32, source_timeout: Duration) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cursors: vec![Cursor::default(); sources.len()],
            sources,
            page_size,
            source_timeout,
            filter: FeedFilter::default(),
            seen: HashSet::new(),
            items: Vec::new(),
            cancel: Arc::new(cancel),
        }
    }

    pub fn items(&self) -> &[Occurrence] {
        &self.items
    }

    pub fn filter(&self) -> FeedFilter {
        self.filter
    }

    /// True while any source may still return data
    pub fn has_more(&self) -> bool {
        self.cursors.iter().any(|c| c.has_more)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn cancel_handle(&self) -> FeedCancel {
        FeedCancel(self.cancel.clone())
    }

    /// Drop everything fetched so far and start again from page 1
    pub fn reset(&mut self, filter: FeedFilter) {
        debug!(?filter, "Feed reset");
        self.filter = filter;
        self.seen.clear();
        self.items.clear();
        self.cursors.iter_mut().for_each(|c| *c = Cursor::default());
        self.cancel.send_replace(false);
    }

    /// Run one fetch cycle
    pub async fn fetch_next(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        if self.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        let mut tasks = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let cursor = self.cursors[idx];
            if !cursor.has_more {
                continue;
            }
            let source = Arc::clone(source);
            let filter = self.filter;
            let page_size = self.page_size;
            let limit = self.source_timeout;
            tasks.spawn(async move {
                let fetched =
                    tokio::time::timeout(limit, source.fetch(cursor.next_page, page_size, &filter))
                        .await;
                (idx, fetched)
            });
        }
        if tasks.is_empty() {
            return report;
        }

        let mut pages: Vec<Option<FeedPage>> = vec![None; self.sources.len()];
        let mut cancel_rx = self.cancel.subscribe();
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((idx, Ok(Ok(page)))) => pages[idx] = Some(page),
                        Ok((idx, Ok(Err(e)))) => {
                            warn!(source = idx, error = %e, "Feed source failed");
                            report.failed += 1;
                            if !e.is_retryable() {
                                self.cursors[idx].has_more = false;
                            }
                        }
                        Ok((idx, Err(_))) => {
                            warn!(source = idx, timeout = ?self.source_timeout, "Feed source timed out");
                            report.timed_out += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "Feed source task aborted");
                            report.failed += 1;
                        }
                    }
                }
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                    tasks.abort_all();
                    debug!("Feed pagination cancelled");
                    report.cancelled = true;
                    return report;
                }
            }
        }

        let mut batch = Vec::new();
        for (idx, page) in pages.into_iter().enumerate() {
            let Some(page) = page else { continue };

            let cursor = &mut self.cursors[idx];
            cursor.has_more =
                page.next_page.is_some() || page.items.len() as u32 >= self.page_size;
            cursor.next_page = page.next_page.unwrap_or(cursor.next_page + 1);

            let kind = self.sources[idx].kind();
            for parent in &page.items {
                for occurrence in Occurrence::flatten(kind, parent) {
                    if self.seen.insert(occurrence.key()) {
                        batch.push(occurrence);
                    }
                }
            }
        }

        batch.sort_by_key(|o| (o.session.date, o.session.start));
        report.added = batch.len();
        self.items.extend(batch);

        debug!(
            added = report.added,
            total = self.items.len(),
            has_more = self.has_more(),
            "Feed cycle done"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockSource;
    use attend_api::{ActivityKind, ActivityRef, FeedParent, Session, SessionParent};
    use attend_util::{EventId, PeriodId, ProcessId, ProjectId, SessionId};
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

    fn project(id: i64, sessions: Vec<Session>) -> FeedParent {
        FeedParent {
            activity: ActivityRef::Project(ProjectId::new(id)),
            title: format!("Project {}", id),
            sessions,
        }
    }

    fn event(id: i64, sessions: Vec<Session>) -> FeedParent {
        FeedParent {
            activity: ActivityRef::Event(EventId::new(id)),
            title: format!("Event {}", id),
            sessions,
        }
    }

    fn page(items: Vec<FeedParent>) -> FeedPage {
        FeedPage {
            items,
            next_page: None,
        }
    }

    fn merger(sources: Vec<Arc<dyn PageSource>>, page_size: u32) -> PagedFeedMerger {
        PagedFeedMerger::new(sources, page_size, Duration::from_secs(2))
    }

    fn ids(m: &PagedFeedMerger) -> Vec<i64> {
        m.items().iter().map(|o| o.session.id.get()).collect()
    }

    #[tokio::test]
    async fn batches_are_sorted_and_appended() {
        let projects = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![
                page(vec![project(1, vec![session(10, 16, 9)]), project(2, vec![session(11, 14, 9)])]),
                page(vec![project(3, vec![session(12, 13, 9)])]),
            ],
        ));
        let events = Arc::new(MockSource::new(
            ActivityKind::Event,
            vec![page(vec![event(1, vec![session(20, 15, 9)])])],
        ));
        let mut m = merger(vec![projects, events], 2);

        let first = m.fetch_next().await;
        assert_eq!(first.added, 3);
        assert_eq!(ids(&m), vec![11, 20, 10]);
        assert!(m.has_more());

        m.fetch_next().await;
        // The older session of the second batch stays after the first batch
        assert_eq!(ids(&m), vec![11, 20, 10, 12]);
        assert!(!m.has_more());
    }

    #[tokio::test]
    async fn overlapping_pages_are_never_emitted_twice() {
        let shared = project(1, vec![session(1, 14, 9), session(2, 15, 9)]);
        let source = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![
                FeedPage {
                    items: vec![shared.clone()],
                    next_page: Some(2),
                },
                FeedPage {
                    items: vec![shared.clone(), project(2, vec![session(3, 16, 9)])],
                    next_page: Some(3),
                },
                page(vec![shared]),
            ],
        ));
        let mut m = merger(vec![source], 10);

        for _ in 0..5 {
            m.fetch_next().await;
        }
        assert_eq!(ids(&m), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn same_session_id_from_different_kinds_is_distinct() {
        let projects = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![page(vec![project(1, vec![session(5, 14, 9)])])],
        ));
        let events = Arc::new(MockSource::new(
            ActivityKind::Event,
            vec![page(vec![event(1, vec![session(5, 14, 10)])])],
        ));
        let mut m = merger(vec![projects, events], 10);
        assert_eq!(m.fetch_next().await.added, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_is_skipped_and_retried() {
        let slow = Arc::new(MockSource::new(
            ActivityKind::Event,
            vec![page(vec![event(1, vec![session(2, 14, 10)])])],
        ));
        slow.set_delay(Some(Duration::from_secs(30)));
        let fast = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![page(vec![project(1, vec![session(1, 14, 9)])])],
        ));
        let mut m = merger(vec![fast, slow.clone()], 10);

        let first = m.fetch_next().await;
        assert_eq!(first.timed_out, 1);
        assert_eq!(ids(&m), vec![1]);
        assert!(m.has_more());

        slow.set_delay(None);
        let second = m.fetch_next().await;
        assert_eq!(second.added, 1);
        assert_eq!(ids(&m), vec![1, 2]);
        assert_eq!(slow.requested_pages(), vec![1, 1]);
    }

    #[tokio::test]
    async fn failing_source_does_not_fail_the_merge() {
        let broken = Arc::new(MockSource::new(ActivityKind::Event, vec![]));
        broken.set_fail(true);
        let ok = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![page(vec![project(1, vec![session(1, 14, 9)])])],
        ));
        let mut m = merger(vec![ok, broken], 10);

        let report = m.fetch_next().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.added, 1);
    }

    #[tokio::test]
    async fn reset_clears_seen_and_refetches_from_first_page() {
        let source = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![page(vec![project(1, vec![session(1, 14, 9)])])],
        ));
        let mut m = merger(vec![source.clone()], 10);
        m.fetch_next().await;
        assert!(!m.has_more());

        let filter = FeedFilter {
            period: Some(PeriodId::new(2)),
            site: None,
        };
        m.reset(filter);
        assert!(m.items().is_empty());
        m.fetch_next().await;
        assert_eq!(ids(&m), vec![1]);
        assert_eq!(source.requested_pages(), vec![1, 1]);
        assert_eq!(source.last_filter(), Some(filter));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_in_flight_cycle() {
        let slow = Arc::new(MockSource::new(
            ActivityKind::Project,
            vec![page(vec![project(1, vec![session(1, 14, 9)])])],
        ));
        slow.set_delay(Some(Duration::from_secs(1)));
        let mut m = merger(vec![slow], 10);
        let cancel = m.cancel_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let report = m.fetch_next().await;
        assert!(report.cancelled);
        assert!(m.items().is_empty());
        assert!(m.fetch_next().await.cancelled);

        m.reset(FeedFilter::default());
        assert!(!m.is_cancelled());
    }
}
