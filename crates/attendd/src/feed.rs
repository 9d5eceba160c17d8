//! Per-client session feed views

use attend_api::{ActivityKind, FeedSnapshot, PeriodSelector};
use attend_config::FeedPolicy;
use attend_core::{default_period, SessionTemporalClassifier};
use attend_feed::{
    build_snapshot, FeedCancel, FeedFilter, FeedResult, HttpSource, PageSource, PagedFeedMerger,
    StoreSource,
};
use attend_store::Store;
use attend_util::{AttendError, ClientId, Clock, RefreshGate, SiteId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// The local catalog, plus any remote sources the policy names
pub fn build_sources(
    policy: &FeedPolicy,
    store: &Arc<dyn Store>,
) -> FeedResult<Vec<Arc<dyn PageSource>>> {
    let mut sources: Vec<Arc<dyn PageSource>> = vec![
        Arc::new(StoreSource::new(store.clone(), ActivityKind::Project)),
        Arc::new(StoreSource::new(store.clone(), ActivityKind::Event)),
    ];

    for source in &policy.sources {
        info!(kind = source.kind.as_str(), url = %source.url, "Remote feed source");
        sources.push(Arc::new(HttpSource::new(
            source.url.clone(),
            source.kind,
            policy.source_timeout,
        )?));
    }
    Ok(sources)
}

/// One client's feed: the merger, its gate and the last snapshot served.
///
/// A view serves a single filter for its whole life.
struct FeedView {
    filter: FeedFilter,
    gate: RefreshGate,
    cancel: FeedCancel,
    merger: Mutex<PagedFeedMerger>,
    last: std::sync::Mutex<FeedSnapshot>,
}

impl FeedView {
    fn last(&self) -> FeedSnapshot {
        match self.last.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember(&self, snapshot: &FeedSnapshot) {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = snapshot.clone();
    }
}

/// Feed views keyed by connection
pub struct FeedViews {
    policy: FeedPolicy,
    sources: Vec<Arc<dyn PageSource>>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    classifier: SessionTemporalClassifier,
    views: Mutex<HashMap<ClientId, Arc<FeedView>>>,
}

impl FeedViews {
    pub fn new(
        policy: FeedPolicy,
        sources: Vec<Arc<dyn PageSource>>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let classifier = SessionTemporalClassifier::new(policy.recent_window_minutes);
        Self {
            policy,
            sources,
            store,
            clock,
            classifier,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a period selector and the caller's site into a filter
    pub fn filter_for(
        &self,
        period: PeriodSelector,
        site: Option<SiteId>,
    ) -> Result<FeedFilter, AttendError> {
        let period = match period {
            PeriodSelector::All => None,
            PeriodSelector::Id(id) => Some(id),
            PeriodSelector::Current => {
                let periods = self.store.list_periods()?;
                default_period(&periods).map(|p| p.id)
            }
        };
        Ok(FeedFilter { period, site })
    }

    fn new_view(&self, filter: FeedFilter) -> FeedView {
        let merger = PagedFeedMerger::new(
            self.sources.clone(),
            self.policy.page_size,
            self.policy.source_timeout,
        );
        FeedView {
            filter,
            gate: RefreshGate::new(self.policy.refresh_debounce),
            cancel: merger.cancel_handle(),
            merger: Mutex::new(merger),
            last: std::sync::Mutex::new(FeedSnapshot::default()),
        }
    }

    fn snapshot(&self, merger: &PagedFeedMerger) -> FeedSnapshot {
        build_snapshot(
            merger.items(),
            &self.classifier,
            self.clock.now(),
            merger.has_more(),
        )
    }

    /// Load page 1 for `filter`.
    ///
    /// A different filter cancels the current view, even mid-cycle, and
    /// replaces it. Reloading the same filter is a refresh trigger and goes
    /// through the view's gate: while debounced, or while a load or page
    /// fetch is running, it answers with the last snapshot and
    /// `refreshed == false`.
    pub async fn load(&self, client: &ClientId, filter: FeedFilter) -> (FeedSnapshot, bool) {
        let view = {
            let mut views = self.views.lock().await;
            match views.get(client) {
                Some(view) if view.filter == filter => view.clone(),
                _ => {
                    let view = Arc::new(self.new_view(filter));
                    if let Some(old) = views.insert(client.clone(), view.clone()) {
                        old.cancel.cancel();
                        debug!(client_id = %client, ?filter, "Feed filter changed");
                    }
                    view
                }
            }
        };

        let _guard = match view.gate.try_begin(Instant::now()) {
            Ok(guard) => guard,
            Err(denied) => {
                debug!(client_id = %client, ?denied, "Feed load dropped");
                return (view.last(), false);
            }
        };

        let Ok(mut merger) = view.merger.try_lock() else {
            return (view.last(), false);
        };
        merger.reset(filter);
        let report = merger.fetch_next().await;
        debug!(client_id = %client, ?report, "Feed loaded");

        let snapshot = self.snapshot(&merger);
        view.remember(&snapshot);
        (snapshot, !report.cancelled)
    }

    /// Fetch the next page of the client's view.
    ///
    /// Dropped when a cycle is already running or nothing remains. The
    /// page fetch holds the view's gate, so a reload arriving meanwhile is
    /// dropped too.
    pub async fn more(&self, client: &ClientId) -> Result<(FeedSnapshot, bool), AttendError> {
        let view = self
            .views
            .lock()
            .await
            .get(client)
            .cloned()
            .ok_or_else(|| AttendError::validation("no feed loaded"))?;

        let Ok(_guard) = view.gate.try_enter() else {
            return Ok((view.last(), false));
        };
        let Ok(mut merger) = view.merger.try_lock() else {
            return Ok((view.last(), false));
        };
        if !merger.has_more() || merger.is_cancelled() {
            return Ok((self.snapshot(&merger), false));
        }

        let report = merger.fetch_next().await;
        let snapshot = self.snapshot(&merger);
        view.remember(&snapshot);
        Ok((snapshot, !report.cancelled))
    }

    /// Stop pagination for the client's view and forget it
    pub async fn close(&self, client: &ClientId) {
        if let Some(view) = self.views.lock().await.remove(client) {
            view.cancel.cancel();
            debug!(client_id = %client, "Feed view closed");
        }
    }

    pub async fn view_count(&self) -> usize {
        self.views.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::{ActivityRef, FeedPage, FeedParent, Session, SessionParent};
    use attend_feed::MockSource;
    use attend_store::SqliteStore;
    use attend_util::{EventId, FixedClock, PeriodId, SessionId};
    use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
    use std::time::Duration;

    fn parent(id: i64, sessions: &[(i64, u32)]) -> FeedParent {
        FeedParent {
            activity: ActivityRef::Event(EventId::new(id)),
            title: format!("Event {}", id),
            sessions: sessions
                .iter()
                .map(|&(sid, hour)| Session {
                    id: SessionId::new(sid),
                    parent: SessionParent::Event(EventId::new(id)),
                    date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
                    start: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
                })
                .collect(),
        }
    }

    fn views(pages: Vec<FeedPage>, debounce: Duration) -> (FeedViews, Arc<MockSource>) {
        let source = Arc::new(MockSource::new(ActivityKind::Event, pages));
        let policy = FeedPolicy {
            page_size: 1,
            refresh_debounce: debounce,
            ..FeedPolicy::default()
        };
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(
            Local.with_ymd_and_hms(2025, 4, 14, 9, 30, 0).unwrap(),
        ));
        let sources = vec![source.clone() as Arc<dyn PageSource>];
        (FeedViews::new(policy, sources, store, clock), source)
    }

    fn two_pages() -> Vec<FeedPage> {
        vec![
            FeedPage {
                items: vec![parent(1, &[(10, 9)])],
                next_page: Some(2),
            },
            FeedPage {
                items: vec![parent(2, &[(20, 15)])],
                next_page: None,
            },
        ]
    }

    #[tokio::test]
    async fn load_then_more_appends() {
        let (views, _) = views(two_pages(), Duration::ZERO);
        let client = ClientId::new();

        let (first, refreshed) = views.load(&client, FeedFilter::default()).await;
        assert!(refreshed);
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.current.len(), 1);
        assert!(first.has_more);

        let (second, _) = views.more(&client).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.upcoming.len(), 1);
        // a full page may still have a successor
        assert!(second.has_more);

        let (third, refreshed) = views.more(&client).await.unwrap();
        assert!(refreshed);
        assert_eq!(third.items.len(), 2);
        assert!(!third.has_more);

        let (_, refreshed) = views.more(&client).await.unwrap();
        assert!(!refreshed);
    }

    #[tokio::test]
    async fn quick_reload_is_debounced() {
        let (views, source) = views(two_pages(), Duration::from_secs(60));
        let client = ClientId::new();

        views.load(&client, FeedFilter::default()).await;
        let (snapshot, refreshed) = views.load(&client, FeedFilter::default()).await;
        assert!(!refreshed);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(source.requested_pages().len(), 1);
    }

    #[tokio::test]
    async fn new_filter_replaces_view() {
        let (views, source) = views(two_pages(), Duration::from_secs(60));
        let client = ClientId::new();

        views.load(&client, FeedFilter::default()).await;
        let filter = FeedFilter {
            period: Some(PeriodId::new(3)),
            site: None,
        };
        let (_, refreshed) = views.load(&client, filter).await;
        assert!(refreshed);
        assert_eq!(source.last_filter(), Some(filter));
        assert_eq!(views.view_count().await, 1);
    }

    #[tokio::test]
    async fn reload_during_page_fetch_is_dropped() {
        let (views, source) = views(two_pages(), Duration::ZERO);
        let views = Arc::new(views);
        let client = ClientId::new();

        views.load(&client, FeedFilter::default()).await;
        source.set_delay(Some(Duration::from_millis(300)));

        let paging = {
            let views = views.clone();
            let client = client.clone();
            tokio::spawn(async move { views.more(&client).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let (snapshot, refreshed) = views.load(&client, FeedFilter::default()).await;
        assert!(!refreshed);
        assert_eq!(snapshot.items.len(), 1);
        assert!(started.elapsed() < Duration::from_millis(200));

        let (_, refreshed) = views.more(&client).await.unwrap();
        assert!(!refreshed);

        let (paged, refreshed) = paging.await.unwrap().unwrap();
        assert!(refreshed);
        assert_eq!(paged.items.len(), 2);
        assert_eq!(source.requested_pages(), vec![1, 2]);
    }

    #[tokio::test]
    async fn filter_change_during_page_fetch_replaces_view() {
        let (views, source) = views(two_pages(), Duration::ZERO);
        let views = Arc::new(views);
        let client = ClientId::new();

        views.load(&client, FeedFilter::default()).await;
        source.set_delay(Some(Duration::from_millis(300)));

        let paging = {
            let views = views.clone();
            let client = client.clone();
            tokio::spawn(async move { views.more(&client).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let filter = FeedFilter {
            period: Some(PeriodId::new(3)),
            site: None,
        };
        let (snapshot, refreshed) = views.load(&client, filter).await;
        assert!(refreshed);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(source.last_filter(), Some(filter));
        assert_eq!(views.view_count().await, 1);

        let (_, refreshed) = paging.await.unwrap().unwrap();
        assert!(!refreshed);
    }

    #[tokio::test]
    async fn close_forgets_view() {
        let (views, _) = views(two_pages(), Duration::ZERO);
        let client = ClientId::new();

        views.load(&client, FeedFilter::default()).await;
        views.close(&client).await;
        assert_eq!(views.view_count().await, 0);
        assert!(views.more(&client).await.is_err());
    }

    #[tokio::test]
    async fn current_period_resolves_from_store() {
        let (views, _) = views(Vec::new(), Duration::ZERO);
        let filter = views
            .filter_for(PeriodSelector::Current, Some(SiteId::new(2)))
            .unwrap();
        assert_eq!(filter.period, None);
        assert_eq!(filter.site, Some(SiteId::new(2)));

        let filter = views
            .filter_for(PeriodSelector::Id(PeriodId::new(4)), None)
            .unwrap();
        assert_eq!(filter.period, Some(PeriodId::new(4)));
    }
}
