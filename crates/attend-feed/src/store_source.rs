//! Page source backed by the local store

use async_trait::async_trait;
use attend_api::{ActivityKind, ActivityRef, FeedPage, FeedParent};
use attend_store::{CatalogQuery, Store, StoreResult};
use std::sync::Arc;

use crate::{FeedError, FeedFilter, FeedResult, PageSource};

/// Lists projects or events from the store, one catalog page per fetch
pub struct StoreSource {
    store: Arc<dyn Store>,
    kind: ActivityKind,
}

impl StoreSource {
    pub fn new(store: Arc<dyn Store>, kind: ActivityKind) -> Self {
        Self { store, kind }
    }
}

fn load_page(
    store: &dyn Store,
    kind: ActivityKind,
    query: &CatalogQuery,
) -> StoreResult<Vec<FeedParent>> {
    let parents: Vec<(ActivityRef, String)> = match kind {
        ActivityKind::Project => store
            .list_projects(query)?
            .into_iter()
            .map(|p| (ActivityRef::Project(p.id), p.title))
            .collect(),
        ActivityKind::Event => store
            .list_events(query)?
            .into_iter()
            .map(|e| (ActivityRef::Event(e.id), e.title))
            .collect(),
    };

    parents
        .into_iter()
        .map(|(activity, title)| {
            Ok(FeedParent {
                sessions: store.list_activity_sessions(activity)?,
                activity,
                title,
            })
        })
        .collect()
}

#[async_trait]
impl PageSource for StoreSource {
    fn kind(&self) -> ActivityKind {
        self.kind
    }

    async fn fetch(&self, page: u32, page_size: u32, filter: &FeedFilter) -> FeedResult<FeedPage> {
        // Offsets past u32 hold nothing
        let Some(offset) = page.saturating_sub(1).checked_mul(page_size) else {
            return Ok(FeedPage::default());
        };
        let query = CatalogQuery {
            period: filter.period,
            site: filter.site,
            offset,
            limit: page_size,
        };
        let store = Arc::clone(&self.store);
        let kind = self.kind;

        let items = tokio::task::spawn_blocking(move || load_page(store.as_ref(), kind, &query))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))??;

        // Continuation is left to the page-size heuristic
        Ok(FeedPage {
            items,
            next_page: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::{ActivityState, Project, ProjectType, Session, SessionParent, Process};
    use attend_store::SqliteStore;
    use attend_util::{PeriodId, ProcessId, ProjectId, SessionId, SiteId};
    use chrono::{NaiveDate, NaiveTime};

    fn seeded() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        for id in 1..=3 {
            store
                .upsert_project(&Project {
                    id: ProjectId::new(id),
                    code: format!("VM-{:02}", id),
                    title: format!("Project {}", id),
                    project_type: ProjectType::Free,
                    levels: vec![],
                    site_id: SiteId::new(1),
                    period_id: PeriodId::new(if id == 3 { 2 } else { 1 }),
                    state: ActivityState::InProgress,
                    required_minutes: 60,
                })
                .unwrap();
            store
                .upsert_process(&Process {
                    id: ProcessId::new(id),
                    project_id: ProjectId::new(id),
                    name: "Main".into(),
                    required_minutes: 60,
                })
                .unwrap();
            store
                .upsert_session(&Session {
                    id: SessionId::new(id),
                    parent: SessionParent::Process(ProcessId::new(id)),
                    date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
                    start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                })
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn pages_follow_catalog_order_and_filter() {
        let source = StoreSource::new(seeded(), ActivityKind::Project);
        let filter = FeedFilter {
            period: Some(PeriodId::new(1)),
            site: None,
        };

        let first = source.fetch(1, 1, &filter).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.items[0].activity, ActivityRef::Project(ProjectId::new(1)));
        assert_eq!(first.items[0].sessions.len(), 1);

        let second = source.fetch(2, 1, &filter).await.unwrap();
        assert_eq!(second.items[0].activity, ActivityRef::Project(ProjectId::new(2)));

        let third = source.fetch(3, 1, &filter).await.unwrap();
        assert!(third.items.is_empty());
    }

    #[tokio::test]
    async fn events_source_is_empty_without_events() {
        let source = StoreSource::new(seeded(), ActivityKind::Event);
        let page = source.fetch(1, 10, &FeedFilter::default()).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn page_past_u32_offset_is_empty() {
        let source = StoreSource::new(seeded(), ActivityKind::Project);
        let page = source
            .fetch(u32::MAX, 24, &FeedFilter::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_page, None);
    }
}
