//! Mock page source for testing

use async_trait::async_trait;
use attend_api::{ActivityKind, FeedPage};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{FeedError, FeedFilter, FeedResult, PageSource};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serves canned pages; page `n` is `pages[n - 1]`, later pages are empty
pub struct MockSource {
    kind: ActivityKind,
    pages: Vec<FeedPage>,
    requests: Arc<Mutex<Vec<(u32, FeedFilter)>>>,

    /// Configure fetch to fail with a transport error
    pub fail: Arc<Mutex<bool>>,

    /// Delay before answering (simulates a slow upstream)
    pub delay: Arc<Mutex<Option<Duration>>>,
}

impl MockSource {
    pub fn new(kind: ActivityKind, pages: Vec<FeedPage>) -> Self {
        Self {
            kind,
            pages,
            requests: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Pages asked for, in order
    pub fn requested_pages(&self) -> Vec<u32> {
        lock(&self.requests).iter().map(|(page, _)| *page).collect()
    }

    pub fn last_filter(&self) -> Option<FeedFilter> {
        lock(&self.requests).last().map(|(_, filter)| *filter)
    }
}

#[async_trait]
impl PageSource for MockSource {
    fn kind(&self) -> ActivityKind {
        self.kind
    }

    async fn fetch(&self, page: u32, _page_size: u32, filter: &FeedFilter) -> FeedResult<FeedPage> {
        lock(&self.requests).push((page, *filter));

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.fail) {
            return Err(FeedError::Transport("Mock fetch failure".into()));
        }

        let idx = page.saturating_sub(1) as usize;
        Ok(self.pages.get(idx).cloned().unwrap_or_default())
    }
}
