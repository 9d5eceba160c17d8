//! HTTP page source

use async_trait::async_trait;
use attend_api::{ActivityKind, FeedPage};
use std::time::Duration;
use tracing::debug;

use crate::{FeedFilter, FeedResult, PageSource};

/// Fetches `GET {url}?page=N&size=M[&period=P][&site=S]` returning a JSON [`FeedPage`]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    kind: ActivityKind,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, kind: ActivityKind, timeout: Duration) -> FeedResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            kind,
        })
    }
}

/// Query parameters for one page request
pub fn page_query(page: u32, page_size: u32, filter: &FeedFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![("page", page.to_string()), ("size", page_size.to_string())];
    if let Some(period) = filter.period {
        query.push(("period", period.to_string()));
    }
    if let Some(site) = filter.site {
        query.push(("site", site.to_string()));
    }
    query
}

#[async_trait]
impl PageSource for HttpSource {
    fn kind(&self) -> ActivityKind {
        self.kind
    }

    async fn fetch(&self, page: u32, page_size: u32, filter: &FeedFilter) -> FeedResult<FeedPage> {
        debug!(url = %self.url, page, page_size, "Fetching feed page");
        let page = self
            .client
            .get(&self.url)
            .query(&page_query(page, page_size, filter))
            .send()
            .await?
            .error_for_status()?
            .json::<FeedPage>()
            .await?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_util::PeriodId;

    #[test]
    fn query_includes_only_set_filters() {
        let q = page_query(2, 24, &FeedFilter::default());
        assert_eq!(q, vec![("page", "2".to_string()), ("size", "24".to_string())]);

        let q = page_query(
            1,
            10,
            &FeedFilter {
                period: Some(PeriodId::new(7)),
                site: None,
            },
        );
        assert!(q.contains(&("period", "7".to_string())));
    }
}
