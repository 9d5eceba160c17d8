//! Conditional polling with change tokens
//!
//! The last known change token goes out with every request. A not-modified
//! answer is a success that keeps the cached data and token; any other
//! failure propagates to the caller.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{FeedError, FeedResult};

/// Answer to one conditional request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse<T> {
    NotModified,
    Modified {
        data: T,
        change_token: Option<String>,
    },
}

/// Carries one conditional request to a resource
#[async_trait]
pub trait PollTransport: Send + Sync {
    type Data: Send;

    async fn fetch(
        &self,
        resource: &str,
        change_token: Option<&str>,
    ) -> FeedResult<PollResponse<Self::Data>>;
}

/// Outcome of [`ConditionalPoller::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NotModified,
    Modified,
}

/// Polls one resource, caching the latest data and change token
pub struct ConditionalPoller<T: PollTransport> {
    transport: T,
    resource: String,
    change_token: Option<String>,
    data: Option<T::Data>,
}

impl<T: PollTransport> ConditionalPoller<T> {
    pub fn new(transport: T, resource: impl Into<String>) -> Self {
        Self {
            transport,
            resource: resource.into(),
            change_token: None,
            data: None,
        }
    }

    pub fn data(&self) -> Option<&T::Data> {
        self.data.as_ref()
    }

    pub fn change_token(&self) -> Option<&str> {
        self.change_token.as_deref()
    }

    pub async fn poll(&mut self) -> FeedResult<PollOutcome> {
        match self
            .transport
            .fetch(&self.resource, self.change_token.as_deref())
            .await?
        {
            PollResponse::NotModified => {
                debug!(resource = %self.resource, "Not modified");
                Ok(PollOutcome::NotModified)
            }
            PollResponse::Modified { data, change_token } => {
                debug!(resource = %self.resource, token = ?change_token, "Modified");
                self.data = Some(data);
                self.change_token = change_token;
                Ok(PollOutcome::Modified)
            }
        }
    }

    /// Poll every `interval` until `on_change` returns false.
    ///
    /// Retryable failures are logged and retried on the next tick; others end
    /// the loop with the error.
    pub async fn watch<F>(&mut self, interval: Duration, mut on_change: F) -> FeedResult<()>
    where
        F: FnMut(&T::Data) -> bool,
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.poll().await {
                Ok(PollOutcome::Modified) => {
                    if let Some(data) = &self.data
                        && !on_change(data)
                    {
                        return Ok(());
                    }
                }
                Ok(PollOutcome::NotModified) => {}
                Err(e) if e.is_retryable() => {
                    warn!(resource = %self.resource, error = %e, "Poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `GET {base_url}/{resource}` with `If-None-Match`; 304 means not modified
pub struct HttpTransport<D> {
    client: reqwest::Client,
    base_url: String,
    _data: PhantomData<fn() -> D>,
}

impl<D> HttpTransport<D> {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            _data: PhantomData,
        })
    }
}

#[async_trait]
impl<D> PollTransport for HttpTransport<D>
where
    D: DeserializeOwned + Send + 'static,
{
    type Data = D;

    async fn fetch(
        &self,
        resource: &str,
        change_token: Option<&str>,
    ) -> FeedResult<PollResponse<D>> {
        let url = format!("{}/{}", self.base_url, resource.trim_start_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(token) = change_token {
            request = request.header(IF_NONE_MATCH, token);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(PollResponse::NotModified);
        }
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let change_token = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.json::<D>().await?;
        Ok(PollResponse::Modified { data, change_token })
    }
}
