//! Network access for the offline cache.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, header};
use tracing::{debug, instrument};
use url::Url;

use super::storage::CachedResponse;

/// A trait for fetching assets over the network.
/// In production this is [`ReqwestFetch`]; tests count invocations to prove cache hits never
/// reach it.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> anyhow::Result<CachedResponse>;
}

/// The concrete implementation of [`Fetch`].
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: Client,
}

impl ReqwestFetch {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    #[instrument(skip_all, fields(url = %url), err)]
    async fn fetch(&self, url: &Url) -> anyhow::Result<CachedResponse> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        debug!(status = status.as_u16(), bytes = body.len(), "Fetched asset");
        Ok(CachedResponse {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            body,
            fetched_at: Utc::now(),
        })
    }
}
