//! Offline asset cache.
//!
//! A server-side rendition of the page's service-worker cache: a named cache is populated with a
//! fixed asset list on install and then served cache-first. The same cache name and asset list
//! are rendered into `/sw.js` (see [`worker`]) so the browser cache and this one agree.

use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, info, instrument, warn};
use url::{Origin, Url};

use crate::config::OfflineConfig;

pub mod fetch;
pub mod storage;
pub mod worker;

pub use fetch::{Fetch, ReqwestFetch};
pub use storage::{Cache, CacheStorage, CachedResponse};

#[derive(ThisError, Debug)]
pub enum OfflineError {
    #[error("invalid asset URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to fetch {url}: {reason:#}")]
    Fetch { url: Url, reason: anyhow::Error },

    #[error("{url} returned status {status}")]
    BadStatus { url: Url, status: u16 },
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

pub struct OfflineCache {
    cache_name: String,
    base_url: Url,
    /// Asset list as written in configuration, rendered into the service worker
    raw_assets: Vec<String>,
    /// Asset list resolved against `base_url`
    assets: Vec<Url>,
    origins: HashSet<Origin>,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetch>,
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("cache_name", &self.cache_name)
            .field("base_url", &self.base_url.as_str())
            .field("assets", &self.assets.len())
            .finish()
    }
}

impl OfflineCache {
    pub fn new(config: &OfflineConfig, storage: Arc<CacheStorage>, fetcher: Arc<dyn Fetch>) -> Result<Self, OfflineError> {
        let assets = config
            .assets
            .iter()
            .map(|asset| resolve_against(&config.base_url, asset))
            .collect::<Result<Vec<_>, _>>()?;
        let origins = assets.iter().map(Url::origin).collect();

        Ok(Self {
            cache_name: config.cache_name.clone(),
            base_url: config.base_url.clone(),
            raw_assets: config.assets.clone(),
            assets,
            origins,
            storage,
            fetcher,
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Resolved asset URLs, in install order
    pub fn assets(&self) -> &[Url] {
        &self.assets
    }

    pub fn raw_assets(&self) -> &[String] {
        &self.raw_assets
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    /// Resolve a URL as the page would, relative to the base URL
    pub fn resolve(&self, url: &str) -> Result<Url, OfflineError> {
        resolve_against(&self.base_url, url)
    }

    /// Whether `url` belongs to an origin the page loads cached assets from
    pub fn controls(&self, url: &Url) -> bool {
        self.origins.contains(&url.origin())
    }

    /// Populate the named cache with every asset, then delete caches left by older versions.
    ///
    /// All assets are fetched before anything is stored: if any fetch fails or returns a
    /// non-success status, the install fails and the cache is left untouched.
    #[instrument(skip(self), fields(cache_name = %self.cache_name, assets = self.assets.len()), err)]
    pub async fn install(&self) -> Result<usize, OfflineError> {
        let responses = try_join_all(self.assets.iter().map(|url| self.fetch_asset(url))).await?;

        let cache = self.storage.open(&self.cache_name);
        for (url, response) in self.assets.iter().zip(responses) {
            cache.put(url, response);
        }

        let purged = self.purge_stale();
        info!(cached = cache.len(), purged = purged.len(), "Offline cache installed");
        Ok(cache.len())
    }

    async fn fetch_asset(&self, url: &Url) -> Result<CachedResponse, OfflineError> {
        let response = self.fetcher.fetch(url).await.map_err(|reason| OfflineError::Fetch {
            url: url.clone(),
            reason,
        })?;
        if !response.is_success() {
            return Err(OfflineError::BadStatus {
                url: url.clone(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Delete every cache not named by the current version. Returns the deleted names.
    pub fn purge_stale(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();
        for name in &stale {
            if self.storage.delete(name) {
                warn!(cache_name = %name, "Deleted stale offline cache");
            }
        }
        stale
    }

    /// Cache-first lookup: a cached entry is returned as stored; a miss goes to the network and
    /// the response is passed through without being cached.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<(CachedResponse, CacheStatus), OfflineError> {
        if let Some(cached) = self.storage.get(&self.cache_name).and_then(|cache| cache.match_url(url)) {
            debug!("Serving asset from cache");
            return Ok((cached, CacheStatus::Hit));
        }

        debug!("Cache miss, fetching from network");
        let response = self.fetcher.fetch(url).await.map_err(|reason| OfflineError::Fetch {
            url: url.clone(),
            reason,
        })?;
        Ok((response, CacheStatus::Miss))
    }
}

fn resolve_against(base_url: &Url, url: &str) -> Result<Url, OfflineError> {
    base_url.join(url).map_err(|source| OfflineError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}
