//! In-memory named caches of URL to response.

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

/// A stored response, returned verbatim on a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub fetched_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut builder = Response::builder().status(status);
        if let Some(content_type) = &self.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        match builder.body(Body::from(self.body)) {
            Ok(response) => response,
            // Only reachable with a content type that is not a valid header value
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// One named cache.
#[derive(Debug, Default)]
pub struct Cache {
    entries: DashMap<String, CachedResponse>,
}

impl Cache {
    /// Exact-URL lookup
    pub fn match_url(&self, url: &Url) -> Option<CachedResponse> {
        self.entries.get(url.as_str()).map(|entry| entry.value().clone())
    }

    pub fn put(&self, url: &Url, response: CachedResponse) {
        self.entries.insert(url.to_string(), response);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide set of named caches. Safe to share between requests.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: DashMap<String, Arc<Cache>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the cache called `name`, creating it if absent
    pub fn open(&self, name: &str) -> Arc<Cache> {
        self.caches.entry(name.to_string()).or_default().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches.get(name).map(|entry| entry.value().clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn delete(&self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
