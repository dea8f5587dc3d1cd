//! HTTP handlers for the offline asset cache.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::offline::AssetQuery,
    errors::{Error, Result},
    offline::worker::render_service_worker,
};

/// Serve the service worker for the active cache name and asset list. Without a server-side
/// cache the configured values are used directly.
#[instrument(skip_all)]
pub async fn service_worker(State(state): State<AppState>) -> Result<Response> {
    let script = match state.offline.as_ref() {
        Some(offline) => render_service_worker(offline.cache_name(), offline.raw_assets())?,
        None => render_service_worker(&state.config.offline.cache_name, &state.config.offline.assets)?,
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            // Browsers must pick up a bumped cache name on the next visit
            (header::CACHE_CONTROL, "no-cache"),
        ],
        script,
    )
        .into_response())
}

/// Cache-first lookup of a page asset. Misses go to the network only for the origins the page
/// loads its cached assets from.
#[instrument(skip_all, fields(url))]
pub async fn offline_asset(State(state): State<AppState>, query: std::result::Result<Query<AssetQuery>, QueryRejection>) -> Result<Response> {
    let Some(offline) = state.offline.as_ref() else {
        return Err(Error::NotFound {
            resource: "Cache hors ligne".to_string(),
        });
    };

    let Query(query) = query.map_err(|rejection| Error::BadRequest {
        message: rejection.body_text(),
    })?;
    let url = offline.resolve(&query.url).map_err(|e| Error::BadRequest { message: e.to_string() })?;
    tracing::Span::current().record("url", url.as_str());

    if !offline.controls(&url) {
        debug!("URL outside the cached origins");
        return Err(Error::NotFound {
            resource: url.to_string(),
        });
    }

    let (cached, status) = offline.fetch(&url).await?;
    let mut response = cached.into_response();
    response.headers_mut().insert(HeaderName::from_static("x-cache"), HeaderValue::from_static(status.as_str()));
    Ok(response)
}
