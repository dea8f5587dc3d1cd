//! # drive-relay: browser uploads into Google Drive
//!
//! `drive-relay` accepts image uploads posted from a static web page and streams them into a
//! Google Drive folder using a service account, so the page never holds Drive credentials.
//! It also serves the page's service worker and a server-side copy of its offline asset cache.
//!
//! ## Overview
//!
//! The upload endpoint takes a `multipart/form-data` POST with a single image. The first file
//! part is checked against a MIME allowlist and a size ceiling while it streams through; the
//! bytes are forwarded to the Drive v3 multipart upload API as they arrive, under a
//! timestamp-prefixed name. The browser gets back `{success, fileName, fileId}` or
//! `{success: false, error}` with a French message it can show to the user.
//!
//! ## Architecture
//!
//! - [`api`]: Axum handlers and request/response models
//! - [`upload`]: the parse stage and upload task, connected by a bounded channel
//! - [`drive`]: the [`drive::FileStore`] seam, service-account auth and the Drive REST client
//! - [`credentials`]: reads the service-account key document on every request
//! - [`offline`]: named in-memory caches, cache-first lookup and the service-worker template
//! - [`config`]: YAML plus environment configuration via `figment`
//! - [`errors`]: the error taxonomy and its HTTP mapping
//!
//! ## Configuration
//!
//! Every value has a default, so the relay starts without a configuration file. Only the
//! credentials variable (`GOOGLE_SERVICE_ACCOUNT_CREDENTIALS` by default) must be set, and a
//! missing key is reported per request rather than at startup.
//!
//! ```bash
//! GOOGLE_SERVICE_ACCOUNT_CREDENTIALS="$(cat key.json)" drive-relay -f config.yaml
//! ```

pub mod api;
pub mod config;
pub mod credentials;
pub mod drive;
pub mod errors;
pub mod offline;
pub mod telemetry;
mod types;
pub mod upload;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::{any, get},
};
use bon::Builder;
pub use config::Config;
use credentials::{CredentialSource, EnvCredentials};
use drive::{DriveClient, FileStore};
use offline::{CacheStorage, OfflineCache, ReqwestFetch};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};

pub use types::Clock;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .credentials(Arc::new(EnvCredentials::new("GOOGLE_SERVICE_ACCOUNT_CREDENTIALS")))
///     .store(Arc::new(DriveClient::new(http, &config.drive)))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub credentials: Arc<dyn CredentialSource>,
    pub store: Arc<dyn FileStore>,
    #[builder(default)]
    pub clock: Clock,
    pub offline: Option<Arc<OfflineCache>>,
}

/// Build the HTTP client used for every call to Google and to asset origins
pub fn build_http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.drive.connect_timeout)
        .user_agent(concat!("drive-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// CORS headers attached to every response, errors and preflights included.
fn create_cors_layers(config: &Config) -> anyhow::Result<[SetResponseHeaderLayer<HeaderValue>; 3]> {
    let cors = &config.cors;
    let origin = HeaderValue::from_str(&cors.allow_origin).context("invalid cors.allow_origin")?;
    let methods = HeaderValue::from_str(&cors.allow_methods.join(", ")).context("invalid cors.allow_methods")?;
    let headers = HeaderValue::from_str(&cors.allow_headers.join(", ")).context("invalid cors.allow_headers")?;

    Ok([
        SetResponseHeaderLayer::overriding(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin),
        SetResponseHeaderLayer::overriding(header::ACCESS_CONTROL_ALLOW_METHODS, methods),
        SetResponseHeaderLayer::overriding(header::ACCESS_CONTROL_ALLOW_HEADERS, headers),
    ])
}

/// Build the application router with all endpoints and middleware.
///
/// The upload route accepts every method so the handler can answer preflights and reject other
/// methods with the JSON error body. Its body limit is raised to `upload.max_request_size`; the
/// per-file ceiling is enforced while streaming.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let [allow_origin, allow_methods, allow_headers] = create_cors_layers(&state.config)?;
    let upload_path = state.config.upload.path.clone();
    let upload_limit = state.config.upload.max_request_size;

    let router = Router::new()
        .route(
            &upload_path,
            any(api::handlers::upload::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/sw.js", get(api::handlers::offline::service_worker))
        .route("/offline/asset", get(api::handlers::offline::offline_asset))
        .with_state(state)
        .layer(allow_headers)
        .layer(allow_methods)
        .layer(allow_origin)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Main application struct that owns the router and configuration.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] builds the Drive client and, when enabled, installs the
///    offline cache (failing startup if any asset cannot be fetched)
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown signal resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting drive relay with configuration: {:#?}", config);

        let http = build_http_client(&config)?;
        let store = Arc::new(DriveClient::new(http.clone(), &config.drive));
        let credentials = Arc::new(EnvCredentials::new(&config.upload.credentials_env));

        let offline = if config.offline.enabled {
            let cache = OfflineCache::new(&config.offline, Arc::new(CacheStorage::new()), Arc::new(ReqwestFetch::new(http)))?;
            let cached = cache.install().await.context("Failed to install offline cache")?;
            info!(cache_name = %cache.cache_name(), cached, "Offline cache ready");
            Some(Arc::new(cache))
        } else {
            None
        };

        let state = AppState::builder()
            .config(config)
            .credentials(credentials)
            .store(store)
            .maybe_offline(offline)
            .build();

        Self::from_state(state)
    }

    /// Create an application around prepared state
    pub fn from_state(state: AppState) -> anyhow::Result<Self> {
        let config = state.config.clone();
        let router = build_router(state)?;
        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Drive relay listening on http://{}, uploads at {}",
            bind_addr, self.config.upload.path
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Drive relay stopped");
        Ok(())
    }
}
