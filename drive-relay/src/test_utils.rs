//! Test utilities shared by unit and integration tests.

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::config::{Config, OfflineConfig};
use crate::credentials::{CredentialSource, ServiceAccountKey, StaticCredentials};
use crate::drive::{ByteStream, DriveError, FileStore, NewFile, ServiceAccountAuth, StoredFile};
use crate::offline::{CacheStorage, CachedResponse, Fetch, OfflineCache};
use crate::{AppState, Application, Clock};

pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("test/fixtures/test_service_account.pem");
pub const TEST_PUBLIC_KEY_PEM: &str = include_str!("test/fixtures/test_service_account.pub.pem");
pub const TEST_CLIENT_EMAIL: &str = "relay@drive-relay-tests.iam.gserviceaccount.com";
pub const TEST_FOLDER_ID: &str = "test-folder";

/// Install the rustls provider the HTTP client expects. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn test_http_client() -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::builder().build().expect("Failed to create test HTTP client")
}

pub fn test_service_account_key(token_uri: &str) -> ServiceAccountKey {
    ServiceAccountKey {
        key_type: Some("service_account".to_string()),
        project_id: Some("drive-relay-tests".to_string()),
        private_key_id: Some("test-key-1".to_string()),
        private_key: TEST_PRIVATE_KEY_PEM.to_string(),
        client_email: TEST_CLIENT_EMAIL.to_string(),
        token_uri: token_uri.to_string(),
    }
}

/// A key document as downloaded from the Google Cloud console
pub fn test_credentials_json(token_uri: &str) -> String {
    serde_json::json!({
        "type": "service_account",
        "project_id": "drive-relay-tests",
        "private_key_id": "test-key-1",
        "private_key": TEST_PRIVATE_KEY_PEM,
        "client_email": TEST_CLIENT_EMAIL,
        "client_id": "1234567890",
        "token_uri": token_uri,
    })
    .to_string()
}

pub fn test_credentials() -> StaticCredentials {
    StaticCredentials::new(test_credentials_json("https://oauth2.googleapis.com/token"))
}

/// 2024-03-09T14:05:07.123Z
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap() + chrono::Duration::milliseconds(123)
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.upload.folder_id = TEST_FOLDER_ID.to_string();
    config.upload.timeout = Duration::from_secs(5);
    config.offline = test_offline_config();
    config
}

pub fn test_offline_config() -> OfflineConfig {
    OfflineConfig {
        enabled: true,
        cache_name: "drive-relay-test-v1".to_string(),
        base_url: "http://localhost:3000/".parse().unwrap(),
        assets: vec![
            "./".to_string(),
            "./index.html".to_string(),
            "https://cdn.example.com/npm/chart.js".to_string(),
        ],
    }
}

/// How [`MockFileStore`] answers uploads
#[derive(Debug, Clone)]
pub enum StoreBehaviour {
    /// Read the whole body, then report the file as created
    Succeed { file_id: String },
    /// Read the whole body, then fail the way Drive does
    Fail { status: u16, message: String },
    /// Never answer
    Hang,
}

/// An upload that ran to completion against [`MockFileStore`]
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub file: NewFile,
    pub body: Vec<u8>,
}

/// A [`FileStore`] that records what it was asked to write.
#[derive(Debug)]
pub struct MockFileStore {
    behaviour: StoreBehaviour,
    calls: AtomicUsize,
    started: Mutex<Vec<NewFile>>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

impl MockFileStore {
    pub fn new(behaviour: StoreBehaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(file_id: &str) -> Self {
        Self::new(StoreBehaviour::Succeed {
            file_id: file_id.to_string(),
        })
    }

    pub fn failing(status: u16, message: &str) -> Self {
        Self::new(StoreBehaviour::Fail {
            status,
            message: message.to_string(),
        })
    }

    pub fn hanging() -> Self {
        Self::new(StoreBehaviour::Hang)
    }

    /// Number of times `create_file` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Metadata of every upload that was started
    pub fn started(&self) -> Vec<NewFile> {
        self.started.lock().unwrap().clone()
    }

    /// Uploads whose body was read to the end
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn create_file(&self, _auth: &ServiceAccountAuth, file: NewFile, mut body: ByteStream) -> Result<StoredFile, DriveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(file.clone());

        if let StoreBehaviour::Hang = self.behaviour {
            std::future::pending::<()>().await;
        }

        let mut contents = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk.map_err(|e| DriveError::Api {
                status: 400,
                message: e.to_string(),
            })?;
            contents.extend_from_slice(&chunk);
        }
        self.uploads.lock().unwrap().push(RecordedUpload {
            file: file.clone(),
            body: contents,
        });

        match &self.behaviour {
            StoreBehaviour::Succeed { file_id } => Ok(StoredFile {
                id: file_id.clone(),
                name: Some(file.name),
            }),
            StoreBehaviour::Fail { status, message } => Err(DriveError::Api {
                status: *status,
                message: message.clone(),
            }),
            StoreBehaviour::Hang => unreachable!("hanging store never completes"),
        }
    }
}

/// A [`Fetch`] that serves canned assets and counts every network call.
#[derive(Debug, Default)]
pub struct MockFetch {
    calls: AtomicUsize,
    statuses: HashMap<String, u16>,
    failures: Vec<String>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `status` instead of 200
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    /// Fail `url` as if the host were unreachable
    pub fn with_failure(mut self, url: &str) -> Self {
        self.failures.push(url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetch for MockFetch {
    async fn fetch(&self, url: &Url) -> anyhow::Result<CachedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failures.iter().any(|failing| failing == url.as_str()) {
            anyhow::bail!("connection refused");
        }

        Ok(CachedResponse {
            url: url.to_string(),
            status: self.statuses.get(url.as_str()).copied().unwrap_or(200),
            content_type: Some("text/plain".to_string()),
            body: Bytes::from(format!("asset {url}")),
            fetched_at: Utc::now(),
        })
    }
}

/// Handles kept by a test app so tests can inspect what happened upstream
pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<MockFileStore>,
    pub fetcher: Arc<MockFetch>,
    pub offline: Option<Arc<OfflineCache>>,
}

/// Build a test server around a recording store, fixed credentials and a fixed clock.
///
/// The offline cache is installed from [`MockFetch`] when `config.offline.enabled` is set.
pub async fn create_test_app(config: Config, store: MockFileStore, credentials: impl CredentialSource + 'static) -> TestApp {
    let store = Arc::new(store);
    let fetcher = Arc::new(MockFetch::new());

    let offline = if config.offline.enabled {
        let cache = OfflineCache::new(&config.offline, Arc::new(CacheStorage::new()), fetcher.clone())
            .expect("Failed to create offline cache");
        cache.install().await.expect("Failed to install offline cache");
        Some(Arc::new(cache))
    } else {
        None
    };

    let state = AppState::builder()
        .config(config)
        .credentials(Arc::new(credentials))
        .store(store.clone())
        .clock(Clock::new_with_fixed_time(fixed_time()))
        .maybe_offline(offline.clone())
        .build();

    let server = Application::from_state(state)
        .expect("Failed to create application")
        .into_test_server();

    TestApp {
        server,
        store,
        fetcher,
        offline,
    }
}
