//! Google Drive storage backend.
//!
//! The relay only ever creates files, so the surface here is one operation behind the
//! [`FileStore`] trait. [`DriveClient`] implements it against the Drive v3 REST API using a
//! service-account token obtained by [`ServiceAccountAuth`]. Tests substitute a recording store.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub mod auth;
pub mod client;

pub use auth::{AccessToken, ServiceAccountAuth};
pub use client::DriveClient;

/// File contents as they arrive from the multipart parser.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Metadata for a file about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub name: String,
    pub mime_type: String,
    pub parents: Vec<String>,
}

/// What the storage API reports back for a created file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoredFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(ThisError, Debug)]
pub enum DriveError {
    /// Token exchange or assertion signing failed
    #[error("{message}")]
    Auth { message: String },

    /// Drive answered with a non-success status
    #[error("{message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to Google
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Metadata could not be encoded
    #[error("failed to encode file metadata: {0}")]
    Encode(#[from] serde_json::Error),

    /// Configured API URL cannot be extended with the upload path
    #[error("invalid Drive API URL: {0}")]
    Url(#[from] url::ParseError),
}

/// A place uploads can be written to.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Create `file` with the contents of `body`, authenticating with `auth`.
    ///
    /// The body is consumed as it arrives; implementations must not wait for the end of the
    /// stream before starting the write. A body that yields an error aborts the write.
    async fn create_file(&self, auth: &ServiceAccountAuth, file: NewFile, body: ByteStream) -> Result<StoredFile, DriveError>;
}
