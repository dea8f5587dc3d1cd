//! Drive v3 REST client.
//!
//! Files are created with a single `multipart/related` request: a JSON metadata part followed by
//! the media part. The media part is streamed straight from the incoming request, so the relay
//! never holds a whole file in memory.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::{Body, Client, header};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::{ByteStream, DriveError, FileStore, NewFile, ServiceAccountAuth, StoredFile};
use crate::config::DriveConfig;

const UPLOAD_PATH: &str = "upload/drive/v3/files";

/// Google API error envelope, e.g. `{"error": {"code": 403, "message": "The user's Drive storage quota has been exceeded."}}`
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// The concrete implementation of [`FileStore`], talking to Google Drive over HTTP.
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: Client,
    api_base_url: Url,
}

impl DriveClient {
    pub fn new(http: Client, config: &DriveConfig) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url.clone(),
        }
    }

    fn upload_url(&self) -> Result<Url, DriveError> {
        let mut url = ensure_slash(&self.api_base_url).join(UPLOAD_PATH)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", "id,name")
            .append_pair("supportsAllDrives", "true");
        Ok(url)
    }
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// Wrap `media` in a `multipart/related` envelope without buffering it.
fn related_body(boundary: &str, file: &NewFile, media: ByteStream) -> Result<ByteStream, DriveError> {
    let metadata = serde_json::to_string(file)?;
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{boundary}\r\nContent-Type: {mime}\r\n\r\n",
        mime = file.mime_type
    );
    let tail = format!("\r\n--{boundary}--\r\n");

    Ok(stream::once(async move { Ok(Bytes::from(head)) })
        .chain(media)
        .chain(stream::once(async move { Ok(Bytes::from(tail)) }))
        .boxed())
}

/// Pull a readable message out of a failed Drive response body
fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => format!("Drive API returned {status}"),
    }
}

#[async_trait]
impl FileStore for DriveClient {
    #[instrument(skip_all, fields(file_name = %file.name, mime_type = %file.mime_type), err)]
    async fn create_file(&self, auth: &ServiceAccountAuth, file: NewFile, body: ByteStream) -> Result<StoredFile, DriveError> {
        let url = self.upload_url()?;
        let token = auth.access_token(&self.http).await?;

        let boundary = format!("drive-relay-{}", Uuid::new_v4().simple());
        let body = related_body(&boundary, &file, body)?;

        debug!(%url, "Creating file on Drive");
        let response = self
            .http
            .post(url)
            .bearer_auth(&token.access_token)
            .header(header::CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api {
                status: status.as_u16(),
                message: api_error_message(status, &body),
            });
        }

        let stored = response.json::<StoredFile>().await?;
        debug!(file_id = %stored.id, "Drive accepted file");
        Ok(stored)
    }
}
