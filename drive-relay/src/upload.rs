//! Upload pipeline: multipart parse stage feeding a Drive write.
//!
//! The parse stage walks the form fields as they arrive. The first file part is checked against
//! the MIME allowlist and, if accepted, its chunks are pushed into a bounded channel. A spawned
//! task drains that channel into [`FileStore::create_file`], so the write to Drive starts as soon
//! as the part header is seen and runs alongside the rest of the parse.
//!
//! The upload task is held in an [`AbortOnDropHandle`]: returning early from [`relay`] for any
//! reason cancels the outbound request, and a file part that is cut short is never committed
//! upstream.

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::UploadConfig;
use crate::drive::{DriveError, FileStore, NewFile, ServiceAccountAuth, StoredFile};
use crate::errors::{Error, Result};

/// MIME type assumed for file parts that do not declare one.
const DEFAULT_PART_MIME: &str = "application/octet-stream";

type UploadTask = AbortOnDropHandle<std::result::Result<std::result::Result<StoredFile, DriveError>, Elapsed>>;

/// A successfully relayed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Filename as sent by the browser
    pub file_name: String,
    /// Name the file was stored under
    pub destination: String,
    /// Identifier assigned by Drive
    pub file_id: String,
}

/// The file part currently streaming to Drive.
struct InFlight {
    file_name: String,
    destination: String,
    task: UploadTask,
}

/// Name a file is stored under: an ISO-8601 UTC timestamp with `:` and `.` replaced by `-`,
/// an underscore, then the original filename.
///
/// `2024-03-09T14:05:07.123Z` + `photo.jpg` gives `2024-03-09T14-05-07-123Z_photo.jpg`.
pub fn destination_name(now: DateTime<Utc>, file_name: &str) -> String {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true).replace([':', '.'], "-");
    format!("{timestamp}_{file_name}")
}

/// Reduce a part's declared `Content-Type` to its lowercase essence, dropping parameters.
///
/// `IMAGE/JPEG; charset=binary` becomes `image/jpeg`. Values that do not parse as a MIME type are
/// compared as written.
pub fn declared_mime(content_type: Option<&str>) -> String {
    let raw = content_type.map(str::trim).filter(|value| !value.is_empty()).unwrap_or(DEFAULT_PART_MIME);
    match raw.parse::<mime_guess::Mime>() {
        Ok(mime) => mime.essence_str().to_ascii_lowercase(),
        Err(_) => raw.to_ascii_lowercase(),
    }
}

/// Read the rest of a field without forwarding it anywhere; returns the bytes discarded.
async fn drain(field: &mut Field<'_>) -> std::result::Result<u64, MultipartError> {
    let mut discarded = 0u64;
    while let Some(chunk) = field.chunk().await? {
        discarded += chunk.len() as u64;
    }
    Ok(discarded)
}

/// Whether `error` comes from crossing the request body limit
fn is_body_limit(error: &MultipartError) -> bool {
    error.status() == StatusCode::PAYLOAD_TOO_LARGE
}

fn spawn_upload(
    store: Arc<dyn FileStore>,
    auth: Arc<ServiceAccountAuth>,
    file: NewFile,
    body: mpsc::Receiver<io::Result<Bytes>>,
    timeout: Duration,
) -> UploadTask {
    AbortOnDropHandle::new(tokio::spawn(async move {
        let body = ReceiverStream::new(body).boxed();
        tokio::time::timeout(timeout, store.create_file(&auth, file, body)).await
    }))
}

/// Parse `multipart` and relay its first file part to the configured Drive folder.
///
/// Fails with [`Error::UnsupportedFileType`] before any byte is forwarded when the declared
/// type is not allowed, and with [`Error::PayloadTooLarge`] once the parse completes if the file
/// went over `max_file_size` (the upload is cancelled as soon as the ceiling is crossed).
#[instrument(skip_all, fields(folder_id = %config.folder_id))]
pub async fn relay(
    mut multipart: Multipart,
    config: &UploadConfig,
    store: Arc<dyn FileStore>,
    auth: Arc<ServiceAccountAuth>,
    now: DateTime<Utc>,
) -> Result<RelayOutcome> {
    let mut in_flight: Option<InFlight> = None;
    let mut cancelled_body: Option<mpsc::Sender<io::Result<Bytes>>> = None;
    let mut oversized = false;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            // The request body limit can trip while draining past the file ceiling
            Err(e) if oversized => {
                debug!(error = %e, "Stopped reading oversized request");
                break;
            }
            Err(e) if is_body_limit(&e) => {
                debug!(error = %e, "Request body limit reached between parts");
                oversized = true;
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let file_name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            // No filename (or the empty one browsers send for an unused file input): a plain field
            _ => {
                debug!(field = ?field.name(), "Skipping non-file form field");
                continue;
            }
        };

        if in_flight.is_some() || oversized {
            match drain(&mut field).await {
                Ok(discarded) => warn!(file_name = %file_name, bytes = discarded, "Ignoring additional file part"),
                // Nothing after the first file matters; settle what was already read
                Err(e) if oversized || is_body_limit(&e) => {
                    warn!(file_name = %file_name, error = %e, "Stopped reading at additional file part");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            continue;
        }

        let mime_type = declared_mime(field.content_type());
        if !config.accepts(&mime_type) {
            match drain(&mut field).await {
                Ok(discarded) => debug!(bytes = discarded, "Drained rejected file part"),
                Err(e) => debug!(error = %e, "Stopped reading rejected file part"),
            }
            info!(file_name = %file_name, mime_type = %mime_type, "Rejected file type");
            return Err(Error::UnsupportedFileType { mime_type });
        }

        let destination = destination_name(now, &file_name);
        info!(file_name = %file_name, destination = %destination, mime_type = %mime_type, "Starting upload to Drive");

        let (tx, rx) = mpsc::channel(config.upload_buffer_size);
        let new_file = NewFile {
            name: destination.clone(),
            mime_type,
            parents: vec![config.folder_id.clone()],
        };
        let task = spawn_upload(store.clone(), auth.clone(), new_file, rx, config.timeout);

        let mut size = 0u64;
        let mut chunk_number = 0u64;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                // Crossing the request body limit is reported as the file being too large
                Err(e) if is_body_limit(&e) => {
                    debug!(error = %e, "Request body limit reached while streaming file");
                    oversized = true;
                    break;
                }
                Err(e) => {
                    // Fail the body so a truncated file is never committed
                    let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                    return Err(e.into());
                }
            };
            chunk_number += 1;
            size += chunk.len() as u64;

            if size > config.max_file_size {
                warn!(
                    file_name = %file_name,
                    bytes = size,
                    max_file_size = config.max_file_size,
                    "File size limit exceeded, cancelling upload"
                );
                oversized = true;
                break;
            }

            debug!(chunk_number, chunk_size = chunk.len(), bytes = size, "Forwarding chunk");
            if tx.send(Ok(chunk)).await.is_err() {
                // The upload task has already finished (failed or timed out); its result is
                // reported once the body is parsed.
                debug!("Upload task stopped reading, draining remaining chunks");
            }
        }

        if oversized {
            drop(task);
            // Never end the body cleanly: a cancelled upload must not see a complete file
            cancelled_body = Some(tx);
            match drain(&mut field).await {
                Ok(discarded) => debug!(bytes = size + discarded, "Drained oversized file part"),
                Err(e) => {
                    debug!(error = %e, "Stopped reading oversized request");
                    break;
                }
            }
            continue;
        }

        debug!(file_name = %file_name, bytes = size, chunks = chunk_number, "File part fully read");
        in_flight = Some(InFlight {
            file_name,
            destination,
            task,
        });
        // tx drops here, ending the body stream
    }

    if oversized {
        drop(cancelled_body);
        return Err(Error::PayloadTooLarge {
            max_file_size: config.max_file_size,
        });
    }

    let Some(InFlight {
        file_name,
        destination,
        task,
    }) = in_flight
    else {
        return Err(Error::NoFileProvided);
    };

    let stored = match task.await {
        Ok(Ok(Ok(stored))) => stored,
        Ok(Ok(Err(e))) => {
            return Err(Error::UploadFailed { message: e.to_string() });
        }
        Ok(Err(_)) => {
            return Err(Error::UploadTimeout { timeout: config.timeout });
        }
        Err(e) => {
            return Err(Error::Internal(anyhow::Error::new(e).context("upload task failed")));
        }
    };

    info!(file_name = %file_name, destination = %destination, file_id = %stored.id, "Upload to Drive complete");
    Ok(RelayOutcome {
        file_name,
        destination,
        file_id: stored.id,
    })
}
