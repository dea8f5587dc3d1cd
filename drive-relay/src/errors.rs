use crate::credentials::CredentialsError;
use crate::offline::OfflineError;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

/// Message shown when a file's declared type is not on the allowlist.
pub const UNSUPPORTED_FILE_TYPE_MESSAGE: &str =
    "Type de fichier non autorisé. Utilisez uniquement des images (JPG, PNG, GIF, WEBP, HEIC).";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Anything other than POST or a preflight probe
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Service-account credentials missing or unreadable
    #[error("Configuration error: {0}")]
    Configuration(#[from] CredentialsError),

    /// Declared MIME type not on the allowlist
    #[error("Unsupported file type '{mime_type}'")]
    UnsupportedFileType { mime_type: String },

    /// File part exceeded the configured ceiling
    #[error("File exceeds the maximum size of {max_file_size} bytes")]
    PayloadTooLarge { max_file_size: u64 },

    /// Body parsed completely without a single file part
    #[error("No file part in request")]
    NoFileProvided,

    /// The storage API rejected or failed the write
    #[error("Upload to Drive failed: {message}")]
    UploadFailed { message: String },

    /// The storage API did not answer before the deadline
    #[error("Upload to Drive did not complete within {}", humantime::format_duration(*timeout))]
    UploadTimeout { timeout: Duration },

    /// Multipart stream was malformed or cut short
    #[error("Failed to read multipart stream: {0}")]
    Transport(#[from] MultipartError),

    /// Invalid input on the offline routes
    #[error("{message}")]
    BadRequest { message: String },

    /// Offline cache disabled or URL outside the cached origins
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Offline cache could not reach the network for a miss
    #[error(transparent)]
    AssetUnavailable(#[from] OfflineError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JSON body of every failed response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnsupportedFileType { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::BAD_REQUEST,
            Error::NoFileProvided => StatusCode::BAD_REQUEST,
            Error::UploadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UploadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AssetUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message shown to the browser. Upload messages are in French, matching the
    /// page that posts to the relay.
    pub fn user_message(&self) -> String {
        match self {
            Error::MethodNotAllowed => "Method not allowed".to_string(),
            Error::Configuration(CredentialsError::Missing { .. }) => "Configuration error: missing credentials".to_string(),
            Error::Configuration(CredentialsError::Malformed(_)) => "Configuration error: invalid credentials format".to_string(),
            Error::UnsupportedFileType { .. } => UNSUPPORTED_FILE_TYPE_MESSAGE.to_string(),
            Error::PayloadTooLarge { max_file_size } => {
                format!("Fichier trop volumineux. Maximum {}.", format_size(*max_file_size))
            }
            Error::NoFileProvided => "Aucun fichier reçu".to_string(),
            Error::UploadFailed { message } => format!("Erreur lors de l'envoi vers Drive: {message}"),
            Error::UploadTimeout { .. } => "Délai dépassé lors de l'envoi vers Drive".to_string(),
            Error::Transport(_) => "Erreur lors du traitement du fichier".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource } => format!("{resource} introuvable"),
            Error::AssetUnavailable(_) => "Ressource indisponible hors ligne".to_string(),
            Error::Internal(e) => format!("Erreur serveur: {e}"),
        }
    }
}

/// Render a byte count the way the upload page words it: "10MB", "512KB", "300 octets".
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= MIB {
        format!("{:.1}MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{bytes} octets")
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Configuration(_) | Error::Internal(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::UploadFailed { .. } | Error::UploadTimeout { .. } | Error::AssetUnavailable(_) => {
                tracing::error!("Upstream error: {:#}", self);
            }
            Error::Transport(_) => {
                tracing::warn!("Multipart error: {}", self);
            }
            Error::MethodNotAllowed
            | Error::UnsupportedFileType { .. }
            | Error::PayloadTooLarge { .. }
            | Error::NoFileProvided
            | Error::BadRequest { .. }
            | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorResponse {
            success: false,
            error: self.user_message(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;
