//! Service-account credentials.
//!
//! The relay authenticates against Drive with a service-account key supplied as a JSON document
//! in an environment variable. The key is read and parsed on every request; nothing is cached
//! between requests, so rotating the variable takes effect on the next upload.

use serde::Deserialize;
use std::fmt;
use thiserror::Error as ThisError;

/// Token endpoint used when the key document does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(ThisError, Debug)]
pub enum CredentialsError {
    #[error("missing credentials (environment variable {variable} is not set)")]
    Missing { variable: String },

    #[error("invalid credentials format: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// The fields of a Google service-account key file that the relay needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("key_type", &self.key_type)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"<redacted>")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse a key document. Keys pasted into dashboards often arrive with their newlines
    /// escaped, so literal `\n` sequences in the private key are turned back into newlines.
    pub fn from_json(raw: &str) -> Result<Self, CredentialsError> {
        let mut key: ServiceAccountKey = serde_json::from_str(raw).map_err(CredentialsError::Malformed)?;
        if key.private_key.contains("\\n") {
            key.private_key = key.private_key.replace("\\n", "\n");
        }
        Ok(key)
    }
}

/// Where the raw key document comes from.
pub trait CredentialSource: Send + Sync {
    /// Name reported when the document is missing
    fn name(&self) -> &str;

    /// The raw JSON document, if configured
    fn raw(&self) -> Option<String>;

    /// Read and parse the key document.
    fn service_account_key(&self) -> Result<ServiceAccountKey, CredentialsError> {
        let raw = self.raw().filter(|value| !value.is_empty()).ok_or_else(|| CredentialsError::Missing {
            variable: self.name().to_string(),
        })?;
        ServiceAccountKey::from_json(&raw)
    }
}

/// Reads the key document from a process environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    variable: String,
}

impl EnvCredentials {
    pub fn new(variable: impl Into<String>) -> Self {
        Self { variable: variable.into() }
    }
}

impl CredentialSource for EnvCredentials {
    fn name(&self) -> &str {
        &self.variable
    }

    fn raw(&self) -> Option<String> {
        std::env::var(&self.variable).ok()
    }
}

/// A fixed key document, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    raw: Option<String>,
}

impl StaticCredentials {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: Some(raw.into()) }
    }

    pub fn missing() -> Self {
        Self { raw: None }
    }
}

impl CredentialSource for StaticCredentials {
    fn name(&self) -> &str {
        "static"
    }

    fn raw(&self) -> Option<String> {
        self.raw.clone()
    }
}
