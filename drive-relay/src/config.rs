//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `DRIVE_RELAY_CONFIG`
//! environment variable. A missing file is not an error: every field has a default matching the
//! production deployment, so the relay runs with no file at all.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `DRIVE_RELAY_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `DRIVE_RELAY_UPLOAD__FOLDER_ID=abc` sets the `upload.folder_id` field.
//!
//! The service-account key itself is never part of this configuration. It is read on every
//! request from the environment variable named by `upload.credentials_env`.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! DRIVE_RELAY_PORT=8080
//! DRIVE_RELAY_UPLOAD__MAX_FILE_SIZE=5242880
//! DRIVE_RELAY_UPLOAD__TIMEOUT=30s
//! DRIVE_RELAY_OFFLINE__ENABLED=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Room `upload.max_request_size` must leave above the file ceiling for boundaries, part headers
/// and text fields.
pub const MIN_FORM_OVERHEAD: u64 = 64 * 1024;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DRIVE_RELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Upload endpoint settings
    pub upload: UploadConfig,
    /// Drive API settings
    pub drive: DriveConfig,
    /// CORS headers attached to every response
    pub cors: CorsConfig,
    /// Offline asset cache
    pub offline: OfflineConfig,
}

/// Upload endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Route the upload handler is mounted on
    pub path: String,
    /// Drive folder that receives uploads
    pub folder_id: String,
    /// Largest accepted file part, in bytes
    pub max_file_size: u64,
    /// Largest accepted request body, in bytes. Must leave room for the file plus form overhead.
    pub max_request_size: usize,
    /// Declared MIME types accepted for upload (compared case-insensitively)
    pub allowed_mime_types: Vec<String>,
    /// Environment variable holding the service-account key JSON
    pub credentials_env: String,
    /// Deadline for the outbound write to Drive
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Chunks buffered between the multipart parser and the Drive upload
    pub upload_buffer_size: usize,
}

impl UploadConfig {
    /// Whether a declared MIME type (already reduced to its essence) may be uploaded
    pub fn accepts(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: "/api/upload".to_string(),
            folder_id: "15_hvPJKeccpOVXPfFRJy8StFxdN9SVXK".to_string(),
            max_file_size: 10 * 1024 * 1024,    // 10 MiB
            max_request_size: 16 * 1024 * 1024, // file plus form overhead
            allowed_mime_types: ["image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp", "image/heic"]
                .into_iter()
                .map(String::from)
                .collect(),
            credentials_env: "GOOGLE_SERVICE_ACCOUNT_CREDENTIALS".to_string(),
            timeout: Duration::from_secs(120),
            upload_buffer_size: 16,
        }
    }
}

/// Drive API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Base URL of the Drive API (the upload path is joined onto it)
    pub api_base_url: Url,
    /// OAuth scopes requested for the service account
    pub scopes: Vec<String>,
    /// TCP connect timeout for calls to Google
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("https://www.googleapis.com/").expect("static URL is valid"),
            scopes: vec!["https://www.googleapis.com/auth/drive.file".to_string()],
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) headers.
///
/// The upload page is served from a different origin than the relay, so every response,
/// errors included, carries these headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: vec!["POST".to_string(), "OPTIONS".to_string()],
            allow_headers: vec!["Content-Type".to_string()],
        }
    }
}

/// Offline asset cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OfflineConfig {
    /// Install the server-side cache at startup. Startup fails if any asset cannot be fetched.
    pub enabled: bool,
    /// Version string naming the active cache. Bump it to replace every cached asset.
    pub cache_name: String,
    /// Origin the page shell is served from; relative assets resolve against it
    pub base_url: Url,
    /// Assets cached on install, as written in the service worker
    pub assets: Vec<String>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_name: "evg-arthur-v4".to_string(),
            base_url: Url::parse("http://localhost:3000/").expect("static URL is valid"),
            assets: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "https://fonts.googleapis.com/css2?family=Cinzel:wght@400;500;600;700;800&family=Inter:wght@300;400;500;600;700&family=Patrick+Hand&display=swap".to_string(),
                "https://cdn.jsdelivr.net/npm/chart.js".to_string(),
                "https://cdn.jsdelivr.net/npm/canvas-confetti@1.9.2/dist/confetti.browser.min.js".to_string(),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            upload: UploadConfig::default(),
            drive: DriveConfig::default(),
            cors: CorsConfig::default(),
            offline: OfflineConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let upload = &self.upload;

        if !upload.path.starts_with('/') {
            return Err(invalid(format!("upload.path must start with '/', got '{}'", upload.path)));
        }

        if upload.folder_id.trim().is_empty() {
            return Err(invalid("upload.folder_id cannot be empty".to_string()));
        }

        if upload.max_file_size == 0 {
            return Err(invalid("upload.max_file_size must be positive (default: 10485760 = 10 MiB)".to_string()));
        }

        if (upload.max_request_size as u64) <= upload.max_file_size.saturating_add(MIN_FORM_OVERHEAD) {
            return Err(invalid(format!(
                "upload.max_request_size ({}) must exceed upload.max_file_size ({}) by more than {} bytes of form overhead",
                upload.max_request_size, upload.max_file_size, MIN_FORM_OVERHEAD
            )));
        }

        if upload.allowed_mime_types.is_empty() {
            return Err(invalid("upload.allowed_mime_types cannot be empty".to_string()));
        }

        if upload.credentials_env.trim().is_empty() {
            return Err(invalid("upload.credentials_env cannot be empty".to_string()));
        }

        if upload.timeout.is_zero() {
            return Err(invalid("upload.timeout must be positive".to_string()));
        }

        if upload.upload_buffer_size == 0 {
            return Err(invalid("upload.upload_buffer_size cannot be 0 (default: 16)".to_string()));
        }

        if self.drive.scopes.is_empty() {
            return Err(invalid("drive.scopes cannot be empty".to_string()));
        }

        if self.offline.cache_name.trim().is_empty() {
            return Err(invalid("offline.cache_name cannot be empty".to_string()));
        }

        for asset in &self.offline.assets {
            self.offline
                .base_url
                .join(asset)
                .map_err(|e| invalid(format!("offline asset '{asset}' is not a valid URL: {e}")))?;
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("DRIVE_RELAY_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(message: String) -> Error {
    Error::Internal(anyhow::anyhow!("Config validation: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.upload.path, "/api/upload");
            assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024);
            assert_eq!(config.upload.credentials_env, "GOOGLE_SERVICE_ACCOUNT_CREDENTIALS");
            assert_eq!(config.upload.allowed_mime_types.len(), 6);
            assert_eq!(config.drive.scopes, vec!["https://www.googleapis.com/auth/drive.file"]);
            assert_eq!(config.offline.cache_name, "evg-arthur-v4");
            assert_eq!(config.offline.assets.len(), 5);
            assert!(!config.offline.enabled);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
upload:
  folder_id: my-folder
  max_file_size: 1048576
  timeout: 45s
  allowed_mime_types: ["image/png"]
offline:
  enabled: true
  cache_name: evg-arthur-v5
  base_url: https://photos.example.com/
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 9000);
            assert_eq!(config.upload.folder_id, "my-folder");
            assert_eq!(config.upload.max_file_size, 1024 * 1024);
            assert_eq!(config.upload.timeout, Duration::from_secs(45));
            assert_eq!(config.upload.allowed_mime_types, vec!["image/png"]);
            // Untouched fields keep their defaults
            assert_eq!(config.upload.path, "/api/upload");
            assert!(config.offline.enabled);
            assert_eq!(config.offline.cache_name, "evg-arthur-v5");
            assert_eq!(config.offline.base_url.as_str(), "https://photos.example.com/");

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 9000\n")?;

            jail.set_env("DRIVE_RELAY_HOST", "127.0.0.1");
            jail.set_env("DRIVE_RELAY_PORT", "8080");
            jail.set_env("DRIVE_RELAY_UPLOAD__CREDENTIALS_ENV", "RELAY_KEY");
            jail.set_env("DRIVE_RELAY_UPLOAD__TIMEOUT", "2m");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.upload.credentials_env, "RELAY_KEY");
            assert_eq!(config.upload.timeout, Duration::from_secs(120));
            assert_eq!(config.bind_address(), "127.0.0.1:8080");

            Ok(())
        });
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", include_str!("../config.yaml"))?;

            let config = Config::load(&args("config.yaml"))?;
            let defaults = Config::default();

            assert_eq!(config.port, defaults.port);
            assert_eq!(config.upload.folder_id, defaults.upload.folder_id);
            assert_eq!(config.upload.allowed_mime_types, defaults.upload.allowed_mime_types);
            assert_eq!(config.upload.timeout, defaults.upload.timeout);
            assert_eq!(config.offline.assets, defaults.offline.assets);

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "upload:\n  max_size: 10\n")?;

            let result = Config::load(&args("test.yaml"));
            assert!(result.is_err());

            Ok(())
        });
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.upload.allowed_mime_types.clear();
        assert!(config.validate().unwrap_err().to_string().contains("allowed_mime_types"));

        let mut config = Config::default();
        config.upload.max_request_size = 1024;
        assert!(config.validate().unwrap_err().to_string().contains("max_request_size"));

        let mut config = Config::default();
        config.upload.max_file_size = 1024;
        config.upload.max_request_size = 1024;
        assert!(config.validate().unwrap_err().to_string().contains("form overhead"));

        config.upload.max_request_size = (1024 + MIN_FORM_OVERHEAD) as usize;
        assert!(config.validate().is_err());

        config.upload.max_request_size = (1024 + MIN_FORM_OVERHEAD + 1) as usize;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.upload.path = "api/upload".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("upload.path"));

        let mut config = Config::default();
        config.upload.upload_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upload.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.offline.cache_name = " ".to_string();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_accepts_is_case_insensitive() {
        let upload = UploadConfig::default();
        assert!(upload.accepts("image/jpeg"));
        assert!(upload.accepts("IMAGE/HEIC"));
        assert!(!upload.accepts("text/plain"));
        assert!(!upload.accepts("image/svg+xml"));
    }
}
