//! HTTP request handlers.
//!
//! - [`upload`]: relays a multipart image upload to Google Drive
//! - [`offline`]: service-worker script and server-side cache-first asset lookup
//!
//! Handlers return [`crate::errors::Error`], which converts to the JSON error body
//! `{success: false, error}` with the matching status code.

pub mod offline;
pub mod upload;
