//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Upload** (`upload.path`, default `/api/upload`): POST a multipart form, get the Drive file id
//! - **Offline** (`/sw.js`, `/offline/asset`): service worker and cache-first asset lookup

pub mod handlers;
pub mod models;
