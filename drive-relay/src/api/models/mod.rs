//! API request and response data models.

pub mod offline;
pub mod upload;
