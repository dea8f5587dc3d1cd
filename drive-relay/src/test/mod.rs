//! End-to-end tests driving the full router through `axum-test`.
