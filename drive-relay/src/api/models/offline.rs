use serde::Deserialize;

/// Query parameters for the offline asset lookup
#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    /// Absolute URL, or a URL relative to the page origin (e.g. `./index.html`)
    pub url: String,
}
