//! Error types for catalog access.

use thiserror::Error;

/// Errors that can occur when querying the tile catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog could not be reached within the retry budget.
    #[error("Catalog unavailable at {url} after {attempts} attempt(s): {reason}")]
    Unavailable {
        /// Request URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// The catalog answered with something that is not a search result.
    #[error("Invalid catalog response from {url}: {reason}")]
    InvalidResponse {
        /// Request URL.
        url: String,
        /// What was wrong with the response.
        reason: String,
    },

    /// Invalid search parameters.
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    /// HTTP client construction or transport error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The search region could not be expressed in WGS84.
    #[error("Region error: {0}")]
    Region(#[from] tilefuse_raster::RasterError),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
