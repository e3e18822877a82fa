//! Error types for asset retrieval, classification and fusion.

use std::path::PathBuf;
use thiserror::Error;
use tilefuse_catalog::CatalogError;
use tilefuse_raster::RasterError;

/// Errors retrieving one tile asset.
#[derive(Debug, Error)]
pub enum FetchError {
    /// I/O error writing the cache.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or transport error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The asset could not be downloaded.
    #[error("Failed to download {href}: {reason}")]
    DownloadFailed {
        /// Asset URL.
        href: String,
        /// Reason for failure.
        reason: String,
    },

    /// A local asset path does not exist.
    #[error("Asset not found: {0}")]
    NotFound(PathBuf),

    /// Download tracker lock was poisoned (a thread panicked while holding the lock).
    #[error("Download tracker lock was poisoned")]
    CacheLockPoisoned,
}

/// Errors retrieving building footprints from a footprint service.
#[derive(Debug, Error)]
pub enum FootprintError {
    /// HTTP client construction or transport error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The service could not be reached within the retry budget.
    #[error("Footprint service {url} unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        /// Service URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// The service answered with something that is not a footprint response.
    #[error("Invalid footprint response from {url}: {reason}")]
    InvalidResponse {
        /// Service URL.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The region could not be expressed in the service's CRS.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),
}

/// Errors classifying one point-cloud tile.
#[derive(Debug, Error)]
pub enum ClassificationError {
    /// I/O error around the engine's inputs or outputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine ran but reported a failure.
    #[error("Point cloud engine failed on {path}: {reason}")]
    EngineFailed {
        /// Input point cloud.
        path: PathBuf,
        /// Engine diagnostics.
        reason: String,
    },

    /// The zipped point cloud could not be unpacked.
    #[error("Invalid point cloud archive {path}: {reason}")]
    Archive {
        /// Archive path.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },

    /// The engine's output rasters could not be read.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),
}

/// Fatal errors of one derived product.
#[derive(Debug, Error)]
pub enum FusionError {
    /// A required collaborator is missing; raised before any work starts.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Not enough valid data inside the region to derive the product.
    #[error("Insufficient coverage: {0}")]
    InsufficientCoverage(String),

    /// The nodata sentinel cannot be stored in the output type.
    #[error("Invalid nodata: {0}")]
    InvalidNodata(String),

    /// Raster operation failed.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid YAML for the config schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Errors of an end-to-end product pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Catalog search failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Fusion failed.
    #[error(transparent)]
    Fusion(#[from] FusionError),

    /// Raster operation failed.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// Asset cache setup failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Building footprints could not be retrieved.
    #[error(transparent)]
    Footprints(#[from] FootprintError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error reading vector inputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid GeoJSON input.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// Vector input without usable geometry.
    #[error("Invalid vector input: {0}")]
    InvalidVector(String),
}
