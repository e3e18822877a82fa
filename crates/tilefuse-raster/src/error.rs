//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur when reading, writing or combining rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing required tags.
    #[error("Invalid GeoTIFF {path}: {reason}")]
    InvalidGeoTiff {
        /// File that failed to parse.
        path: String,
        /// What was missing or malformed.
        reason: String,
    },

    /// Unsupported data type in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// An EPSG code without a known definition.
    #[error("Unsupported CRS: EPSG:{0}")]
    UnsupportedCrs(u16),

    /// A CRS name that is neither an alias nor an EPSG code.
    #[error("Unknown CRS: {0}")]
    UnknownCrsName(String),

    /// A coordinate transform failed.
    #[error("Transform failed: {0}")]
    Transform(String),

    /// A pixel size that is zero, negative or not finite.
    #[error("Invalid pixel size: {0}")]
    InvalidPixelSize(f64),

    /// The requested window does not cover a single pixel.
    #[error("Grid is empty: {0}")]
    EmptyGrid(String),

    /// Two rasters that must share a grid do not.
    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    /// Mosaic called without sources.
    #[error("No source rasters to mosaic")]
    NoSources,

    /// Pixel buffer length does not match the grid.
    #[error("Pixel buffer has {actual} values, grid expects {expected}")]
    BufferSize {
        /// Pixels expected from the grid dimensions.
        expected: usize,
        /// Pixels actually provided.
        actual: usize,
    },
}
