//! Products returned together with the per-tile failures they absorbed.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// A per-tile failure that was skipped rather than aborting the product.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileWarning {
    /// The tile's asset could not be retrieved.
    AssetUnavailable {
        /// Tile identifier.
        tile_id: String,
        /// Asset URL.
        href: String,
        /// Reason for failure.
        reason: String,
    },
    /// The tile's point cloud could not be classified.
    ClassificationFailure {
        /// Tile identifier.
        tile_id: String,
        /// Local point cloud path.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },
}

impl TileWarning {
    /// Identifier of the affected tile.
    pub fn tile_id(&self) -> &str {
        match self {
            TileWarning::AssetUnavailable { tile_id, .. } => tile_id,
            TileWarning::ClassificationFailure { tile_id, .. } => tile_id,
        }
    }
}

impl fmt::Display for TileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileWarning::AssetUnavailable { tile_id, href, reason } => {
                write!(f, "tile {}: asset {} unavailable: {}", tile_id, href, reason)
            }
            TileWarning::ClassificationFailure { tile_id, path, reason } => {
                write!(f, "tile {}: classification of {} failed: {}", tile_id, path.display(), reason)
            }
        }
    }
}

/// A product and the tiles that were skipped while deriving it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused<T> {
    /// The derived product.
    pub product: T,
    /// Skipped tiles, in the order they were encountered.
    pub warnings: Vec<TileWarning>,
}

impl<T> Fused<T> {
    /// A product with no skipped tiles.
    pub fn clean(product: T) -> Self {
        Self {
            product,
            warnings: Vec::new(),
        }
    }

    /// Transform the product, keeping the warnings.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Fused<U> {
        Fused {
            product: f(self.product),
            warnings: self.warnings,
        }
    }

    /// Prepend warnings from an earlier stage.
    pub fn with_earlier_warnings(mut self, mut earlier: Vec<TileWarning>) -> Self {
        earlier.append(&mut self.warnings);
        self.warnings = earlier;
        self
    }
}
