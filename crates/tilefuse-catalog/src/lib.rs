//! # tilefuse-catalog
//!
//! Discovery and selection of swisstopo tiles through the STAC API.
//!
//! This crate provides:
//! - [`CatalogSearch`] - paged item search, implemented over HTTP by
//!   [`StacClient`]
//! - [`build_index`] - normalizing every item asset intersecting a region
//!   into a [`TileRecord`]
//! - [`select`] - filtering by GSD and extension, and keeping the most
//!   recent record of each tile
//!
//! ## Example
//!
//! ```no_run
//! use tilefuse_catalog::{build_index, select, IndexQuery, SelectOptions, StacClient, CLIENT_URL, SWISSALTI3D};
//! use tilefuse_raster::{Crs, Region};
//!
//! let client = StacClient::new(CLIENT_URL)?;
//! let region = Region::from_bbox([6.55, 46.51, 6.58, 46.53], Crs::WGS84)?;
//! let index = build_index(&client, &IndexQuery::new(SWISSALTI3D, &region))?;
//! let selection = select(&index, &SelectOptions::default().with_gsd(2.0).with_extension("tif"));
//! for record in &selection {
//!     println!("{} {}", record.tile_id, record.asset_href);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod client;
mod collections;
mod error;
mod index;
mod record;
mod select;
pub mod stac;

pub use client::{
    decode_items, CatalogSearch, DateRange, PageToken, SearchPage, SearchRequest, StacClient, DEFAULT_MAX_RETRIES,
    DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT,
};
pub use collections::*;
pub use error::CatalogError;
pub use index::{build_index, IndexQuery, TileIndex};
pub use record::{href_extension, href_file_name, tile_id, TileRecord};
pub use select::{is_point_cloud, is_tiff, matches_extension, matches_gsd, precedence, select, SelectOptions, SelectionResult, GSD_TOLERANCE};

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
