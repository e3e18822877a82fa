//! # tilefuse
//!
//! Analysis-ready rasters from swisstopo tiles.
//!
//! This crate turns the tiles selected by [`tilefuse_catalog`] into three
//! products on a common LV95 grid, clipped to a region of interest:
//! - a ground elevation model from swissALTI3D ([`get_dem_raster`])
//! - tree canopy height from swissSURFACE3D minus swissALTI3D, with building
//!   footprints masked out ([`get_tree_canopy_raster`])
//! - building heights burned from footprint polygons, estimating missing
//!   heights from the elevation models ([`get_building_height_raster`]),
//!   and the height-annotated footprints themselves
//!   ([`get_building_footprints`])
//!
//! ## Overview
//!
//! ### Collaborators
//!
//! The pipelines reach the outside world only through traits:
//! - [`CatalogSearch`](tilefuse_catalog::CatalogSearch) - paged STAC search,
//!   `StacClient` over HTTP
//! - [`AssetFetcher`] - asset retrieval, [`HttpAssetCache`] on disk
//! - [`PointCloudEngine`] - point cloud classification, [`PdalEngine`]
//!   running the `pdal` command
//! - [`FootprintSource`] - building footprints, [`OverpassClient`] querying
//!   OpenStreetMap
//!
//! ### Partial failures
//!
//! A tile whose asset cannot be fetched or whose point cloud cannot be
//! classified is skipped. The product is still built and the skipped tiles
//! come back as [`TileWarning`]s in [`Fused::warnings`]. Only an unreachable
//! catalog, a missing engine, or a region left without valid data fails the
//! call.
//!
//! ## Example
//!
//! ```no_run
//! use tilefuse::{get_dem_raster, DemOptions, HttpAssetCache, Sources};
//! use tilefuse_catalog::{StacClient, CLIENT_URL};
//! use tilefuse_raster::{Crs, Region};
//!
//! let catalog = StacClient::new(CLIENT_URL)?;
//! let cache = HttpAssetCache::new("./tile_cache")?;
//! let sources = Sources::new(&catalog, &cache);
//!
//! let region = Region::from_bbox([2_532_000.0, 1_152_000.0, 2_534_000.0, 1_153_000.0], Crs::LV95)?;
//! let dem = get_dem_raster(&sources, &region, &DemOptions::default())?;
//! for warning in &dem.warnings {
//!     eprintln!("skipped: {}", warning);
//! }
//! dem.product.write("dem.tif")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod buildings;
mod canopy;
pub mod config;
mod derived;
mod error;
mod fetch;
mod fused;
mod materialize;
mod osm;
mod pointcloud;
mod products;
mod vector;

pub use buildings::{
    estimate_building_heights, rasterize_heights, BuildingFootprint, BuildingMask, BuildingRaster, BUILDING_NODATA,
    DEFAULT_HEIGHT_ATTR, UNKNOWN_HEIGHT,
};
pub use canopy::{derive_canopy, CanopyOptions, PointCloudTile, SurfaceSource};
pub use config::{Config, SurfaceKind};
pub use derived::{DerivedRaster, OutputDType, ProductKind, F32_NODATA};
pub use error::{ClassificationError, ConfigError, FetchError, FootprintError, FusionError, PipelineError};
pub use fetch::{
    cache_file_name, AssetFetcher, DownloadStats, HttpAssetCache, DEFAULT_DOWNLOAD_RETRIES, DEFAULT_DOWNLOAD_TIMEOUT,
};
pub use fused::{Fused, TileWarning};
pub use materialize::{materialize, Materialized, MaterializedAsset};
pub use osm::{
    footprints_from_overpass, footprints_to_crs, overpass_query, FootprintSource, OverpassClient,
    DEFAULT_OVERPASS_RETRIES, DEFAULT_OVERPASS_TIMEOUT, OVERPASS_URL,
};
pub use pointcloud::{ClassifiedTile, PdalConfig, PdalEngine, PointCloudEngine, GROUND_CLASS, POINTCLOUD_NODATA};
pub use products::{
    annotate_building_heights, burn_building_heights, find_tiles, get_building_footprints, get_building_height_raster,
    get_dem_raster, get_tree_canopy_raster, parse_datetime, BuildingHeightOptions, DemOptions, Sources,
    TreeCanopyOptions,
};
pub use vector::{
    footprints_from_geojson, footprints_to_geojson, parse_region, read_footprints, read_region, write_footprints,
};

/// Result type for end-to-end pipelines.
pub type Result<T> = std::result::Result<T, PipelineError>;
