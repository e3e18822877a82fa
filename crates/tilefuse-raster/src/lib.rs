//! # tilefuse-raster
//!
//! Raster primitives for fusing swisstopo elevation tiles.
//!
//! This crate provides:
//! - [`RasterGrid`] - the shared pixel frame (CRS, transform, extent) that
//!   every fused raster is aligned to
//! - [`Raster`] - a single-band f32 raster with nodata handling and
//!   nearest/bilinear sampling
//! - GeoTIFF reading and writing with georeferencing stored in the file's
//!   own tags ([`read_raster`], [`write_geotiff`])
//! - [`mosaic`] - merging tiles onto one grid, most recent tile winning
//! - polygon rasterization, region clipping and zonal means
//! - CRS transforms between LV95, WGS84 and the other frames regions
//!   arrive in ([`Crs`], backed by `proj4rs`)
//!
//! ## Example
//!
//! ```no_run
//! use tilefuse_raster::{mosaic, Crs, MosaicOptions, MosaicSource, Region};
//!
//! let region = Region::from_bbox([2_532_000.0, 1_152_000.0, 2_534_000.0, 1_153_000.0], Crs::LV95)?;
//! let sources = vec![
//!     MosaicSource::from_path("tiles/swissalti3d_2019_2532-1152_2_2056_5728.tif", None),
//!     MosaicSource::from_path("tiles/swissalti3d_2019_2533-1152_2_2056_5728.tif", None),
//! ];
//! let (dem, grid) = mosaic(&sources, &MosaicOptions::new(&region, 2.0))?;
//! println!("{}x{} pixels, {} valid", grid.width, grid.height, dem.valid_count());
//! # Ok::<(), tilefuse_raster::RasterError>(())
//! ```

mod crs;
mod error;
mod geotiff;
mod grid;
mod mosaic;
mod raster;
mod rasterize;
mod region;

pub use crs::{lv95_to_wgs84, wgs84_to_lv95, Crs, CrsTransform, EDGE_SAMPLES, LV03_EPSG, LV95_EPSG, WGS84_EPSG};
pub use error::RasterError;
pub use geotiff::{read_header, read_raster, write_geotiff, write_raster, GeoTiffHeader, PixelData};
pub use grid::{intersect_rects, union_rects, GeoTransform, RasterGrid};
pub use mosaic::{mosaic, mosaic_grid, mosaic_onto, resample_to_grid, MosaicOptions, MosaicSource, MOSAIC_NODATA};
pub use raster::{Raster, Resampling};
pub use rasterize::{clip_to_region, footprint_pixels, polygon_pixels, region_mask, zonal_mean};
pub use region::Region;

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
