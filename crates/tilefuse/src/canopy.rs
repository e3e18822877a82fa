//! Tree canopy height from surface and terrain elevations.
//!
//! Canopy height is the per-pixel difference between a surface model
//! (first returns or a surface raster) and the terrain model, computed on
//! the terrain's grid. Negative differences are clamped to zero, building
//! pixels are removed, and the result is clipped to the region and cast to
//! the requested storage type.

use crate::buildings::BuildingMask;
use crate::derived::{DerivedRaster, OutputDType, ProductKind};
use crate::pointcloud::{ClassifiedTile, PointCloudEngine};
use crate::{ClassificationError, FusionError, Fused, TileWarning};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::path::PathBuf;
use tilefuse_raster::{mosaic_onto, region_mask, resample_to_grid, MosaicSource, Raster, Region, Resampling, MOSAIC_NODATA};
use tracing::{debug, info, warn};

/// A point-cloud tile to classify.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudTile {
    /// Tile identifier, used in warnings.
    pub tile_id: String,
    /// Local path of the point cloud.
    pub path: PathBuf,
    /// Acquisition time, used to order overlapping tiles.
    pub acquired: Option<DateTime<Utc>>,
}

/// Where surface elevations come from.
pub enum SurfaceSource<'a> {
    /// A surface raster, resampled onto the terrain grid if needed.
    Raster(Raster),
    /// Point-cloud tiles classified by `engine`.
    PointClouds {
        /// Tiles to classify.
        tiles: Vec<PointCloudTile>,
        /// Classification engine; `None` when none is installed.
        engine: Option<&'a dyn PointCloudEngine>,
    },
}

impl std::fmt::Debug for SurfaceSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceSource::Raster(raster) => f.debug_tuple("Raster").field(raster.grid()).finish(),
            SurfaceSource::PointClouds { tiles, engine } => f
                .debug_struct("PointClouds")
                .field("tiles", &tiles.len())
                .field("engine", &engine.is_some())
                .finish(),
        }
    }
}

/// Options of [`derive_canopy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanopyOptions {
    /// Output sample type.
    pub dst_dtype: OutputDType,
    /// Output nodata; the dtype default when `None`.
    pub dst_nodata: Option<f64>,
    /// Kernel used to bring surfaces onto the terrain grid.
    pub resampling: Resampling,
}

impl Default for CanopyOptions {
    fn default() -> Self {
        Self {
            dst_dtype: OutputDType::U8,
            dst_nodata: None,
            resampling: Resampling::Bilinear,
        }
    }
}

/// Derive the tree canopy raster on `terrain`'s grid.
///
/// Point-cloud tiles that fail to classify are skipped and reported as
/// [`TileWarning::ClassificationFailure`]; their footprint ends up nodata.
/// Fails with `CapabilityUnavailable` before any work when point clouds are
/// given without an engine, and with `InsufficientCoverage` when the region
/// holds no valid terrain or no valid surface pixel.
pub fn derive_canopy(
    surface: SurfaceSource<'_>,
    terrain: &Raster,
    building_mask: Option<&BuildingMask>,
    region: &Region,
    options: &CanopyOptions,
) -> Result<Fused<DerivedRaster>, FusionError> {
    let grid = terrain.grid().clone();
    let mut terrain = terrain.clone();
    let mut warnings = Vec::new();

    let surface = match surface {
        SurfaceSource::Raster(raster) => resample_to_grid(&raster, &grid, options.resampling)?,
        SurfaceSource::PointClouds { tiles, engine } => {
            let Some(engine) = engine else {
                return Err(FusionError::CapabilityUnavailable(
                    "point-cloud surfaces require a point cloud engine (is PDAL installed?)".to_string(),
                ));
            };
            let (classified, failed) = classify_tiles(&tiles, engine);
            warnings.extend(failed);

            let mut ground_sources = Vec::with_capacity(classified.len());
            let mut surface_sources = Vec::with_capacity(classified.len());
            for (tile, result) in classified {
                ground_sources.push(MosaicSource::from_raster(tile.tile_id.clone(), result.ground, tile.acquired));
                surface_sources.push(MosaicSource::from_raster(tile.tile_id.clone(), result.surface, tile.acquired));
            }

            // Ground returns fill holes in the terrain model
            let ground = mosaic_onto(&ground_sources, &grid, options.resampling)?;
            let nodata = terrain.nodata_or_nan();
            let mut filled = 0usize;
            let holes: Vec<usize> = (0..grid.len()).filter(|&i| terrain.get_index(i).is_none()).collect();
            let data = terrain.data_mut();
            for index in holes {
                if let Some(value) = ground.get_index(index) {
                    data[index] = value;
                    filled += 1;
                } else {
                    data[index] = nodata;
                }
            }
            if filled > 0 {
                debug!(filled, "filled terrain holes from ground returns");
            }

            mosaic_onto(&surface_sources, &grid, options.resampling)?
        }
    };

    let inside = region_mask(&grid, region)?;
    let terrain_in_region = (0..grid.len()).filter(|&i| inside[i] && terrain.get_index(i).is_some()).count();
    let surface_in_region = (0..grid.len()).filter(|&i| inside[i] && surface.get_index(i).is_some()).count();
    if terrain_in_region == 0 {
        return Err(FusionError::InsufficientCoverage("no valid terrain pixel inside the region".to_string()));
    }
    if surface_in_region == 0 {
        return Err(FusionError::InsufficientCoverage("no valid surface pixel inside the region".to_string()));
    }

    let buildings = building_mask.map(|mask| mask.on_grid(&grid)).transpose()?;
    let canopy = Raster::from_fn(grid.clone(), Some(MOSAIC_NODATA), |col, row| {
        let index = grid.index(col, row);
        if buildings.as_ref().map_or(false, |b| b[index]) {
            return MOSAIC_NODATA;
        }
        match (surface.get_index(index), terrain.get_index(index)) {
            (Some(s), Some(t)) => (s - t).max(0.0),
            _ => MOSAIC_NODATA,
        }
    });

    let product = DerivedRaster::encode(ProductKind::TreeCanopy, &canopy, region, options.dst_dtype, options.dst_nodata)?;
    info!(
        width = grid.width,
        height = grid.height,
        valid = product.valid_count(),
        skipped_tiles = warnings.len(),
        dtype = %options.dst_dtype,
        "derived tree canopy"
    );
    Ok(Fused { product, warnings })
}

/// Classify tiles in parallel, splitting successes from failures.
fn classify_tiles<'t>(
    tiles: &'t [PointCloudTile],
    engine: &dyn PointCloudEngine,
) -> (Vec<(&'t PointCloudTile, ClassifiedTile)>, Vec<TileWarning>) {
    let results: Vec<(&PointCloudTile, Result<ClassifiedTile, ClassificationError>)> =
        tiles.par_iter().map(|tile| (tile, engine.classify(&tile.path))).collect();

    let mut classified = Vec::new();
    let mut failed = Vec::new();
    for (tile, result) in results {
        match result {
            Ok(result) => classified.push((tile, result)),
            Err(e) => {
                warn!(tile = %tile.tile_id, path = %tile.path.display(), error = %e, "classification failed, skipping tile");
                failed.push(TileWarning::ClassificationFailure {
                    tile_id: tile.tile_id.clone(),
                    path: tile.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (classified, failed)
}
