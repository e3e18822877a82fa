//! Building footprints burned into a height raster.
//!
//! Larger footprints are burned first so that smaller ones, processed
//! later, win where footprints overlap (e.g. a tower on a podium).
//! Footprints without a usable height are burned with [`UNKNOWN_HEIGHT`]
//! rather than dropped, so they still mask canopy.

use geo::{Area, BoundingRect, Intersects, MultiPolygon};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tilefuse_raster::{
    footprint_pixels, resample_to_grid, zonal_mean, Crs, Raster, RasterError, RasterGrid, Resampling,
};
use tracing::{debug, info, warn};

/// Height burned for footprints whose height is unknown.
pub const UNKNOWN_HEIGHT: f32 = -1.0;

/// Nodata of building-height rasters.
pub const BUILDING_NODATA: f32 = -9999.0;

/// Default name of the height property.
pub const DEFAULT_HEIGHT_ATTR: &str = "height";

/// One building footprint with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingFootprint {
    /// Footprint identifier.
    pub id: String,
    /// Footprint polygon(s).
    pub geometry: MultiPolygon<f64>,
    /// CRS of `geometry`.
    pub crs: Crs,
    /// Feature properties.
    pub properties: Map<String, Value>,
}

impl BuildingFootprint {
    /// Footprint without properties.
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self {
            id: id.into(),
            geometry,
            crs,
            properties: Map::new(),
        }
    }

    /// Set a numeric height property.
    pub fn with_height(mut self, attr: &str, height: f64) -> Self {
        self.properties.insert(attr.to_string(), Value::from(height));
        self
    }

    /// Height from `attr`: a positive finite number or numeric string.
    pub fn height(&self, attr: &str) -> Option<f64> {
        let height = match self.properties.get(attr)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().trim_end_matches('m').trim().parse().ok()?,
            _ => return None,
        };
        (height.is_finite() && height > 0.0).then_some(height)
    }

    /// Geometry expressed in `crs`.
    pub fn geometry_in(&self, crs: Crs) -> Result<MultiPolygon<f64>, RasterError> {
        self.crs.transform_multipolygon(crs, &self.geometry)
    }
}

/// A rasterized set of footprints.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingRaster {
    raster: Raster,
    burned: usize,
}

impl BuildingRaster {
    /// Heights per pixel; [`UNKNOWN_HEIGHT`] where the height is unknown,
    /// [`BUILDING_NODATA`] outside every footprint.
    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Consume into the underlying raster.
    pub fn into_raster(self) -> Raster {
        self.raster
    }

    /// Number of footprints that burned at least one pixel.
    pub fn burned(&self) -> usize {
        self.burned
    }

    /// Pixels covered by any footprint.
    pub fn mask(&self) -> BuildingMask {
        BuildingMask {
            grid: self.raster.grid().clone(),
            mask: self.raster.data().iter().map(|v| !self.raster.is_nodata(*v)).collect(),
        }
    }
}

/// Per-pixel building coverage on a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingMask {
    grid: RasterGrid,
    mask: Vec<bool>,
}

impl BuildingMask {
    /// The mask's grid.
    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    /// Row-major coverage flags.
    pub fn as_slice(&self) -> &[bool] {
        &self.mask
    }

    /// Number of covered pixels.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    /// Whether the pixel containing world point `(x, y)` (in the mask's
    /// CRS) is covered.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.grid
            .pixel_at(x, y)
            .map_or(false, |(col, row)| self.mask[self.grid.index(col, row)])
    }

    /// Coverage flags on another grid, by nearest pixel centre.
    pub fn on_grid(&self, grid: &RasterGrid) -> Result<Vec<bool>, RasterError> {
        if grid == &self.grid {
            return Ok(self.mask.clone());
        }
        let to_mask = grid.crs.transformer(self.grid.crs)?;
        Ok((0..grid.len())
            .map(|index| {
                let (col, row) = grid.col_row(index);
                let (x, y) = grid.pixel_center(col, row);
                to_mask.point(x, y).map_or(false, |(x, y)| self.contains(x, y))
            })
            .collect())
    }
}

/// Burn footprints into a height raster on `grid`.
///
/// Every footprint whose extent intersects the grid burns at least one
/// pixel, even when it is too small to cover a pixel centre.
pub fn rasterize_heights(footprints: &[BuildingFootprint], height_attr: &str, grid: &RasterGrid) -> BuildingRaster {
    let grid_bounds = grid.bounds();

    let mut prepared: Vec<(&BuildingFootprint, MultiPolygon<f64>, f64)> = footprints
        .iter()
        .filter_map(|footprint| {
            let geometry = match footprint.geometry_in(grid.crs) {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!(footprint = %footprint.id, error = %e, "skipping footprint");
                    return None;
                }
            };
            let touches = geometry
                .bounding_rect()
                .map_or(false, |bounds| bounds.intersects(&grid_bounds));
            if !touches {
                return None;
            }
            let area = geometry.unsigned_area();
            Some((footprint, geometry, area))
        })
        .collect();

    // Largest first; ties by id so the result is order independent
    prepared.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    let mut raster = Raster::empty(grid.clone(), BUILDING_NODATA);
    let mut burned = 0;
    let mut unknown = 0;
    for (footprint, geometry, _) in &prepared {
        let height = match footprint.height(height_attr) {
            Some(h) => h as f32,
            None => {
                unknown += 1;
                UNKNOWN_HEIGHT
            }
        };
        let pixels = footprint_pixels(grid, geometry);
        if pixels.is_empty() {
            debug!(footprint = %footprint.id, "footprint touches the grid edge only");
            continue;
        }
        let data = raster.data_mut();
        for index in pixels {
            data[index] = height;
        }
        burned += 1;
    }

    info!(
        footprints = footprints.len(),
        burned,
        unknown_height = unknown,
        "rasterized building footprints"
    );
    BuildingRaster { raster, burned }
}

/// Fill in missing heights as the mean of surface minus terrain over each
/// footprint.
///
/// Only footprints without a usable `height_attr` are touched; estimates
/// that are not positive (e.g. buildings newer than the surface model) are
/// left unknown. Returns the number of footprints that received a height.
pub fn estimate_building_heights(
    footprints: &mut [BuildingFootprint],
    height_attr: &str,
    surface: &Raster,
    terrain: &Raster,
) -> Result<usize, RasterError> {
    let grid = terrain.grid();
    let surface = resample_to_grid(surface, grid, Resampling::Bilinear)?;
    let heights = Raster::from_fn(grid.clone(), Some(BUILDING_NODATA), |col, row| {
        match (surface.get(col, row), terrain.get(col, row)) {
            (Some(s), Some(t)) => s - t,
            _ => BUILDING_NODATA,
        }
    });

    let mut estimated = 0;
    for footprint in footprints.iter_mut().filter(|f| f.height(height_attr).is_none()) {
        let geometry = footprint.geometry_in(grid.crs)?;
        match zonal_mean(&heights, &geometry) {
            Some(mean) if mean > 0.0 => {
                footprint.properties.insert(height_attr.to_string(), Value::from(mean));
                estimated += 1;
            }
            other => debug!(footprint = %footprint.id, mean = ?other, "no positive height estimate"),
        }
    }
    info!(estimated, "estimated building heights");
    Ok(estimated)
}
