//! Merging same-kind tiles into one raster on a common grid.
//!
//! Each source is resampled onto the target grid by inverse mapping: every
//! target pixel centre is transformed into the source CRS and sampled there.
//! Sources are painted in ascending acquisition order so that, where tiles
//! overlap, the most recent valid value wins. Pixels covered by no source
//! stay nodata.

use crate::geotiff::{read_header, read_raster};
use crate::grid::{intersect_rects, union_rects};
use crate::{Crs, Raster, RasterError, RasterGrid, Region, Resampling, Result};
use chrono::{DateTime, Utc};
use geo::Rect;
use std::path::PathBuf;
use tracing::{debug, info};

/// Nodata value of mosaicked elevation rasters.
pub const MOSAIC_NODATA: f32 = -9999.0;

/// Where a source raster's pixels come from.
#[derive(Debug, Clone)]
enum SourceData {
    /// A GeoTIFF on disk, decoded only when painted.
    File(PathBuf),
    /// A raster already in memory.
    Memory(Raster),
}

/// One tile taking part in a mosaic.
#[derive(Debug, Clone)]
pub struct MosaicSource {
    label: String,
    acquired: Option<DateTime<Utc>>,
    data: SourceData,
}

impl MosaicSource {
    /// A GeoTIFF tile on disk.
    pub fn from_path<P: Into<PathBuf>>(path: P, acquired: Option<DateTime<Utc>>) -> Self {
        let path = path.into();
        Self {
            label: path.display().to_string(),
            acquired,
            data: SourceData::File(path),
        }
    }

    /// A tile already decoded in memory.
    pub fn from_raster(label: impl Into<String>, raster: Raster, acquired: Option<DateTime<Utc>>) -> Self {
        Self {
            label: label.into(),
            acquired,
            data: SourceData::Memory(raster),
        }
    }

    /// Identifier used for ordering equal vintages and in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Acquisition time of the tile, if known.
    pub fn acquired(&self) -> Option<DateTime<Utc>> {
        self.acquired
    }

    /// Footprint of the source in `crs`.
    fn footprint(&self, crs: Crs) -> Result<Rect<f64>> {
        let grid = match &self.data {
            SourceData::File(path) => read_header(path)?.grid,
            SourceData::Memory(raster) => raster.grid().clone(),
        };
        grid.crs.transform_rect(crs, grid.bounds())
    }

    fn load(&self) -> Result<std::borrow::Cow<'_, Raster>> {
        match &self.data {
            SourceData::File(path) => Ok(std::borrow::Cow::Owned(read_raster(path)?)),
            SourceData::Memory(raster) => Ok(std::borrow::Cow::Borrowed(raster)),
        }
    }
}

/// Options of [`mosaic`].
#[derive(Debug, Clone)]
pub struct MosaicOptions<'a> {
    /// Region the output is restricted to.
    pub region: &'a Region,
    /// Output pixel size in metres.
    pub target_gsd: f64,
    /// Resampling kernel.
    pub resampling: Resampling,
    /// CRS of the output grid.
    pub crs: Crs,
}

impl<'a> MosaicOptions<'a> {
    /// Bilinear mosaic in LV95 at `target_gsd`.
    pub fn new(region: &'a Region, target_gsd: f64) -> Self {
        Self {
            region,
            target_gsd,
            resampling: Resampling::Bilinear,
            crs: Crs::LV95,
        }
    }

    /// Override the resampling kernel.
    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }
}

/// Compute the grid covering the union of the sources' footprints clipped
/// to the region's bounding box.
pub fn mosaic_grid(sources: &[MosaicSource], options: &MosaicOptions<'_>) -> Result<RasterGrid> {
    let mut union: Option<Rect<f64>> = None;
    for source in sources {
        let footprint = source.footprint(options.crs)?;
        union = Some(match union {
            Some(u) => union_rects(u, footprint),
            None => footprint,
        });
    }
    let union = union.ok_or(RasterError::NoSources)?;

    let region_bounds = options.region.to_crs(options.crs)?.bounds();
    let window = intersect_rects(union, region_bounds).ok_or_else(|| {
        RasterError::EmptyGrid("source tiles do not intersect the region".to_string())
    })?;
    RasterGrid::covering(window, options.target_gsd, options.crs)
}

/// Merge `sources` into one raster on a grid computed from their footprints
/// and the region.
///
/// The returned raster's grid is exactly the returned [`RasterGrid`].
pub fn mosaic(sources: &[MosaicSource], options: &MosaicOptions<'_>) -> Result<(Raster, RasterGrid)> {
    let grid = mosaic_grid(sources, options)?;
    info!(
        sources = sources.len(),
        width = grid.width,
        height = grid.height,
        gsd = options.target_gsd,
        "mosaicking tiles"
    );
    let raster = mosaic_onto(sources, &grid, options.resampling)?;
    Ok((raster, grid))
}

/// Paint `sources` onto an existing grid.
pub fn mosaic_onto(sources: &[MosaicSource], grid: &RasterGrid, resampling: Resampling) -> Result<Raster> {
    let mut order: Vec<&MosaicSource> = sources.iter().collect();
    // Oldest first so that later (more recent) tiles overwrite; unknown
    // dates sort before any known date
    order.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.label.cmp(&b.label)));

    let mut out = Raster::empty(grid.clone(), MOSAIC_NODATA);
    for source in order {
        let raster = source.load()?;
        let painted = paint(&mut out, &raster, resampling)?;
        debug!(source = %source.label, painted, "painted tile");
    }
    Ok(out)
}

/// Resample a raster onto `grid`; pixels it does not cover are nodata.
pub fn resample_to_grid(raster: &Raster, grid: &RasterGrid, resampling: Resampling) -> Result<Raster> {
    if raster.grid() == grid {
        return Ok(raster.clone());
    }
    let mut out = Raster::empty(grid.clone(), raster.nodata().unwrap_or(MOSAIC_NODATA));
    paint(&mut out, raster, resampling)?;
    Ok(out)
}

/// Write every valid sample of `source` into `target`, returning the number
/// of pixels written. Target pixels outside the source frame's domain are
/// left untouched.
fn paint(target: &mut Raster, source: &Raster, resampling: Resampling) -> Result<usize> {
    let grid = target.grid().clone();
    let source_bounds = source.grid().bounds();
    let source_crs = source.grid().crs;

    // Restrict the scan to the part of the target the source can reach
    let reach = source_crs.transform_rect(grid.crs, source_bounds)?;
    let Some(window) = intersect_rects(reach, grid.bounds()) else {
        return Ok(0);
    };
    let to_source = grid.crs.transformer(source_crs)?;
    let t = grid.transform;
    let col_start = ((window.min().x - t.origin_x) / t.pixel_width).floor().max(0.0) as usize;
    let col_end = (((window.max().x - t.origin_x) / t.pixel_width).ceil().max(0.0) as usize).min(grid.width);
    let row_start = ((t.origin_y - window.max().y) / t.pixel_height).floor().max(0.0) as usize;
    let row_end = (((t.origin_y - window.min().y) / t.pixel_height).ceil().max(0.0) as usize).min(grid.height);

    let mut painted = 0;
    let data = target.data_mut();
    for row in row_start..row_end {
        for col in col_start..col_end {
            let (x, y) = grid.pixel_center(col, row);
            let Ok((sx, sy)) = to_source.point(x, y) else {
                continue;
            };
            if let Some(value) = source.sample(sx, sy, resampling) {
                data[grid.index(col, row)] = value;
                painted += 1;
            }
        }
    }
    Ok(painted)
}
