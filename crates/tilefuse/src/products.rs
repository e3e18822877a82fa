//! End-to-end product pipelines: search, select, fetch, fuse.
//!
//! Each product runs one linear pipeline over the shared catalog and asset
//! stages. Tiles that cannot be fetched or classified are skipped and come
//! back as warnings next to the product; only a missing capability, an
//! unreachable catalog, or a region left without data aborts.

use crate::buildings::{estimate_building_heights, rasterize_heights, BuildingFootprint, BUILDING_NODATA};
use crate::canopy::{derive_canopy, CanopyOptions, PointCloudTile, SurfaceSource};
use crate::config::{BuildingsConfig, CanopyConfig, DemConfig, SurfaceKind};
use crate::derived::{DerivedRaster, OutputDType, ProductKind};
use crate::materialize::{materialize, MaterializedAsset};
use crate::osm::FootprintSource;
use crate::pointcloud::PointCloudEngine;
use crate::{AssetFetcher, FusionError, Fused, PipelineError, TileWarning};
use tilefuse_catalog::{
    build_index, is_point_cloud, select, CatalogError, CatalogSearch, DateRange, IndexQuery, SelectOptions,
    SelectionResult, TileIndex, TileRecord, DEFAULT_PAGE_SIZE, SWISSALTI3D, SWISSALTI3D_NODATA, SWISSSURFACE3D,
    SWISSSURFACE3D_RASTER,
};
use tilefuse_raster::{
    mosaic, mosaic_onto, Crs, MosaicOptions, MosaicSource, Raster, RasterError, RasterGrid, Region, Resampling,
};
use tracing::{info, warn};

/// The remote collaborators a pipeline draws tiles from.
#[derive(Clone, Copy)]
pub struct Sources<'a> {
    /// Catalog searched for tiles.
    pub catalog: &'a dyn CatalogSearch,
    /// Retrieves tile assets to local files.
    pub fetcher: &'a dyn AssetFetcher,
    /// Items requested per catalog page.
    pub page_size: usize,
}

impl<'a> Sources<'a> {
    pub fn new(catalog: &'a dyn CatalogSearch, fetcher: &'a dyn AssetFetcher) -> Self {
        Self {
            catalog,
            fetcher,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Parse an optional datetime filter such as `2019` or `2019/2021`.
pub fn parse_datetime(value: Option<&str>) -> Result<Option<DateRange>, CatalogError> {
    value.map(str::parse).transpose()
}

/// Selection options for one product input. Pinning a datetime keeps every
/// vintage inside it instead of only the latest one.
fn selection_options(gsd: Option<f64>, extension: Option<&str>, datetime: Option<&DateRange>) -> SelectOptions {
    SelectOptions {
        gsd,
        extension: extension.map(str::to_string),
        latest_only: datetime.is_none(),
    }
}

/// Index a collection over `region` and select among its records.
pub fn find_tiles(
    sources: &Sources<'_>,
    collection_id: &str,
    region: &Region,
    datetime: Option<DateRange>,
    options: &SelectOptions,
) -> Result<SelectionResult, CatalogError> {
    find_tiles_where(sources, collection_id, region, datetime, options, |_| true)
}

fn find_tiles_where(
    sources: &Sources<'_>,
    collection_id: &str,
    region: &Region,
    datetime: Option<DateRange>,
    options: &SelectOptions,
    keep: impl Fn(&TileRecord) -> bool,
) -> Result<SelectionResult, CatalogError> {
    let query = IndexQuery::new(collection_id, region)
        .with_datetime(datetime)
        .with_page_size(sources.page_size);
    let index = build_index(sources.catalog, &query)?;
    let records: Vec<TileRecord> = index.into_records().into_iter().filter(|r| keep(r)).collect();
    let selection = select(&TileIndex::from_records(collection_id, records), options);
    info!(collection = collection_id, tiles = selection.len(), "selected tiles");
    Ok(selection)
}

/// Fetch the selected assets, failing when none could be retrieved.
fn fetch_selection(
    sources: &Sources<'_>,
    collection_id: &str,
    selection: &SelectionResult,
) -> Result<(Vec<MaterializedAsset>, Vec<TileWarning>), PipelineError> {
    if selection.is_empty() {
        return Err(FusionError::InsufficientCoverage(format!("no {} tiles cover the region", collection_id)).into());
    }
    let materialized = materialize(selection, sources.fetcher);
    if materialized.is_empty() {
        return Err(FusionError::InsufficientCoverage(format!(
            "none of the {} selected {} tiles could be retrieved",
            selection.len(),
            collection_id
        ))
        .into());
    }
    Ok((materialized.assets, materialized.warnings))
}

fn mosaic_sources(assets: &[MaterializedAsset]) -> Vec<MosaicSource> {
    assets
        .iter()
        .map(|asset| MosaicSource::from_path(&asset.path, asset.record.acquisition_date))
        .collect()
}

/// A region the tiles do not reach is a coverage problem, not a raster one.
fn coverage_error(e: RasterError) -> PipelineError {
    match e {
        RasterError::EmptyGrid(reason) => FusionError::InsufficientCoverage(reason).into(),
        other => other.into(),
    }
}

/// Mosaic swissALTI3D at `alti3d_res` onto a grid at `target_gsd`.
fn terrain_mosaic(
    sources: &Sources<'_>,
    region: &Region,
    alti3d_res: f64,
    datetime: Option<DateRange>,
    target_gsd: f64,
    resampling: Resampling,
) -> Result<Fused<Raster>, PipelineError> {
    let options = selection_options(Some(alti3d_res), Some("tif"), datetime.as_ref());
    let selection = find_tiles(sources, SWISSALTI3D, region, datetime, &options)?;
    let (assets, warnings) = fetch_selection(sources, SWISSALTI3D, &selection)?;
    let options = MosaicOptions::new(region, target_gsd).with_resampling(resampling);
    let (terrain, _) = mosaic(&mosaic_sources(&assets), &options).map_err(coverage_error)?;
    Ok(Fused {
        product: terrain,
        warnings,
    })
}

/// Mosaic swissSURFACE3D Raster onto an existing grid.
fn surface_raster_onto(
    sources: &Sources<'_>,
    region: &Region,
    datetime: Option<DateRange>,
    grid: &RasterGrid,
    resampling: Resampling,
) -> Result<Fused<Raster>, PipelineError> {
    let options = selection_options(None, Some("tif"), datetime.as_ref());
    let selection = find_tiles(sources, SWISSSURFACE3D_RASTER, region, datetime, &options)?;
    let (assets, warnings) = fetch_selection(sources, SWISSSURFACE3D_RASTER, &selection)?;
    let surface = mosaic_onto(&mosaic_sources(&assets), grid, resampling)?;
    Ok(Fused {
        product: surface,
        warnings,
    })
}

/// Options of [`get_dem_raster`].
#[derive(Debug, Clone, PartialEq)]
pub struct DemOptions {
    /// swissALTI3D resolution, also the output resolution.
    pub alti3d_res: f64,
    /// Acquisition time filter; all vintages inside it are mosaicked.
    pub datetime: Option<DateRange>,
    /// Resampling kernel.
    pub resampling: Resampling,
}

impl Default for DemOptions {
    fn default() -> Self {
        Self {
            alti3d_res: 2.0,
            datetime: None,
            resampling: Resampling::Bilinear,
        }
    }
}

impl DemOptions {
    pub fn from_config(config: &DemConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            alti3d_res: config.alti3d_res,
            datetime: parse_datetime(config.alti3d_datetime.as_deref())?,
            resampling: config.resampling,
        })
    }
}

/// Ground elevation model of `region` from swissALTI3D.
pub fn get_dem_raster(
    sources: &Sources<'_>,
    region: &Region,
    options: &DemOptions,
) -> Result<Fused<DerivedRaster>, PipelineError> {
    let terrain = terrain_mosaic(
        sources,
        region,
        options.alti3d_res,
        options.datetime,
        options.alti3d_res,
        options.resampling,
    )?;
    let product = DerivedRaster::encode(
        ProductKind::Dem,
        &terrain.product,
        region,
        OutputDType::F32,
        Some(SWISSALTI3D_NODATA as f64),
    )?;
    let fused = Fused {
        product,
        warnings: terrain.warnings,
    };
    if fused.product.valid_count() == 0 {
        return Err(FusionError::InsufficientCoverage("no valid elevation inside the region".to_string()).into());
    }
    info!(
        width = fused.product.grid().width,
        height = fused.product.grid().height,
        skipped_tiles = fused.warnings.len(),
        "built elevation model"
    );
    Ok(fused)
}

/// Options of [`get_tree_canopy_raster`].
#[derive(Debug, Clone, PartialEq)]
pub struct TreeCanopyOptions {
    /// Output resolution in metres.
    pub dst_res: f64,
    /// swissALTI3D resolution used for the terrain.
    pub alti3d_res: f64,
    /// Terrain acquisition time filter.
    pub alti3d_datetime: Option<DateRange>,
    /// Surface source.
    pub surface: SurfaceKind,
    /// Surface acquisition time filter.
    pub surface3d_datetime: Option<DateRange>,
    /// Output encoding and resampling.
    pub canopy: CanopyOptions,
}

impl Default for TreeCanopyOptions {
    fn default() -> Self {
        Self {
            dst_res: 1.0,
            alti3d_res: 0.5,
            alti3d_datetime: None,
            surface: SurfaceKind::Raster,
            surface3d_datetime: None,
            canopy: CanopyOptions::default(),
        }
    }
}

impl TreeCanopyOptions {
    pub fn from_config(config: &CanopyConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            dst_res: config.dst_res,
            alti3d_res: config.alti3d_res,
            alti3d_datetime: parse_datetime(config.alti3d_datetime.as_deref())?,
            surface: config.surface,
            surface3d_datetime: parse_datetime(config.surface3d_datetime.as_deref())?,
            canopy: CanopyOptions {
                dst_dtype: config.dst_dtype,
                dst_nodata: config.dst_nodata,
                resampling: config.resampling,
            },
        })
    }
}

/// Tree canopy height of `region` at `dst_res`.
///
/// Point-cloud surfaces need `engine`; without one the call fails before
/// contacting the catalog. Building `footprints`, when given, are masked
/// out of the canopy.
pub fn get_tree_canopy_raster(
    sources: &Sources<'_>,
    region: &Region,
    options: &TreeCanopyOptions,
    engine: Option<&dyn PointCloudEngine>,
    footprints: Option<&[BuildingFootprint]>,
) -> Result<Fused<DerivedRaster>, PipelineError> {
    if options.surface == SurfaceKind::PointCloud && engine.is_none() {
        return Err(FusionError::CapabilityUnavailable(
            "point-cloud surfaces require a point cloud engine (is PDAL installed?)".to_string(),
        )
        .into());
    }

    let terrain = terrain_mosaic(
        sources,
        region,
        options.alti3d_res,
        options.alti3d_datetime,
        options.dst_res,
        options.canopy.resampling,
    )?;
    let mut warnings = terrain.warnings;
    let terrain = terrain.product;

    let surface = match options.surface {
        SurfaceKind::Raster => {
            let surface = surface_raster_onto(
                sources,
                region,
                options.surface3d_datetime,
                terrain.grid(),
                options.canopy.resampling,
            )?;
            warnings.extend(surface.warnings);
            SurfaceSource::Raster(surface.product)
        }
        SurfaceKind::PointCloud => {
            let datetime = options.surface3d_datetime;
            let select_options = selection_options(None, None, datetime.as_ref());
            let selection = find_tiles_where(sources, SWISSSURFACE3D, region, datetime, &select_options, is_point_cloud)?;
            let (assets, fetch_warnings) = fetch_selection(sources, SWISSSURFACE3D, &selection)?;
            warnings.extend(fetch_warnings);
            let tiles = assets
                .into_iter()
                .map(|asset| PointCloudTile {
                    tile_id: asset.record.tile_id,
                    path: asset.path,
                    acquired: asset.record.acquisition_date,
                })
                .collect();
            SurfaceSource::PointClouds { tiles, engine }
        }
    };

    let mask = footprints.map(|footprints| {
        rasterize_heights(footprints, crate::buildings::DEFAULT_HEIGHT_ATTR, terrain.grid()).mask()
    });

    let canopy = derive_canopy(surface, &terrain, mask.as_ref(), region, &options.canopy)?;
    Ok(canopy.with_earlier_warnings(warnings))
}

/// Options of [`get_building_height_raster`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingHeightOptions {
    /// Output resolution in metres.
    pub dst_res: f64,
    /// Footprint property holding the height.
    pub height_attr: String,
    /// Estimate missing heights from surface minus terrain.
    pub estimate_heights: bool,
    /// swissALTI3D resolution used for estimation.
    pub alti3d_res: f64,
    /// Terrain acquisition time filter.
    pub alti3d_datetime: Option<DateRange>,
    /// Surface acquisition time filter.
    pub surface3d_datetime: Option<DateRange>,
}

impl Default for BuildingHeightOptions {
    fn default() -> Self {
        Self {
            dst_res: 1.0,
            height_attr: crate::buildings::DEFAULT_HEIGHT_ATTR.to_string(),
            estimate_heights: true,
            alti3d_res: 0.5,
            alti3d_datetime: None,
            surface3d_datetime: None,
        }
    }
}

impl BuildingHeightOptions {
    pub fn from_config(config: &BuildingsConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            dst_res: config.dst_res,
            height_attr: config.height_attr.clone(),
            estimate_heights: config.estimate_heights,
            alti3d_res: config.alti3d_res,
            alti3d_datetime: parse_datetime(config.alti3d_datetime.as_deref())?,
            surface3d_datetime: parse_datetime(config.surface3d_datetime.as_deref())?,
        })
    }
}

/// Fill in missing footprint heights from swissSURFACE3D Raster minus
/// swissALTI3D.
///
/// Footprints that already carry a positive `height_attr` are kept as they
/// are. If the elevation tiles are missing the estimate is skipped with a
/// warning log and the affected footprints stay without a height.
pub fn annotate_building_heights(
    sources: &Sources<'_>,
    region: &Region,
    mut footprints: Vec<BuildingFootprint>,
    options: &BuildingHeightOptions,
) -> Result<Fused<Vec<BuildingFootprint>>, PipelineError> {
    let missing = footprints.iter().filter(|f| f.height(&options.height_attr).is_none()).count();
    if !options.estimate_heights || missing == 0 {
        return Ok(Fused::clean(footprints));
    }

    match estimation_inputs(sources, region, options) {
        Ok((terrain, surface)) => {
            let mut warnings = terrain.warnings;
            warnings.extend(surface.warnings);
            estimate_building_heights(&mut footprints, &options.height_attr, &surface.product, &terrain.product)?;
            Ok(Fused {
                product: footprints,
                warnings,
            })
        }
        Err(PipelineError::Fusion(FusionError::InsufficientCoverage(reason))) => {
            warn!(missing, reason = %reason, "cannot estimate building heights");
            Ok(Fused::clean(footprints))
        }
        Err(e) => Err(e),
    }
}

/// Burn already annotated footprints into a building height raster of
/// `region`. Footprints without a height are burned with the unknown
/// height.
pub fn burn_building_heights(
    region: &Region,
    footprints: &[BuildingFootprint],
    options: &BuildingHeightOptions,
) -> Result<DerivedRaster, PipelineError> {
    let region_lv95 = region.to_crs(Crs::LV95)?;
    let grid = RasterGrid::covering(region_lv95.bounds(), options.dst_res, Crs::LV95)?;

    let heights = rasterize_heights(footprints, &options.height_attr, &grid);
    let product = DerivedRaster::encode(
        ProductKind::BuildingHeight,
        heights.raster(),
        region,
        OutputDType::F32,
        Some(BUILDING_NODATA as f64),
    )?;
    info!(
        width = grid.width,
        height = grid.height,
        burned = heights.burned(),
        "built building height raster"
    );
    Ok(product)
}

/// Building height raster of `region` from `footprints`.
///
/// Missing heights are estimated first (see [`annotate_building_heights`]).
pub fn get_building_height_raster(
    sources: &Sources<'_>,
    region: &Region,
    footprints: &[BuildingFootprint],
    options: &BuildingHeightOptions,
) -> Result<Fused<DerivedRaster>, PipelineError> {
    let annotated = annotate_building_heights(sources, region, footprints.to_vec(), options)?;
    let product = burn_building_heights(region, &annotated.product, options)?;
    Ok(Fused {
        product,
        warnings: annotated.warnings,
    })
}

/// Building footprints of `region` from `footprint_source`, annotated with
/// their heights.
///
/// Heights come from `height_attr` or, where missing, from the elevation
/// models. Footprints left without a positive height are dropped; they are
/// mostly buildings newer than the elevation tiles.
pub fn get_building_footprints(
    sources: &Sources<'_>,
    region: &Region,
    footprint_source: &dyn FootprintSource,
    options: &BuildingHeightOptions,
) -> Result<Fused<Vec<BuildingFootprint>>, PipelineError> {
    let footprints = footprint_source.footprints(region)?;
    let total = footprints.len();
    let annotated = annotate_building_heights(sources, region, footprints, options)?;
    let kept = annotated.map(|footprints| {
        footprints
            .into_iter()
            .filter(|f| f.height(&options.height_attr).is_some())
            .collect::<Vec<_>>()
    });
    info!(total, kept = kept.product.len(), "annotated building footprints");
    Ok(kept)
}

fn estimation_inputs(
    sources: &Sources<'_>,
    region: &Region,
    options: &BuildingHeightOptions,
) -> Result<(Fused<Raster>, Fused<Raster>), PipelineError> {
    let terrain = terrain_mosaic(
        sources,
        region,
        options.alti3d_res,
        options.alti3d_datetime,
        options.alti3d_res,
        Resampling::Bilinear,
    )?;
    let surface = surface_raster_onto(
        sources,
        region,
        options.surface3d_datetime,
        terrain.product.grid(),
        Resampling::Bilinear,
    )?;
    Ok((terrain, surface))
}
