//! `tilefuse` command-line tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tilefuse::config::Config;
use tilefuse::{
    annotate_building_heights, burn_building_heights, find_tiles, get_dem_raster, get_tree_canopy_raster,
    parse_datetime, read_footprints, read_region, write_footprints, BuildingHeightOptions, DemOptions, DerivedRaster,
    FootprintSource, Fused, HttpAssetCache, OutputDType, OverpassClient, PdalConfig, PdalEngine, PipelineError,
    PointCloudEngine, Sources, SurfaceKind, TreeCanopyOptions,
};
use tilefuse_catalog::{SelectOptions, StacClient};
use tilefuse_raster::{Crs, Region};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tilefuse",
    version,
    about = "Build elevation, building-height and tree-canopy rasters from swisstopo tiles",
    after_help = "Use the RUST_LOG environment variable for finer control of logging, e.g. RUST_LOG=tilefuse=debug."
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the selected tile records of a collection as JSON
    Index {
        #[command(flatten)]
        region: RegionArgs,
        /// Collection id, e.g. ch.swisstopo.swissalti3d
        #[arg(long)]
        collection: String,
        /// Acquisition time filter, e.g. 2019 or 2019/2021
        #[arg(long)]
        datetime: Option<String>,
        /// Keep only assets at this ground sample distance
        #[arg(long)]
        gsd: Option<f64>,
        /// Keep only assets with this file extension
        #[arg(long)]
        extension: Option<String>,
        /// Keep every vintage instead of the latest record of each tile
        #[arg(long)]
        all_vintages: bool,
    },
    /// Build a ground elevation model from swissALTI3D
    Dem {
        #[command(flatten)]
        region: RegionArgs,
        /// Output GeoTIFF
        #[arg(short, long)]
        output: PathBuf,
        /// swissALTI3D resolution in metres (0.5 or 2)
        #[arg(long)]
        res: Option<f64>,
        /// Acquisition time filter
        #[arg(long)]
        datetime: Option<String>,
    },
    /// Build a tree canopy height raster
    Canopy {
        #[command(flatten)]
        region: RegionArgs,
        /// Output GeoTIFF
        #[arg(short, long)]
        output: PathBuf,
        /// Output resolution in metres
        #[arg(long)]
        res: Option<f64>,
        /// Output sample type: uint8, uint16 or float32
        #[arg(long, value_parser = parse_dtype)]
        dtype: Option<OutputDType>,
        /// Output nodata value
        #[arg(long)]
        nodata: Option<f64>,
        /// Surface source
        #[arg(long, value_enum)]
        surface: Option<SurfaceArg>,
        /// GeoJSON building footprints to mask out
        #[arg(long)]
        buildings: Option<PathBuf>,
        /// CRS of the footprint coordinates
        #[arg(long, value_parser = parse_crs, default_value = "lv95")]
        buildings_crs: Crs,
    },
    /// Build a building height raster from footprints
    Buildings {
        #[command(flatten)]
        region: RegionArgs,
        /// GeoJSON building footprints; queried from OpenStreetMap when omitted
        #[arg(long)]
        footprints: Option<PathBuf>,
        /// CRS of the footprint coordinates
        #[arg(long, value_parser = parse_crs, default_value = "lv95")]
        footprints_crs: Crs,
        /// Output GeoTIFF
        #[arg(short, long)]
        output: PathBuf,
        /// Output resolution in metres
        #[arg(long)]
        res: Option<f64>,
        /// Footprint property holding the height
        #[arg(long)]
        height_attr: Option<String>,
        /// Do not estimate missing heights from the elevation models
        #[arg(long)]
        no_estimate: bool,
        /// Also write the footprints with a positive height as GeoJSON
        #[arg(long)]
        footprints_out: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RegionArgs {
    /// GeoJSON file with the region polygon(s)
    #[arg(long, conflicts_with = "bbox")]
    region: Option<PathBuf>,
    /// Region bounding box as minx,miny,maxx,maxy
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    bbox: Option<[f64; 4]>,
    /// CRS of the region coordinates
    #[arg(long, value_parser = parse_crs, default_value = "lv95")]
    region_crs: Crs,
}

impl RegionArgs {
    fn load(&self) -> Result<Region, PipelineError> {
        match (&self.region, self.bbox) {
            (Some(path), _) => read_region(path, self.region_crs),
            (None, Some(bbox)) => Ok(Region::from_bbox(bbox, self.region_crs)?),
            (None, None) => Err(PipelineError::InvalidVector("either --region or --bbox is required".to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SurfaceArg {
    /// swissSURFACE3D Raster tiles
    Raster,
    /// swissSURFACE3D point clouds, classified with PDAL
    PointCloud,
}

impl From<SurfaceArg> for SurfaceKind {
    fn from(arg: SurfaceArg) -> Self {
        match arg {
            SurfaceArg::Raster => SurfaceKind::Raster,
            SurfaceArg::PointCloud => SurfaceKind::PointCloud,
        }
    }
}

fn parse_bbox(s: &str) -> Result<[f64; 4], String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("'{}': {}", v, e)))
        .collect::<Result<_, _>>()?;
    match values.as_slice() {
        [min_x, min_y, max_x, max_y] if min_x < max_x && min_y < max_y => Ok([*min_x, *min_y, *max_x, *max_y]),
        [_, _, _, _] => Err("expected minx < maxx and miny < maxy".to_string()),
        _ => Err(format!("expected four comma-separated numbers, got {}", values.len())),
    }
}

fn parse_crs(s: &str) -> Result<Crs, String> {
    s.parse::<Crs>().map_err(|e| e.to_string())
}

fn parse_dtype(s: &str) -> Result<OutputDType, String> {
    s.parse()
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, PipelineError> {
    match path {
        Some(path) => {
            let config = Config::from_file(path)?;
            debug!(path = %path.display(), "loaded configuration");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Write a product and report the tiles it skipped.
fn finish(fused: Fused<DerivedRaster>, output: &Path) -> Result<(), PipelineError> {
    fused.product.write(output)?;
    for warning in &fused.warnings {
        eprintln!("warning: {}", warning);
    }
    info!(
        output = %output.display(),
        kind = %fused.product.kind(),
        width = fused.product.grid().width,
        height = fused.product.grid().height,
        valid = fused.product.valid_count(),
        skipped_tiles = fused.warnings.len(),
        "wrote product"
    );
    Ok(())
}

fn run(cli: Cli) -> Result<(), PipelineError> {
    let mut config = load_config(cli.config.as_deref())?;

    let catalog = StacClient::with_options(
        &config.catalog.url,
        Duration::from_secs(config.catalog.timeout_secs),
        config.catalog.max_retries,
    )?;
    let cache = HttpAssetCache::with_options(
        &config.cache.dir,
        Duration::from_secs(config.cache.timeout_secs),
        config.cache.max_retries,
    )?;
    let sources = Sources::new(&catalog, &cache).with_page_size(config.catalog.page_size);

    match cli.command {
        Command::Index {
            region,
            collection,
            datetime,
            gsd,
            extension,
            all_vintages,
        } => {
            let region = region.load()?;
            let datetime = parse_datetime(datetime.as_deref())?;
            let options = SelectOptions {
                gsd,
                extension,
                latest_only: !all_vintages,
            };
            let selection = find_tiles(&sources, &collection, &region, datetime, &options)?;
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &selection).map_err(std::io::Error::from)?;
            writeln!(stdout)?;
        }
        Command::Dem {
            region,
            output,
            res,
            datetime,
        } => {
            if let Some(res) = res {
                config.dem.alti3d_res = res;
            }
            if datetime.is_some() {
                config.dem.alti3d_datetime = datetime;
            }
            config.validate()?;
            let region = region.load()?;
            let dem = get_dem_raster(&sources, &region, &DemOptions::from_config(&config.dem)?)?;
            finish(dem, &output)?;
        }
        Command::Canopy {
            region,
            output,
            res,
            dtype,
            nodata,
            surface,
            buildings,
            buildings_crs,
        } => {
            if let Some(res) = res {
                config.canopy.dst_res = res;
            }
            if let Some(dtype) = dtype {
                config.canopy.dst_dtype = dtype;
            }
            if nodata.is_some() {
                config.canopy.dst_nodata = nodata;
            }
            if let Some(surface) = surface {
                config.canopy.surface = surface.into();
            }
            config.validate()?;

            let engine = match config.canopy.surface {
                SurfaceKind::PointCloud => Some(PdalEngine::detect(PdalConfig {
                    executable: config.canopy.pdal.clone(),
                    resolution: config.canopy.dst_res,
                    work_dir: config.cache.dir.join("pdal"),
                })?),
                SurfaceKind::Raster => None,
            };
            let region = region.load()?;
            let footprints = buildings.map(|path| read_footprints(path, buildings_crs)).transpose()?;
            let canopy = get_tree_canopy_raster(
                &sources,
                &region,
                &TreeCanopyOptions::from_config(&config.canopy)?,
                engine.as_ref().map(|e| e as &dyn PointCloudEngine),
                footprints.as_deref(),
            )?;
            finish(canopy, &output)?;
        }
        Command::Buildings {
            region,
            footprints,
            footprints_crs,
            output,
            res,
            height_attr,
            no_estimate,
            footprints_out,
        } => {
            if let Some(res) = res {
                config.buildings.dst_res = res;
            }
            if let Some(attr) = height_attr {
                config.buildings.height_attr = attr;
            }
            if no_estimate {
                config.buildings.estimate_heights = false;
            }
            config.validate()?;
            let region = region.load()?;
            let footprints = match footprints {
                Some(path) => read_footprints(path, footprints_crs)?,
                None => {
                    let overpass = OverpassClient::with_options(
                        &config.osm.overpass_url,
                        Duration::from_secs(config.osm.timeout_secs),
                        config.osm.max_retries,
                    )?;
                    overpass.footprints(&region)?
                }
            };
            let options = BuildingHeightOptions::from_config(&config.buildings)?;
            let annotated = annotate_building_heights(&sources, &region, footprints, &options)?;
            if let Some(path) = footprints_out {
                write_footprints(path, &annotated.product, &options.height_attr)?;
            }
            let heights = Fused {
                product: burn_building_heights(&region, &annotated.product, &options)?,
                warnings: annotated.warnings,
            };
            finish(heights, &output)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tilefuse failed");
            ExitCode::FAILURE
        }
    }
}
