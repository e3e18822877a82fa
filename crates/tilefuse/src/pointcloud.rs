//! Classified point clouds to ground and surface rasters.
//!
//! [`PointCloudEngine`] is a black box: one point-cloud tile in, a ground
//! raster (bare-earth returns) and a surface raster (first returns) out.
//! [`PdalEngine`] implements it by running the `pdal` command-line tool.

use crate::{ClassificationError, FusionError};
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tilefuse_raster::{read_raster, Raster};
use tracing::{debug, info};

/// ASPRS class code of ground points.
pub const GROUND_CLASS: u8 = 2;

/// Nodata written into the engine's output rasters.
pub const POINTCLOUD_NODATA: f32 = -9999.0;

/// Ground and surface elevations rasterized from one point-cloud tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedTile {
    /// Lowest ground-classified return per cell.
    pub ground: Raster,
    /// Highest first return per cell.
    pub surface: Raster,
}

/// Rasterizes classified point clouds.
pub trait PointCloudEngine: Send + Sync {
    /// Classify and rasterize one tile.
    fn classify(&self, path: &Path) -> Result<ClassifiedTile, ClassificationError>;
}

/// Configuration of [`PdalEngine`].
#[derive(Debug, Clone)]
pub struct PdalConfig {
    /// `pdal` executable.
    pub executable: PathBuf,
    /// Output cell size in metres.
    pub resolution: f64,
    /// Directory for pipelines, unpacked archives and output rasters.
    pub work_dir: PathBuf,
}

impl Default for PdalConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("pdal"),
            resolution: 1.0,
            work_dir: std::env::temp_dir().join("tilefuse-pdal"),
        }
    }
}

/// Point-cloud engine backed by the PDAL command-line application.
#[derive(Debug, Clone)]
pub struct PdalEngine {
    config: PdalConfig,
    version: String,
}

impl PdalEngine {
    /// Probe for a working `pdal` executable.
    ///
    /// Fails with [`FusionError::CapabilityUnavailable`] when the executable
    /// cannot be run, so callers learn about a missing engine before any
    /// tile is processed.
    pub fn detect(config: PdalConfig) -> Result<Self, FusionError> {
        let unavailable =
            |reason: String| FusionError::CapabilityUnavailable(format!("{} ({})", config.executable.display(), reason));

        let output = Command::new(&config.executable)
            .arg("--version")
            .output()
            .map_err(|e| unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(unavailable(format!("exited with {}", output.status)));
        }
        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('-'))
            .unwrap_or("unknown")
            .to_string();

        fs::create_dir_all(&config.work_dir).map_err(|e| unavailable(e.to_string()))?;
        info!(version = %version, "found PDAL");
        Ok(Self { config, version })
    }

    /// Version line reported by `pdal --version`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Engine configuration.
    pub fn config(&self) -> &PdalConfig {
        &self.config
    }

    fn run_pipeline(&self, pipeline: &serde_json::Value, pipeline_path: &Path, input: &Path) -> Result<(), ClassificationError> {
        fs::write(pipeline_path, serde_json::to_vec_pretty(pipeline).map_err(io::Error::from)?)?;
        debug!(pipeline = %pipeline_path.display(), "running PDAL pipeline");

        let output = Command::new(&self.config.executable)
            .arg("pipeline")
            .arg(pipeline_path)
            .output()?;
        if !output.status.success() {
            return Err(ClassificationError::EngineFailed {
                path: input.to_path_buf(),
                reason: format!(
                    "pdal pipeline exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

impl PointCloudEngine for PdalEngine {
    fn classify(&self, path: &Path) -> Result<ClassifiedTile, ClassificationError> {
        let stem = path
            .file_name()
            .map(|n| n.to_string_lossy().replace('.', "_"))
            .unwrap_or_else(|| "tile".to_string());
        let tile_dir = self.config.work_dir.join(&stem);
        fs::create_dir_all(&tile_dir)?;

        let input = if is_zip(path) { unpack_point_cloud(path, &tile_dir)? } else { path.to_path_buf() };

        let ground_path = tile_dir.join("ground.tif");
        let surface_path = tile_dir.join("surface.tif");
        let ground = rasterize_pipeline(
            &input,
            &ground_path,
            &format!("Classification[{0}:{0}]", GROUND_CLASS),
            "min",
            self.config.resolution,
        );
        let surface = rasterize_pipeline(&input, &surface_path, "ReturnNumber[1:1]", "max", self.config.resolution);

        self.run_pipeline(&ground, &tile_dir.join("ground.json"), path)?;
        self.run_pipeline(&surface, &tile_dir.join("surface.json"), path)?;

        Ok(ClassifiedTile {
            ground: read_raster(&ground_path)?,
            surface: read_raster(&surface_path)?,
        })
    }
}

/// PDAL pipeline keeping the points matching `limits` and gridding them
/// with the `output_type` statistic.
fn rasterize_pipeline(input: &Path, output: &Path, limits: &str, output_type: &str, resolution: f64) -> serde_json::Value {
    json!([
        {
            "type": "readers.las",
            "filename": input.to_string_lossy(),
        },
        {
            "type": "filters.range",
            "limits": limits,
        },
        {
            "type": "writers.gdal",
            "filename": output.to_string_lossy(),
            "resolution": resolution,
            "output_type": output_type,
            "data_type": "float32",
            "nodata": POINTCLOUD_NODATA,
            "gdaldriver": "GTiff",
        },
    ])
}

fn is_zip(path: &Path) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case("zip"))
}

/// Extract the first LAS/LAZ member of a zip archive into `dir`.
fn unpack_point_cloud(archive_path: &Path, dir: &Path) -> Result<PathBuf, ClassificationError> {
    let archive_error = |reason: String| ClassificationError::Archive {
        path: archive_path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_error(e.to_string()))?;
        let Some(name) = entry.enclosed_name().and_then(|p| p.file_name().map(PathBuf::from)) else {
            continue;
        };
        let is_point_cloud = name
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("las") || e.eq_ignore_ascii_case("laz"));
        if !entry.is_file() || !is_point_cloud {
            continue;
        }

        let target = dir.join(&name);
        if !target.exists() {
            let partial = dir.join(format!(".{}.part", name.display()));
            let mut out = fs::File::create(&partial)?;
            io::copy(&mut entry, &mut out)?;
            fs::rename(&partial, &target)?;
        }
        debug!(archive = %archive_path.display(), member = %name.display(), "unpacked point cloud");
        return Ok(target);
    }
    Err(archive_error("no .las or .laz member".to_string()))
}
