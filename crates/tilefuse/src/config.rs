//! YAML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Unknown keys are rejected to catch typos.
//!
//! ```yaml
//! catalog:
//!   url: https://data.geo.admin.ch/api/stac/v0.9
//!   page_size: 100
//! cache:
//!   dir: /var/cache/tilefuse
//! osm:
//!   overpass_url: https://overpass.kumi.systems/api/interpreter
//! canopy:
//!   dst_res: 2
//!   dst_dtype: float32
//!   surface: point_cloud
//! ```

use crate::derived::OutputDType;
use crate::osm::{DEFAULT_OVERPASS_RETRIES, DEFAULT_OVERPASS_TIMEOUT, OVERPASS_URL};
use crate::ConfigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use tilefuse_catalog::{CLIENT_URL, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE};
use tilefuse_raster::Resampling;

fn deserialize_resampling<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Resampling, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn serialize_resampling<S: Serializer>(resampling: &Resampling, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(match resampling {
        Resampling::Nearest => "nearest",
        Resampling::Bilinear => "bilinear",
    })
}

/// Catalog access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CatalogConfig {
    /// STAC API root.
    pub url: String,
    /// Items requested per page.
    pub page_size: usize,
    /// Timeout of one request, in seconds.
    pub timeout_secs: u64,
    /// Retries after a failed request.
    pub max_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: CLIENT_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: 60,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Asset cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Cache directory.
    pub dir: PathBuf,
    /// Timeout of one download, in seconds.
    pub timeout_secs: u64,
    /// Retries after a failed download.
    pub max_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            timeout_secs: 300,
            max_retries: 2,
        }
    }
}

/// `$XDG_CACHE_HOME/tilefuse`, else `$HOME/.cache/tilefuse`, else a
/// directory under the system temp dir.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("tilefuse");
    }
    if let Some(home) = std::env::var_os("HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(home).join(".cache").join("tilefuse");
    }
    std::env::temp_dir().join("tilefuse-cache")
}

/// OpenStreetMap building footprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OsmConfig {
    /// Overpass interpreter endpoint.
    pub overpass_url: String,
    /// Server-side query timeout, in seconds.
    pub timeout_secs: u64,
    /// Retries after a failed query.
    pub max_retries: u32,
}

impl Default for OsmConfig {
    fn default() -> Self {
        Self {
            overpass_url: OVERPASS_URL.to_string(),
            timeout_secs: DEFAULT_OVERPASS_TIMEOUT.as_secs(),
            max_retries: DEFAULT_OVERPASS_RETRIES,
        }
    }
}

/// Elevation model product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DemConfig {
    /// swissALTI3D resolution to use (0.5 or 2 m); also the output resolution.
    pub alti3d_res: f64,
    /// Acquisition time filter, e.g. `2019` or `2019/2021`.
    pub alti3d_datetime: Option<String>,
    /// Resampling kernel.
    #[serde(deserialize_with = "deserialize_resampling", serialize_with = "serialize_resampling")]
    pub resampling: Resampling,
}

impl Default for DemConfig {
    fn default() -> Self {
        Self {
            alti3d_res: 2.0,
            alti3d_datetime: None,
            resampling: Resampling::Bilinear,
        }
    }
}

/// Where canopy surfaces come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// swissSURFACE3D Raster tiles.
    #[default]
    Raster,
    /// swissSURFACE3D point clouds classified with PDAL.
    PointCloud,
}

/// Tree canopy product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CanopyConfig {
    /// Output resolution in metres.
    pub dst_res: f64,
    /// Output sample type.
    pub dst_dtype: OutputDType,
    /// Output nodata; the dtype default when unset.
    pub dst_nodata: Option<f64>,
    /// Surface source.
    pub surface: SurfaceKind,
    /// swissALTI3D resolution used for the terrain.
    pub alti3d_res: f64,
    /// Terrain acquisition time filter.
    pub alti3d_datetime: Option<String>,
    /// Surface acquisition time filter.
    pub surface3d_datetime: Option<String>,
    /// `pdal` executable.
    pub pdal: PathBuf,
    /// Resampling kernel.
    #[serde(deserialize_with = "deserialize_resampling", serialize_with = "serialize_resampling")]
    pub resampling: Resampling,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            dst_res: 1.0,
            dst_dtype: OutputDType::U8,
            dst_nodata: None,
            surface: SurfaceKind::Raster,
            alti3d_res: 0.5,
            alti3d_datetime: None,
            surface3d_datetime: None,
            pdal: PathBuf::from("pdal"),
            resampling: Resampling::Bilinear,
        }
    }
}

/// Building height product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildingsConfig {
    /// Output resolution in metres.
    pub dst_res: f64,
    /// Footprint property holding the height.
    pub height_attr: String,
    /// Estimate missing heights from surface minus terrain.
    pub estimate_heights: bool,
    /// swissALTI3D resolution used for estimation.
    pub alti3d_res: f64,
    /// Terrain acquisition time filter.
    pub alti3d_datetime: Option<String>,
    /// Surface acquisition time filter.
    pub surface3d_datetime: Option<String>,
}

impl Default for BuildingsConfig {
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

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Catalog access.
    pub catalog: CatalogConfig,
    /// Asset cache.
    pub cache: CacheConfig,
    /// OpenStreetMap footprints.
    pub osm: OsmConfig,
    /// Elevation model product.
    pub dem: DemConfig,
    /// Tree canopy product.
    pub canopy: CanopyConfig,
    /// Building height product.
    pub buildings: BuildingsConfig,
}

impl Config {
    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number of metres, got {}", value),
                })
            }
        };
        positive("dem.alti3d_res", self.dem.alti3d_res)?;
        positive("canopy.dst_res", self.canopy.dst_res)?;
        positive("canopy.alti3d_res", self.canopy.alti3d_res)?;
        positive("buildings.dst_res", self.buildings.dst_res)?;
        positive("buildings.alti3d_res", self.buildings.alti3d_res)?;

        if self.osm.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "osm.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.catalog.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "catalog.page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(nodata) = self.canopy.dst_nodata {
            self.canopy
                .dst_dtype
                .check_nodata(nodata)
                .map_err(|reason| ConfigError::Invalid {
                    field: "canopy.dst_nodata",
                    reason,
                })?;
        }
        if self.buildings.height_attr.is_empty() {
            return Err(ConfigError::Invalid {
                field: "buildings.height_attr",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
        assert_eq!(Config::from_yaml("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_yaml(
            "canopy:\n  dst_res: 2\n  dst_dtype: float32\n  dst_nodata: .nan\n  surface: point_cloud\n  resampling: nearest\n",
        )
        .unwrap();
        assert_eq!(config.canopy.dst_res, 2.0);
        assert_eq!(config.canopy.dst_dtype, OutputDType::F32);
        assert!(config.canopy.dst_nodata.unwrap().is_nan());
        assert_eq!(config.canopy.surface, SurfaceKind::PointCloud);
        assert_eq!(config.canopy.resampling, Resampling::Nearest);
        assert_eq!(config.dem, DemConfig::default());
    }

    #[test]
    fn test_osm_section() {
        let config = Config::from_yaml("osm:\n  overpass_url: http://localhost:12345/api/interpreter\n").unwrap();
        assert_eq!(config.osm.overpass_url, "http://localhost:12345/api/interpreter");
        assert_eq!(config.osm.timeout_secs, 180);
        assert!(matches!(
            Config::from_yaml("osm:\n  timeout_secs: 0\n"),
            Err(ConfigError::Invalid { field: "osm.timeout_secs", .. })
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Config::from_yaml("canopy:\n  dst_resolution: 2\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        assert!(matches!(
            Config::from_yaml("dem:\n  alti3d_res: 0\n"),
            Err(ConfigError::Invalid { field: "dem.alti3d_res", .. })
        ));
    }

    #[test]
    fn test_integer_nodata_must_fit_dtype() {
        for nodata in ["-9999", ".nan", "256", "0.5"] {
            let text = format!("canopy:\n  dst_dtype: uint8\n  dst_nodata: {}\n", nodata);
            assert!(
                matches!(Config::from_yaml(&text), Err(ConfigError::Invalid { field: "canopy.dst_nodata", .. })),
                "nodata {}",
                nodata
            );
        }
        let config = Config::from_yaml("canopy:\n  dst_dtype: uint16\n  dst_nodata: 0\n").unwrap();
        assert_eq!(config.canopy.dst_nodata, Some(0.0));

        // Overrides applied after loading go through the same check
        let mut config = Config::default();
        config.canopy.dst_nodata = Some(-9999.0);
        assert!(config.validate().is_err());
        config.canopy.dst_dtype = OutputDType::F32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip_through_yaml() {
        let config = Config::default();
        let text = serde_yaml::to_string(&config).unwrap();
        assert_eq!(Config::from_yaml(&text).unwrap(), config);
    }
}
