//! Coordinate reference systems and transforms between them.
//!
//! A [`Crs`] is an EPSG code with a known proj definition. Products are
//! computed in LV95 (EPSG:2056); the catalog publishes footprints in WGS84
//! lon/lat (EPSG:4326 / OGC:CRS84 axis order); regions and footprints may
//! arrive in any of the frames listed in [`Crs::known`].
//!
//! Transforms run through `proj4rs`. Geographic frames use degrees with
//! x = lon and y = lat on the public side; the conversion to radians
//! happens here.

use crate::{RasterError, Result};
use geo::{Coord, MultiPolygon, Polygon, Rect};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use std::fmt;
use std::str::FromStr;

/// EPSG code of the Swiss LV95 projected frame.
pub const LV95_EPSG: u16 = 2056;

/// EPSG code of the former Swiss LV03 projected frame.
pub const LV03_EPSG: u16 = 21781;

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u16 = 4326;

/// Points sampled per rectangle edge by [`Crs::transform_rect`].
pub const EDGE_SAMPLES: usize = 20;

struct Definition {
    epsg: u16,
    proj: &'static str,
    geographic: bool,
}

const DEFINITIONS: &[Definition] = &[
    Definition {
        epsg: LV95_EPSG,
        proj: "+proj=somerc +lat_0=46.9524055555556 +lon_0=7.43958333333333 +k_0=1 \
               +x_0=2600000 +y_0=1200000 +ellps=bessel +towgs84=674.374,15.056,405.346,0,0,0,0 \
               +units=m +no_defs",
        geographic: false,
    },
    Definition {
        epsg: LV03_EPSG,
        proj: "+proj=somerc +lat_0=46.9524055555556 +lon_0=7.43958333333333 +k_0=1 \
               +x_0=600000 +y_0=200000 +ellps=bessel +towgs84=674.374,15.056,405.346,0,0,0,0 \
               +units=m +no_defs",
        geographic: false,
    },
    Definition {
        epsg: WGS84_EPSG,
        proj: "+proj=longlat +ellps=WGS84 +no_defs",
        geographic: true,
    },
    // ETRS89
    Definition {
        epsg: 4258,
        proj: "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs",
        geographic: true,
    },
    Definition {
        epsg: 3857,
        proj: "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs",
        geographic: false,
    },
    Definition {
        epsg: 32632,
        proj: "+proj=utm +zone=32 +ellps=WGS84 +units=m +no_defs",
        geographic: false,
    },
    Definition {
        epsg: 25832,
        proj: "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
        geographic: false,
    },
];

fn definition(epsg: u16) -> Option<&'static Definition> {
    DEFINITIONS.iter().find(|d| d.epsg == epsg)
}

/// A coordinate reference system identified by its EPSG code.
///
/// Only codes with a known definition can be constructed, so every pair of
/// `Crs` values can be transformed between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u16);

impl Default for Crs {
    fn default() -> Self {
        Crs::LV95
    }
}

impl Crs {
    /// CH1903+ / LV95, easting/northing in metres.
    pub const LV95: Crs = Crs(LV95_EPSG);
    /// CH1903 / LV03, easting/northing in metres.
    pub const LV03: Crs = Crs(LV03_EPSG);
    /// WGS84, longitude/latitude in degrees (x = lon, y = lat).
    pub const WGS84: Crs = Crs(WGS84_EPSG);

    /// EPSG code of this frame.
    pub fn epsg(self) -> u16 {
        self.0
    }

    /// Look up a frame by EPSG code.
    pub fn from_epsg(code: u16) -> Result<Self> {
        definition(code).map(|d| Crs(d.epsg)).ok_or(RasterError::UnsupportedCrs(code))
    }

    /// Every frame that can be constructed.
    pub fn known() -> impl Iterator<Item = Crs> {
        DEFINITIONS.iter().map(|d| Crs(d.epsg))
    }

    /// Whether coordinates are projected (metres) rather than geographic.
    pub fn is_projected(self) -> bool {
        definition(self.0).map_or(true, |d| !d.geographic)
    }

    fn proj(self) -> Result<Proj> {
        let def = definition(self.0).ok_or(RasterError::UnsupportedCrs(self.0))?;
        Proj::from_proj_string(def.proj)
            .map_err(|e| RasterError::Transform(format!("invalid definition of {}: {:?}", self, e)))
    }

    /// Build a reusable transform from this frame to `to`.
    pub fn transformer(self, to: Crs) -> Result<CrsTransform> {
        let projs = if self == to {
            None
        } else {
            Some((self.proj()?, to.proj()?))
        };
        Ok(CrsTransform { from: self, to, projs })
    }

    /// Transform a single point from this frame to `to`.
    ///
    /// Builds the projections on every call; use [`Crs::transformer`] for
    /// more than a handful of points.
    pub fn transform_point(self, to: Crs, x: f64, y: f64) -> Result<(f64, f64)> {
        self.transformer(to)?.point(x, y)
    }

    /// Transform every vertex of a multipolygon.
    pub fn transform_multipolygon(self, to: Crs, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self == to {
            return Ok(geometry.clone());
        }
        self.transformer(to)?.multipolygon(geometry)
    }

    /// Transform a rectangle, returning the bounding box of its edges
    /// sampled at [`EDGE_SAMPLES`] points each.
    pub fn transform_rect(self, to: Crs, rect: Rect<f64>) -> Result<Rect<f64>> {
        if self == to {
            return Ok(rect);
        }
        self.transformer(to)?.rect(rect)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "lv95" | "ch1903+" => Ok(Crs::LV95),
            "lv03" | "ch1903" => Ok(Crs::LV03),
            "wgs84" | "ogc:crs84" | "crs84" => Ok(Crs::WGS84),
            _ => {
                let code = lower
                    .trim_start_matches("epsg:")
                    .parse::<u16>()
                    .map_err(|_| RasterError::UnknownCrsName(s.trim().to_string()))?;
                Crs::from_epsg(code)
            }
        }
    }
}

/// A transform between two frames with its projections built once.
pub struct CrsTransform {
    from: Crs,
    to: Crs,
    projs: Option<(Proj, Proj)>,
}

impl fmt::Debug for CrsTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrsTransform")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl CrsTransform {
    /// Source frame.
    pub fn source(&self) -> Crs {
        self.from
    }

    /// Target frame.
    pub fn target(&self) -> Crs {
        self.to
    }

    /// Whether source and target are the same frame.
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one point.
    pub fn point(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((source, target)) = &self.projs else {
            return Ok((x, y));
        };
        let mut point = if self.from.is_projected() {
            (x, y, 0.0)
        } else {
            (x.to_radians(), y.to_radians(), 0.0)
        };
        transform(source, target, &mut point).map_err(|e| {
            RasterError::Transform(format!("({}, {}) from {} to {}: {:?}", x, y, self.from, self.to, e))
        })?;
        if self.to.is_projected() {
            Ok((point.0, point.1))
        } else {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        }
    }

    fn coord(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let (x, y) = self.point(c.x, c.y)?;
        Ok(Coord { x, y })
    }

    /// Transform every vertex of a multipolygon.
    pub fn multipolygon(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        let ring = |ring: &geo::LineString<f64>| -> Result<geo::LineString<f64>> {
            ring.coords().map(|c| self.coord(*c)).collect::<Result<Vec<_>>>().map(geo::LineString::new)
        };
        let polygons = geometry
            .iter()
            .map(|polygon| {
                let exterior = ring(polygon.exterior())?;
                let interiors = polygon.interiors().iter().map(|r| ring(r)).collect::<Result<Vec<_>>>()?;
                Ok(Polygon::new(exterior, interiors))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiPolygon::new(polygons))
    }

    /// Bounding box of a rectangle's edges, each sampled at
    /// [`EDGE_SAMPLES`] points. Points outside the projection's domain
    /// are skipped.
    pub fn rect(&self, rect: Rect<f64>) -> Result<Rect<f64>> {
        if self.is_identity() {
            return Ok(rect);
        }
        let (min, max) = (rect.min(), rect.max());
        let mut out: Option<(Coord<f64>, Coord<f64>)> = None;
        let mut last_error = None;
        for i in 0..=EDGE_SAMPLES {
            let t = i as f64 / EDGE_SAMPLES as f64;
            let x = min.x + t * (max.x - min.x);
            let y = min.y + t * (max.y - min.y);
            for (px, py) in [(x, min.y), (x, max.y), (min.x, y), (max.x, y)] {
                match self.point(px, py) {
                    Ok((tx, ty)) => {
                        let (lo, hi) = out.get_or_insert((Coord { x: tx, y: ty }, Coord { x: tx, y: ty }));
                        lo.x = lo.x.min(tx);
                        lo.y = lo.y.min(ty);
                        hi.x = hi.x.max(tx);
                        hi.y = hi.y.max(ty);
                    }
                    Err(e) => last_error = Some(e),
                }
            }
        }
        match (out, last_error) {
            (Some((lo, hi)), _) => Ok(Rect::new(lo, hi)),
            (None, Some(e)) => Err(e),
            (None, None) => Err(RasterError::Transform(format!("no point of {:?} could be transformed", rect))),
        }
    }
}

/// Convert WGS84 (lon, lat) in degrees to LV95 (easting, northing).
pub fn wgs84_to_lv95(lon: f64, lat: f64) -> Result<(f64, f64)> {
    Crs::WGS84.transform_point(Crs::LV95, lon, lat)
}

/// Convert LV95 (easting, northing) to WGS84 (lon, lat) in degrees.
pub fn lv95_to_wgs84(east: f64, north: f64) -> Result<(f64, f64)> {
    Crs::LV95.transform_point(Crs::WGS84, east, north)
}
