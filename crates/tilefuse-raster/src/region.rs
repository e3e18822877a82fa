//! Regions of interest.

use crate::{Crs, RasterError, Result};
use geo::{BoundingRect, Coord, MultiPolygon, Polygon, Rect};

/// A region of interest: one or more polygons in a known CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    geometry: MultiPolygon<f64>,
    crs: Crs,
}

impl Region {
    /// Create a region from a multipolygon.
    pub fn new(geometry: MultiPolygon<f64>, crs: Crs) -> Result<Self> {
        if geometry.0.is_empty() || geometry.bounding_rect().is_none() {
            return Err(RasterError::EmptyGrid("region geometry is empty".to_string()));
        }
        Ok(Self { geometry, crs })
    }

    /// Create a region from a single polygon.
    pub fn from_polygon(polygon: Polygon<f64>, crs: Crs) -> Result<Self> {
        Self::new(MultiPolygon::new(vec![polygon]), crs)
    }

    /// Create a rectangular region from `[min_x, min_y, max_x, max_y]`.
    pub fn from_bbox(bbox: [f64; 4], crs: Crs) -> Result<Self> {
        let [min_x, min_y, max_x, max_y] = bbox;
        if !(min_x < max_x && min_y < max_y) {
            return Err(RasterError::EmptyGrid(format!("degenerate bbox {:?}", bbox)));
        }
        let rect = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y });
        Self::from_polygon(rect.to_polygon(), crs)
    }

    /// The region's geometry in its own CRS.
    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// The region's CRS.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// The region expressed in another CRS.
    pub fn to_crs(&self, crs: Crs) -> Result<Region> {
        Ok(Region {
            geometry: self.crs.transform_multipolygon(crs, &self.geometry)?,
            crs,
        })
    }

    /// Bounding box in the region's own CRS.
    pub fn bounds(&self) -> Rect<f64> {
        // Construction guarantees a non-empty geometry
        self.geometry
            .bounding_rect()
            .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }))
    }

    /// Bounding box as `[min_x, min_y, max_x, max_y]` in `crs`, taken over
    /// the densified edges of the region's own bounding box.
    pub fn bbox_in(&self, crs: Crs) -> Result<[f64; 4]> {
        let rect = self.crs.transform_rect(crs, self.bounds())?;
        Ok([rect.min().x, rect.min().y, rect.max().x, rect.max().y])
    }
}
