//! Target raster frames shared by every raster that takes part in pixel
//! algebra.

use crate::{Crs, RasterError, Result};
use geo::{Coord, Rect};

/// Tolerance, in pixels, under which a coordinate is considered to lie
/// exactly on a pixel edge when snapping windows.
const SNAP_EPSILON: f64 = 1e-6;

/// North-up affine transform: pixel (col, row) has its top-left corner at
/// `(origin_x + col * pixel_width, origin_y - row * pixel_height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X coordinate of the top-left corner of the top-left pixel.
    pub origin_x: f64,
    /// Y coordinate of the top-left corner of the top-left pixel.
    pub origin_y: f64,
    /// Pixel width in CRS units (positive).
    pub pixel_width: f64,
    /// Pixel height in CRS units (positive; rows go south).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Continuous pixel coordinates (col, row) of a world coordinate.
    ///
    /// Integer values fall on pixel corners; the centre of pixel (0, 0) is
    /// at (0.5, 0.5).
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// World coordinate of a continuous pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }
}

/// A georeferenced pixel frame: CRS, transform and dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    /// Coordinate reference system of the transform.
    pub crs: Crs,
    /// Affine transform of the top-left corner.
    pub transform: GeoTransform,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl RasterGrid {
    /// Create a grid from its parts.
    pub fn new(crs: Crs, transform: GeoTransform, width: usize, height: usize) -> Result<Self> {
        for size in [transform.pixel_width, transform.pixel_height] {
            if !size.is_finite() || size <= 0.0 {
                return Err(RasterError::InvalidPixelSize(size));
            }
        }
        if width == 0 || height == 0 {
            return Err(RasterError::EmptyGrid(format!("{}x{} pixels", width, height)));
        }
        Ok(Self {
            crs,
            transform,
            width,
            height,
        })
    }

    /// Compute the grid of square `pixel_size` pixels covering `bounds`.
    ///
    /// The window is snapped outward to multiples of the pixel size so that
    /// grids computed for neighbouring regions at the same resolution line up.
    pub fn covering(bounds: Rect<f64>, pixel_size: f64, crs: Crs) -> Result<Self> {
        if !pixel_size.is_finite() || pixel_size <= 0.0 {
            return Err(RasterError::InvalidPixelSize(pixel_size));
        }
        let min = bounds.min();
        let max = bounds.max();

        let col_min = snap_floor(min.x / pixel_size);
        let col_max = snap_ceil(max.x / pixel_size);
        let row_min = snap_floor(min.y / pixel_size);
        let row_max = snap_ceil(max.y / pixel_size);

        let width = (col_max - col_min).max(0.0) as usize;
        let height = (row_max - row_min).max(0.0) as usize;
        if width == 0 || height == 0 {
            return Err(RasterError::EmptyGrid(format!(
                "bounds ({:.3}, {:.3}) - ({:.3}, {:.3}) at {} per pixel",
                min.x, min.y, max.x, max.y, pixel_size
            )));
        }

        Self::new(
            crs,
            GeoTransform {
                origin_x: col_min * pixel_size,
                origin_y: row_max * pixel_size,
                pixel_width: pixel_size,
                pixel_height: pixel_size,
            },
            width,
            height,
        )
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Whether the grid holds no pixels (never true for a constructed grid).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of a pixel.
    pub fn index(&self, col: usize, row: usize) -> usize {
        row * self.width + col
    }

    /// Inverse of [`RasterGrid::index`].
    pub fn col_row(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    /// World coordinate of a pixel centre.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Pixel containing a world coordinate, if inside the grid.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.world_to_pixel(x, y);
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        (col < self.width && row < self.height).then_some((col, row))
    }

    /// Geographic extent of the grid.
    pub fn bounds(&self) -> Rect<f64> {
        let t = &self.transform;
        Rect::new(
            Coord {
                x: t.origin_x,
                y: t.origin_y - self.height as f64 * t.pixel_height,
            },
            Coord {
                x: t.origin_x + self.width as f64 * t.pixel_width,
                y: t.origin_y,
            },
        )
    }

    /// Check that `other` is exactly this frame.
    pub fn ensure_same(&self, other: &RasterGrid) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(RasterError::GridMismatch(format!(
                "{}x{} @ ({}, {}) vs {}x{} @ ({}, {})",
                self.width,
                self.height,
                self.transform.origin_x,
                self.transform.origin_y,
                other.width,
                other.height,
                other.transform.origin_x,
                other.transform.origin_y
            )))
        }
    }
}

fn snap_floor(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON {
        r
    } else {
        v.floor()
    }
}

fn snap_ceil(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON {
        r
    } else {
        v.ceil()
    }
}

/// Intersection of two rectangles, if they overlap with a positive area.
pub fn intersect_rects(a: Rect<f64>, b: Rect<f64>) -> Option<Rect<f64>> {
    let min_x = a.min().x.max(b.min().x);
    let min_y = a.min().y.max(b.min().y);
    let max_x = a.max().x.min(b.max().x);
    let max_y = a.max().y.min(b.max().y);
    (min_x < max_x && min_y < max_y)
        .then(|| Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y }))
}

/// Smallest rectangle containing both inputs.
pub fn union_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }

    #[test]
    fn test_covering_exact_multiple() {
        let grid = RasterGrid::covering(rect(2_600_000.0, 1_200_000.0, 2_601_500.0, 1_201_000.0), 1.0, Crs::LV95)
            .unwrap();
        assert_eq!(grid.width, 1500);
        assert_eq!(grid.height, 1000);
        assert_eq!(grid.transform.origin_x, 2_600_000.0);
        assert_eq!(grid.transform.origin_y, 1_201_000.0);
        assert_eq!(grid.bounds(), rect(2_600_000.0, 1_200_000.0, 2_601_500.0, 1_201_000.0));
    }

    #[test]
    fn test_covering_snaps_outward() {
        let grid = RasterGrid::covering(rect(0.3, 0.2, 3.7, 1.9), 1.0, Crs::LV95).unwrap();
        assert_eq!(grid.transform.origin_x, 0.0);
        assert_eq!(grid.transform.origin_y, 2.0);
        assert_eq!((grid.width, grid.height), (4, 2));
    }

    #[test]
    fn test_pixel_lookup() {
        let grid = RasterGrid::covering(rect(0.0, 0.0, 10.0, 10.0), 2.0, Crs::LV95).unwrap();
        assert_eq!(grid.pixel_center(0, 0), (1.0, 9.0));
        assert_eq!(grid.pixel_at(1.0, 9.0), Some((0, 0)));
        assert_eq!(grid.pixel_at(9.9, 0.1), Some((4, 4)));
        assert_eq!(grid.pixel_at(10.1, 5.0), None);
        assert_eq!(grid.pixel_at(-0.1, 5.0), None);
    }

    #[test]
    fn test_invalid_pixel_size() {
        assert!(RasterGrid::covering(rect(0.0, 0.0, 1.0, 1.0), 0.0, Crs::LV95).is_err());
        assert!(RasterGrid::covering(rect(0.0, 0.0, 1.0, 1.0), f64::NAN, Crs::LV95).is_err());
    }

    #[test]
    fn test_rect_intersection() {
        let a = rect(0.0, 0.0, 2.0, 2.0);
        assert_eq!(intersect_rects(a, rect(1.0, 1.0, 3.0, 3.0)), Some(rect(1.0, 1.0, 2.0, 2.0)));
        assert_eq!(intersect_rects(a, rect(2.0, 0.0, 3.0, 1.0)), None);
        assert_eq!(union_rects(a, rect(1.0, -1.0, 3.0, 1.0)), rect(0.0, -1.0, 3.0, 2.0));
    }
}
