//! Polygon rasterization and zonal statistics.
//!
//! A pixel belongs to a polygon when its centre lies inside it (even-odd
//! rule over every ring, so holes are excluded).

use crate::grid::intersect_rects;
use crate::{Raster, RasterGrid, Region, Result};
use geo::{BoundingRect, Centroid, CoordsIter, MultiPolygon};

/// Row-major indices of the pixels whose centre lies inside `geometry`.
///
/// `geometry` must be in the grid's CRS.
pub fn polygon_pixels(grid: &RasterGrid, geometry: &MultiPolygon<f64>) -> Vec<usize> {
    let Some(bounds) = geometry.bounding_rect() else {
        return Vec::new();
    };
    let t = &grid.transform;

    // Ring edges as (x0, y0, x1, y1)
    let mut edges = Vec::new();
    for polygon in &geometry.0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            for line in ring.lines() {
                edges.push((line.start.x, line.start.y, line.end.x, line.end.y));
            }
        }
    }

    let row_start = ((t.origin_y - bounds.max().y) / t.pixel_height).floor().max(0.0) as usize;
    let row_end = (((t.origin_y - bounds.min().y) / t.pixel_height).ceil().max(0.0) as usize)
        .min(grid.height);

    let mut pixels = Vec::new();
    let mut crossings = Vec::new();
    for row in row_start..row_end {
        let y = t.origin_y - (row as f64 + 0.5) * t.pixel_height;

        crossings.clear();
        for &(x0, y0, x1, y1) in &edges {
            // Half-open rule so shared vertices are counted once
            if (y0 <= y && y < y1) || (y1 <= y && y < y0) {
                crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let first = ((span[0] - t.origin_x) / t.pixel_width - 0.5).ceil().max(0.0) as usize;
            let last = ((span[1] - t.origin_x) / t.pixel_width - 0.5).ceil().max(0.0) as usize;
            for col in first..last.min(grid.width) {
                pixels.push(grid.index(col, row));
            }
        }
    }
    pixels
}

/// Pixels burned for a footprint: every covered pixel centre, or a single
/// representative pixel when the footprint is too small or thin to cover
/// any centre but still touches the grid.
pub fn footprint_pixels(grid: &RasterGrid, geometry: &MultiPolygon<f64>) -> Vec<usize> {
    let pixels = polygon_pixels(grid, geometry);
    if !pixels.is_empty() {
        return pixels;
    }
    representative_pixel(grid, geometry).into_iter().collect()
}

fn representative_pixel(grid: &RasterGrid, geometry: &MultiPolygon<f64>) -> Option<usize> {
    let to_index = |x: f64, y: f64| grid.pixel_at(x, y).map(|(c, r)| grid.index(c, r));

    if let Some(index) = geometry.centroid().and_then(|p| to_index(p.x(), p.y())) {
        return Some(index);
    }
    if let Some(index) = geometry.coords_iter().find_map(|c| to_index(c.x, c.y)) {
        return Some(index);
    }
    let clipped = intersect_rects(geometry.bounding_rect()?, grid.bounds())?;
    let centre = clipped.center();
    to_index(centre.x, centre.y)
}

/// Per-pixel mask of the region's interior on `grid`.
pub fn region_mask(grid: &RasterGrid, region: &Region) -> Result<Vec<bool>> {
    let local = region.to_crs(grid.crs)?;
    let mut mask = vec![false; grid.len()];
    for index in polygon_pixels(grid, local.geometry()) {
        mask[index] = true;
    }
    Ok(mask)
}

/// Set every pixel outside the region to the raster's nodata value.
pub fn clip_to_region(raster: &mut Raster, region: &Region) -> Result<()> {
    let mask = region_mask(raster.grid(), region)?;
    let nodata = raster.nodata_or_nan();
    for (value, inside) in raster.data_mut().iter_mut().zip(mask) {
        if !inside {
            *value = nodata;
        }
    }
    Ok(())
}

/// Mean of the valid pixels covered by `geometry`, `None` when no valid
/// pixel is covered.
pub fn zonal_mean(raster: &Raster, geometry: &MultiPolygon<f64>) -> Option<f64> {
    let (sum, count) = footprint_pixels(raster.grid(), geometry)
        .into_iter()
        .filter_map(|index| raster.get_index(index))
        .fold((0.0f64, 0usize), |(sum, count), v| (sum + v as f64, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Crs, GeoTransform};
    use geo::{polygon, Coord, Rect};

    fn grid_10x10() -> RasterGrid {
        RasterGrid::new(
            Crs::LV95,
            GeoTransform {
                origin_x: 0.0,
                origin_y: 10.0,
                pixel_width: 1.0,
                pixel_height: 1.0,
            },
            10,
            10,
        )
        .unwrap()
    }

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Rect::new(Coord { x: min, y: min }, Coord { x: max, y: max }).to_polygon()])
    }

    #[test]
    fn test_square_covers_expected_pixels() {
        let pixels = polygon_pixels(&grid_10x10(), &square(2.0, 5.0));
        assert_eq!(pixels.len(), 9);
    }

    #[test]
    fn test_hole_is_excluded() {
        let donut = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 6.0, y: 0.0), (x: 6.0, y: 6.0), (x: 0.0, y: 6.0)],
            interiors: [[(x: 2.0, y: 2.0), (x: 4.0, y: 2.0), (x: 4.0, y: 4.0), (x: 2.0, y: 4.0)]],
        );
        let pixels = polygon_pixels(&grid_10x10(), &MultiPolygon::new(vec![donut]));
        assert_eq!(pixels.len(), 36 - 4);
    }

    #[test]
    fn test_polygon_partly_outside_is_clipped() {
        let pixels = polygon_pixels(&grid_10x10(), &square(-5.0, 2.0));
        assert_eq!(pixels.len(), 4);
    }

    #[test]
    fn test_tiny_footprint_still_burns_one_pixel() {
        let tiny = square(3.1, 3.3);
        assert!(polygon_pixels(&grid_10x10(), &tiny).is_empty());
        assert_eq!(footprint_pixels(&grid_10x10(), &tiny).len(), 1);
    }

    #[test]
    fn test_zonal_mean_ignores_nodata() {
        let grid = grid_10x10();
        let mut raster = Raster::filled(grid, 4.0, Some(-9999.0));
        raster.data_mut()[0] = -9999.0;
        raster.data_mut()[1] = 8.0;
        // Covers pixels (0,0) and (1,0) only
        let zone = MultiPolygon::new(vec![
            Rect::new(Coord { x: 0.0, y: 9.0 }, Coord { x: 2.0, y: 10.0 }).to_polygon(),
        ]);
        assert_eq!(zonal_mean(&raster, &zone), Some(8.0));
    }
}
