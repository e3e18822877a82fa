//! Integration tests for GeoTIFF I/O and mosaicking with files on disk.

use tilefuse_raster::{
    mosaic, read_header, read_raster, write_geotiff, write_raster, Crs, GeoTransform, MosaicOptions,
    MosaicSource, PixelData, Raster, RasterGrid, Region, Resampling, MOSAIC_NODATA,
};
use std::path::{Path, PathBuf};

// ============================================================================
// Helpers
// ============================================================================

/// Write a constant 1 km tile at 1 m resolution whose south-west corner is
/// at (min_x, min_y).
fn write_km_tile(dir: &Path, name: &str, min_x: f64, min_y: f64, value: f32) -> PathBuf {
    let grid = RasterGrid::new(
        Crs::LV95,
        GeoTransform {
            origin_x: min_x,
            origin_y: min_y + 1000.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        },
        1000,
        1000,
    )
    .expect("valid grid");
    let path = dir.join(name);
    write_raster(&path, &Raster::filled(grid, value, Some(-9999.0))).expect("write tile");
    path
}

// ============================================================================
// GeoTIFF round trips
// ============================================================================

#[test]
fn test_geotiff_keeps_georeferencing_and_nodata() {
    let dir = tempfile::tempdir().unwrap();
    let grid = RasterGrid::new(
        Crs::LV95,
        GeoTransform {
            origin_x: 2_533_000.0,
            origin_y: 1_153_000.0,
            pixel_width: 0.5,
            pixel_height: 0.5,
        },
        4,
        3,
    )
    .unwrap();
    let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let raster = Raster::new(grid.clone(), data.clone(), Some(-9999.0)).unwrap();
    let path = dir.path().join("dem.tif");
    write_raster(&path, &raster).unwrap();

    let header = read_header(&path).unwrap();
    assert_eq!(header.grid, grid);
    assert_eq!(header.nodata, Some(-9999.0));

    let back = read_raster(&path).unwrap();
    assert_eq!(back.data(), data.as_slice());
}

#[test]
fn test_u8_geotiff_reads_back_as_f32() {
    let dir = tempfile::tempdir().unwrap();
    let grid = RasterGrid::new(
        Crs::LV95,
        GeoTransform {
            origin_x: 0.0,
            origin_y: 2.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        },
        2,
        2,
    )
    .unwrap();
    let path = dir.path().join("canopy.tif");
    write_geotiff(&path, &grid, &PixelData::U8(vec![0, 10, 254, 255]), Some(255.0)).unwrap();

    let back = read_raster(&path).unwrap();
    assert_eq!(back.nodata(), Some(255.0));
    assert_eq!(back.get(1, 0), Some(10.0));
    assert_eq!(back.get(1, 1), None);
}

// ============================================================================
// Mosaic
// ============================================================================

#[test]
fn test_adjacent_tiles_cover_region() {
    let dir = tempfile::tempdir().unwrap();
    let west = write_km_tile(dir.path(), "west.tif", 2_600_000.0, 1_200_000.0, 500.0);
    let east = write_km_tile(dir.path(), "east.tif", 2_601_000.0, 1_200_000.0, 600.0);

    let region = Region::from_bbox([2_600_000.0, 1_200_000.0, 2_601_500.0, 1_201_000.0], Crs::LV95).unwrap();
    let sources = [MosaicSource::from_path(&west, None), MosaicSource::from_path(&east, None)];
    let (raster, grid) = mosaic(&sources, &MosaicOptions::new(&region, 1.0)).unwrap();

    // Output frame is exactly the computed grid
    assert_eq!(raster.grid(), &grid);
    assert_eq!((grid.width, grid.height), (1500, 1000));
    assert_eq!(grid.transform.origin_x, 2_600_000.0);
    assert_eq!(grid.transform.origin_y, 1_201_000.0);

    // Full 1.5 x 1 km extent is covered, each half by its own tile
    assert_eq!(raster.valid_count(), 1500 * 1000);
    assert_eq!(raster.get(10, 500), Some(500.0));
    assert_eq!(raster.get(1200, 500), Some(600.0));
}

#[test]
fn test_gap_between_diagonal_tiles_is_nodata() {
    let dir = tempfile::tempdir().unwrap();
    let sw = write_km_tile(dir.path(), "sw.tif", 2_600_000.0, 1_200_000.0, 1.0);
    let ne = write_km_tile(dir.path(), "ne.tif", 2_601_000.0, 1_201_000.0, 2.0);

    let region = Region::from_bbox([2_600_000.0, 1_200_000.0, 2_602_000.0, 1_202_000.0], Crs::LV95).unwrap();
    let sources = [MosaicSource::from_path(&sw, None), MosaicSource::from_path(&ne, None)];
    let options = MosaicOptions::new(&region, 10.0).with_resampling(Resampling::Nearest);
    let (raster, grid) = mosaic(&sources, &options).unwrap();

    assert_eq!((grid.width, grid.height), (200, 200));
    // North-west and south-east quadrants are outside both footprints
    assert_eq!(raster.get(50, 50), None);
    assert_eq!(raster.get(150, 150), None);
    assert_eq!(raster.data()[grid.index(50, 50)], MOSAIC_NODATA);
    assert_eq!(raster.get(50, 150), Some(1.0));
    assert_eq!(raster.get(150, 50), Some(2.0));
    assert_eq!(raster.valid_count(), 2 * 100 * 100);
}

#[test]
fn test_region_clips_mosaic_window() {
    let dir = tempfile::tempdir().unwrap();
    let tile = write_km_tile(dir.path(), "tile.tif", 2_600_000.0, 1_200_000.0, 7.0);

    // Region reaches outside the tile; the grid is clipped to the footprint
    let region = Region::from_bbox([2_600_500.0, 1_199_000.0, 2_603_000.0, 1_200_250.0], Crs::LV95).unwrap();
    let (raster, grid) = mosaic(&[MosaicSource::from_path(&tile, None)], &MosaicOptions::new(&region, 2.0)).unwrap();

    assert_eq!((grid.width, grid.height), (250, 125));
    assert_eq!(raster.valid_count(), grid.len());
}
