//! End-to-end product pipelines over an in-memory catalog and GeoTIFF tiles
//! written to a temporary directory.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tilefuse::{
    find_tiles, get_building_footprints, get_building_height_raster, get_dem_raster, get_tree_canopy_raster,
    AssetFetcher, BuildingFootprint, BuildingHeightOptions, DemOptions, FetchError, FootprintError, FootprintSource,
    FusionError, OutputDType, PipelineError, ProductKind, Sources, SurfaceKind, TileWarning, TreeCanopyOptions,
    UNKNOWN_HEIGHT,
};
use tilefuse_catalog::{
    decode_items, CatalogSearch, PageToken, SearchPage, SearchRequest, SelectOptions, SWISSALTI3D,
    SWISSSURFACE3D_RASTER,
};
use tilefuse_raster::{lv95_to_wgs84, write_raster, Crs, GeoTransform, Raster, RasterGrid, Region};

// ============================================================================
// Fakes
// ============================================================================

/// Catalog serving fixed items per collection in a single page.
#[derive(Default)]
struct FixedCatalog {
    items: HashMap<String, Vec<serde_json::Value>>,
    requests: Cell<usize>,
}

impl FixedCatalog {
    fn add(&mut self, collection: &str, item: serde_json::Value) {
        self.items.entry(collection.to_string()).or_default().push(item);
    }
}

impl CatalogSearch for FixedCatalog {
    fn search(&self, request: &SearchRequest, _page: Option<&PageToken>) -> tilefuse_catalog::Result<SearchPage> {
        self.requests.set(self.requests.get() + 1);
        let items = request
            .collections
            .iter()
            .filter_map(|c| self.items.get(c))
            .flatten()
            .cloned()
            .collect();
        Ok(SearchPage {
            items: decode_items(items),
            next: None,
        })
    }
}

/// Fetcher resolving hrefs to files written by the test.
#[derive(Default)]
struct MappedFetcher {
    paths: HashMap<String, PathBuf>,
}

impl AssetFetcher for MappedFetcher {
    fn fetch(&self, href: &str) -> Result<PathBuf, FetchError> {
        self.paths.get(href).cloned().ok_or_else(|| FetchError::DownloadFailed {
            href: href.to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const EAST: f64 = 2_600_000.0;
const NORTH: f64 = 1_200_000.0;

/// One swisstopo-style kilometre tile: a 100 x 100 GeoTIFF at 10 m and its
/// STAC item.
struct Tile {
    collection: &'static str,
    item_id: String,
    href: String,
    min_x: f64,
    min_y: f64,
    value: f32,
    year: i32,
}

impl Tile {
    fn new(collection: &'static str, year: i32, km_x: u32, km_y: u32, value: f32) -> Self {
        let product = collection.rsplit('.').next().unwrap_or(collection);
        let tile = format!("{}-{}", km_x, km_y);
        let item_id = format!("{}_{}_{}", product, year, tile);
        let href = format!(
            "https://data.example.org/{}/{}/{}_{}_{}_2_2056_5728.tif",
            collection, item_id, product, year, tile
        );
        Self {
            collection,
            item_id,
            href,
            min_x: km_x as f64 * 1000.0,
            min_y: km_y as f64 * 1000.0,
            value,
            year,
        }
    }

    fn write(&self, dir: &Path) -> PathBuf {
        let grid = RasterGrid::new(
            Crs::LV95,
            GeoTransform {
                origin_x: self.min_x,
                origin_y: self.min_y + 1000.0,
                pixel_width: 10.0,
                pixel_height: 10.0,
            },
            100,
            100,
        )
        .unwrap();
        let path = dir.join(format!("{}.tif", self.item_id));
        write_raster(&path, &Raster::filled(grid, self.value, Some(-9999.0))).unwrap();
        path
    }

    fn item(&self) -> serde_json::Value {
        let corner = |x: f64, y: f64| {
            let (lon, lat) = lv95_to_wgs84(x, y).unwrap();
            serde_json::json!([lon, lat])
        };
        let (x0, y0, x1, y1) = (self.min_x, self.min_y, self.min_x + 1000.0, self.min_y + 1000.0);
        serde_json::json!({
            "id": self.item_id,
            "collection": self.collection,
            "geometry": {"type": "Polygon", "coordinates": [[
                corner(x0, y0), corner(x1, y0), corner(x1, y1), corner(x0, y1), corner(x0, y0)
            ]]},
            "properties": {"datetime": format!("{}-06-01T00:00:00Z", self.year)},
            "assets": {
                "data": {"href": self.href, "type": "image/tiff; application=geotiff", "eo:gsd": 2.0}
            }
        })
    }
}

struct World {
    _dir: tempfile::TempDir,
    catalog: FixedCatalog,
    fetcher: MappedFetcher,
}

impl World {
    /// Publish `tiles`; those in `offline` are listed but cannot be fetched.
    fn new(tiles: &[Tile], offline: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = FixedCatalog::default();
        let mut fetcher = MappedFetcher::default();
        for tile in tiles {
            catalog.add(tile.collection, tile.item());
            if !offline.contains(&tile.item_id.as_str()) {
                fetcher.paths.insert(tile.href.clone(), tile.write(dir.path()));
            }
        }
        Self {
            _dir: dir,
            catalog,
            fetcher,
        }
    }

    fn sources(&self) -> Sources<'_> {
        Sources::new(&self.catalog, &self.fetcher)
    }
}

/// 1000 x 600 m straddling the boundary between tiles 2600 and 2601.
fn straddling_region() -> Region {
    Region::from_bbox([EAST + 500.0, NORTH + 200.0, EAST + 1500.0, NORTH + 800.0], Crs::LV95).unwrap()
}

// ============================================================================
// Tile search
// ============================================================================

#[test]
fn test_find_tiles_keeps_latest_vintage() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 400.0),
            Tile::new(SWISSALTI3D, 2021, 2600, 1200, 450.0),
            Tile::new(SWISSALTI3D, 2020, 2601, 1200, 460.0),
        ],
        &[],
    );
    let selection = find_tiles(
        &world.sources(),
        SWISSALTI3D,
        &straddling_region(),
        None,
        &SelectOptions::default().with_gsd(2.0).with_extension("tif"),
    )
    .unwrap();
    let items: Vec<&str> = selection.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(items, vec!["swissalti3d_2021_2600-1200", "swissalti3d_2020_2601-1200"]);
}

// ============================================================================
// Elevation model
// ============================================================================

#[test]
fn test_dem_over_adjacent_tiles() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0),
            Tile::new(SWISSALTI3D, 2019, 2601, 1200, 510.0),
        ],
        &[],
    );
    let dem = get_dem_raster(&world.sources(), &straddling_region(), &DemOptions::default()).unwrap();

    assert!(dem.warnings.is_empty());
    let product = &dem.product;
    assert_eq!(product.kind(), ProductKind::Dem);
    assert_eq!(product.dtype(), OutputDType::F32);
    assert_eq!(product.nodata(), -9999.0);
    assert_eq!((product.grid().width, product.grid().height), (500, 300));
    assert_eq!(product.valid_count(), 500 * 300);
    assert_eq!(product.value(10, 150), Some(500.0));
    assert_eq!(product.value(490, 150), Some(510.0));
}

#[test]
fn test_dem_uses_latest_vintage() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 400.0),
            Tile::new(SWISSALTI3D, 2021, 2600, 1200, 450.0),
        ],
        &[],
    );
    let region = Region::from_bbox([EAST + 100.0, NORTH + 100.0, EAST + 300.0, NORTH + 300.0], Crs::LV95).unwrap();
    let dem = get_dem_raster(&world.sources(), &region, &DemOptions::default()).unwrap();
    assert_eq!(dem.product.value(50, 50), Some(450.0));
}

#[test]
fn test_dem_skips_unavailable_tile() {
    let missing = Tile::new(SWISSALTI3D, 2019, 2601, 1200, 510.0);
    let missing_id = missing.item_id.clone();
    let world = World::new(&[Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0), missing], &[&missing_id]);
    let dem = get_dem_raster(&world.sources(), &straddling_region(), &DemOptions::default()).unwrap();

    assert_eq!(dem.warnings.len(), 1);
    assert!(matches!(
        &dem.warnings[0],
        TileWarning::AssetUnavailable { tile_id, .. } if tile_id == "2601-1200"
    ));
    assert_eq!(dem.product.value(10, 150), Some(500.0));
    assert_eq!(dem.product.value(490, 150), None);
}

#[test]
fn test_dem_without_tiles_is_insufficient_coverage() {
    let world = World::new(&[], &[]);
    let result = get_dem_raster(&world.sources(), &straddling_region(), &DemOptions::default());
    assert!(matches!(
        result,
        Err(PipelineError::Fusion(FusionError::InsufficientCoverage(_)))
    ));
}

// ============================================================================
// Tree canopy
// ============================================================================

#[test]
fn test_canopy_from_surface_raster() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0),
            Tile::new(SWISSALTI3D, 2019, 2601, 1200, 510.0),
            Tile::new(SWISSSURFACE3D_RASTER, 2018, 2600, 1200, 510.0),
            Tile::new(SWISSSURFACE3D_RASTER, 2018, 2601, 1200, 520.0),
        ],
        &[],
    );
    let options = TreeCanopyOptions {
        dst_res: 4.0,
        alti3d_res: 2.0,
        ..TreeCanopyOptions::default()
    };
    let canopy = get_tree_canopy_raster(&world.sources(), &straddling_region(), &options, None, None).unwrap();

    assert!(canopy.warnings.is_empty());
    assert_eq!(canopy.product.kind(), ProductKind::TreeCanopy);
    assert_eq!((canopy.product.grid().width, canopy.product.grid().height), (250, 150));
    assert_eq!(canopy.product.valid_count(), 250 * 150);
    assert_eq!(canopy.product.value(5, 75), Some(10.0));
    assert_eq!(canopy.product.value(245, 75), Some(10.0));
}

#[test]
fn test_canopy_masks_buildings() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0),
            Tile::new(SWISSSURFACE3D_RASTER, 2018, 2600, 1200, 508.0),
        ],
        &[],
    );
    let region = Region::from_bbox([EAST + 100.0, NORTH + 100.0, EAST + 200.0, NORTH + 200.0], Crs::LV95).unwrap();
    let house = BuildingFootprint::new(
        "house",
        geo::MultiPolygon::new(vec![geo::Rect::new(
            geo::Coord {
                x: EAST + 100.0,
                y: NORTH + 100.0,
            },
            geo::Coord {
                x: EAST + 120.0,
                y: NORTH + 120.0,
            },
        )
        .to_polygon()]),
        Crs::LV95,
    );
    let options = TreeCanopyOptions {
        dst_res: 2.0,
        alti3d_res: 2.0,
        ..TreeCanopyOptions::default()
    };
    let canopy =
        get_tree_canopy_raster(&world.sources(), &region, &options, None, Some(std::slice::from_ref(&house))).unwrap();

    assert_eq!(canopy.product.valid_count(), 50 * 50 - 10 * 10);
    assert_eq!(canopy.product.value(0, 49), None);
    assert_eq!(canopy.product.value(49, 0), Some(8.0));
}

#[test]
fn test_point_cloud_canopy_without_engine_fails_before_search() {
    let world = World::new(&[Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0)], &[]);
    let options = TreeCanopyOptions {
        surface: SurfaceKind::PointCloud,
        ..TreeCanopyOptions::default()
    };
    let result = get_tree_canopy_raster(&world.sources(), &straddling_region(), &options, None, None);
    assert!(matches!(
        result,
        Err(PipelineError::Fusion(FusionError::CapabilityUnavailable(_)))
    ));
    assert_eq!(world.catalog.requests.get(), 0);
}

// ============================================================================
// Building heights
// ============================================================================

fn block(id: &str, min_x: f64, min_y: f64, size: f64) -> BuildingFootprint {
    BuildingFootprint::new(
        id,
        geo::MultiPolygon::new(vec![geo::Rect::new(
            geo::Coord {
                x: EAST + min_x,
                y: NORTH + min_y,
            },
            geo::Coord {
                x: EAST + min_x + size,
                y: NORTH + min_y + size,
            },
        )
        .to_polygon()]),
        Crs::LV95,
    )
}

#[test]
fn test_building_heights_with_estimates() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0),
            Tile::new(SWISSSURFACE3D_RASTER, 2018, 2600, 1200, 512.0),
        ],
        &[],
    );
    let region = Region::from_bbox([EAST + 100.0, NORTH + 100.0, EAST + 200.0, NORTH + 200.0], Crs::LV95).unwrap();
    let footprints = vec![
        block("tower", 110.0, 110.0, 10.0).with_height("height", 30.0),
        block("barn", 150.0, 150.0, 20.0),
    ];
    let options = BuildingHeightOptions {
        dst_res: 1.0,
        alti3d_res: 2.0,
        ..BuildingHeightOptions::default()
    };
    let heights = get_building_height_raster(&world.sources(), &region, &footprints, &options).unwrap();

    let product = &heights.product;
    assert_eq!(product.kind(), ProductKind::BuildingHeight);
    assert_eq!((product.grid().width, product.grid().height), (100, 100));
    // Rows count down from the northern edge at NORTH + 200
    assert_eq!(product.value(15, 85), Some(30.0));
    let barn = product.value(60, 40).expect("barn burned");
    assert!((barn - 12.0).abs() < 1e-3, "estimated {}", barn);
    assert_eq!(product.value(0, 0), None);
    assert_eq!(product.valid_count(), 100 + 400);
}

#[test]
fn test_building_heights_without_estimation_are_unknown() {
    let world = World::new(&[], &[]);
    let region = Region::from_bbox([EAST, NORTH, EAST + 50.0, NORTH + 50.0], Crs::LV95).unwrap();
    let footprints = vec![block("hut", 10.0, 10.0, 5.0)];
    let options = BuildingHeightOptions {
        estimate_heights: false,
        ..BuildingHeightOptions::default()
    };
    let heights = get_building_height_raster(&world.sources(), &region, &footprints, &options).unwrap();
    assert_eq!(heights.product.value(12, 37), Some(UNKNOWN_HEIGHT as f64));
    assert_eq!(heights.product.valid_count(), 25);
    assert_eq!(world.catalog.requests.get(), 0);
}

#[test]
fn test_building_estimation_without_elevation_tiles_degrades() {
    let world = World::new(&[], &[]);
    let region = Region::from_bbox([EAST, NORTH, EAST + 50.0, NORTH + 50.0], Crs::LV95).unwrap();
    let footprints = vec![block("hut", 10.0, 10.0, 5.0)];
    let heights =
        get_building_height_raster(&world.sources(), &region, &footprints, &BuildingHeightOptions::default()).unwrap();
    assert_eq!(heights.product.value(12, 37), Some(UNKNOWN_HEIGHT as f64));
}

/// Footprint service answering every region with the same buildings.
struct FixedFootprints(Vec<BuildingFootprint>);

impl FootprintSource for FixedFootprints {
    fn footprints(&self, _region: &Region) -> Result<Vec<BuildingFootprint>, FootprintError> {
        Ok(self.0.clone())
    }
}

#[test]
fn test_building_footprints_keep_positive_heights() {
    let world = World::new(
        &[
            Tile::new(SWISSALTI3D, 2019, 2600, 1200, 500.0),
            Tile::new(SWISSSURFACE3D_RASTER, 2018, 2600, 1200, 512.0),
        ],
        &[],
    );
    let region = Region::from_bbox([EAST + 100.0, NORTH + 100.0, EAST + 200.0, NORTH + 200.0], Crs::LV95).unwrap();
    let source = FixedFootprints(vec![
        block("way/1", 110.0, 110.0, 10.0).with_height("height", 30.0),
        block("way/2", 150.0, 150.0, 20.0),
        // Outside the elevation tiles: no estimate, dropped
        block("way/3", 5000.0, 5000.0, 10.0),
    ]);
    let options = BuildingHeightOptions {
        alti3d_res: 2.0,
        ..BuildingHeightOptions::default()
    };
    let footprints = get_building_footprints(&world.sources(), &region, &source, &options).unwrap();

    let ids: Vec<&str> = footprints.product.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["way/1", "way/2"]);
    assert_eq!(footprints.product[0].height("height"), Some(30.0));
    let estimate = footprints.product[1].height("height").unwrap();
    assert!((estimate - 12.0).abs() < 1e-3, "estimated {}", estimate);
}

#[test]
fn test_footprint_service_failure_is_reported() {
    struct Offline;
    impl FootprintSource for Offline {
        fn footprints(&self, _region: &Region) -> Result<Vec<BuildingFootprint>, FootprintError> {
            Err(FootprintError::Unavailable {
                url: "http://overpass.invalid".to_string(),
                attempts: 1,
                reason: "connection refused".to_string(),
            })
        }
    }
    let world = World::new(&[], &[]);
    let region = Region::from_bbox([EAST, NORTH, EAST + 50.0, NORTH + 50.0], Crs::LV95).unwrap();
    let result = get_building_footprints(&world.sources(), &region, &Offline, &BuildingHeightOptions::default());
    assert!(matches!(result, Err(PipelineError::Footprints(FootprintError::Unavailable { .. }))));
}
