//! swisstopo catalog endpoints and collection identifiers.

/// Root of the federal geodata STAC API.
pub const CLIENT_URL: &str = "https://data.geo.admin.ch/api/stac/v0.9";

/// Digital terrain model (bare earth), 0.5 m and 2 m GeoTIFF tiles.
pub const SWISSALTI3D: &str = "ch.swisstopo.swissalti3d";
/// Nodata value of swissALTI3D rasters.
pub const SWISSALTI3D_NODATA: f32 = -9999.0;
/// Resolutions published for swissALTI3D, in metres.
pub const SWISSALTI3D_RESOLUTIONS: [f64; 2] = [0.5, 2.0];

/// Classified LiDAR point clouds.
pub const SWISSSURFACE3D: &str = "ch.swisstopo.swisssurface3d";

/// Digital surface model rasterized from swissSURFACE3D, 0.5 m tiles.
pub const SWISSSURFACE3D_RASTER: &str = "ch.swisstopo.swisssurface3d-raster";
/// Nodata value of swissSURFACE3D Raster tiles.
pub const SWISSSURFACE3D_RASTER_NODATA: f32 = -9999.0;

/// 10 cm orthophoto mosaic.
pub const SWISSIMAGE10: &str = "ch.swisstopo.swissimage-dop10";
/// Nodata value of SWISSIMAGE tiles.
pub const SWISSIMAGE10_NODATA: f32 = 0.0;
