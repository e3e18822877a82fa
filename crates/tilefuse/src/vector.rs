//! GeoJSON in and out: regions of interest and building footprints.

use crate::buildings::BuildingFootprint;
use crate::PipelineError;
use geo::{Geometry, MultiPolygon, Polygon};
use geojson::{feature::Id, FeatureCollection, GeoJson};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use tilefuse_raster::{Crs, Region};
use tracing::{debug, info};

/// Polygonal part of a geometry, `None` for points and lines.
fn polygons(geometry: Geometry<f64>) -> Option<Vec<Polygon<f64>>> {
    match geometry {
        Geometry::Polygon(p) => Some(vec![p]),
        Geometry::MultiPolygon(mp) => Some(mp.0),
        Geometry::Rect(r) => Some(vec![r.to_polygon()]),
        Geometry::Triangle(t) => Some(vec![t.to_polygon()]),
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<Polygon<f64>> = gc.0.into_iter().filter_map(polygons).flatten().collect();
            (!parts.is_empty()).then_some(parts)
        }
        _ => None,
    }
}

/// Features of a GeoJSON document, a bare geometry becoming one feature.
fn features(document: GeoJson) -> Vec<geojson::Feature> {
    match document {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(g),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    }
}

fn read_document(path: &Path) -> Result<GeoJson, PipelineError> {
    let text = fs::read_to_string(path)?;
    Ok(text.parse::<GeoJson>()?)
}

/// Parse a region from GeoJSON text: the union of every polygonal feature.
pub fn parse_region(text: &str, crs: Crs) -> Result<Region, PipelineError> {
    let document = text.parse::<GeoJson>()?;
    let mut parts = Vec::new();
    for feature in features(document) {
        let Some(geometry) = feature.geometry else { continue };
        let geometry = Geometry::<f64>::try_from(geometry.value)?;
        if let Some(found) = polygons(geometry) {
            parts.extend(found);
        }
    }
    if parts.is_empty() {
        return Err(PipelineError::InvalidVector("region has no polygon geometry".to_string()));
    }
    Ok(Region::new(MultiPolygon::new(parts), crs)?)
}

/// Read a region from a GeoJSON file whose coordinates are in `crs`.
pub fn read_region<P: AsRef<Path>>(path: P, crs: Crs) -> Result<Region, PipelineError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let region = parse_region(&text, crs)?;
    debug!(path = %path.display(), polygons = region.geometry().0.len(), "read region");
    Ok(region)
}

/// Footprint id: the feature id, else an `osm_id` or `id` property, else
/// the feature's position in the file.
fn footprint_id(feature: &geojson::Feature, properties: &Map<String, Value>, ordinal: usize) -> String {
    match &feature.id {
        Some(Id::String(s)) => return s.clone(),
        Some(Id::Number(n)) => return n.to_string(),
        None => {}
    }
    for key in ["osm_id", "osmid", "id"] {
        match properties.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    ordinal.to_string()
}

/// Footprints from a parsed GeoJSON document.
///
/// Features without polygonal geometry are skipped.
pub fn footprints_from_geojson(document: GeoJson, crs: Crs) -> Result<Vec<BuildingFootprint>, PipelineError> {
    let mut footprints = Vec::new();
    for (ordinal, feature) in features(document).into_iter().enumerate() {
        let properties = feature.properties.clone().unwrap_or_default();
        let id = footprint_id(&feature, &properties, ordinal);
        let Some(geometry) = feature.geometry else {
            debug!(footprint = %id, "skipping feature without geometry");
            continue;
        };
        let Some(parts) = polygons(Geometry::<f64>::try_from(geometry.value)?) else {
            debug!(footprint = %id, "skipping non-polygonal feature");
            continue;
        };
        footprints.push(BuildingFootprint {
            id,
            geometry: MultiPolygon::new(parts),
            crs,
            properties,
        });
    }
    Ok(footprints)
}

/// Read building footprints from a GeoJSON file whose coordinates are in
/// `crs`.
pub fn read_footprints<P: AsRef<Path>>(path: P, crs: Crs) -> Result<Vec<BuildingFootprint>, PipelineError> {
    let path = path.as_ref();
    let footprints = footprints_from_geojson(read_document(path)?, crs)?;
    info!(path = %path.display(), footprints = footprints.len(), "read building footprints");
    Ok(footprints)
}

/// Height-annotated footprints as a GeoJSON feature collection.
///
/// Only footprints with a positive `height_attr` are written, each with its
/// id and that single property. Coordinates stay in the footprints' CRS,
/// which is named in a `crs` member when it is not WGS84.
pub fn footprints_to_geojson(footprints: &[BuildingFootprint], height_attr: &str) -> GeoJson {
    let features = footprints
        .iter()
        .filter_map(|footprint| {
            let height = footprint.height(height_attr)?;
            let mut properties = Map::new();
            properties.insert(height_attr.to_string(), Value::from(height));
            Some(geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&footprint.geometry))),
                id: Some(Id::String(footprint.id.clone())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    let foreign_members = footprints.first().map(|f| f.crs).filter(|crs| *crs != Crs::WGS84).map(|crs| {
        let mut members = Map::new();
        members.insert(
            "crs".to_string(),
            json!({"type": "name", "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", crs.epsg())}}),
        );
        members
    });

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    })
}

/// Write height-annotated footprints as GeoJSON, returning how many were
/// written. Footprints without a positive height are left out.
pub fn write_footprints<P: AsRef<Path>>(
    path: P,
    footprints: &[BuildingFootprint],
    height_attr: &str,
) -> Result<usize, PipelineError> {
    let path = path.as_ref();
    let document = footprints_to_geojson(footprints, height_attr);
    let written = match &document {
        GeoJson::FeatureCollection(fc) => fc.features.len(),
        _ => 0,
    };
    fs::write(path, document.to_string())?;
    info!(path = %path.display(), footprints = written, "wrote building footprints");
    Ok(written)
}
