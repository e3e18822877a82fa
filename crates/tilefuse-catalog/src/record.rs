//! Normalized tile records.
//!
//! Collections disagree on which metadata they populate (not every
//! collection sets `eo:gsd`, datetimes may be an interval). Each item asset
//! becomes one [`TileRecord`] with nulls where the catalog is silent, so the
//! selector never has to special-case a collection.

use crate::stac::StacItem;
use chrono::{DateTime, Utc};
use geo::{Geometry, MultiPolygon};
use serde::{Serialize, Serializer};
use tracing::debug;

/// One asset of one catalog item: a physical tile at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileRecord {
    /// Identifier shared by every vintage of the same tile.
    pub tile_id: String,
    /// Catalog item id.
    pub item_id: String,
    /// Collection the item belongs to.
    pub collection_id: String,
    /// Acquisition time, if the catalog reports one.
    pub acquisition_date: Option<DateTime<Utc>>,
    /// Tile extent in WGS84.
    #[serde(serialize_with = "serialize_geometry")]
    pub geometry: MultiPolygon<f64>,
    /// Ground sample distance in metres, if reported.
    pub ground_sample_distance: Option<f64>,
    /// Asset key within the item.
    pub asset_key: String,
    /// Download URL.
    pub asset_href: String,
    /// Media type, if reported.
    pub media_type: Option<String>,
    /// Lower-case file extension of the href, without the dot.
    pub extension: Option<String>,
}

fn serialize_geometry<S: Serializer>(geometry: &MultiPolygon<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    geojson::Geometry::new(geojson::Value::from(geometry)).serialize(serializer)
}

impl TileRecord {
    /// Normalize one item into a record per asset.
    ///
    /// Items without a usable polygon geometry yield nothing; assets without
    /// an href are skipped. `collection_id` is used when the item does not
    /// name its collection.
    pub fn from_item(item: &StacItem, collection_id: &str) -> Vec<TileRecord> {
        let Some(geometry) = item_geometry(&item.geometry) else {
            debug!(item = %item.id, "dropping item without polygon geometry");
            return Vec::new();
        };
        if item.assets.is_empty() {
            debug!(item = %item.id, "dropping item without assets");
            return Vec::new();
        }

        let tile_id = tile_id(&item.id).to_string();
        let collection_id = item.collection.clone().unwrap_or_else(|| collection_id.to_string());
        let acquisition_date = acquisition_date(item);

        item.assets
            .iter()
            .filter_map(|(key, asset)| {
                let Some(href) = asset.href.as_deref().filter(|h| !h.is_empty()) else {
                    debug!(item = %item.id, asset = %key, "dropping asset without href");
                    return None;
                };
                Some(TileRecord {
                    tile_id: tile_id.clone(),
                    item_id: item.id.clone(),
                    collection_id: collection_id.clone(),
                    acquisition_date,
                    geometry: geometry.clone(),
                    ground_sample_distance: asset.gsd.or(item.properties.gsd),
                    asset_key: key.clone(),
                    asset_href: href.to_string(),
                    media_type: asset.media_type.clone(),
                    extension: href_extension(href),
                })
            })
            .collect()
    }

    /// Final path segment of the href, without query or fragment.
    pub fn file_name(&self) -> &str {
        href_file_name(&self.asset_href)
    }
}

/// Stable tile identifier of an item id: the text after the last `_`
/// (`swissalti3d_2019_2532-1152` -> `2532-1152`).
pub fn tile_id(item_id: &str) -> &str {
    item_id.rsplit('_').next().unwrap_or(item_id)
}

/// Final path segment of a URL, without query or fragment.
pub fn href_file_name(href: &str) -> &str {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit('/').next().unwrap_or(path)
}

/// Lower-case extension of the href's file name (`a/b.TIF?x=1` -> `tif`).
pub fn href_extension(href: &str) -> Option<String> {
    let name = href_file_name(href);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn acquisition_date(item: &StacItem) -> Option<DateTime<Utc>> {
    let props = &item.properties;
    [&props.datetime, &props.end_datetime, &props.start_datetime]
        .into_iter()
        .flatten()
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn item_geometry(value: &serde_json::Value) -> Option<MultiPolygon<f64>> {
    if value.is_null() {
        return None;
    }
    let geometry = geojson::Geometry::from_json_value(value.clone()).ok()?;
    match Geometry::<f64>::try_from(geometry.value).ok()? {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) if !multi.0.is_empty() => Some(multi),
        Geometry::Rect(rect) => Some(MultiPolygon::new(vec![rect.to_polygon()])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(json: serde_json::Value) -> StacItem {
        serde_json::from_value(json).unwrap()
    }

    fn square() -> serde_json::Value {
        serde_json::json!({"type": "Polygon", "coordinates": [[[6.0, 46.0], [6.1, 46.0], [6.1, 46.1], [6.0, 46.1], [6.0, 46.0]]]})
    }

    #[test]
    fn test_tile_id_is_last_segment() {
        assert_eq!(tile_id("swissalti3d_2019_2532-1152"), "2532-1152");
        assert_eq!(tile_id("plain"), "plain");
    }

    #[test]
    fn test_extension() {
        assert_eq!(href_extension("https://x/a/b_2_2056.TIF"), Some("tif".to_string()));
        assert_eq!(href_extension("https://x/a/b.las.zip?sig=1"), Some("zip".to_string()));
        assert_eq!(href_extension("https://x/a/README"), None);
        assert_eq!(href_extension("https://x/a/.hidden"), None);
    }

    #[test]
    fn test_one_record_per_asset() {
        let item = item(serde_json::json!({
            "id": "swissalti3d_2019_2532-1152",
            "geometry": square(),
            "properties": {"datetime": "2019-01-01T00:00:00Z"},
            "assets": {
                "a_0.5.tif": {"href": "https://x/a_0.5_2056.tif", "eo:gsd": 0.5},
                "a_2.tif": {"href": "https://x/a_2_2056.tif", "eo:gsd": 2.0},
                "broken": {"type": "image/tiff"}
            }
        }));
        let records = TileRecord::from_item(&item, "ch.swisstopo.swissalti3d");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.tile_id == "2532-1152"));
        assert!(records.iter().all(|r| r.collection_id == "ch.swisstopo.swissalti3d"));
        assert_eq!(records[0].ground_sample_distance, Some(0.5));
        assert_eq!(records[0].file_name(), "a_0.5_2056.tif");
    }

    #[test]
    fn test_missing_metadata_is_null() {
        let item = item(serde_json::json!({
            "id": "swisssurface3d_2018_2600-1200",
            "geometry": square(),
            "properties": {"datetime": null},
            "assets": {"pc": {"href": "https://x/pc.las.zip"}}
        }));
        let records = TileRecord::from_item(&item, "ch.swisstopo.swisssurface3d");
        assert_eq!(records.len(), 1);
        assert!(records[0].acquisition_date.is_none());
        assert!(records[0].ground_sample_distance.is_none());
    }

    #[test]
    fn test_interval_datetime_falls_back_to_end() {
        let item = item(serde_json::json!({
            "id": "x_1",
            "geometry": square(),
            "properties": {"datetime": null, "start_datetime": "2017-01-01T00:00:00Z", "end_datetime": "2018-12-31T00:00:00Z"},
            "assets": {"a": {"href": "https://x/a.tif"}}
        }));
        let date = TileRecord::from_item(&item, "c")[0].acquisition_date.unwrap();
        assert_eq!(date.to_rfc3339(), "2018-12-31T00:00:00+00:00");
    }

    #[test]
    fn test_item_without_geometry_is_dropped() {
        let no_geometry = item(serde_json::json!({"id": "x_1", "assets": {"a": {"href": "https://x/a.tif"}}}));
        assert!(TileRecord::from_item(&no_geometry, "c").is_empty());

        let point = item(serde_json::json!({
            "id": "x_1",
            "geometry": {"type": "Point", "coordinates": [6.0, 46.0]},
            "assets": {"a": {"href": "https://x/a.tif"}}
        }));
        assert!(TileRecord::from_item(&point, "c").is_empty());
    }

    #[test]
    fn test_record_serializes_geometry_as_geojson() {
        let item = item(serde_json::json!({
            "id": "x_1", "geometry": square(), "assets": {"a": {"href": "https://x/a.tif"}}
        }));
        let json = serde_json::to_value(&TileRecord::from_item(&item, "c")[0]).unwrap();
        assert_eq!(json["geometry"]["type"], "MultiPolygon");
        assert_eq!(json["extension"], "tif");
    }
}
