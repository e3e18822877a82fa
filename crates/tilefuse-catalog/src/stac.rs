//! STAC API payloads.
//!
//! Only the fields the index needs are modelled; everything else on an
//! item's properties is kept in `extra`. Item-level fields are lenient
//! (missing geometry or assets deserialize to empty values) so that one
//! malformed item can be dropped without failing the whole page.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A STAC item: one tile at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItem {
    /// Item identifier, e.g. `swissalti3d_2019_2532-1152`.
    pub id: String,
    /// Parent collection id.
    #[serde(default)]
    pub collection: Option<String>,
    /// GeoJSON geometry in WGS84.
    #[serde(default)]
    pub geometry: serde_json::Value,
    /// `[west, south, east, north]`.
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    /// Item properties.
    #[serde(default)]
    pub properties: StacItemProperties,
    /// Assets keyed by asset name.
    #[serde(default)]
    pub assets: BTreeMap<String, StacAsset>,
    /// Related links.
    #[serde(default)]
    pub links: Vec<StacLink>,
}

/// Item properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacItemProperties {
    /// Nominal acquisition time (RFC 3339).
    #[serde(default)]
    pub datetime: Option<String>,
    /// Start of the acquisition interval, when `datetime` is null.
    #[serde(default)]
    pub start_datetime: Option<String>,
    /// End of the acquisition interval, when `datetime` is null.
    #[serde(default)]
    pub end_datetime: Option<String>,
    /// Item-level ground sample distance, used when assets carry none.
    #[serde(rename = "eo:gsd", default)]
    pub gsd: Option<f64>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A downloadable file of an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacAsset {
    /// Download URL.
    #[serde(default)]
    pub href: Option<String>,
    /// Media type, e.g. `image/tiff; application=geotiff`.
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    /// Ground sample distance in metres.
    #[serde(rename = "eo:gsd", default)]
    pub gsd: Option<f64>,
    /// EPSG code of the asset.
    #[serde(rename = "proj:epsg", default)]
    pub epsg: Option<u32>,
}

/// A link to a related resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacLink {
    /// Target URL.
    pub href: String,
    /// Relationship, e.g. `next`, `self`.
    pub rel: String,
    /// HTTP method to use when following the link (defaults to GET).
    #[serde(default)]
    pub method: Option<String>,
}

/// One page of an item search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacSearchResult {
    /// Items on this page, still undecoded.
    #[serde(default)]
    pub features: Vec<serde_json::Value>,
    /// Page links.
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacSearchResult {
    /// URL of the next page, if any.
    pub fn next_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "next")
            .filter(|link| {
                link.method
                    .as_deref()
                    .map_or(true, |m| m.eq_ignore_ascii_case("GET"))
            })
            .map(|link| link.href.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_deserialization() {
        let json = r#"{
            "id": "swissalti3d_2019_2532-1152",
            "collection": "ch.swisstopo.swissalti3d",
            "type": "Feature",
            "stac_version": "0.9.0",
            "geometry": {"type": "Polygon", "coordinates": [[[6.0, 46.0], [6.1, 46.0], [6.1, 46.1], [6.0, 46.0]]]},
            "properties": {"datetime": "2019-01-01T00:00:00Z", "created": "2021-02-10T10:54:12Z"},
            "assets": {
                "swissalti3d_2019_2532-1152_2_2056_5728.tif": {
                    "href": "https://data.geo.admin.ch/ch.swisstopo.swissalti3d/swissalti3d_2019_2532-1152/swissalti3d_2019_2532-1152_2_2056_5728.tif",
                    "type": "image/tiff; application=geotiff; profile=cloud-optimized",
                    "eo:gsd": 2.0,
                    "proj:epsg": 2056
                }
            },
            "links": []
        }"#;
        let item: StacItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, "swissalti3d_2019_2532-1152");
        assert_eq!(item.properties.datetime.as_deref(), Some("2019-01-01T00:00:00Z"));
        assert!(item.properties.extra.contains_key("created"));
        let asset = item.assets.values().next().unwrap();
        assert_eq!(asset.gsd, Some(2.0));
        assert_eq!(asset.epsg, Some(2056));
    }

    #[test]
    fn test_item_without_assets_still_parses() {
        let item: StacItem = serde_json::from_str(r#"{"id": "x_1"}"#).unwrap();
        assert!(item.assets.is_empty());
        assert!(item.geometry.is_null());
    }

    #[test]
    fn test_next_link() {
        let page: StacSearchResult = serde_json::from_str(
            r#"{"type": "FeatureCollection", "features": [],
                "links": [{"rel": "self", "href": "a"}, {"rel": "next", "href": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(page.next_href(), Some("b"));

        let post: StacSearchResult = serde_json::from_str(
            r#"{"features": [], "links": [{"rel": "next", "href": "b", "method": "POST"}]}"#,
        )
        .unwrap();
        assert_eq!(post.next_href(), None);
    }
}
