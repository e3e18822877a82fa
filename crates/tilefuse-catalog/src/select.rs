//! Filtering and latest-per-tile deduplication.
//!
//! Among the records sharing a `tile_id`, the winner is the maximum under a
//! total order:
//!
//! 1. later `acquisition_date` (a missing date ranks below any date)
//! 2. smaller `ground_sample_distance` (a missing GSD ranks below any GSD)
//! 3. lexicographically smaller `asset_href`
//! 4. lexicographically smaller `item_id`, then `asset_key`
//!
//! The result therefore does not depend on the order records were listed in.

use crate::{TileIndex, TileRecord};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Tolerance of GSD comparisons, in metres.
pub const GSD_TOLERANCE: f64 = 1e-6;

/// Options of [`select`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOptions {
    /// Keep only records at this ground sample distance.
    pub gsd: Option<f64>,
    /// Keep only records with this file extension.
    pub extension: Option<String>,
    /// Keep only the winning record of each tile.
    pub latest_only: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            gsd: None,
            extension: None,
            latest_only: true,
        }
    }
}

impl SelectOptions {
    /// Filter on ground sample distance.
    pub fn with_gsd(mut self, gsd: f64) -> Self {
        self.gsd = Some(gsd);
        self
    }

    /// Filter on file extension (case-insensitive, leading dot optional).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Enable or disable latest-per-tile deduplication.
    pub fn with_latest_only(mut self, latest_only: bool) -> Self {
        self.latest_only = latest_only;
        self
    }
}

/// Records chosen from a [`TileIndex`], ordered by `tile_id` then href.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionResult {
    records: Vec<TileRecord>,
}

impl SelectionResult {
    /// Selected records.
    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    /// Iterate over the selected records.
    pub fn iter(&self) -> std::slice::Iter<'_, TileRecord> {
        self.records.iter()
    }

    /// Number of selected records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct tile ids, in order.
    pub fn tile_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.records.iter().map(|r| r.tile_id.as_str()).collect();
        ids.dedup();
        ids
    }

    /// Consume the selection.
    pub fn into_records(self) -> Vec<TileRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a SelectionResult {
    type Item = &'a TileRecord;
    type IntoIter = std::slice::Iter<'a, TileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Whether the record's GSD equals `gsd` within [`GSD_TOLERANCE`]. A record
/// without GSD never matches.
pub fn matches_gsd(record: &TileRecord, gsd: f64) -> bool {
    record
        .ground_sample_distance
        .map_or(false, |value| (value - gsd).abs() <= GSD_TOLERANCE)
}

/// Whether the record's extension equals `extension`, ignoring case and a
/// leading dot. A record without extension never matches.
pub fn matches_extension(record: &TileRecord, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    record
        .extension
        .as_deref()
        .map_or(false, |ext| ext.eq_ignore_ascii_case(wanted))
}

/// Whether the record is a GeoTIFF (`tif` or `tiff`).
pub fn is_tiff(record: &TileRecord) -> bool {
    matches_extension(record, "tif") || matches_extension(record, "tiff")
}

/// Whether the record is a point cloud: LAS, LAZ, or a zipped LAS as
/// swissSURFACE3D publishes them.
pub fn is_point_cloud(record: &TileRecord) -> bool {
    ["las", "laz", "zip"].iter().any(|ext| matches_extension(record, ext))
}

/// Precedence of two records of the same tile; `Greater` means `a` wins.
pub fn precedence(a: &TileRecord, b: &TileRecord) -> Ordering {
    a.acquisition_date
        .cmp(&b.acquisition_date)
        .then_with(|| match (a.ground_sample_distance, b.ground_sample_distance) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.asset_href.cmp(&a.asset_href))
        .then_with(|| b.item_id.cmp(&a.item_id))
        .then_with(|| b.asset_key.cmp(&a.asset_key))
}

/// Filter the index and, when `latest_only`, keep one record per tile.
pub fn select(index: &TileIndex, options: &SelectOptions) -> SelectionResult {
    let passes = |record: &&TileRecord| {
        options.gsd.map_or(true, |gsd| matches_gsd(record, gsd))
            && options
                .extension
                .as_deref()
                .map_or(true, |ext| matches_extension(record, ext))
    };

    let mut records: Vec<TileRecord> = if options.latest_only {
        let mut winners: BTreeMap<&str, &TileRecord> = BTreeMap::new();
        for record in index.iter().filter(passes) {
            winners
                .entry(record.tile_id.as_str())
                .and_modify(|current| {
                    if precedence(record, current) == Ordering::Greater {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        winners.into_values().cloned().collect()
    } else {
        index.iter().filter(passes).cloned().collect()
    };

    records.sort_by(|a, b| {
        a.tile_id
            .cmp(&b.tile_id)
            .then_with(|| a.asset_href.cmp(&b.asset_href))
            .then_with(|| a.item_id.cmp(&b.item_id))
    });

    debug!(
        indexed = index.len(),
        selected = records.len(),
        gsd = ?options.gsd,
        extension = ?options.extension,
        latest_only = options.latest_only,
        "selected tiles"
    );
    SelectionResult { records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geo::MultiPolygon;

    fn record(item_id: &str, year: Option<i32>, gsd: Option<f64>, href: &str) -> TileRecord {
        TileRecord {
            tile_id: crate::record::tile_id(item_id).to_string(),
            item_id: item_id.to_string(),
            collection_id: "c".to_string(),
            acquisition_date: year.map(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap()),
            geometry: MultiPolygon::new(vec![]),
            ground_sample_distance: gsd,
            asset_key: href.to_string(),
            asset_href: href.to_string(),
            media_type: None,
            extension: crate::record::href_extension(href),
        }
    }

    #[test]
    fn test_predicates() {
        let r = record("a_1", Some(2020), Some(2.0), "https://x/a.TIF");
        assert!(matches_gsd(&r, 2.0 + 1e-9));
        assert!(!matches_gsd(&r, 0.5));
        assert!(matches_extension(&r, ".tif"));
        assert!(matches_extension(&r, "TIF"));
        assert!(is_tiff(&r));
        assert!(!is_point_cloud(&r));
        assert!(is_point_cloud(&record("a_1", None, None, "https://x/a_2056.las.zip")));

        let bare = record("a_1", None, None, "https://x/a");
        assert!(!matches_gsd(&bare, 2.0));
        assert!(!matches_extension(&bare, "tif"));
    }

    #[test]
    fn test_null_date_ranks_lowest() {
        let dated = record("a_1", Some(1990), None, "https://x/b.tif");
        let undated = record("a_1", None, None, "https://x/a.tif");
        assert_eq!(precedence(&dated, &undated), Ordering::Greater);
    }

    #[test]
    fn test_finer_gsd_wins_same_date() {
        let fine = record("a_1", Some(2020), Some(0.5), "https://x/b.tif");
        let coarse = record("a_1", Some(2020), Some(2.0), "https://x/a.tif");
        let unknown = record("a_1", Some(2020), None, "https://x/0.tif");
        assert_eq!(precedence(&fine, &coarse), Ordering::Greater);
        assert_eq!(precedence(&coarse, &unknown), Ordering::Greater);
    }

    #[test]
    fn test_href_breaks_remaining_ties() {
        let a = record("a_1", Some(2020), Some(2.0), "https://x/a.tif");
        let b = record("a_1", Some(2020), Some(2.0), "https://x/b.tif");
        assert_eq!(precedence(&a, &b), Ordering::Greater);
        assert_eq!(precedence(&b, &a), Ordering::Less);
    }

    #[test]
    fn test_without_latest_only_keeps_all_matching() {
        let index = TileIndex::from_records(
            "c",
            vec![
                record("x_2019_t1", Some(2019), Some(2.0), "https://x/1.tif"),
                record("x_2021_t1", Some(2021), Some(2.0), "https://x/2.tif"),
                record("x_2021_t1", Some(2021), Some(0.5), "https://x/3.tif"),
            ],
        );
        let options = SelectOptions::default().with_gsd(2.0).with_latest_only(false);
        assert_eq!(select(&index, &options).len(), 2);
    }
}
