//! Resolving selected tile records to local files.

use crate::{AssetFetcher, TileWarning};
use rayon::prelude::*;
use std::path::PathBuf;
use tilefuse_catalog::{SelectionResult, TileRecord};
use tracing::{info, warn};

/// A selected record and the local file holding its asset.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedAsset {
    /// The selected record.
    pub record: TileRecord,
    /// Local path of the asset.
    pub path: PathBuf,
}

/// Outcome of [`materialize`]: the retrieved assets and the skipped ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Materialized {
    /// Retrieved assets, in selection order.
    pub assets: Vec<MaterializedAsset>,
    /// One [`TileWarning::AssetUnavailable`] per asset that failed.
    pub warnings: Vec<TileWarning>,
}

impl Materialized {
    /// Tiles whose asset could not be retrieved.
    pub fn missing_tile_ids(&self) -> Vec<&str> {
        self.warnings.iter().map(|w| w.tile_id()).collect()
    }

    /// Whether no asset was retrieved.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Fetch every selected asset concurrently.
///
/// A failed fetch never aborts the others; it is logged and recorded as an
/// `AssetUnavailable` warning.
pub fn materialize(selection: &SelectionResult, fetcher: &dyn AssetFetcher) -> Materialized {
    let results: Vec<_> = selection
        .records()
        .par_iter()
        .map(|record| (record, fetcher.fetch(&record.asset_href)))
        .collect();

    let mut materialized = Materialized::default();
    for (record, result) in results {
        match result {
            Ok(path) => materialized.assets.push(MaterializedAsset {
                record: record.clone(),
                path,
            }),
            Err(e) => {
                warn!(tile = %record.tile_id, href = %record.asset_href, error = %e, "asset unavailable, skipping tile");
                materialized.warnings.push(TileWarning::AssetUnavailable {
                    tile_id: record.tile_id.clone(),
                    href: record.asset_href.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        selected = selection.len(),
        retrieved = materialized.assets.len(),
        missing = materialized.warnings.len(),
        "materialized assets"
    );
    materialized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchError;
    use tilefuse_catalog::{select, SelectOptions, TileIndex};

    struct FailOn(&'static str);

    impl AssetFetcher for FailOn {
        fn fetch(&self, href: &str) -> Result<PathBuf, FetchError> {
            if href.contains(self.0) {
                Err(FetchError::DownloadFailed {
                    href: href.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                })
            } else {
                Ok(PathBuf::from(format!("/cache/{}", tilefuse_catalog::href_file_name(href))))
            }
        }
    }

    fn record(tile_id: &str) -> TileRecord {
        TileRecord {
            tile_id: tile_id.to_string(),
            item_id: format!("x_{}", tile_id),
            collection_id: "c".to_string(),
            acquisition_date: None,
            geometry: geo::MultiPolygon::new(vec![]),
            ground_sample_distance: None,
            asset_key: "a".to_string(),
            asset_href: format!("https://x/{}.tif", tile_id),
            media_type: None,
            extension: Some("tif".to_string()),
        }
    }

    #[test]
    fn test_failed_fetch_becomes_warning() {
        let index = TileIndex::from_records("c", ["t1", "t2", "t3", "t4"].iter().map(|t| record(t)).collect());
        let selection = select(&index, &SelectOptions::default());
        let materialized = materialize(&selection, &FailOn("t3"));

        let tiles: Vec<&str> = materialized.assets.iter().map(|a| a.record.tile_id.as_str()).collect();
        assert_eq!(tiles, vec!["t1", "t2", "t4"]);
        assert_eq!(materialized.assets[0].path, PathBuf::from("/cache/t1.tif"));
        assert_eq!(materialized.missing_tile_ids(), vec!["t3"]);
        assert!(matches!(
            &materialized.warnings[0],
            TileWarning::AssetUnavailable { href, .. } if href == "https://x/t3.tif"
        ));
    }
}
