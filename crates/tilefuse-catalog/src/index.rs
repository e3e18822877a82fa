//! Building a tile index for one collection and region.

use crate::client::{CatalogSearch, DateRange, PageToken, SearchRequest, DEFAULT_PAGE_SIZE};
use crate::{Result, TileRecord};
use geo::{BoundingRect, Intersects, MultiPolygon};
use serde::Serialize;
use std::collections::HashSet;
use tilefuse_raster::{Crs, Region};
use tracing::{debug, info, warn};

/// What to index.
#[derive(Debug, Clone)]
pub struct IndexQuery<'a> {
    /// Collection to search.
    pub collection_id: &'a str,
    /// Region of interest, in any supported CRS.
    pub region: &'a Region,
    /// Acquisition time filter.
    pub datetime: Option<DateRange>,
    /// Items requested per page.
    pub page_size: usize,
}

impl<'a> IndexQuery<'a> {
    /// Query a whole collection over `region`, any acquisition time.
    pub fn new(collection_id: &'a str, region: &'a Region) -> Self {
        Self {
            collection_id,
            region,
            datetime: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Restrict to acquisitions within `datetime`.
    pub fn with_datetime(mut self, datetime: Option<DateRange>) -> Self {
        self.datetime = datetime;
        self
    }

    /// Override the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Tile records of one collection intersecting one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TileIndex {
    collection_id: String,
    records: Vec<TileRecord>,
}

impl TileIndex {
    /// Index from already normalized records.
    pub fn from_records(collection_id: impl Into<String>, records: Vec<TileRecord>) -> Self {
        Self {
            collection_id: collection_id.into(),
            records,
        }
    }

    /// Collection the records come from.
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// All records.
    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, TileRecord> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index holds no record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the index.
    pub fn into_records(self) -> Vec<TileRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a TileIndex {
    type Item = &'a TileRecord;
    type IntoIter = std::slice::Iter<'a, TileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Search the catalog and normalize every returned item asset.
///
/// The region's WGS84 bounding box is sent to the catalog; since the catalog
/// filters by box only, records whose geometry misses the region polygon
/// are dropped here. Pages are followed until the catalog stops returning a
/// continuation.
pub fn build_index<C: CatalogSearch + ?Sized>(catalog: &C, query: &IndexQuery<'_>) -> Result<TileIndex> {
    let region = query.region.to_crs(Crs::WGS84)?;
    let request = SearchRequest {
        collections: vec![query.collection_id.to_string()],
        bbox: query.region.bbox_in(Crs::WGS84)?,
        datetime: query.datetime,
        limit: query.page_size.max(1),
    };

    let mut records = Vec::new();
    let mut seen_assets: HashSet<(String, String)> = HashSet::new();
    let mut seen_pages: HashSet<PageToken> = HashSet::new();
    let mut token: Option<PageToken> = None;
    let mut pages = 0usize;
    let mut outside = 0usize;

    loop {
        let page = catalog.search(&request, token.as_ref())?;
        pages += 1;
        debug!(page = pages, items = page.items.len(), "received catalog page");

        for item in &page.items {
            for record in TileRecord::from_item(item, query.collection_id) {
                if !intersects_region(&record.geometry, region.geometry()) {
                    outside += 1;
                    continue;
                }
                if !seen_assets.insert((record.item_id.clone(), record.asset_key.clone())) {
                    debug!(item = %record.item_id, asset = %record.asset_key, "dropping duplicate asset");
                    continue;
                }
                records.push(record);
            }
        }

        match page.next {
            Some(next) if !seen_pages.insert(next.clone()) => {
                warn!(token = next.as_str(), "catalog repeated a page token, stopping");
                break;
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }

    info!(
        collection = query.collection_id,
        pages,
        records = records.len(),
        outside_region = outside,
        "built tile index"
    );
    Ok(TileIndex::from_records(query.collection_id, records))
}

fn intersects_region(geometry: &MultiPolygon<f64>, region: &MultiPolygon<f64>) -> bool {
    // Cheap box rejection before the exact test
    match (geometry.bounding_rect(), region.bounding_rect()) {
        (Some(a), Some(b)) if a.intersects(&b) => geometry.intersects(region),
        _ => false,
    }
}
