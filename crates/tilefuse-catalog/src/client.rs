//! Paged item search against a STAC API.
//!
//! [`CatalogSearch`] is the seam between the index builder and the remote
//! catalog. [`StacClient`] implements it over HTTP with a bounded retry
//! budget; tests substitute in-memory catalogs.

use crate::stac::{StacItem, StacSearchResult};
use crate::{CatalogError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default HTTP timeout for a single catalog request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of retries after a failed request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A closed or half-open acquisition time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    /// Inclusive start, open when `None`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive end, open when `None`.
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Interval between two instants.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Whether `instant` falls inside the interval.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| instant >= s) && self.end.map_or(true, |e| instant <= e)
    }
}

impl fmt::Display for DateRange {
    /// STAC `datetime` parameter syntax: `start/end` with `..` for open ends.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |d: Option<DateTime<Utc>>| match d {
            Some(d) => d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            None => "..".to_string(),
        };
        if self.start.is_some() && self.start == self.end {
            return write!(f, "{}", side(self.start));
        }
        write!(f, "{}/{}", side(self.start), side(self.end))
    }
}

impl FromStr for DateRange {
    type Err = CatalogError;

    /// Accepts `2019`, `2019-06-01`, an RFC 3339 instant, or two of those
    /// separated by `/` with `..` for an open end. A bare year or date
    /// covers the whole year or day.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('/') {
            Some((start, end)) => Ok(Self {
                start: parse_bound(start, false)?,
                end: parse_bound(end, true)?,
            }),
            None => {
                let start = parse_bound(s, false)?;
                let end = parse_bound(s, true)?;
                if start.is_none() {
                    return Err(CatalogError::InvalidRequest(format!("empty datetime '{}'", s)));
                }
                Ok(Self { start, end })
            }
        }
    }
}

fn parse_bound(s: &str, end: bool) -> Result<Option<DateTime<Utc>>> {
    let s = s.trim();
    if s.is_empty() || s == ".." {
        return Ok(None);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(instant.with_timezone(&Utc)));
    }
    let time = if end {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    let date = if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Some(date)
    } else if let Ok(year) = s.parse::<i32>() {
        if end {
            NaiveDate::from_ymd_opt(year, 12, 31)
        } else {
            NaiveDate::from_ymd_opt(year, 1, 1)
        }
    } else {
        None
    };
    match (date, time) {
        (Some(date), Some(time)) => Ok(Some(date.and_time(time).and_utc())),
        _ => Err(CatalogError::InvalidRequest(format!("unparseable datetime '{}'", s))),
    }
}

/// Parameters of one item search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Collections to search.
    pub collections: Vec<String>,
    /// WGS84 `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Acquisition time filter.
    pub datetime: Option<DateRange>,
    /// Items per page.
    pub limit: usize,
}

/// Opaque continuation of a paged search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    /// Wrap a continuation value (for the HTTP client, the next-page URL).
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw continuation value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Items on this page.
    pub items: Vec<StacItem>,
    /// Token of the next page; `None` on the last page.
    pub next: Option<PageToken>,
}

/// A paged, filterable item search.
pub trait CatalogSearch {
    /// Fetch the first page (`page == None`) or the page `page` points to.
    fn search(&self, request: &SearchRequest, page: Option<&PageToken>) -> Result<SearchPage>;
}

/// HTTP client of a STAC API.
#[derive(Debug, Clone)]
pub struct StacClient {
    /// API root, without trailing slash.
    base_url: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
    /// Retries after the first failed attempt.
    max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    retry_delay: Duration,
}

impl StacClient {
    /// Client of the API rooted at `base_url` with default timeout and
    /// retry budget.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES)
    }

    /// Client with an explicit request timeout and retry budget.
    pub fn with_options(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tilefuse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            max_retries,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Override the initial retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// API root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn first_page_url(&self, request: &SearchRequest) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/search", self.base_url))
            .map_err(|e| CatalogError::InvalidRequest(format!("bad catalog URL {}: {}", self.base_url, e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("collections", &request.collections.join(","));
            let [w, s, e, n] = request.bbox;
            query.append_pair("bbox", &format!("{},{},{},{}", w, s, e, n));
            if let Some(range) = &request.datetime {
                query.append_pair("datetime", &range.to_string());
            }
            query.append_pair("limit", &request.limit.to_string());
        }
        Ok(url)
    }

    /// GET `url` and decode it as a search page, retrying transport errors,
    /// HTTP 429 and 5xx with exponential backoff.
    fn get_page(&self, url: &str) -> Result<StacSearchResult> {
        let mut last_failure = String::new();
        let attempts = self.max_retries + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.saturating_pow(attempt - 1);
                warn!(url, attempt, reason = %last_failure, "retrying catalog request in {:?}", delay);
                thread::sleep(delay);
            }

            let response = match self.client.get(url).send() {
                Ok(response) => response,
                Err(e) => {
                    last_failure = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_failure = format!("HTTP {}", status);
                continue;
            }
            if !status.is_success() {
                return Err(CatalogError::InvalidResponse {
                    url: url.to_string(),
                    reason: format!("HTTP {}", status),
                });
            }

            let body = match response.text() {
                Ok(body) => body,
                Err(e) => {
                    last_failure = e.to_string();
                    continue;
                }
            };
            return serde_json::from_str(&body).map_err(|e| CatalogError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        Err(CatalogError::Unavailable {
            url: url.to_string(),
            attempts,
            reason: last_failure,
        })
    }
}

impl CatalogSearch for StacClient {
    fn search(&self, request: &SearchRequest, page: Option<&PageToken>) -> Result<SearchPage> {
        let url = match page {
            Some(token) => token.as_str().to_string(),
            None => self.first_page_url(request)?.to_string(),
        };
        debug!(url = %url, "requesting catalog page");

        let result = self.get_page(&url)?;
        let next = result.next_href().map(PageToken::new);
        Ok(SearchPage {
            items: decode_items(result.features),
            next,
        })
    }
}

/// Decode raw features, dropping the ones that are not STAC items.
pub fn decode_items(features: Vec<serde_json::Value>) -> Vec<StacItem> {
    features
        .into_iter()
        .filter_map(|feature| match serde_json::from_value::<StacItem>(feature) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(error = %e, "dropping undecodable catalog item");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_year_range() {
        let range: DateRange = "2019".parse().unwrap();
        assert_eq!(range.start, Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2019, 12, 31, 23, 59, 59).unwrap()));
        assert_eq!(range.to_string(), "2019-01-01T00:00:00Z/2019-12-31T23:59:59Z");
    }

    #[test]
    fn test_open_range() {
        let range: DateRange = "2020-06-01/..".parse().unwrap();
        assert!(range.end.is_none());
        assert_eq!(range.to_string(), "2020-06-01T00:00:00Z/..");
        assert!(range.contains(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_instant_range() {
        let range: DateRange = "2021-03-04T05:06:07Z".parse().unwrap();
        assert_eq!(range.start, range.end);
        assert_eq!(range.to_string(), "2021-03-04T05:06:07Z");
    }

    #[test]
    fn test_invalid_range() {
        assert!("yesterday".parse::<DateRange>().is_err());
        assert!("..".parse::<DateRange>().is_err());
    }

    #[test]
    fn test_first_page_url() {
        let client = StacClient::new("https://example.org/api/stac/v0.9/").unwrap();
        let request = SearchRequest {
            collections: vec!["ch.swisstopo.swissalti3d".to_string()],
            bbox: [6.5, 46.5, 6.6, 46.6],
            datetime: None,
            limit: 50,
        };
        let url = client.first_page_url(&request).unwrap();
        assert_eq!(url.path(), "/api/stac/v0.9/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("bbox".to_string(), "6.5,46.5,6.6,46.6".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "50".to_string())));
    }

    #[test]
    fn test_decode_items_drops_garbage() {
        let items = decode_items(vec![
            serde_json::json!({"id": "a_1"}),
            serde_json::json!({"no_id": true}),
            serde_json::json!(42),
        ]);
        assert_eq!(items.len(), 1);
    }
}
