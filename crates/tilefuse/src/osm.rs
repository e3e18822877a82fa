//! Building footprints from OpenStreetMap through the Overpass API.
//!
//! [`FootprintSource`] is the seam between the building pipelines and the
//! footprint service. [`OverpassClient`] asks Overpass for every way and
//! relation tagged `building=*` inside the region and returns them in LV95.
//! Nodes tagged as buildings have no area and are dropped.

use crate::buildings::BuildingFootprint;
use crate::FootprintError;
use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::thread;
use std::time::Duration;
use tilefuse_raster::{Crs, Region};
use tracing::{debug, info, warn};

/// Public Overpass API endpoint.
pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Default HTTP timeout of one Overpass query. Overpass answers large
/// regions slowly.
pub const DEFAULT_OVERPASS_TIMEOUT: Duration = Duration::from_secs(180);

/// Default number of retries after a failed query.
pub const DEFAULT_OVERPASS_RETRIES: u32 = 2;

/// Supplies building footprints for a region.
pub trait FootprintSource {
    /// Footprints intersecting `region`, in LV95.
    fn footprints(&self, region: &Region) -> Result<Vec<BuildingFootprint>, FootprintError>;
}

/// Overpass QL query for the building ways and relations inside `region`.
///
/// Overpass `poly` filters take a single ring of `lat lon` pairs, so each
/// polygon of the region contributes its exterior ring as one filter.
pub fn overpass_query(region: &Region, timeout: Duration) -> Result<String, FootprintError> {
    let region = region.to_crs(Crs::WGS84)?;
    let mut statements = String::new();
    for polygon in &region.geometry().0 {
        let ring: Vec<String> = polygon
            .exterior()
            .coords()
            .map(|c| format!("{:.7} {:.7}", c.y, c.x))
            .collect();
        let poly = ring.join(" ");
        for element in ["way", "relation"] {
            statements.push_str(&format!("{}[\"building\"](poly:\"{}\");", element, poly));
        }
    }
    Ok(format!("[out:json][timeout:{}];({});out geom;", timeout.as_secs(), statements))
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    #[serde(default)]
    tags: Map<String, Value>,
    #[serde(default)]
    geometry: Vec<LatLon>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<LatLon>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

fn coords(points: &[LatLon]) -> Vec<Coord<f64>> {
    points.iter().map(|p| Coord { x: p.lon, y: p.lat }).collect()
}

fn is_closed(line: &[Coord<f64>]) -> bool {
    line.len() >= 4 && line.first() == line.last()
}

/// Join way segments end to end into closed rings. Segments that cannot be
/// closed are dropped.
fn assemble_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    let mut rings = Vec::new();
    while let Some(mut ring) = segments.pop() {
        while !is_closed(&ring) {
            let Some(&end) = ring.last() else { break };
            let next = segments
                .iter()
                .position(|s| s.first() == Some(&end) || s.last() == Some(&end));
            let Some(index) = next else { break };
            let mut segment = segments.swap_remove(index);
            if segment.first() != Some(&end) {
                segment.reverse();
            }
            ring.extend(segment.into_iter().skip(1));
        }
        if is_closed(&ring) {
            rings.push(LineString::new(ring));
        } else {
            debug!(points = ring.len(), "dropping unclosed ring");
        }
    }
    rings
}

/// Polygons of a multipolygon relation: outer rings with the inner rings
/// they contain as holes.
fn relation_polygons(members: &[Member]) -> Vec<Polygon<f64>> {
    let segments = |role: &str| -> Vec<Vec<Coord<f64>>> {
        members
            .iter()
            .filter(|m| m.kind == "way" && m.geometry.len() >= 2)
            .filter(|m| match role {
                "inner" => m.role == "inner",
                _ => m.role != "inner",
            })
            .map(|m| coords(&m.geometry))
            .collect()
    };

    let mut polygons: Vec<Polygon<f64>> = assemble_rings(segments("outer"))
        .into_iter()
        .map(|ring| Polygon::new(ring, Vec::new()))
        .collect();
    for inner in assemble_rings(segments("inner")) {
        let Some(&start) = inner.0.first() else { continue };
        match polygons.iter_mut().find(|p| p.contains(&Point::from(start))) {
            Some(outer) => outer.interiors_push(inner),
            None => debug!("dropping inner ring outside every outer ring"),
        }
    }
    polygons
}

/// Footprints of an Overpass JSON response, in WGS84.
///
/// Ways become one polygon; `type=multipolygon` relations become the
/// union of their outer rings. Ids follow the `way/123` form and the OSM
/// tags become the footprint properties.
pub fn footprints_from_overpass(text: &str) -> Result<Vec<BuildingFootprint>, serde_json::Error> {
    let response: OverpassResponse = serde_json::from_str(text)?;
    let mut footprints = Vec::new();
    let mut nodes = 0;

    for element in response.elements {
        let polygons = match element.kind.as_str() {
            "way" => {
                let ring = coords(&element.geometry);
                if is_closed(&ring) {
                    vec![Polygon::new(LineString::new(ring), Vec::new())]
                } else {
                    Vec::new()
                }
            }
            "relation" if element.tags.get("type").and_then(Value::as_str) == Some("multipolygon") => {
                relation_polygons(&element.members)
            }
            "node" => {
                nodes += 1;
                continue;
            }
            _ => Vec::new(),
        };
        let id = format!("{}/{}", element.kind, element.id);
        if polygons.is_empty() {
            debug!(footprint = %id, "skipping element without polygon geometry");
            continue;
        }
        footprints.push(BuildingFootprint {
            id,
            geometry: MultiPolygon::new(polygons),
            crs: Crs::WGS84,
            properties: element.tags,
        });
    }
    if nodes > 0 {
        debug!(nodes, "dropped building nodes");
    }
    Ok(footprints)
}

/// Express footprints in `crs`, dropping the ones that cannot be
/// transformed.
pub fn footprints_to_crs(footprints: Vec<BuildingFootprint>, crs: Crs) -> Vec<BuildingFootprint> {
    footprints
        .into_iter()
        .filter_map(|mut footprint| match footprint.geometry_in(crs) {
            Ok(geometry) => {
                footprint.geometry = geometry;
                footprint.crs = crs;
                Some(footprint)
            }
            Err(e) => {
                warn!(footprint = %footprint.id, error = %e, "dropping footprint outside the target CRS");
                None
            }
        })
        .collect()
}

/// HTTP client of an Overpass API.
#[derive(Debug, Clone)]
pub struct OverpassClient {
    /// Interpreter endpoint.
    url: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
    /// Server-side query timeout.
    timeout: Duration,
    /// Retries after the first failed attempt.
    max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    retry_delay: Duration,
}

impl OverpassClient {
    /// Client of the interpreter at `url` with default timeout and retries.
    pub fn new(url: impl Into<String>) -> Result<Self, FootprintError> {
        Self::with_options(url, DEFAULT_OVERPASS_TIMEOUT, DEFAULT_OVERPASS_RETRIES)
    }

    /// Client with an explicit query timeout and retry budget.
    pub fn with_options(url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self, FootprintError> {
        // Leave the server time to report its own timeout
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout + Duration::from_secs(30))
            .user_agent(concat!("tilefuse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            timeout,
            max_retries,
            retry_delay: Duration::from_secs(2),
        })
    }

    /// Override the initial retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Interpreter endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `query` and return the response body, retrying transport
    /// errors, HTTP 429, 504 and other 5xx with exponential backoff.
    fn post(&self, query: &str) -> Result<String, FootprintError> {
        let mut last_failure = String::new();
        let attempts = self.max_retries + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.saturating_pow(attempt - 1);
                warn!(url = %self.url, attempt, reason = %last_failure, "retrying Overpass query in {:?}", delay);
                thread::sleep(delay);
            }

            let response = match self.client.post(&self.url).form(&[("data", query)]).send() {
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
                return Err(FootprintError::InvalidResponse {
                    url: self.url.clone(),
                    reason: format!("HTTP {}", status),
                });
            }
            match response.text() {
                Ok(body) => return Ok(body),
                Err(e) => last_failure = e.to_string(),
            }
        }

        Err(FootprintError::Unavailable {
            url: self.url.clone(),
            attempts,
            reason: last_failure,
        })
    }
}

impl FootprintSource for OverpassClient {
    fn footprints(&self, region: &Region) -> Result<Vec<BuildingFootprint>, FootprintError> {
        let query = overpass_query(region, self.timeout)?;
        debug!(url = %self.url, query = %query, "querying building footprints");
        let body = self.post(&query)?;
        let footprints = footprints_from_overpass(&body).map_err(|e| FootprintError::InvalidResponse {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        let footprints = footprints_to_crs(footprints, Crs::LV95);
        info!(footprints = footprints.len(), "retrieved building footprints from OpenStreetMap");
        Ok(footprints)
    }
}
