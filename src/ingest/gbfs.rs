//! GBFS client: joins station_information with station_status, keeps the
//! stations that belong to the configured region.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{fold_text, FeedSource, IngestError};
use crate::config::FeedConfig;
use crate::model::{now_ts, Snapshot};

// ---------------------------------------------------------------------------
// Serde structures
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct StationList {
    stations: Vec<RawStation>,
}

#[derive(Deserialize)]
struct RegionList {
    regions: Vec<RawRegion>,
}

/// Union of the station_information and station_status fields we read.
/// Everything is loose `Value`: feeds disagree on types.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStation {
    pub station_id: Value,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub station_name: Option<Value>,
    #[serde(default)]
    pub lat: Option<Value>,
    #[serde(default)]
    pub lon: Option<Value>,
    #[serde(default)]
    pub capacity: Option<Value>,
    #[serde(default)]
    pub region_id: Option<Value>,
    #[serde(default)]
    pub num_bikes_available: Option<Value>,
}

#[derive(Deserialize)]
struct RawRegion {
    region_id: Value,
    #[serde(default)]
    name: Option<Value>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a station_information or station_status document.
pub fn parse_stations(json: &str, what: &'static str) -> Result<Vec<RawStation>, IngestError> {
    let env: Envelope<StationList> =
        serde_json::from_str(json).map_err(|source| IngestError::Parse { what, source })?;
    Ok(env.data.stations)
}

/// Parse system_regions into `region_id → name`.
pub fn parse_regions(json: &str) -> Result<HashMap<String, String>, IngestError> {
    let env: Envelope<RegionList> = serde_json::from_str(json).map_err(|source| {
        IngestError::Parse {
            what: "system_regions",
            source,
        }
    })?;
    Ok(env
        .data
        .regions
        .into_iter()
        .filter_map(|r| {
            let id = value_to_id(&r.region_id)?;
            let name = r.name.as_ref().and_then(value_to_text).unwrap_or_default();
            Some((id, name))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Join info and status records into snapshots stamped with `ts`, keeping a
/// station when its region name or its own name contains `target_region`
/// (folded comparison).
///
/// Stations without a status record are dropped. A station listed twice in
/// the info feed keeps its first position and its last contents.
pub fn normalize_feed(
    info: Vec<RawStation>,
    status: Vec<RawStation>,
    region_names: &HashMap<String, String>,
    target_region: &str,
    ts: i64,
) -> Vec<Snapshot> {
    let status_by_id: HashMap<String, RawStation> = status
        .into_iter()
        .filter_map(|s| value_to_id(&s.station_id).map(|id| (id, s)))
        .collect();
    let want = fold_text(target_region);

    let mut rows: Vec<Snapshot> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for meta in info {
        let Some(sid) = value_to_id(&meta.station_id) else {
            continue;
        };
        let Some(st) = status_by_id.get(&sid) else {
            continue;
        };

        let region_id = meta
            .region_id
            .as_ref()
            .and_then(value_to_id)
            .or_else(|| st.region_id.as_ref().and_then(value_to_id))
            .unwrap_or_default();
        let region_ok = !region_id.is_empty()
            && region_names
                .get(&region_id)
                .map(|name| fold_text(name).contains(&want))
                .unwrap_or(false);

        let name = meta
            .name
            .as_ref()
            .and_then(value_to_text)
            .or_else(|| meta.station_name.as_ref().and_then(value_to_text))
            .unwrap_or_else(|| format!("Station {}", sid));
        let name_ok = fold_text(&name).contains(&want);

        if !(region_ok || name_ok) {
            continue;
        }

        let row = Snapshot {
            station_id: sid.clone(),
            station_name: name,
            lat: meta.lat.as_ref().and_then(value_to_f64),
            lon: meta.lon.as_ref().and_then(value_to_f64),
            racks: meta.capacity.as_ref().map(value_to_count).unwrap_or(0),
            bikes: st.num_bikes_available.as_ref().map(value_to_count).unwrap_or(0),
            timestamp: ts,
        };
        match position.get(&sid) {
            Some(&i) => rows[i] = row,
            None => {
                position.insert(sid, rows.len());
                rows.push(row);
            }
        }
    }

    rows
}

fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Plain string, or the first entry of a GBFS 3 localized-string array.
fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.get("text").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Coordinates: absent, null, blank or non-numeric all mean `None`.
fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Counts: anything that is not a non-negative number reads as 0.
fn value_to_count(v: &Value) -> u32 {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && n > 0.0 => n.min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GbfsFetcher {
    client: reqwest::Client,
    feed: FeedConfig,
}

impl GbfsFetcher {
    /// Build a fetcher whose every request is bounded by `feed.fetch_timeout`.
    pub fn new(feed: FeedConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(feed.fetch_timeout)
            .user_agent(concat!("dockpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, feed })
    }

    async fn get_text(&self, url: &str) -> Result<String, IngestError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }

    async fn fetch_regions(&self) -> HashMap<String, String> {
        let Some(url) = self.feed.regions_url.as_deref() else {
            return HashMap::new();
        };
        let result = match self.get_text(url).await {
            Ok(body) => parse_regions(&body),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(error = %e, "Regions fetch failed; filtering by station name only");
            HashMap::new()
        })
    }

    /// One GBFS round: info, status, optional regions.
    pub async fn fetch_gbfs(&self, info_url: &str, status_url: &str) -> Result<Vec<Snapshot>, IngestError> {
        let info = parse_stations(&self.get_text(info_url).await?, "station_information")?;
        let status = parse_stations(&self.get_text(status_url).await?, "station_status")?;
        let ts = now_ts();
        let regions = self.fetch_regions().await;

        let rows = normalize_feed(info, status, &regions, &self.feed.region_name, ts);
        info!(
            rows = rows.len(),
            region = %self.feed.region_name,
            "GBFS feed parsed"
        );
        Ok(rows)
    }
}

#[async_trait]
impl FeedSource for GbfsFetcher {
    async fn fetch_live(&self) -> Vec<Snapshot> {
        let (Some(info_url), Some(status_url)) = (
            self.feed.station_info_url.as_deref(),
            self.feed.station_status_url.as_deref(),
        ) else {
            debug!("GBFS endpoints not configured; no feed to fetch");
            return Vec::new();
        };

        match self.fetch_gbfs(info_url, status_url).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "GBFS fetch failed; no update this cycle");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;

    fn normalized(regions: &HashMap<String, String>) -> Vec<Snapshot> {
        let info = parse_stations(fixture_station_information_json(), "info").unwrap();
        let status = parse_stations(fixture_station_status_json(), "status").unwrap();
        normalize_feed(info, status, regions, "Wroclaw", 1_757_518_741)
    }

    fn find<'a>(rows: &'a [Snapshot], id: &str) -> &'a Snapshot {
        rows.iter()
            .find(|r| r.station_id == id)
            .unwrap_or_else(|| panic!("station {} should be present", id))
    }

    #[test]
    fn region_or_name_match_is_kept() {
        let regions = parse_regions(fixture_system_regions_json()).unwrap();
        let rows = normalized(&regions);
        let ids: Vec<&str> = rows.iter().map(|r| r.station_id.as_str()).collect();
        assert_eq!(ids, vec!["100", "101", "102"]);
    }

    #[test]
    fn without_regions_name_match_still_applies() {
        let rows = normalized(&HashMap::new());
        let ids: Vec<&str> = rows.iter().map(|r| r.station_id.as_str()).collect();
        // 100 only matched through its region
        assert_eq!(ids, vec!["101", "102"]);
    }

    #[test]
    fn all_rows_share_fetch_timestamp() {
        let rows = normalized(&HashMap::new());
        assert!(rows.iter().all(|r| r.timestamp == 1_757_518_741));
    }

    #[test]
    fn numeric_fields_default_and_coordinates_stay_absent() {
        let regions = parse_regions(fixture_system_regions_json()).unwrap();
        let rows = normalized(&regions);

        let grunwaldzki = find(&rows, "100");
        assert_eq!(grunwaldzki.racks, 15);
        assert_eq!(grunwaldzki.bikes, 4);
        assert_eq!(grunwaldzki.lat, Some(51.1117));

        let stadion = find(&rows, "101");
        assert_eq!(stadion.racks, 0, "non-numeric capacity reads as 0");
        assert_eq!(stadion.lat, Some(51.13673), "numeric strings are parsed");
        assert_eq!(stadion.bikes, 7);

        let rynek = find(&rows, "102");
        assert_eq!(rynek.station_name, "WROCLAW Rynek");
        assert_eq!(rynek.racks, 20);
        assert_eq!(rynek.bikes, 0, "missing bikes read as 0");
        assert_eq!(rynek.lat, None, "empty string is not 0.0");
        assert_eq!(rynek.lon, None);
    }

    #[test]
    fn localized_names_are_read() {
        let info = parse_stations(fixture_localized_names_json(), "info").unwrap();
        let status = vec![RawStation {
            station_id: Value::from("200"),
            name: None,
            station_name: None,
            lat: None,
            lon: None,
            capacity: None,
            region_id: None,
            num_bikes_available: Some(Value::from(12)),
        }];
        let rows = normalize_feed(info, status, &HashMap::new(), "Wrocław", 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].station_name, "Wrocław Dworzec Główny");
        assert_eq!(rows[0].bikes, 12);
    }

    #[test]
    fn missing_name_gets_placeholder() {
        let info = vec![RawStation {
            station_id: Value::from(7),
            name: None,
            station_name: None,
            lat: None,
            lon: None,
            capacity: None,
            region_id: Some(Value::from("1")),
            num_bikes_available: None,
        }];
        let status = vec![RawStation {
            num_bikes_available: Some(Value::from("3")),
            ..info[0].clone()
        }];
        let regions: HashMap<String, String> =
            [("1".to_string(), "Wrocław".to_string())].into_iter().collect();
        let rows = normalize_feed(info, status, &regions, "wroclaw", 1);
        assert_eq!(rows[0].station_name, "Station 7");
        assert_eq!(rows[0].bikes, 3);
    }

    #[test]
    fn counts_reject_negative_and_garbage() {
        assert_eq!(value_to_count(&Value::from(-3)), 0);
        assert_eq!(value_to_count(&Value::from("x")), 0);
        assert_eq!(value_to_count(&Value::Null), 0);
        assert_eq!(value_to_count(&Value::from(12.0)), 12);
    }

    #[test]
    fn malformed_payload_is_parse_error() {
        let result = parse_stations("{ not json", "station_information");
        assert!(matches!(result, Err(IngestError::Parse { .. })));

        let result = parse_stations(r#"{ "data": {} }"#, "station_status");
        assert!(matches!(result, Err(IngestError::Parse { .. })));
    }

    #[tokio::test]
    async fn unconfigured_source_yields_nothing() {
        let fetcher = GbfsFetcher::new(crate::config::Config::default().feed).unwrap();
        assert!(fetcher.fetch_live().await.is_empty());
    }
}
