//! Shared records exchanged between the fetcher, the store, the forecast
//! engine and subscribers.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One observation of one docking station at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub station_id: String,
    pub station_name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Station capacity.
    pub racks: u32,
    /// Bikes currently available.
    pub bikes: u32,
    /// Observation instant, seconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub t: i64,
    pub bikes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub step_minutes: u32,
    pub points: Vec<ForecastPoint>,
}

/// Payload pushed on the forecast stream: one forecast per known station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastBroadcast {
    pub ts: i64,
    pub forecasts: BTreeMap<String, ForecastResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResult {
    pub station_id: String,
    pub station_name: String,
    pub bikes: u32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl From<&Snapshot> for AskResult {
    fn from(s: &Snapshot) -> Self {
        Self {
            station_id: s.station_id.clone(),
            station_name: s.station_name.clone(),
            bikes: s.bikes,
            lat: s.lat,
            lon: s.lon,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub results: Vec<AskResult>,
}

/// Current Unix time in whole seconds.
pub fn now_ts() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(dur) => dur.as_secs() as i64,
        Err(_) => 0,
    }
}
