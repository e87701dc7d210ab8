//! Runtime configuration, read from the environment (and `.env` when present).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::search::MatcherKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// GBFS endpoints and the region filter applied during ingest.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub station_info_url: Option<String>,
    pub station_status_url: Option<String>,
    pub regions_url: Option<String>,
    pub region_name: String,
    /// CKAN datastore fallback; recorded but never fetched from.
    pub ckan_api: Option<String>,
    pub datastore_resource_id: Option<String>,
    pub fetch_timeout: Duration,
}

impl FeedConfig {
    /// Both GBFS endpoints are needed for the primary source.
    pub fn gbfs_configured(&self) -> bool {
        self.station_info_url.is_some() && self.station_status_url.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    pub refresh_interval: Duration,
    pub live_push_interval: Duration,
    pub forecast_push_interval: Duration,
    pub matcher: MatcherKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig {
                station_info_url: None,
                station_status_url: None,
                regions_url: None,
                region_name: "Wroclaw".to_string(),
                ckan_api: None,
                datastore_resource_id: None,
                fetch_timeout: Duration::from_secs(20),
            },
            data_dir: PathBuf::from("data"),
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            refresh_interval: Duration::from_secs(60),
            live_push_interval: Duration::from_secs(30),
            forecast_push_interval: Duration::from_secs(60),
            matcher: MatcherKind::Lexical,
        }
    }
}

impl Config {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset and blank values fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Config::default();

        cfg.feed.station_info_url = get("GBFS_STATION_INFO_URL");
        cfg.feed.station_status_url = get("GBFS_STATION_STATUS_URL");
        cfg.feed.regions_url = get("GBFS_REGIONS_URL");
        if let Some(region) = get("WRM_REGION_NAME") {
            cfg.feed.region_name = region;
        }
        cfg.feed.ckan_api = get("WRM_CKAN_API");
        cfg.feed.datastore_resource_id = get("WRM_DATASTORE_RESOURCE_ID");

        if let Some(dir) = get("DOCKPULSE_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(bind) = get("DOCKPULSE_BIND") {
            cfg.bind = bind.parse().map_err(|_| ConfigError::Invalid {
                key: "DOCKPULSE_BIND",
                value: bind.clone(),
                reason: "expected host:port",
            })?;
        }
        if let Some(v) = get("DOCKPULSE_REFRESH_SECS") {
            cfg.refresh_interval = parse_secs("DOCKPULSE_REFRESH_SECS", v)?;
        }
        if let Some(v) = get("DOCKPULSE_LIVE_PUSH_SECS") {
            cfg.live_push_interval = parse_secs("DOCKPULSE_LIVE_PUSH_SECS", v)?;
        }
        if let Some(v) = get("DOCKPULSE_FORECAST_PUSH_SECS") {
            cfg.forecast_push_interval = parse_secs("DOCKPULSE_FORECAST_PUSH_SECS", v)?;
        }
        if let Some(v) = get("DOCKPULSE_FETCH_TIMEOUT_SECS") {
            cfg.feed.fetch_timeout = parse_secs("DOCKPULSE_FETCH_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = get("DOCKPULSE_SEARCH") {
            cfg.matcher = match v.to_lowercase().as_str() {
                "lexical" => MatcherKind::Lexical,
                "tfidf" => MatcherKind::Tfidf,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DOCKPULSE_SEARCH",
                        value: v,
                        reason: "expected lexical or tfidf",
                    })
                }
            };
        }

        Ok(cfg)
    }

    pub fn log_summary(&self) {
        info!(
            gbfs = self.feed.gbfs_configured(),
            regions = self.feed.regions_url.is_some(),
            region = %self.feed.region_name,
            data_dir = %self.data_dir.display(),
            bind = %self.bind,
            refresh_secs = self.refresh_interval.as_secs(),
            "Loaded configuration"
        );
        if self.feed.ckan_api.is_some() || self.feed.datastore_resource_id.is_some() {
            info!(
                ckan_api = ?self.feed.ckan_api,
                resource_id = ?self.feed.datastore_resource_id,
                "Alternate CKAN source configured; only GBFS is fetched"
            );
        }
    }
}

fn parse_secs(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be greater than zero",
        }),
        Ok(n) => Ok(Duration::from_secs(n)),
        Err(_) => Err(ConfigError::Invalid {
            key,
            value,
            reason: "expected whole seconds",
        }),
    }
}
