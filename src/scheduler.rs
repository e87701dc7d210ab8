//! Periodic cycles: the refresh producer and the per-subscriber broadcasts.
//!
//! ```text
//! refresh    fetch -> Store::update -> Store::persist -> sleep   (one task)
//! live       Store::live_snapshots -> send -> sleep              (per subscriber)
//! forecast   Store::histories -> make_forecast -> send -> sleep  (per subscriber)
//! ```
//!
//! Errors never leave a cycle: they are logged at the cycle boundary and the
//! loop carries on. Broadcasts stop when their subscriber goes away; the
//! refresh loop stops only on the shutdown signal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::forecast::{make_forecast, ForecastParams};
use crate::ingest::FeedSource;
use crate::model::{now_ts, ForecastBroadcast, Snapshot};
use crate::storage::Store;

// ---------------------------------------------------------------------------
// Refresh cycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub fetched: usize,
    pub persisted_stations: usize,
}

/// One fetch → update → persist pass. An empty fetch leaves the store as it
/// was; persistence still runs so rows from an earlier failed write get
/// another chance.
pub async fn refresh_once(store: &Store, source: &dyn FeedSource) -> RefreshReport {
    let rows = source.fetch_live().await;
    let fetched = rows.len();
    if fetched == 0 {
        debug!("Fetch returned no rows; store unchanged this cycle");
    } else {
        store.update(rows).await;
    }

    let persisted_stations = match store.persist().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Persist failed; rows kept in memory for the next cycle");
            0
        }
    };

    RefreshReport {
        fetched,
        persisted_stations,
    }
}

/// Run [`refresh_once`] every `interval` until `shutdown` fires.
pub async fn run_refresh_loop(
    store: Arc<Store>,
    source: Arc<dyn FeedSource>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(interval_secs = interval.as_secs(), "Refresh loop started");
    loop {
        let started = Instant::now();
        let report = refresh_once(&store, source.as_ref()).await;
        info!(
            fetched = report.fetched,
            persisted_stations = report.persisted_stations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh cycle complete"
        );

        let pause = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Refresh loop stopping");
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("subscriber disconnected")]
pub struct SubscriberGone;

/// Receiving end of a broadcast cycle.
#[async_trait]
pub trait Subscriber: Send {
    async fn send(&mut self, payload: String) -> Result<(), SubscriberGone>;
}

/// In-process subscriber backed by a bounded channel.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<String>,
}

impl ChannelSubscriber {
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send(&mut self, payload: String) -> Result<(), SubscriberGone> {
        self.tx.send(payload).await.map_err(|_| SubscriberGone)
    }
}

// ---------------------------------------------------------------------------
// Broadcast cycles
// ---------------------------------------------------------------------------

/// Forecast for every station with history.
pub fn build_forecast_broadcast(
    histories: &[(String, Vec<Snapshot>)],
    params: &ForecastParams,
    ts: i64,
) -> ForecastBroadcast {
    let forecasts: BTreeMap<_, _> = histories
        .iter()
        .map(|(id, rows)| (id.clone(), make_forecast(rows, params)))
        .collect();
    ForecastBroadcast { ts, forecasts }
}

/// Push the live table to `sub` every `interval` until it disconnects.
pub async fn run_live_broadcast<S: Subscriber>(store: Arc<Store>, mut sub: S, interval: Duration) {
    loop {
        let live = store.live_snapshots().await;
        let payload = match serde_json::to_string(&live) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Failed to encode live payload");
                break;
            }
        };
        if sub.send(payload).await.is_err() {
            debug!("Live subscriber gone");
            break;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Push forecasts for all stations to `sub` every `interval` until it
/// disconnects.
pub async fn run_forecast_broadcast<S: Subscriber>(
    store: Arc<Store>,
    mut sub: S,
    interval: Duration,
    params: ForecastParams,
) {
    loop {
        let histories = store.histories().await;
        let msg = build_forecast_broadcast(&histories, &params, now_ts());
        let payload = match serde_json::to_string(&msg) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Failed to encode forecast payload");
                break;
            }
        };
        if sub.send(payload).await.is_err() {
            debug!("Forecast subscriber gone");
            break;
        }
        tokio::time::sleep(interval).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
