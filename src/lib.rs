use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub mod api;
pub mod config;
pub mod forecast;
pub mod ingest;
pub mod model;
pub mod scheduler;
pub mod search;
pub mod storage;

use config::Config;
use ingest::{FeedSource, GbfsFetcher};
use search::TextMatcher;
use storage::Store;

/// How long shutdown waits for the HTTP server to drain.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AppState {
    pub store: Arc<Store>,
    pub config: Config,
    pub matcher: Box<dyn TextMatcher>,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: Config) -> Self {
        let matcher = config.matcher.build();
        Self {
            store,
            config,
            matcher,
        }
    }
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let store = Store::open(config.data_dir.clone())
        .with_context(|| format!("cannot open data directory {}", config.data_dir.display()))?;
    let store = Arc::new(store);

    // unreadable history is not fatal; new rows still get persisted
    if let Err(e) = store.load().await {
        warn!(error = %e, "Could not load history; starting from memory only");
    }

    let source: Arc<dyn FeedSource> =
        Arc::new(GbfsFetcher::new(config.feed.clone()).context("cannot build HTTP client")?);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("cannot bind {}", config.bind))?;

    let refresh_interval = config.refresh_interval;
    let state = Arc::new(AppState::new(store.clone(), config));

    // broadcast channel for shutdown signaling
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let refresh = tokio::spawn(scheduler::run_refresh_loop(
        store.clone(),
        source,
        refresh_interval,
        shutdown_tx.subscribe(),
    ));
    let http = tokio::spawn(api::http::run(listener, state, shutdown_tx.subscribe()));

    // wait for CTRL-C then signal shutdown
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());

    if let Err(e) = refresh.await {
        error!(error = %e, "Refresh task ended abnormally");
    }
    if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, http).await.is_err() {
        warn!("HTTP server did not drain in time");
    }

    match store.persist().await {
        Ok(files) => info!(files, "Final persist complete"),
        Err(e) => error!(error = %e, "Final persist failed; unsaved rows lost"),
    }
    Ok(())
}
