use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::{SplitSink, Stream, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::Receiver as BroadcastReceiver;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::forecast::{make_forecast, ForecastParams};
use crate::model::{AskResponse, ForecastResponse, Snapshot};
use crate::scheduler::{run_forecast_broadcast, run_live_broadcast, Subscriber, SubscriberGone};
use crate::search;
use crate::AppState;

const MAX_K: usize = 20;

/// Rejected request, rendered as `400 {"error": ...}`.
#[derive(Debug)]
pub struct BadRequest(String);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.0 }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub station_id: Option<String>,
    pub step_minutes: Option<String>,
    pub horizon_minutes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AskQuery {
    pub q: Option<String>,
    pub k: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stations", get(stations_handler))
        .route("/forecast", get(forecast_handler))
        .route("/ask", get(ask_handler))
        .route("/ws", get(ws_live_handler))
        .route("/ws/forecast", get(ws_forecast_handler))
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` fires. The listener is bound by the caller so that
/// a bind failure surfaces before any task is spawned.
pub async fn run(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: BroadcastReceiver<()>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    let graceful = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    });
    if let Err(e) = graceful.await {
        error!(error = %e, "HTTP server error");
    }
    info!("HTTP server stopped");
}

fn parse_u32(name: &str, raw: Option<&str>, default: u32) -> Result<u32, BadRequest> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| BadRequest(format!("{} must be a non-negative integer", name))),
    }
}

async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.store.stats().await;
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "stations": stats.live_stations,
        "history_rows": stats.history_rows,
    }))
}

async fn stations_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Vec<Snapshot>> {
    Json(state.store.live_snapshots().await)
}

async fn forecast_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<ForecastResponse>, BadRequest> {
    let station_id = match query.station_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(BadRequest("station_id is required".to_string())),
    };
    let step = parse_u32("step_minutes", query.step_minutes.as_deref(), 10)?;
    let horizon = parse_u32("horizon_minutes", query.horizon_minutes.as_deref(), 60)?;
    let params = ForecastParams::new(step, horizon).map_err(|e| BadRequest(e.to_string()))?;

    let history = state.store.history(&station_id).await;
    debug!(station_id = %station_id, rows = history.len(), "Forecast requested");
    Ok(Json(make_forecast(&history, &params)))
}

async fn ask_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<AskQuery>,
) -> Result<Json<AskResponse>, BadRequest> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    if q.chars().count() < 2 {
        return Err(BadRequest("q must be at least 2 characters".to_string()));
    }
    let k = parse_u32("k", query.k.as_deref(), 5)? as usize;
    if !(1..=MAX_K).contains(&k) {
        return Err(BadRequest(format!("k must be between 1 and {}", MAX_K)));
    }

    let live = state.store.live_snapshots().await;
    Ok(Json(search::ask(state.matcher.as_ref(), &live, q, k)))
}

/// Write half of a WebSocket connection as a broadcast subscriber.
struct WsSubscriber(SplitSink<WebSocket, Message>);

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send(&mut self, payload: String) -> Result<(), SubscriberGone> {
        self.0
            .send(Message::Text(payload))
            .await
            .map_err(|_| SubscriberGone)
    }
}

/// Drain incoming frames until the client closes or the stream ends.
/// Reading is what lets the socket answer pings.
async fn until_closed<S, E>(mut incoming: S)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(Ok(msg)) = incoming.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }
}

/// Run `broadcast` until it ends on its own or the client goes away.
async fn serve_subscriber<B, S, E>(broadcast: B, incoming: S)
where
    B: Future<Output = ()>,
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    tokio::select! {
        _ = broadcast => {}
        _ = until_closed(incoming) => debug!("Client closed the socket"),
    }
}

async fn ws_live_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        debug!("Live subscriber connected");
        let (sink, incoming) = socket.split();
        let interval = state.config.live_push_interval;
        let broadcast = run_live_broadcast(state.store.clone(), WsSubscriber(sink), interval);
        serve_subscriber(broadcast, incoming).await;
        debug!("Live subscriber disconnected");
    })
}

async fn ws_forecast_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        debug!("Forecast subscriber connected");
        let (sink, incoming) = socket.split();
        let interval = state.config.forecast_push_interval;
        let broadcast = run_forecast_broadcast(
            state.store.clone(),
            WsSubscriber(sink),
            interval,
            ForecastParams::default(),
        );
        serve_subscriber(broadcast, incoming).await;
        debug!("Forecast subscriber disconnected");
    })
}
