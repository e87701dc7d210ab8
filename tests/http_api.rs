//! HTTP endpoints over a seeded store.

use std::net::SocketAddr;
use std::sync::Arc;

use dockpulse::api::http::router;
use dockpulse::config::Config;
use dockpulse::model::{AskResponse, ForecastResponse, Snapshot};
use dockpulse::storage::Store;
use dockpulse::AppState;
use serde_json::Value;
use tokio::net::TcpListener;

fn snap(id: &str, name: &str, ts: i64, bikes: u32) -> Snapshot {
    Snapshot {
        station_id: id.into(),
        station_name: name.into(),
        lat: Some(51.1),
        lon: None,
        racks: 12,
        bikes,
        timestamp: ts,
    }
}

async fn start(tmp: &tempfile::TempDir) -> SocketAddr {
    let store = Arc::new(Store::open(tmp.path().to_path_buf()).unwrap());
    store
        .update(vec![
            snap("1", "Dworzec Główny", 1000, 3),
            snap("2", "Plac Grunwaldzki", 1000, 7),
            snap("3", "Dworzec Nadodrze", 1000, 1),
        ])
        .await;
    store.update(vec![snap("1", "Dworzec Główny", 1600, 5)]).await;

    let state = Arc::new(AppState::new(store, Config::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

async fn get(addr: SocketAddr, path: &str) -> reqwest::Response {
    reqwest::get(format!("http://{}{}", addr, path)).await.unwrap()
}

#[tokio::test]
async fn health_reports_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = start(&tmp).await;

    let body: Value = get(addr, "/health").await.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "dockpulse");
    assert_eq!(body["stations"], 3);
    assert_eq!(body["history_rows"], 4);
}

#[tokio::test]
async fn stations_lists_live_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = start(&tmp).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/stations", addr))
        .header("Origin", "http://example.org")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let live: Vec<Snapshot> = resp.json().await.unwrap();
    assert_eq!(live.len(), 3);
    assert_eq!(live[0].bikes, 5);
    assert_eq!(live[0].lon, None);
}

#[tokio::test]
async fn forecast_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = start(&tmp).await;

    let fc: ForecastResponse = get(addr, "/forecast?station_id=1").await.json().await.unwrap();
    assert_eq!(fc.step_minutes, 10);
    assert_eq!(fc.points.len(), 6);
    assert!(fc.points.iter().all(|p| p.bikes == 4.0));
    assert_eq!(fc.points[5].t, 1600 + 3600);

    let fc: ForecastResponse = get(addr, "/forecast?station_id=1&step_minutes=30&horizon_minutes=90")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fc.points.len(), 3);
    assert_eq!(fc.points[0].t, 1600 + 1800);

    let unknown: ForecastResponse = get(addr, "/forecast?station_id=nope").await.json().await.unwrap();
    assert!(unknown.points.is_empty());

    for bad in [
        "/forecast",
        "/forecast?station_id=1&step_minutes=0",
        "/forecast?station_id=1&step_minutes=7",
        "/forecast?station_id=1&step_minutes=abc",
        "/forecast?station_id=1&horizon_minutes=5",
    ] {
        let resp = get(addr, bad).await;
        assert_eq!(resp.status(), 400, "{}", bad);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string(), "{}", bad);
    }
}

#[tokio::test]
async fn ask_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = start(&tmp).await;

    let resp: AskResponse = get(addr, "/ask?q=dworzec&k=2").await.json().await.unwrap();
    assert_eq!(resp.results.len(), 2);
    let ids: Vec<&str> = resp.results.iter().map(|r| r.station_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);

    for bad in ["/ask?q=d", "/ask", "/ask?q=rynek&k=0", "/ask?q=rynek&k=21"] {
        assert_eq!(get(addr, bad).await.status(), 400, "{}", bad);
    }
}
