//! HTTP surface: status codes, error bodies and the `X-Fusion-Cache` header.

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use enviro_fusion::cache::MemoryCache;
use enviro_fusion::sources::fixture::FixtureClient;
use enviro_fusion::sources::{SourceDescriptor, SourceRegistry};
use enviro_fusion::{create_router, Aggregator, AppState, Category, EngineConfig, Priority};

fn station(id: &str, temp: f64) -> (SourceDescriptor, Arc<FixtureClient>) {
    (
        SourceDescriptor::new(id, Priority::Medium, 3_600_000, &[Category::Weather], "fixture://"),
        Arc::new(FixtureClient::payload(
            id,
            json!({
                "temperature": temp,
                "lat": 48.8566,
                "lon": 2.3522,
                "observed_at": Utc::now().to_rfc3339(),
            }),
        )),
    )
}

fn build_app() -> Router {
    let mut reg = SourceRegistry::new();
    for (id, t) in [("a", 14.0), ("b", 14.5), ("c", 15.0)] {
        let (d, c) = station(id, t);
        reg.register(d, c);
    }
    // an ocean source that always fails
    reg.register(
        SourceDescriptor::new("sea", Priority::Low, 3_600_000, &[Category::Ocean], "fixture://"),
        Arc::new(FixtureClient::status("sea", 503)),
    );
    // a single events source: passes fetch, fails the quality gate
    reg.register(
        SourceDescriptor::new("feed", Priority::Low, 3_600_000, &[Category::Events], "fixture://"),
        Arc::new(FixtureClient::payload("feed", json!({"events": ["Flood Watch"]}))),
    );
    let agg = Aggregator::new(reg, Arc::new(MemoryCache::new()), &EngineConfig::default()).unwrap();
    create_router(AppState::new(agg))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, Value) {
    let resp = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let cache = resp
        .headers()
        .get("X-Fusion-Cache")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let v = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, cache, v)
}

#[tokio::test]
async fn health_is_ok() {
    let app = build_app();
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn aggregate_miss_then_hit() {
    let app = build_app();
    let uri = "/aggregate?lat=48.8566&lon=2.3522&category=weather";

    let (s1, c1, v1) = get(&app, uri).await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(c1.as_deref(), Some("MISS"));
    assert_eq!(v1["quality"]["pass"], true);
    assert_eq!(v1["category"], "WEATHER");
    assert_eq!(v1["fused"]["sources"].as_array().unwrap().len(), 3);
    let temp = v1["fused"]["groups"]["weather"]["temperature"]["value"].as_f64().unwrap();
    assert!((temp - 14.5).abs() < 1e-9);

    let (s2, c2, v2) = get(&app, uri).await;
    assert_eq!(s2, StatusCode::OK);
    assert_eq!(c2.as_deref(), Some("HIT"));
    assert_eq!(v1, v2);

    let (_, c3, _) = get(&app, &format!("{uri}&force_refresh=true")).await;
    assert_eq!(c3.as_deref(), Some("BYPASS"));
}

#[tokio::test]
async fn failures_map_to_status_codes() {
    let app = build_app();

    let (s, _, v) = get(&app, "/aggregate?lat=10&lon=10&category=OCEAN").await;
    assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(v["error"]["code"], "NO_SOURCES_AVAILABLE");
    assert_eq!(v["error"]["attempts"][0]["failure"], "SOURCE_ERROR");

    let (s, _, v) = get(&app, "/aggregate?lat=10&lon=10&category=EVENTS").await;
    assert_eq!(s, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"]["code"], "QUALITY_INSUFFICIENT");
    assert!(!v["error"]["issues"].as_array().unwrap().is_empty());

    // no satellite source registered at all
    let (s, _, v) = get(&app, "/aggregate?lat=10&lon=10&category=SATELLITE").await;
    assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(v["error"]["attempts"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn bad_queries_are_rejected() {
    let app = build_app();
    for uri in [
        "/aggregate?lat=95&lon=0&category=WEATHER",
        "/aggregate?lat=0&lon=0&category=RADAR",
        "/aggregate?lon=0&category=WEATHER",
        "/aggregate?lat=0&lon=0&category=WEATHER&radius_km=-5",
    ] {
        let (s, _, v) = get(&app, uri).await;
        assert_eq!(s, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(v["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn debug_routes_expose_sources_and_history() {
    let app = build_app();
    let _ = get(&app, "/aggregate?lat=48.8566&lon=2.3522&category=WEATHER").await;

    let (s, _, v) = get(&app, "/debug/sources").await;
    assert_eq!(s, StatusCode::OK);
    let ids: Vec<_> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "sea", "feed"]);
    assert!(v[0]["interval_ms"].as_u64().is_some());

    let (s, _, v) = get(&app, "/debug/history?n=5").await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(v[0]["outcome"], "PASS");
    assert_eq!(v[0]["category"], "WEATHER");
}
