// tests/metrics_exposition.rs
#![cfg(feature = "strict-metrics")]
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::json;
use tower::ServiceExt;

use enviro_fusion::cache::{CacheTtls, MemoryCache};
use enviro_fusion::metrics::Metrics;
use enviro_fusion::sources::fixture::FixtureClient;
use enviro_fusion::sources::{SourceDescriptor, SourceRegistry};
use enviro_fusion::{Aggregator, Category, EngineConfig, FetchParams, Location, Priority};

#[tokio::test]
async fn metrics_exposed_after_aggregation() {
    // Install the recorder for this test binary
    let metrics = Metrics::init(&CacheTtls::default()).expect("recorder");

    let payload = json!({"temperature": 12.0, "lat": 1.0, "lon": 1.0, "observed_at": Utc::now().to_rfc3339()});
    let reg = SourceRegistry::new()
        .with_source(
            SourceDescriptor::new("good", Priority::High, 3600, &[Category::Weather], "fixture://"),
            Arc::new(FixtureClient::payload("good", payload)),
        )
        .with_source(
            SourceDescriptor::new("bad", Priority::Low, 3600, &[Category::Weather], "fixture://"),
            Arc::new(FixtureClient::status("bad", 500)),
        )
        .with_source(
            SourceDescriptor::new("thin", Priority::Low, 3600, &[Category::Weather], "fixture://"),
            Arc::new(FixtureClient::payload("thin", json!({"humidity": 1}))),
        );
    let agg = Aggregator::new(reg, Arc::new(MemoryCache::new()), &EngineConfig::default()).unwrap();
    let _ = agg
        .aggregate(Location::new(1.0, 1.0), Category::Weather, &FetchParams::default(), false)
        .await;

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let out = String::from_utf8(bytes.to_vec()).unwrap();

    for needle in [
        "fusion_source_requests_total",
        "fusion_source_latency_ms",
        "fusion_normalization_skipped_total",
        "fusion_cache_misses_total",
        "fusion_aggregations_total",
        "fusion_quality_score",
        "fusion_cache_ttl_secs",
    ] {
        assert!(out.contains(needle), "missing series {needle}");
    }
}
