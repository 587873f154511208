//! End-to-end aggregation behaviour against in-process fixture sources.
//!
//! Covered:
//! - three agreeing sources -> averaged temperature, pass, cached
//! - every source times out -> NO_SOURCES_AVAILABLE, nothing cached
//! - single stale source -> QUALITY_INSUFFICIENT naming recency, nothing cached
//! - rate-limited source excluded, the rest proceed
//! - cache HIT idempotence, force_refresh bypass, eviction after a failed refresh
//! - contributing sources are always a subset of successful fetches

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use enviro_fusion::cache::{MemoryCache, ResultCache};
use enviro_fusion::error::SourceError;
use enviro_fusion::normalize::Field;
use enviro_fusion::sources::fixture::FixtureClient;
use enviro_fusion::sources::{SourceClient, SourceDescriptor, SourceRegistry};
use enviro_fusion::types::{FailureKind, RawPayload};
use enviro_fusion::{Aggregator, CacheStatus, Category, EngineConfig, FetchParams, Location, Priority};

/// One slot per millisecond: effectively unbudgeted, still goes through the limiter.
const UNLIMITED: u32 = 3_600_000;

const MIAMI: Location = Location { lat: 25.7617, lon: -80.1918 };

fn weather(id: &str, budget: u32) -> SourceDescriptor {
    SourceDescriptor::new(id, Priority::Medium, budget, &[Category::Weather], "fixture://")
}

fn observation(temp: f64, minutes_ago: i64) -> RawPayload {
    let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
    json!({
        "temperature": temp,
        "lat": MIAMI.lat,
        "lon": MIAMI.lon,
        "observed_at": at.to_rfc3339(),
    })
}

fn build(registry: SourceRegistry, config: &EngineConfig) -> (Aggregator, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let agg = Aggregator::new(registry, cache.clone(), config).expect("aggregator");
    (agg, cache)
}

fn three_fresh_sources() -> (SourceRegistry, Vec<Arc<FixtureClient>>) {
    let clients: Vec<_> = [("a", 20.0), ("b", 21.0), ("c", 22.0)]
        .iter()
        .map(|(id, t)| Arc::new(FixtureClient::payload(id, observation(*t, 0))))
        .collect();
    let mut reg = SourceRegistry::new();
    for (id, c) in ["a", "b", "c"].iter().zip(&clients) {
        reg.register(weather(id, UNLIMITED), c.clone());
    }
    (reg, clients)
}

#[tokio::test]
async fn scenario_a_three_sources_agree() {
    let (reg, _) = three_fresh_sources();
    let (agg, cache) = build(reg, &EngineConfig::default());

    let res = agg
        .aggregate(MIAMI, Category::Weather, &FetchParams::default(), false)
        .await
        .expect("should pass");

    let t = res.fused.number(Field::Temperature).unwrap();
    assert!((t - 21.0).abs() < 1e-9, "fused temperature {t}");
    assert!(res.quality.score >= 0.7);
    assert!(res.quality.pass);
    assert_eq!(res.fused.sources, vec!["a", "b", "c"]);
    assert!(cache.contains(&res.key));
}

#[tokio::test]
async fn scenario_b_all_sources_time_out() {
    let mut reg = SourceRegistry::new();
    for id in ["a", "b"] {
        reg.register(
            weather(id, UNLIMITED),
            Arc::new(FixtureClient::payload(id, observation(20.0, 0)).with_delay(Duration::from_millis(400))),
        );
    }
    let mut cfg = EngineConfig::default();
    cfg.engine.request_timeout_ms = 50;
    let (agg, cache) = build(reg, &cfg);

    let err = agg
        .aggregate(MIAMI, Category::Weather, &FetchParams::default(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_SOURCES_AVAILABLE");
    assert_eq!(err.attempts().len(), 2);
    assert!(err
        .attempts()
        .iter()
        .all(|a| a.failure == Some(FailureKind::SourceTimeout)));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn scenario_c_single_stale_source() {
    let reg = SourceRegistry::new().with_source(
        weather("old", 3600),
        Arc::new(FixtureClient::payload("old", observation(20.0, 120))),
    );
    let (agg, cache) = build(reg, &EngineConfig::default());

    let err = agg
        .aggregate(MIAMI, Category::Weather, &FetchParams::default(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUALITY_INSUFFICIENT");
    assert!(
        err.issues().iter().any(|i| i.contains("insufficient recency")),
        "issues: {:?}",
        err.issues()
    );
    assert!(cache.is_empty());
}

#[tokio::test]
async fn scenario_d_rate_limited_source_is_skipped() {
    let limited = Arc::new(FixtureClient::payload("limited", observation(20.0, 0)));
    let reg = SourceRegistry::new()
        .with_source(weather("limited", 1), limited.clone())
        .with_source(weather("b", UNLIMITED), Arc::new(FixtureClient::payload("b", observation(21.0, 0))))
        .with_source(weather("c", UNLIMITED), Arc::new(FixtureClient::payload("c", observation(22.0, 0))));
    let (agg, _) = build(reg, &EngineConfig::default());

    let first = agg
        .aggregate(MIAMI, Category::Weather, &FetchParams::default(), false)
        .await
        .unwrap();
    assert_eq!(first.fused.sources.len(), 3);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = agg
        .aggregate(MIAMI, Category::Weather, &FetchParams::default(), true)
        .await
        .expect("two fresh co-located sources still pass");
    assert_eq!(second.fused.sources, vec!["b", "c"]);
    let a = second
        .attempts
        .iter()
        .find(|a| a.source_id == "limited")
        .unwrap();
    assert_eq!(a.failure, Some(FailureKind::RateLimited));
    assert!(!a.contributed);
    assert_eq!(limited.calls(), 1);
}

#[tokio::test]
async fn cached_result_is_returned_verbatim_until_forced() {
    let (reg, clients) = three_fresh_sources();
    let (agg, _) = build(reg, &EngineConfig::default());
    let p = FetchParams::default();

    let (first, s1) = agg.aggregate_with_status(MIAMI, Category::Weather, &p, false).await.unwrap();
    let (second, s2) = agg.aggregate_with_status(MIAMI, Category::Weather, &p, false).await.unwrap();
    assert_eq!(s1, CacheStatus::Miss);
    assert_eq!(s2, CacheStatus::Hit);
    assert_eq!(first, second);
    assert_eq!(clients[0].calls(), 1);

    // a nearby point in the same 4-decimal bucket shares the entry
    let near = Location::new(MIAMI.lat + 0.00001, MIAMI.lon);
    let (_, s3) = agg.aggregate_with_status(near, Category::Weather, &p, false).await.unwrap();
    assert_eq!(s3, CacheStatus::Hit);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let (forced, s4) = agg.aggregate_with_status(MIAMI, Category::Weather, &p, true).await.unwrap();
    assert_eq!(s4, CacheStatus::Bypass);
    assert!(forced.generated_at >= first.generated_at);
    assert_eq!(clients[0].calls(), 2);
}

/// Serves a fresh or a two-hour-old observation depending on a switch.
struct Switchable {
    name: String,
    stale: AtomicBool,
}

#[async_trait]
impl SourceClient for Switchable {
    async fn request(&self, _: Location, _: Category, _: &FetchParams) -> Result<RawPayload, SourceError> {
        let mins = if self.stale.load(Ordering::SeqCst) { 120 } else { 0 };
        Ok(observation(20.0, mins))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[tokio::test]
async fn failed_refresh_evicts_the_cached_entry() {
    let mut reg = SourceRegistry::new();
    let switches: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|id| {
            Arc::new(Switchable {
                name: id.to_string(),
                stale: AtomicBool::new(false),
            })
        })
        .collect();
    for s in &switches {
        reg.register(weather(&s.name, UNLIMITED), s.clone());
    }
    let (agg, cache) = build(reg, &EngineConfig::default());
    let p = FetchParams::default();

    let ok = agg.aggregate(MIAMI, Category::Weather, &p, false).await.unwrap();
    assert!(cache.contains(&ok.key));

    for s in &switches {
        s.stale.store(true, Ordering::SeqCst);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = agg.aggregate(MIAMI, Category::Weather, &p, true).await.unwrap_err();
    assert_eq!(err.code(), "QUALITY_INSUFFICIENT");
    assert!(!cache.contains(&ok.key));

    // the next plain call recomputes instead of serving a stale answer
    tokio::time::sleep(Duration::from_millis(20)).await;
    let again = agg.aggregate(MIAMI, Category::Weather, &p, false).await;
    assert!(matches!(again, Err(ref e) if e.code() == "QUALITY_INSUFFICIENT"));
}

#[tokio::test]
async fn contributors_are_a_subset_of_successful_fetches() {
    let reg = SourceRegistry::new()
        .with_source(weather("ok-1", 3600), Arc::new(FixtureClient::payload("ok-1", observation(20.0, 0))))
        .with_source(weather("ok-2", 3600), Arc::new(FixtureClient::payload("ok-2", observation(20.4, 5))))
        .with_source(weather("down", 3600), Arc::new(FixtureClient::status("down", 502)))
        .with_source(weather("garbled", 3600), Arc::new(FixtureClient::malformed("garbled", "eof")))
        .with_source(
            weather("no-temp", 3600),
            Arc::new(FixtureClient::payload("no-temp", json!({"humidity": 40}))),
        );
    let mut cfg = EngineConfig::default();
    cfg.quality.thresholds.weather = 0.5;
    let (agg, _) = build(reg, &cfg);

    let res = agg
        .aggregate(MIAMI, Category::Weather, &FetchParams::default(), false)
        .await
        .unwrap();
    assert_eq!(res.attempts.len(), 5);

    let contributed: HashSet<_> = res
        .attempts
        .iter()
        .filter(|a| a.contributed)
        .map(|a| a.source_id.as_str())
        .collect();
    assert!(res.fused.sources.iter().all(|s| contributed.contains(s.as_str())));
    assert_eq!(contributed.len(), 2);

    let kind = |id: &str| res.attempts.iter().find(|a| a.source_id == id).unwrap().failure;
    assert_eq!(kind("down"), Some(FailureKind::SourceError));
    assert_eq!(kind("garbled"), Some(FailureKind::SourceError));
    assert_eq!(kind("no-temp"), Some(FailureKind::NormalizationSkipped));
}
