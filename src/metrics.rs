use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::cache::CacheTtls;
use crate::types::Category;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the static per-category TTL gauges.
    pub fn init(ttls: &CacheTtls) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        ensure_metrics_described();
        for c in Category::ALL {
            gauge!("fusion_cache_ttl_secs", "category" => c.as_str()).set(ttls.for_category(c) as f64);
        }

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics with help text).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "fusion_source_requests_total",
            "Source requests by outcome (ok, SOURCE_TIMEOUT, SOURCE_ERROR, RATE_LIMITED)."
        );
        describe_histogram!("fusion_source_latency_ms", "Per-source request latency in milliseconds.");
        describe_counter!(
            "fusion_normalization_skipped_total",
            "Payloads dropped for missing minimum fields."
        );
        describe_counter!("fusion_cache_hits_total", "Aggregations served from cache.");
        describe_counter!("fusion_cache_misses_total", "Aggregations that missed the cache.");
        describe_counter!(
            "fusion_aggregations_total",
            "Aggregation outcomes by category (PASS, QUALITY_INSUFFICIENT, NO_SOURCES_AVAILABLE)."
        );
        describe_histogram!("fusion_quality_score", "Quality score of computed aggregations.");
        describe_gauge!("fusion_cache_ttl_secs", "Configured cache TTL per category, in seconds.");
    });
}
