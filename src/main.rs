//! enviro-fusion binary entrypoint.
//! Loads configuration, wires the aggregator behind the Axum router and exposes `/metrics`.

use enviro_fusion::{app_from_config, config, metrics::Metrics};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "enviro_fusion=info,warn";

/// Compact logs when `FUSION_DEV_LOG=1`; `RUST_LOG` refines the filter.
fn init_tracing() {
    if std::env::var("FUSION_DEV_LOG").as_deref() != Ok("1") {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // The runtime may have installed a subscriber already; keep it.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).compact().try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = config::load_default()?;
    let metrics = Metrics::init(&cfg.cache.ttl_secs)?;

    let router = app_from_config(&cfg)?.merge(metrics.router());
    tracing::info!(
        target: "config",
        sources = cfg.sources.len(),
        timeout_ms = cfg.engine.request_timeout_ms,
        "enviro-fusion ready"
    );

    Ok(router.into())
}
