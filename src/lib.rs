// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod correlate;
pub mod error;
pub mod fetch;
pub mod fusion;
pub mod geo;
pub mod history;
pub mod metrics;
pub mod normalize;
pub mod quality;
pub mod rate_limit;
pub mod sources;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{Aggregator, CacheStatus, FusedResult};
pub use crate::api::{create_router, AppState};
pub use crate::config::EngineConfig;
pub use crate::error::AggregateError;
pub use crate::types::{Category, FetchParams, Location, Priority};

use std::path::PathBuf;

/// Build the full application router from configuration (no metrics route).
///
/// With `FUSION_FIXTURES_DIR` set, sources are served from `<dir>/<id>.json`
/// instead of the network.
pub fn app_from_config(config: &EngineConfig) -> anyhow::Result<axum::Router> {
    let aggregator = match std::env::var("FUSION_FIXTURES_DIR") {
        Ok(dir) => {
            let registry = aggregator::fixture_registry(config, &PathBuf::from(dir))?;
            Aggregator::new(registry, aggregator::cache_from_config(config)?, config)?
        }
        Err(_) => Aggregator::from_config(config)?,
    };
    Ok(create_router(AppState::new(aggregator)))
}
