use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderName, HeaderValue},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::aggregator::Aggregator;
use crate::error::{ApiError, ApiResult};
use crate::history::HistoryEntry;
use crate::sources::SourceDescriptor;
use crate::types::{Category, FetchParams, Location};

pub const CACHE_HEADER: &str = "x-fusion-cache";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/aggregate", get(aggregate))
        .route("/debug/sources", get(debug_sources))
        .route("/debug/history", get(debug_history))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AggregateQuery {
    lat: f64,
    lon: f64,
    category: String,
    radius_km: Option<f64>,
    days: Option<u32>,
    #[serde(default)]
    force_refresh: bool,
}

impl AggregateQuery {
    fn validate(self) -> ApiResult<(Location, Category, FetchParams, bool)> {
        let location = Location::new(self.lat, self.lon);
        if !location.is_valid() {
            return Err(ApiError::BadRequest(format!(
                "lat/lon out of range: {}, {}",
                self.lat, self.lon
            )));
        }
        let category: Category = self.category.parse().map_err(ApiError::BadRequest)?;
        if let Some(r) = self.radius_km {
            if !(r.is_finite() && r > 0.0) {
                return Err(ApiError::BadRequest("radius_km must be positive".into()));
            }
        }
        let params = FetchParams {
            radius_km: self.radius_km,
            days: self.days,
        };
        Ok((location, category, params, self.force_refresh))
    }
}

async fn aggregate(
    State(state): State<AppState>,
    query: Result<Query<AggregateQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (location, category, params, force_refresh) = q.validate()?;

    let (result, status) = state
        .aggregator
        .aggregate_with_status(location, category, &params, force_refresh)
        .await?;

    Ok((
        [(
            HeaderName::from_static(CACHE_HEADER),
            HeaderValue::from_static(status.as_str()),
        )],
        Json(result),
    ))
}

#[derive(Serialize)]
struct SourceOut {
    #[serde(flatten)]
    descriptor: SourceDescriptor,
    interval_ms: u64,
    wait_ms: u64,
}

async fn debug_sources(State(state): State<AppState>) -> Json<Vec<SourceOut>> {
    let limiters = state.aggregator.rate_limiters();
    let out = state
        .aggregator
        .registry()
        .descriptors()
        .into_iter()
        .map(|d| {
            let interval_ms = limiters
                .get(&d.id)
                .map(|l| l.interval().as_millis() as u64)
                .unwrap_or(0);
            let wait_ms = limiters.wait_time(&d.id).as_millis() as u64;
            SourceOut {
                descriptor: d,
                interval_ms,
                wait_ms,
            }
        })
        .collect();
    Json(out)
}

#[derive(Deserialize)]
struct HistoryQuery {
    n: Option<usize>,
}

async fn debug_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<HistoryEntry>> {
    let n = q.n.unwrap_or(20).min(500);
    Json(state.aggregator.history().snapshot_last_n(n))
}
