// src/sources/mod.rs
//! # Source Registry
//!
//! Static catalogue of environmental data providers and the uniform client
//! contract every provider integration implements.
//!
//! - `SourceDescriptor` is plain data (loaded from config or the built-in seed).
//! - `SourceClient` issues one request and returns a payload or a typed error.
//! - `fetch_with_timeout` wraps a client call into a `FetchResult` that never
//!   escapes as an error: timeouts and provider failures become `success=false`.

pub mod fixture;
pub mod http;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::types::{Category, FailureKind, FetchParams, FetchResult, Location, Priority, RawPayload};

/// How the provider encodes its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Json,
    Rss,
}

fn default_lat_param() -> String {
    "lat".to_string()
}
fn default_lon_param() -> String {
    "lon".to_string()
}

/// Immutable description of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    #[serde(default)]
    pub priority: Priority,
    pub hourly_budget: u32,
    pub categories: Vec<Category>,
    pub base_endpoint: String,
    #[serde(default)]
    pub format: PayloadFormat,
    /// Static query-string parameters appended to every request.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default = "default_lat_param")]
    pub lat_param: String,
    #[serde(default = "default_lon_param")]
    pub lon_param: String,
    #[serde(default)]
    pub radius_param: Option<String>,
    #[serde(default)]
    pub days_param: Option<String>,
    /// Providers searched by bounding box get a tight box around the point
    /// instead of the lat/lon pair.
    #[serde(default)]
    pub bbox_param: Option<String>,
}

impl SourceDescriptor {
    /// Minimal descriptor; optional wire settings take their defaults.
    pub fn new(
        id: &str,
        priority: Priority,
        hourly_budget: u32,
        categories: &[Category],
        base_endpoint: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            priority,
            hourly_budget,
            categories: categories.to_vec(),
            base_endpoint: base_endpoint.to_string(),
            format: PayloadFormat::Json,
            query: BTreeMap::new(),
            lat_param: default_lat_param(),
            lon_param: default_lon_param(),
            radius_param: None,
            days_param: None,
            bbox_param: None,
        }
    }

    pub fn serves(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    fn with_query(mut self, pairs: &[(&str, &str)]) -> Self {
        for (k, v) in pairs {
            self.query.insert(k.to_string(), v.to_string());
        }
        self
    }

    fn with_coord_params(mut self, lat: &str, lon: &str) -> Self {
        self.lat_param = lat.to_string();
        self.lon_param = lon.to_string();
        self
    }

    /// Built-in provider catalogue, used when no configuration file is found.
    pub fn default_seed() -> Vec<SourceDescriptor> {
        use Category::*;
        use Priority::*;

        vec![
            SourceDescriptor::new("open-meteo", High, 600, &[Weather], "https://api.open-meteo.com/v1/forecast")
                .with_coord_params("latitude", "longitude")
                .with_query(&[(
                    "current",
                    "temperature_2m,relative_humidity_2m,precipitation,cloud_cover,surface_pressure,wind_speed_10m,wind_direction_10m",
                )]),
            SourceDescriptor::new("openweathermap", Medium, 60, &[Weather], "https://api.openweathermap.org/data/2.5/weather")
                .with_query(&[("units", "metric")]),
            SourceDescriptor::new("open-meteo-marine", High, 600, &[Ocean], "https://marine-api.open-meteo.com/v1/marine")
                .with_coord_params("latitude", "longitude")
                .with_query(&[(
                    "current",
                    "wave_height,wave_period,sea_surface_temperature,ocean_current_velocity",
                )]),
            SourceDescriptor::new("ndbc-buoy", Medium, 120, &[Ocean, Weather], "https://www.ndbc.noaa.gov/api/latest_obs"),
            SourceDescriptor::new("nasa-earth-imagery", High, 30, &[Satellite], "https://api.nasa.gov/planetary/earth/assets"),
            {
                let mut d = SourceDescriptor::new("earth-search-stac", Medium, 300, &[Satellite], "https://earth-search.aws.element84.com/v1/search")
                    .with_query(&[
                        ("collections", "sentinel-2-l2a"),
                        ("limit", "1"),
                        ("sortby", "-properties.datetime"),
                    ]);
                d.bbox_param = Some("bbox".to_string());
                d
            },
            {
                let mut d = SourceDescriptor::new("nasa-eonet", High, 120, &[Events], "https://eonet.gsfc.nasa.gov/api/v3/events");
                d.days_param = Some("days".to_string());
                d.with_query(&[("status", "open")])
            },
            {
                let mut d = SourceDescriptor::new("usgs-earthquakes", Medium, 240, &[Events], "https://earthquake.usgs.gov/fdsnws/event/1/query")
                    .with_coord_params("latitude", "longitude")
                    .with_query(&[("format", "geojson"), ("minmagnitude", "2.5"), ("maxradiuskm", "100")]);
                d.radius_param = Some("maxradiuskm".to_string());
                d
            },
            {
                let mut d = SourceDescriptor::new("nws-alerts", Low, 120, &[Events], "https://alerts.weather.gov/cap/us.php");
                d.format = PayloadFormat::Rss;
                d.with_query(&[("x", "0")])
            },
        ]
    }
}

/// Uniform provider contract. One implementation per provider (or per wire style).
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Issue a single request. Must not retry.
    async fn request(
        &self,
        location: Location,
        category: Category,
        params: &FetchParams,
    ) -> Result<RawPayload, SourceError>;

    fn name(&self) -> &str;
}

/// A descriptor bound to the client that serves it.
#[derive(Clone)]
pub struct RegisteredSource {
    pub descriptor: SourceDescriptor,
    pub client: Arc<dyn SourceClient>,
}

/// Descriptors plus their clients, in registration order.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a source.
    pub fn register(&mut self, descriptor: SourceDescriptor, client: Arc<dyn SourceClient>) {
        self.sources.retain(|s| s.descriptor.id != descriptor.id);
        self.sources.push(RegisteredSource { descriptor, client });
    }

    pub fn with_source(mut self, descriptor: SourceDescriptor, client: Arc<dyn SourceClient>) -> Self {
        self.register(descriptor, client);
        self
    }

    /// Build a registry backed by HTTP clients for every descriptor.
    pub fn http(descriptors: &[SourceDescriptor]) -> anyhow::Result<Self> {
        let mut reg = Self::new();
        for d in descriptors {
            let client = http::HttpSourceClient::new(d.clone())?;
            reg.register(d.clone(), Arc::new(client));
        }
        Ok(reg)
    }

    /// Sources whose declared categories include `category`.
    pub fn eligible(&self, category: Category) -> Vec<&RegisteredSource> {
        self.sources
            .iter()
            .filter(|s| s.descriptor.serves(category))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredSource> {
        self.sources.iter().find(|s| s.descriptor.id == id)
    }

    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources.iter().map(|s| s.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Run one client call bounded by `timeout`. Never returns an error: failures are
/// reported as `success=false` with `SOURCE_TIMEOUT` or `SOURCE_ERROR`.
pub async fn fetch_with_timeout(
    source: &RegisteredSource,
    location: Location,
    category: Category,
    params: &FetchParams,
    timeout: Duration,
) -> FetchResult {
    let id = source.descriptor.id.as_str();
    let priority = source.descriptor.priority;
    let t0 = Instant::now();

    let outcome = tokio::time::timeout(timeout, source.client.request(location, category, params)).await;
    let elapsed_ms = t0.elapsed().as_millis() as u64;
    histogram!("fusion_source_latency_ms", "source" => id.to_string()).record(elapsed_ms as f64);

    let res = match outcome {
        Ok(Ok(payload)) => FetchResult::ok(id, priority, payload, elapsed_ms),
        Ok(Err(e)) => {
            tracing::warn!(target: "fetch", source = id, error = %e, "provider error");
            FetchResult::failed(id, priority, FailureKind::SourceError, e.to_string(), elapsed_ms)
        }
        Err(_) => {
            tracing::warn!(target: "fetch", source = id, timeout_ms = timeout.as_millis() as u64, "provider timeout");
            FetchResult::failed(
                id,
                priority,
                FailureKind::SourceTimeout,
                format!("no response within {} ms", timeout.as_millis()),
                elapsed_ms,
            )
        }
    };

    let outcome_label = res.failure_kind().map(|k| k.code()).unwrap_or("ok");
    counter!("fusion_source_requests_total", "source" => id.to_string(), "outcome" => outcome_label)
        .increment(1);
    res
}
