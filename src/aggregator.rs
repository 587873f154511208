// src/aggregator.rs
//! # Aggregator
//!
//! Entry point of the engine. One call runs, strictly in sequence:
//! cache lookup (unless `force_refresh`) -> concurrent fetch -> normalize ->
//! fuse -> correlate -> quality gate -> cache write on pass.
//!
//! Only `QUALITY_INSUFFICIENT` and `NO_SOURCES_AVAILABLE` propagate; both carry
//! the per-source attempts. A failed call leaves no cache entry for its key.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheKey, CacheTtls, FileCache, MemoryCache, ResultCache};
use crate::config::{CacheBackend, EngineConfig};
use crate::correlate::{Correlation, CorrelationEngine};
use crate::error::AggregateError;
use crate::fetch::FetchOrchestrator;
use crate::fusion::{FusedRecord, FusionEngine};
use crate::history::{History, HistoryEntry};
use crate::normalize::Normalizer;
use crate::quality::{QualityEngine, QualityReport};
use crate::rate_limit::RateLimiters;
use crate::sources::fixture::FixtureClient;
use crate::sources::SourceRegistry;
use crate::types::{Category, FetchParams, Location, SourceAttempt};

/// The bundle returned to callers and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub key: CacheKey,
    pub category: Category,
    pub location: Location,
    pub generated_at: DateTime<Utc>,
    pub fused: FusedRecord,
    pub correlations: Vec<Correlation>,
    pub quality: QualityReport,
    pub attempts: Vec<SourceAttempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// `force_refresh` skipped the lookup.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

pub struct Aggregator {
    fetcher: FetchOrchestrator,
    normalizer: Normalizer,
    fusion: FusionEngine,
    correlation: CorrelationEngine,
    quality: QualityEngine,
    cache: Arc<dyn ResultCache>,
    ttls: CacheTtls,
    key_precision: u32,
    history: Arc<History>,
}

impl Aggregator {
    /// Wire an aggregator over an existing registry and cache. Rate limiters are
    /// built from the registry's descriptors.
    pub fn new(registry: SourceRegistry, cache: Arc<dyn ResultCache>, config: &EngineConfig) -> Result<Self> {
        let limiters = RateLimiters::from_descriptors(&registry.descriptors())?;
        let e = &config.engine;
        Ok(Self {
            fetcher: FetchOrchestrator::new(registry, limiters, e.request_timeout()),
            normalizer: Normalizer::builtin(),
            fusion: FusionEngine::new(e.spatial_radius_km),
            correlation: CorrelationEngine {
                window_km: e.spatial_correlation_window_km,
                temporal_decay_secs: e.temporal_decay_secs,
                rules: config.causal_rules.clone(),
            },
            quality: QualityEngine::new(config.quality),
            cache,
            ttls: config.cache.ttl_secs,
            key_precision: e.cache_key_precision,
            history: Arc::new(History::default()),
        })
    }

    /// HTTP-backed registry for every configured source plus the configured cache backend.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let registry = SourceRegistry::http(&config.sources)?;
        Self::new(registry, cache_from_config(config)?, config)
    }

    /// Replace the mapping tables (e.g. to add a custom source).
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.fetcher.registry()
    }

    pub fn rate_limiters(&self) -> &RateLimiters {
        self.fetcher.limiters()
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    pub fn cache_key(&self, location: Location, category: Category, params: &FetchParams) -> CacheKey {
        CacheKey::new(category, location, params, self.key_precision)
    }

    pub async fn aggregate(
        &self,
        location: Location,
        category: Category,
        params: &FetchParams,
        force_refresh: bool,
    ) -> Result<FusedResult, AggregateError> {
        self.aggregate_with_status(location, category, params, force_refresh)
            .await
            .map(|(res, _)| res)
    }

    /// Like `aggregate`, also reporting whether the cache served the result.
    pub async fn aggregate_with_status(
        &self,
        location: Location,
        category: Category,
        params: &FetchParams,
        force_refresh: bool,
    ) -> Result<(FusedResult, CacheStatus), AggregateError> {
        let key = self.cache_key(location, category, params);

        let status = if force_refresh {
            CacheStatus::Bypass
        } else if let Some(entry) = self.cache.get(&key) {
            counter!("fusion_cache_hits_total").increment(1);
            tracing::debug!(target: "cache", key = %key, "hit");
            self.record(&key, category, "HIT", Some(entry.result.quality.score), &entry.result.fused.sources);
            return Ok((entry.result, CacheStatus::Hit));
        } else {
            counter!("fusion_cache_misses_total").increment(1);
            CacheStatus::Miss
        };

        match self.compute(&key, location, category, params).await {
            Ok(result) => {
                let ttl = self.ttls.for_category(category);
                self.cache.put(CacheEntry::new(key.clone(), result.clone(), ttl));
                counter!("fusion_aggregations_total", "category" => category.as_str(), "outcome" => "PASS")
                    .increment(1);
                tracing::info!(
                    target: "aggregate",
                    key = %key,
                    score = result.quality.score,
                    sources = result.fused.sources.len(),
                    ttl_secs = ttl,
                    "aggregation passed"
                );
                self.record(&key, category, "PASS", Some(result.quality.score), &result.fused.sources);
                Ok((result, status))
            }
            Err(err) => {
                if self.cache.remove(&key) {
                    tracing::debug!(target: "cache", key = %key, "evicted after failed aggregation");
                }
                counter!("fusion_aggregations_total", "category" => category.as_str(), "outcome" => err.code())
                    .increment(1);
                tracing::info!(target: "aggregate", key = %key, code = err.code(), error = %err, "aggregation rejected");
                let score = match &err {
                    AggregateError::QualityInsufficient { score, .. } => Some(*score),
                    AggregateError::NoSourcesAvailable { .. } => None,
                };
                self.record(&key, category, err.code(), score, &[]);
                Err(err)
            }
        }
    }

    async fn compute(
        &self,
        key: &CacheKey,
        location: Location,
        category: Category,
        params: &FetchParams,
    ) -> Result<FusedResult, AggregateError> {
        if self.fetcher.eligible_count(category) == 0 {
            return Err(AggregateError::NoSourcesAvailable {
                category,
                attempts: Vec::new(),
            });
        }

        let fetched = self.fetcher.fetch_all(location, category, params).await;

        let mut attempts = Vec::with_capacity(fetched.len());
        let mut records = Vec::new();
        for res in fetched.values() {
            let attempt = SourceAttempt::from_fetch(res);
            if !res.success {
                attempts.push(attempt);
                continue;
            }
            match self.normalizer.normalize(res, category) {
                Some(rec) => {
                    records.push(rec);
                    attempts.push(attempt);
                }
                None => attempts.push(attempt.skipped(format!(
                    "payload lacks the minimum fields for {category}"
                ))),
            }
        }

        if records.is_empty() {
            return Err(AggregateError::NoSourcesAvailable { category, attempts });
        }

        let radius_km = params.radius_km.unwrap_or(self.fusion.spatial_radius_km);
        let fused = self.fusion.fuse_within(&records, location, radius_km);
        let correlations = self.correlation.correlate(&fused);
        let quality = self.quality.score(&fused, &correlations);
        histogram!("fusion_quality_score", "category" => category.as_str()).record(quality.score);

        if !quality.pass {
            return Err(AggregateError::QualityInsufficient {
                category,
                score: quality.score,
                threshold: quality.threshold,
                issues: quality.issues,
                attempts,
            });
        }

        Ok(FusedResult {
            key: key.clone(),
            category,
            location,
            generated_at: Utc::now(),
            fused,
            correlations,
            quality,
            attempts,
        })
    }

    fn record(&self, key: &CacheKey, category: Category, outcome: &str, score: Option<f64>, sources: &[String]) {
        self.history.push(HistoryEntry {
            at: Utc::now(),
            key: key.to_string(),
            category,
            outcome: outcome.to_string(),
            score,
            sources: sources.to_vec(),
        });
    }
}

/// Cache backend selected by `[cache]`.
pub fn cache_from_config(config: &EngineConfig) -> Result<Arc<dyn ResultCache>> {
    Ok(match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::File => Arc::new(
            FileCache::new(&config.cache.dir)
                .with_context(|| format!("creating cache dir {}", config.cache.dir.display()))?,
        ),
    })
}

/// Registry serving `<dir>/<source-id>.json` through fixture clients, for offline runs.
/// Configured sources without a fixture file are left out.
pub fn fixture_registry(config: &EngineConfig, dir: &Path) -> Result<SourceRegistry> {
    let mut reg = SourceRegistry::new();
    for d in &config.sources {
        let path = dir.join(format!("{}.json", d.id));
        if !path.exists() {
            tracing::debug!(target: "config", source = %d.id, path = %path.display(), "no fixture; source disabled");
            continue;
        }
        let client = FixtureClient::from_file(&d.id, &path)?;
        reg.register(d.clone(), Arc::new(client));
    }
    Ok(reg)
}

#[cfg(test)]
impl FusedResult {
    pub(crate) fn empty_for_tests(key: CacheKey) -> Self {
        use crate::fusion::{SpatialSummary, TemporalSummary};
        use crate::quality::ScoreBreakdown;
        use std::collections::BTreeMap;

        let location = Location::new(0.0, 0.0);
        Self {
            key,
            category: Category::Weather,
            location,
            generated_at: Utc::now(),
            fused: FusedRecord {
                category: Category::Weather,
                sources: vec!["a".into()],
                temporal: TemporalSummary {
                    reference_time: None,
                    skew_secs: 0,
                    lag_secs: BTreeMap::new(),
                },
                spatial: SpatialSummary {
                    target: location,
                    radius_km: 100.0,
                    distances: vec![],
                },
                groups: BTreeMap::new(),
            },
            correlations: vec![],
            quality: QualityReport {
                score: 0.9,
                issues: vec![],
                pass: true,
                threshold: 0.8,
                breakdown: ScoreBreakdown::default(),
            },
            attempts: vec![],
        }
    }
}
