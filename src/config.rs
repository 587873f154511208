// src/config.rs
//! Engine configuration: sources, quality constants, cache TTLs and engine knobs.
//!
//! Lookup order for `load_default`:
//! 1) `$FUSION_CONFIG_PATH`
//! 2) `config/fusion.toml`
//! 3) `config/fusion.json`
//! 4) built-in seed
//!
//! `FUSION_REQUEST_TIMEOUT_MS` overrides `engine.request_timeout_ms` afterwards;
//! `FUSION_RULES_PATH` replaces the causal rule table with the rules in that file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::CacheTtls;
use crate::correlate::{load_rules_file, CausalRule};
use crate::quality::QualityConfig;
use crate::sources::SourceDescriptor;
use crate::types::Category;

const ENV_PATH: &str = "FUSION_CONFIG_PATH";
const ENV_TIMEOUT: &str = "FUSION_REQUEST_TIMEOUT_MS";
const ENV_RULES: &str = "FUSION_RULES_PATH";

/// Longest cache TTL accepted from configuration (30 days).
pub const MAX_TTL_SECS: u64 = 30 * 24 * 3600;
/// Most decimal places kept in cache-key coordinates (~1 mm).
pub const MAX_KEY_PRECISION: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub request_timeout_ms: u64,
    pub spatial_radius_km: f64,
    pub spatial_correlation_window_km: f64,
    /// Decimal places kept in cache-key coordinates.
    pub cache_key_precision: u32,
    pub temporal_decay_secs: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 8000,
            spatial_radius_km: 100.0,
            spatial_correlation_window_km: 50.0,
            cache_key_precision: 4,
            temporal_decay_secs: 3600.0,
        }
    }
}

impl EngineSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/fusion")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub dir: PathBuf,
    pub ttl_secs: CacheTtls,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            dir: default_cache_dir(),
            ttl_secs: CacheTtls::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub cache: CacheSettings,
    pub quality: QualityConfig,
    pub sources: Vec<SourceDescriptor>,
    pub causal_rules: Vec<CausalRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            cache: CacheSettings::default(),
            quality: QualityConfig::default(),
            sources: SourceDescriptor::default_seed(),
            causal_rules: CausalRule::default_seed(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with and clamp thresholds.
    pub fn validate(mut self) -> Result<Self> {
        if self.sources.is_empty() {
            bail!("no sources configured");
        }
        let mut seen = HashSet::new();
        for s in &self.sources {
            if s.id.trim().is_empty() {
                bail!("source with empty id");
            }
            if !seen.insert(s.id.as_str()) {
                bail!("duplicate source id '{}'", s.id);
            }
            if s.hourly_budget == 0 {
                bail!("source '{}': hourly_budget must be at least 1", s.id);
            }
            if s.categories.is_empty() {
                bail!("source '{}': declares no categories", s.id);
            }
        }
        if self.engine.request_timeout_ms == 0 {
            bail!("engine.request_timeout_ms must be positive");
        }
        let e = &self.engine;
        if !(e.spatial_radius_km.is_finite() && e.spatial_radius_km > 0.0) {
            bail!("engine.spatial_radius_km must be a positive number");
        }
        if !(e.spatial_correlation_window_km.is_finite() && e.spatial_correlation_window_km >= 0.0) {
            bail!("engine.spatial_correlation_window_km must be zero or positive");
        }
        if !(e.temporal_decay_secs.is_finite() && e.temporal_decay_secs > 0.0) {
            bail!("engine.temporal_decay_secs must be a positive number");
        }
        if e.cache_key_precision > MAX_KEY_PRECISION {
            bail!("engine.cache_key_precision must be at most {MAX_KEY_PRECISION}");
        }
        for c in Category::ALL {
            let ttl = self.cache.ttl_secs.for_category(c);
            if ttl == 0 || ttl > MAX_TTL_SECS {
                bail!("cache.ttl_secs for {c} must be within 1..={MAX_TTL_SECS}");
            }
        }
        let w = &self.quality.weights;
        let weights = [
            w.diversity_two,
            w.diversity_three,
            w.recency_30m,
            w.recency_2h,
            w.recency_6h,
            w.imagery,
            w.station,
            w.correlation_support,
        ];
        if weights.iter().any(|x| !(x.is_finite() && (0.0..=1.0).contains(x))) {
            bail!("quality.weights must lie within [0, 1]");
        }
        self.quality.thresholds = self.quality.thresholds.clamped();
        Ok(self)
    }
}

/// Load configuration from an explicit path (TOML or JSON).
pub fn load_from(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, &ext)
        .with_context(|| format!("parsing config {}", path.display()))?;
    tracing::info!(
        target: "config",
        path = %path.display(),
        sources = cfg.sources.len(),
        "configuration loaded"
    );
    cfg.validate()
}

/// Load configuration using env var, then file fallbacks, then the built-in seed.
pub fn load_default() -> Result<EngineConfig> {
    let cfg = if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        load_from(&pb)?
    } else if Path::new("config/fusion.toml").exists() {
        load_from(Path::new("config/fusion.toml"))?
    } else if Path::new("config/fusion.json").exists() {
        load_from(Path::new("config/fusion.json"))?
    } else {
        tracing::info!(target: "config", "no config file found; using built-in seed");
        EngineConfig::default().validate()?
    };
    apply_env_overrides(cfg)
}

fn apply_env_overrides(mut cfg: EngineConfig) -> Result<EngineConfig> {
    if let Ok(v) = std::env::var(ENV_TIMEOUT) {
        let ms: u64 = v
            .trim()
            .parse()
            .with_context(|| format!("{ENV_TIMEOUT}='{v}' is not a number"))?;
        if ms == 0 {
            bail!("{ENV_TIMEOUT} must be positive");
        }
        cfg.engine.request_timeout_ms = ms;
    }
    if let Ok(p) = std::env::var(ENV_RULES) {
        cfg.causal_rules = load_rules_file(Path::new(&p))?;
        tracing::info!(target: "config", path = %p, rules = cfg.causal_rules.len(), "causal rules overridden");
    }
    Ok(cfg)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<EngineConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    match toml::from_str::<EngineConfig>(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) if hint_ext == "toml" => Err(toml_err.into()),
        Err(_) => Ok(serde_json::from_str(s)?),
    }
}
