// src/quality.rs
//! Quality gate. The score starts at 0 and accumulates bounded bonuses:
//! source diversity, recency of the newest observation, presence of imagery and
//! station data, and support from the strongest correlation. Clamped to [0,1].
//!
//! All constants are named and overridable from `[quality]` in the config file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlate::Correlation;
use crate::fusion::FusedRecord;
use crate::normalize::Group;
use crate::types::Category;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub diversity_two: f64,
    pub diversity_three: f64,
    pub recency_30m: f64,
    pub recency_2h: f64,
    pub recency_6h: f64,
    pub imagery: f64,
    pub station: f64,
    /// Multiplied by the highest correlation confidence.
    pub correlation_support: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            diversity_two: 0.2,
            diversity_three: 0.3,
            recency_30m: 0.3,
            recency_2h: 0.2,
            recency_6h: 0.1,
            imagery: 0.15,
            station: 0.2,
            correlation_support: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub weather: f64,
    pub ocean: f64,
    pub satellite: f64,
    pub events: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            weather: 0.8,
            ocean: 0.7,
            satellite: 0.8,
            events: 0.7,
        }
    }
}

impl Thresholds {
    pub fn for_category(&self, category: Category) -> f64 {
        match category {
            Category::Weather => self.weather,
            Category::Ocean => self.ocean,
            Category::Satellite => self.satellite,
            Category::Events => self.events,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            weather: clamp01(self.weather),
            ocean: clamp01(self.ocean),
            satellite: clamp01(self.satellite),
            events: clamp01(self.events),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub diversity: f64,
    pub recency: f64,
    pub imagery: f64,
    pub station: f64,
    pub correlation_support: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub issues: Vec<String>,
    pub pass: bool,
    pub threshold: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct QualityEngine {
    pub config: QualityConfig,
}

impl QualityEngine {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config: QualityConfig {
                weights: config.weights,
                thresholds: config.thresholds.clamped(),
            },
        }
    }

    pub fn threshold(&self, category: Category) -> f64 {
        self.config.thresholds.for_category(category)
    }

    pub fn score(&self, fused: &FusedRecord, correlations: &[Correlation]) -> QualityReport {
        self.score_at(fused, correlations, Utc::now())
    }

    /// Score against an explicit clock.
    pub fn score_at(
        &self,
        fused: &FusedRecord,
        correlations: &[Correlation],
        now: DateTime<Utc>,
    ) -> QualityReport {
        let w = &self.config.weights;
        let mut issues = Vec::new();
        let mut b = ScoreBreakdown::default();

        let n = fused.sources.len();
        b.diversity = match n {
            n if n >= 3 => w.diversity_three,
            2 => w.diversity_two,
            _ => 0.0,
        };
        if n < 3 {
            issues.push(format!(
                "insufficient source diversity: {n} source{} contributed, 3 expected",
                if n == 1 { "" } else { "s" }
            ));
        }

        match fused.temporal.reference_time {
            Some(reference) => {
                let age_min = (now - reference).num_seconds().max(0) as f64 / 60.0;
                b.recency = if age_min < 30.0 {
                    w.recency_30m
                } else if age_min < 120.0 {
                    w.recency_2h
                } else if age_min < 360.0 {
                    w.recency_6h
                } else {
                    0.0
                };
                if age_min >= 30.0 {
                    issues.push(format!(
                        "insufficient recency: newest observation is {} min old",
                        age_min.floor() as i64
                    ));
                }
            }
            None => issues.push("insufficient recency: no observation time".to_string()),
        }
        if fused.temporal.skew_secs > 1800 {
            issues.push(format!(
                "temporal misalignment: observations span {} min",
                fused.temporal.skew_secs / 60
            ));
        }

        if fused.has_group(Group::Imagery) {
            b.imagery = w.imagery;
        } else if fused.category == Category::Satellite {
            issues.push("missing imagery".to_string());
        }

        if fused.spatial.has_station_data() {
            b.station = w.station;
        } else {
            issues.push(format!(
                "missing station data: no source reported a position within {} km",
                fused.spatial.radius_km
            ));
        }
        for s in fused.spatial.low_confidence_sources() {
            issues.push(format!(
                "low spatial confidence: {s} is beyond {} km of the target",
                fused.spatial.radius_km
            ));
        }

        let best = correlations
            .iter()
            .map(|c| c.confidence)
            .fold(0.0_f64, f64::max);
        b.correlation_support = w.correlation_support * clamp01(best);

        // absorb f64 summation error (0.7 + 0.1 < 0.8)
        let raw = b.diversity + b.recency + b.imagery + b.station + b.correlation_support;
        let score = clamp01((raw * 1e6).round() / 1e6);
        let threshold = self.threshold(fused.category);
        QualityReport {
            score,
            pass: score >= threshold,
            threshold,
            issues,
            breakdown: b,
        }
    }
}

#[inline]
fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
