// src/correlate.rs
//! Correlation engine: four independent passes over one `FusedRecord`.
//!
//! - `spatial`: sources that reported a position within the correlation window;
//! - `temporal`: how tightly the contributing observations line up in time;
//! - `causal`: explicit rule table over fused values (pattern -> confidence -> explanation);
//! - `cross_source`: pairwise agreement of overlapping fields between sources.
//!
//! Causal rules are plain data and can be replaced from configuration:
//!
//! ```toml
//! [[causal_rules]]
//! name = "tropical_convection"
//! confidence = 0.75
//! explanation = "warm sea surface feeding heavy rainfall"
//! when = [
//!   { field = "sea_surface_temperature", gt = 25.0 },
//!   { field = "precipitation", gte = 7.6 },
//! ]
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fusion::FusedRecord;
use crate::normalize::text::dedup_key;
use crate::normalize::{Field, FieldKind, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Spatial,
    Temporal,
    Causal,
    CrossSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub kind: CorrelationKind,
    /// The two data points related: source ids, field names or `target`.
    pub between: [String; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
    pub confidence: f64,
    pub rationale: String,
}

/// One threshold test on a fused field. All set bounds must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    /// For text / list fields: any item contains any phrase (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_contains: Option<Vec<String>>,
}

impl Condition {
    fn on(field: Field) -> Self {
        Self {
            field,
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            any_contains: None,
        }
    }

    fn above(field: Field, v: f64) -> Self {
        Self { gt: Some(v), ..Self::on(field) }
    }

    fn at_least(field: Field, v: f64) -> Self {
        Self { gte: Some(v), ..Self::on(field) }
    }

    fn below(field: Field, v: f64) -> Self {
        Self { lt: Some(v), ..Self::on(field) }
    }

    fn mentions(field: Field, phrases: &[&str]) -> Self {
        Self {
            any_contains: Some(phrases.iter().map(|p| p.to_string()).collect()),
            ..Self::on(field)
        }
    }

    pub fn matches(&self, fused: &FusedRecord) -> bool {
        let Some(v) = fused.field(self.field) else {
            return false;
        };
        if let Some(phrases) = &self.any_contains {
            let items: Vec<String> = match &v.value {
                FieldValue::Text(t) => vec![t.to_lowercase()],
                FieldValue::List(l) => l.iter().map(|s| s.to_lowercase()).collect(),
                FieldValue::Number(_) => return false,
            };
            let hit = phrases.iter().any(|p| {
                let p = p.to_lowercase();
                items.iter().any(|i| i.contains(&p))
            });
            if !hit {
                return false;
            }
        }
        let bounds = [self.gt, self.gte, self.lt, self.lte];
        if bounds.iter().all(Option::is_none) {
            return true;
        }
        let Some(n) = v.value.as_number() else {
            return false;
        };
        self.gt.map_or(true, |b| n > b)
            && self.gte.map_or(true, |b| n >= b)
            && self.lt.map_or(true, |b| n < b)
            && self.lte.map_or(true, |b| n <= b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRule {
    pub name: String,
    pub when: Vec<Condition>,
    pub confidence: f64,
    pub explanation: String,
}

impl CausalRule {
    fn new(name: &str, when: Vec<Condition>, confidence: f64, explanation: &str) -> Self {
        Self {
            name: name.to_string(),
            when,
            confidence,
            explanation: explanation.to_string(),
        }
    }

    /// A rule with no conditions never fires.
    pub fn matches(&self, fused: &FusedRecord) -> bool {
        !self.when.is_empty() && self.when.iter().all(|c| c.matches(fused))
    }

    /// Built-in rule table.
    pub fn default_seed() -> Vec<CausalRule> {
        vec![
            CausalRule::new(
                "tropical_convection",
                vec![
                    Condition::above(Field::SeaSurfaceTemperature, 25.0),
                    Condition::at_least(Field::Precipitation, 7.6),
                ],
                0.75,
                "sea surface above 25 degC with heavy rainfall suggests warm-ocean convection",
            ),
            CausalRule::new(
                "cyclonic_system",
                vec![
                    Condition::below(Field::Pressure, 1000.0),
                    Condition::above(Field::WindSpeed, 17.0),
                ],
                0.7,
                "low pressure with gale-force wind suggests an organised cyclonic system",
            ),
            CausalRule::new(
                "wind_driven_sea",
                vec![
                    Condition::above(Field::WaveHeight, 4.0),
                    Condition::above(Field::WindSpeed, 15.0),
                ],
                0.8,
                "high waves under strong wind indicate a locally wind-driven sea",
            ),
            CausalRule::new(
                "saturated_atmosphere",
                vec![
                    Condition::above(Field::Humidity, 90.0),
                    Condition::above(Field::CloudCover, 80.0),
                    Condition::above(Field::Precipitation, 0.0),
                ],
                0.6,
                "near-saturated air under heavy cloud with rain falling",
            ),
            CausalRule::new(
                "fire_weather",
                vec![
                    Condition::mentions(Field::Events, &["wildfire"]),
                    Condition::below(Field::Humidity, 25.0),
                ],
                0.7,
                "active wildfire reported under dry air",
            ),
        ]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RuleFile {
    #[serde(default, alias = "rules")]
    causal_rules: Vec<CausalRule>,
}

/// Load a causal rule table from JSON or TOML (`[[causal_rules]]` or `[[rules]]`).
pub fn load_rules_file(path: &Path) -> Result<Vec<CausalRule>> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading causal rules {}", path.display()))?;
    let file: RuleFile = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(file.causal_rules)
}

/// Spatial confidence: 1 at the target, falling linearly to 0 at `cutoff_km`.
pub fn spatial_confidence(distance_km: f64, cutoff_km: f64) -> f64 {
    if cutoff_km <= 0.0 {
        return 0.0;
    }
    (1.0 - distance_km / cutoff_km).clamp(0.0, 1.0)
}

/// Temporal confidence: 1 for aligned observations, 0 once skew reaches `decay_secs`.
pub fn temporal_confidence(skew_secs: i64, decay_secs: f64) -> f64 {
    if decay_secs <= 0.0 {
        return 0.0;
    }
    (1.0 - skew_secs.max(0) as f64 / decay_secs).clamp(0.0, 1.0)
}

/// Agreement in [0,1] between two readings of the same field.
pub fn agreement(field: Field, a: &FieldValue, b: &FieldValue) -> Option<f64> {
    match (field.kind(), a, b) {
        (FieldKind::Continuous, FieldValue::Number(x), FieldValue::Number(y)) => {
            Some(1.0 - ((x - y).abs() / field.agreement_span()).min(1.0))
        }
        (FieldKind::Angular, FieldValue::Number(x), FieldValue::Number(y)) => {
            let d = (x - y).rem_euclid(360.0);
            let d = d.min(360.0 - d);
            Some(1.0 - (d / field.agreement_span()).min(1.0))
        }
        (FieldKind::Categorical, FieldValue::Text(x), FieldValue::Text(y)) => {
            Some(if x.trim().eq_ignore_ascii_case(y.trim()) { 1.0 } else { 0.0 })
        }
        (FieldKind::List, FieldValue::List(x), FieldValue::List(y)) => {
            let xs: HashSet<String> = x.iter().map(|s| dedup_key(s)).collect();
            let ys: HashSet<String> = y.iter().map(|s| dedup_key(s)).collect();
            let union = xs.union(&ys).count();
            if union == 0 {
                return None;
            }
            Some(xs.intersection(&ys).count() as f64 / union as f64)
        }
        _ => None,
    }
}

/// Cross-source entries are emitted only above this agreement.
pub const AGREEMENT_FLOOR: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    /// Only sources within this distance get a spatial entry.
    pub window_km: f64,
    pub temporal_decay_secs: f64,
    pub rules: Vec<CausalRule>,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self {
            window_km: 50.0,
            temporal_decay_secs: 3600.0,
            rules: CausalRule::default_seed(),
        }
    }
}

impl CorrelationEngine {
    pub fn correlate(&self, fused: &FusedRecord) -> Vec<Correlation> {
        let mut out = self.spatial(fused);
        out.extend(self.temporal(fused));
        out.extend(self.causal(fused));
        out.extend(self.cross_source(fused));
        out
    }

    /// Confidence reaches zero at the fused record's own radius, so a request
    /// radius narrows it too.
    pub fn spatial(&self, fused: &FusedRecord) -> Vec<Correlation> {
        let cutoff_km = fused.spatial.radius_km;
        fused
            .spatial
            .distances
            .iter()
            .filter_map(|d| {
                let km = d.distance_km?;
                (km <= self.window_km).then(|| Correlation {
                    kind: CorrelationKind::Spatial,
                    between: [d.source_id.clone(), "target".to_string()],
                    field: None,
                    confidence: spatial_confidence(km, cutoff_km),
                    rationale: format!("{} reports from {:.1} km of the target", d.source_id, km),
                })
            })
            .collect()
    }

    pub fn temporal(&self, fused: &FusedRecord) -> Option<Correlation> {
        if fused.sources.len() < 2 {
            return None;
        }
        let t = &fused.temporal;
        let newest = t.lag_secs.iter().min_by_key(|(_, lag)| **lag)?.0.clone();
        let oldest = t.lag_secs.iter().max_by_key(|(_, lag)| **lag)?.0.clone();
        Some(Correlation {
            kind: CorrelationKind::Temporal,
            between: [oldest, newest],
            field: None,
            confidence: temporal_confidence(t.skew_secs, self.temporal_decay_secs),
            rationale: format!(
                "{} sources observed within {} min of each other",
                fused.sources.len(),
                t.skew_secs / 60
            ),
        })
    }

    pub fn causal(&self, fused: &FusedRecord) -> Vec<Correlation> {
        self.rules
            .iter()
            .filter(|r| r.matches(fused))
            .map(|r| {
                let first = r.when[0].field.name().to_string();
                let second = r.when.get(1).map(|c| c.field.name()).unwrap_or(first.as_str()).to_string();
                Correlation {
                    kind: CorrelationKind::Causal,
                    between: [first, second],
                    field: None,
                    confidence: r.confidence.clamp(0.0, 1.0),
                    rationale: format!("{}: {}", r.name, r.explanation),
                }
            })
            .collect()
    }

    pub fn cross_source(&self, fused: &FusedRecord) -> Vec<Correlation> {
        let mut out = Vec::new();
        for (field, fv) in fused.fields() {
            let c = &fv.contributions;
            for i in 0..c.len() {
                for j in (i + 1)..c.len() {
                    let Some(score) = agreement(*field, &c[i].value, &c[j].value) else {
                        continue;
                    };
                    if score > AGREEMENT_FLOOR {
                        out.push(Correlation {
                            kind: CorrelationKind::CrossSource,
                            between: [c[i].source_id.clone(), c[j].source_id.clone()],
                            field: Some(*field),
                            confidence: score,
                            rationale: match (c[i].value.as_number(), c[j].value.as_number()) {
                                (Some(a), Some(b)) => format!(
                                    "{} and {} agree on {}: {a:.1} vs {b:.1} {} ({score:.2})",
                                    c[i].source_id,
                                    c[j].source_id,
                                    field,
                                    field.unit()
                                ),
                                _ => format!(
                                    "{} and {} agree on {} ({score:.2})",
                                    c[i].source_id, c[j].source_id, field
                                ),
                            },
                        });
                    }
                }
            }
        }
        out
    }
}
