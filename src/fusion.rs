// src/fusion.rs
//! # Fusion Engine
//!
//! Merges the normalized records of one aggregation call along three axes:
//!
//! - **temporal**: reference time is the newest observation, skew the widest gap;
//! - **spatial**: haversine distance from each source's reported position to the
//!   target; sources past the radius are kept but flagged low-confidence;
//! - **semantic**: fields are grouped by domain and merged per field kind
//!   (inverse-distance mean, circular mean, priority last-writer, de-duplicated union).
//!
//! Input order never changes the result: records are sorted by source id first.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::haversine_km;
use crate::normalize::text::dedup_key;
use crate::normalize::{Field, FieldKind, FieldValue, Group, NormalizedRecord};
use crate::types::{Category, Location, Priority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalSummary {
    /// Newest observation timestamp among the inputs.
    pub reference_time: Option<DateTime<Utc>>,
    /// Largest difference between any two observation timestamps.
    pub skew_secs: i64,
    /// Seconds each source lags behind the reference time.
    pub lag_secs: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDistance {
    pub source_id: String,
    /// `None` when the source reported no coordinates of its own.
    pub distance_km: Option<f64>,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialSummary {
    pub target: Location,
    pub radius_km: f64,
    pub distances: Vec<SourceDistance>,
}

impl SpatialSummary {
    pub fn distance_of(&self, source_id: &str) -> Option<f64> {
        self.distances
            .iter()
            .find(|d| d.source_id == source_id)
            .and_then(|d| d.distance_km)
    }

    /// At least one source reported its own position inside the radius (a station).
    pub fn has_station_data(&self) -> bool {
        self.distances
            .iter()
            .any(|d| d.distance_km.is_some() && !d.low_confidence)
    }

    pub fn low_confidence_sources(&self) -> Vec<&str> {
        self.distances
            .iter()
            .filter(|d| d.low_confidence)
            .map(|d| d.source_id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    InverseDistanceMean,
    CircularMean,
    PriorityLastWriter,
    Union,
}

impl From<FieldKind> for MergeRule {
    fn from(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Continuous => MergeRule::InverseDistanceMean,
            FieldKind::Angular => MergeRule::CircularMean,
            FieldKind::Categorical => MergeRule::PriorityLastWriter,
            FieldKind::List => MergeRule::Union,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source_id: String,
    pub value: FieldValue,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedValue {
    pub value: FieldValue,
    pub rule: MergeRule,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedRecord {
    pub category: Category,
    pub sources: Vec<String>,
    pub temporal: TemporalSummary,
    pub spatial: SpatialSummary,
    pub groups: BTreeMap<Group, BTreeMap<Field, FusedValue>>,
}

impl FusedRecord {
    pub fn field(&self, field: Field) -> Option<&FusedValue> {
        self.groups.get(&field.group()).and_then(|g| g.get(&field))
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        self.field(field).and_then(|v| v.value.as_number())
    }

    pub fn list(&self, field: Field) -> &[String] {
        self.field(field)
            .and_then(|v| v.value.as_list())
            .unwrap_or(&[])
    }

    pub fn has_group(&self, group: Group) -> bool {
        self.groups.get(&group).is_some_and(|g| !g.is_empty())
    }

    /// Every fused field, in group then field order.
    pub fn fields(&self) -> impl Iterator<Item = (&Field, &FusedValue)> {
        self.groups.values().flat_map(|g| g.iter())
    }
}

/// Inverse-distance weight. Sources without their own coordinates sit on the target.
pub fn inverse_distance_weight(distance_km: Option<f64>) -> f64 {
    1.0 / (1.0 + distance_km.unwrap_or(0.0).max(0.0))
}

#[derive(Debug, Clone)]
pub struct FusionEngine {
    pub spatial_radius_km: f64,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self {
            spatial_radius_km: 100.0,
        }
    }
}

impl FusionEngine {
    pub fn new(spatial_radius_km: f64) -> Self {
        Self { spatial_radius_km }
    }

    pub fn fuse(&self, records: &[NormalizedRecord], target: Location) -> FusedRecord {
        self.fuse_within(records, target, self.spatial_radius_km)
    }

    /// Fuse with a caller-chosen radius (the request's `radius_km`) instead of the
    /// configured default.
    pub fn fuse_within(&self, records: &[NormalizedRecord], target: Location, radius_km: f64) -> FusedRecord {
        let mut records: Vec<&NormalizedRecord> = records.iter().collect();
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let category = records
            .first()
            .map(|r| r.category)
            .unwrap_or(Category::Weather);

        let temporal = temporal_summary(&records);
        let spatial = spatial_summary(&records, target, radius_km);

        let mut per_field: BTreeMap<Field, Vec<(Priority, Contribution)>> = BTreeMap::new();
        for r in &records {
            let weight = inverse_distance_weight(spatial.distance_of(&r.source_id));
            for (field, value) in &r.fields {
                per_field.entry(*field).or_default().push((
                    r.priority,
                    Contribution {
                        source_id: r.source_id.clone(),
                        value: value.clone(),
                        weight,
                    },
                ));
            }
        }

        let mut groups: BTreeMap<Group, BTreeMap<Field, FusedValue>> = BTreeMap::new();
        for (field, contribs) in per_field {
            if let Some(fused) = merge_field(field, contribs) {
                groups.entry(field.group()).or_default().insert(field, fused);
            }
        }

        FusedRecord {
            category,
            sources: records.iter().map(|r| r.source_id.clone()).collect(),
            temporal,
            spatial,
            groups,
        }
    }
}

fn spatial_summary(records: &[&NormalizedRecord], target: Location, radius_km: f64) -> SpatialSummary {
    let distances = records
        .iter()
        .map(|r| {
            // Point-scoped payloads without coordinates describe the target itself.
            let d = r
                .coordinates
                .map(|c| haversine_km(c, target))
                .or(r.point_scoped.then_some(0.0));
            SourceDistance {
                source_id: r.source_id.clone(),
                distance_km: d,
                low_confidence: d.is_some_and(|d| d > radius_km),
            }
        })
        .collect();
    SpatialSummary {
        target,
        radius_km,
        distances,
    }
}

fn temporal_summary(records: &[&NormalizedRecord]) -> TemporalSummary {
    let newest = records.iter().map(|r| r.observed_at).max();
    let oldest = records.iter().map(|r| r.observed_at).min();
    let skew_secs = match (newest, oldest) {
        (Some(n), Some(o)) => (n - o).num_seconds(),
        _ => 0,
    };
    let lag_secs = match newest {
        Some(n) => records
            .iter()
            .map(|r| (r.source_id.clone(), (n - r.observed_at).num_seconds()))
            .collect(),
        None => BTreeMap::new(),
    };
    TemporalSummary {
        reference_time: newest,
        skew_secs,
        lag_secs,
    }
}

fn merge_field(field: Field, mut contribs: Vec<(Priority, Contribution)>) -> Option<FusedValue> {
    let rule = MergeRule::from(field.kind());
    let value = match rule {
        MergeRule::InverseDistanceMean => {
            let (sum, wsum) = contribs
                .iter()
                .filter_map(|(_, c)| c.value.as_number().map(|v| (v, c.weight)))
                .fold((0.0, 0.0), |(s, w), (v, cw)| (s + v * cw, w + cw));
            (wsum > 0.0).then(|| FieldValue::Number(sum / wsum))?
        }
        MergeRule::CircularMean => {
            let (sin, cos, n) = contribs
                .iter()
                .filter_map(|(_, c)| c.value.as_number().map(|v| (v.to_radians(), c.weight)))
                .fold((0.0, 0.0, 0usize), |(s, c, n), (rad, w)| {
                    (s + w * rad.sin(), c + w * rad.cos(), n + 1)
                });
            if n == 0 {
                return None;
            }
            FieldValue::Number(sin.atan2(cos).to_degrees().rem_euclid(360.0))
        }
        MergeRule::PriorityLastWriter => {
            // Stable: same-priority writers keep source-id order; HIGH writes last.
            contribs.sort_by_key(|(p, _)| p.rank());
            contribs
                .iter()
                .rev()
                .find_map(|(_, c)| c.value.as_text().map(|t| FieldValue::Text(t.to_string())))?
        }
        MergeRule::Union => {
            contribs.sort_by_key(|(p, _)| std::cmp::Reverse(p.rank()));
            let mut seen = HashSet::new();
            let mut items = Vec::new();
            for (_, c) in &contribs {
                for item in c.value.as_list().unwrap_or(&[]) {
                    if seen.insert(dedup_key(item)) {
                        items.push(item.clone());
                    }
                }
            }
            FieldValue::List(items)
        }
    };
    Some(FusedValue {
        value,
        rule,
        contributions: contribs.into_iter().map(|(_, c)| c).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn rec(id: &str, priority: Priority, at: Location, minutes_ago: i64) -> NormalizedRecord {
        NormalizedRecord {
            category: Category::Weather,
            source_id: id.to_string(),
            priority,
            fields: BTreeMap::new(),
            coordinates: Some(at),
            observed_at: Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago),
            quality_hint: None,
            point_scoped: false,
        }
    }

    fn with(mut r: NormalizedRecord, f: Field, v: FieldValue) -> NormalizedRecord {
        r.fields.insert(f, v);
        r
    }

    const HERE: Location = Location { lat: 25.76, lon: -80.19 };

    #[test]
    fn equal_distance_temperatures_average() {
        let rs = vec![
            with(rec("a", Priority::High, HERE, 0), Field::Temperature, FieldValue::Number(20.0)),
            with(rec("b", Priority::Medium, HERE, 0), Field::Temperature, FieldValue::Number(21.0)),
            with(rec("c", Priority::Low, HERE, 0), Field::Temperature, FieldValue::Number(22.0)),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        assert!((f.number(Field::Temperature).unwrap() - 21.0).abs() < 1e-9);
        assert_eq!(f.sources, vec!["a", "b", "c"]);
        assert_eq!(f.temporal.skew_secs, 0);
    }

    #[test]
    fn nearer_source_pulls_the_mean() {
        let far = Location::new(26.5, -80.19);
        let rs = vec![
            with(rec("near", Priority::Low, HERE, 0), Field::Pressure, FieldValue::Number(1000.0)),
            with(rec("far", Priority::Low, far, 0), Field::Pressure, FieldValue::Number(1020.0)),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        let p = f.number(Field::Pressure).unwrap();
        assert!(p < 1001.0, "got {p}");
        assert!(f.spatial.distance_of("far").unwrap() > 80.0);
    }

    #[test]
    fn far_sources_flagged_not_dropped() {
        let far = Location::new(30.0, -80.19);
        let rs = vec![
            with(rec("far", Priority::Low, far, 0), Field::Temperature, FieldValue::Number(10.0)),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        assert_eq!(f.sources, vec!["far"]);
        assert_eq!(f.spatial.low_confidence_sources(), vec!["far"]);
        assert!(!f.spatial.has_station_data());
    }

    #[test]
    fn wind_direction_wraps_around_north() {
        let rs = vec![
            with(rec("a", Priority::Low, HERE, 0), Field::WindDirection, FieldValue::Number(350.0)),
            with(rec("b", Priority::Low, HERE, 0), Field::WindDirection, FieldValue::Number(10.0)),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        let d = f.number(Field::WindDirection).unwrap();
        assert!(d < 0.5 || d > 359.5, "got {d}");
    }

    #[test]
    fn high_priority_wins_categorical() {
        let rs = vec![
            with(rec("z-high", Priority::High, HERE, 0), Field::Condition, FieldValue::Text("rain".into())),
            with(rec("a-low", Priority::Low, HERE, 0), Field::Condition, FieldValue::Text("clear".into())),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        assert_eq!(f.field(Field::Condition).unwrap().value, FieldValue::Text("rain".into()));
    }

    #[test]
    fn lists_union_without_duplicates() {
        let rs = vec![
            with(
                rec("a", Priority::Low, HERE, 0),
                Field::Alerts,
                FieldValue::List(vec!["Flood Warning".into(), "Heat Advisory".into()]),
            ),
            with(
                rec("b", Priority::High, HERE, 0),
                Field::Alerts,
                FieldValue::List(vec!["flood warning.".into()]),
            ),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        assert_eq!(f.list(Field::Alerts).len(), 2);
        assert_eq!(f.list(Field::Alerts)[0], "flood warning.");
    }

    #[test]
    fn temporal_reference_is_newest_and_skew_is_widest_gap() {
        let rs = vec![
            with(rec("a", Priority::Low, HERE, 0), Field::Temperature, FieldValue::Number(1.0)),
            with(rec("b", Priority::Low, HERE, 45), Field::Temperature, FieldValue::Number(1.0)),
        ];
        let f = FusionEngine::default().fuse(&rs, HERE);
        assert_eq!(f.temporal.skew_secs, 45 * 60);
        assert_eq!(f.temporal.lag_secs["b"], 45 * 60);
        assert_eq!(f.temporal.reference_time, Some(rs[0].observed_at));
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = with(rec("a", Priority::Low, HERE, 0), Field::Temperature, FieldValue::Number(1.0));
        let b = with(rec("b", Priority::High, HERE, 5), Field::Temperature, FieldValue::Number(3.0));
        let e = FusionEngine::default();
        assert_eq!(e.fuse(&[a.clone(), b.clone()], HERE), e.fuse(&[b, a], HERE));
    }

    #[test]
    fn point_scoped_record_without_coordinates_sits_on_target() {
        let mut img = with(rec("img", Priority::High, HERE, 0), Field::ImageUrl, FieldValue::Text("https://img/1.png".into()));
        img.coordinates = None;
        img.point_scoped = true;
        let mut global = rec("global", Priority::Low, HERE, 0);
        global.coordinates = None;

        let f = FusionEngine::default().fuse(&[img, global], HERE);
        assert_eq!(f.spatial.distance_of("img"), Some(0.0));
        assert_eq!(f.spatial.distance_of("global"), None);
        assert!(f.spatial.has_station_data());
    }

    #[test]
    fn request_radius_overrides_configured_radius() {
        let mid = Location::new(26.2, -80.19);
        let rs = vec![with(rec("mid", Priority::Low, mid, 0), Field::Temperature, FieldValue::Number(25.0))];
        let e = FusionEngine::default();

        let wide = e.fuse(&rs, HERE);
        assert!(wide.spatial.low_confidence_sources().is_empty());

        let narrow = e.fuse_within(&rs, HERE, 10.0);
        assert_eq!(narrow.spatial.radius_km, 10.0);
        assert_eq!(narrow.spatial.low_confidence_sources(), vec!["mid"]);
        assert!(!narrow.spatial.has_station_data());
    }
}
