// src/types.rs
//! Shared domain types: request inputs, source metadata and per-source fetch outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque provider payload. Only the normalizer looks inside.
pub type RawPayload = serde_json::Value;

/// A geographic point in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Request category. Sources declare which of these they serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Weather,
    Ocean,
    Satellite,
    Events,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Weather,
        Category::Ocean,
        Category::Satellite,
        Category::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Weather => "WEATHER",
            Category::Ocean => "OCEAN",
            Category::Satellite => "SATELLITE",
            Category::Events => "EVENTS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WEATHER" => Ok(Category::Weather),
            "OCEAN" => Ok(Category::Ocean),
            "SATELLITE" | "IMAGERY" => Ok(Category::Satellite),
            "EVENTS" => Ok(Category::Events),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// Source priority. Orders categorical last-writer-wins merges (HIGH writes last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Higher rank wins a categorical merge.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

/// Optional request parameters forwarded to every source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchParams {
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub days: Option<u32>,
}

/// Why a source did not contribute to an aggregation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    SourceTimeout,
    SourceError,
    RateLimited,
    NormalizationSkipped,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::SourceTimeout => "SOURCE_TIMEOUT",
            FailureKind::SourceError => "SOURCE_ERROR",
            FailureKind::RateLimited => "RATE_LIMITED",
            FailureKind::NormalizationSkipped => "NORMALIZATION_SKIPPED",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure detail attached to an unsuccessful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// Outcome of one request to one source. Lives for a single aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub source_id: String,
    pub priority: Priority,
    pub payload: Option<RawPayload>,
    pub success: bool,
    pub error: Option<FetchFailure>,
    pub elapsed_ms: u64,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn ok(source_id: &str, priority: Priority, payload: RawPayload, elapsed_ms: u64) -> Self {
        Self {
            source_id: source_id.to_string(),
            priority,
            payload: Some(payload),
            success: true,
            error: None,
            elapsed_ms,
            fetched_at: Utc::now(),
        }
    }

    pub fn failed(
        source_id: &str,
        priority: Priority,
        kind: FailureKind,
        detail: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            priority,
            payload: None,
            success: false,
            error: Some(FetchFailure {
                kind,
                detail: detail.into(),
            }),
            elapsed_ms,
            fetched_at: Utc::now(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Diagnostic trail: which sources were tried and why each did or did not contribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source_id: String,
    pub contributed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

impl SourceAttempt {
    pub fn from_fetch(res: &FetchResult) -> Self {
        Self {
            source_id: res.source_id.clone(),
            contributed: res.success,
            failure: res.error.as_ref().map(|e| e.kind),
            detail: res.error.as_ref().map(|e| e.detail.clone()),
            elapsed_ms: res.elapsed_ms,
        }
    }

    /// Mark a fetched-but-unusable payload.
    pub fn skipped(mut self, detail: impl Into<String>) -> Self {
        self.contributed = false;
        self.failure = Some(FailureKind::NormalizationSkipped);
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("weather".parse::<Category>().unwrap(), Category::Weather);
        assert_eq!(" OCEAN ".parse::<Category>().unwrap(), Category::Ocean);
        assert_eq!("imagery".parse::<Category>().unwrap(), Category::Satellite);
        assert!("radar".parse::<Category>().is_err());
    }

    #[test]
    fn failure_kind_serializes_as_code() {
        let s = serde_json::to_string(&FailureKind::RateLimited).unwrap();
        assert_eq!(s, "\"RATE_LIMITED\"");
        assert_eq!(FailureKind::SourceTimeout.to_string(), "SOURCE_TIMEOUT");
    }

    #[test]
    fn priority_rank_orders_high_last() {
        assert!(Priority::High.rank() > Priority::Medium.rank());
        assert!(Priority::Medium.rank() > Priority::Low.rank());
    }

    #[test]
    fn location_validation() {
        assert!(Location::new(25.76, -80.19).is_valid());
        assert!(!Location::new(91.0, 0.0).is_valid());
        assert!(!Location::new(f64::NAN, 0.0).is_valid());
    }
}
