// src/normalize/fields.rs
//! Fixed field catalogue shared by every normalized record.
//!
//! Each field belongs to one semantic group and has a merge kind that decides how
//! the fusion engine combines values from several sources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic domain a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Weather,
    Ocean,
    Imagery,
    Events,
    Alerts,
}

/// How overlapping values are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Inverse-distance weighted mean.
    Continuous,
    /// Weighted circular mean (degrees).
    Angular,
    /// Last writer wins, ordered by source priority.
    Categorical,
    /// Union with de-duplication.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    // weather
    Temperature,
    WindSpeed,
    WindDirection,
    Pressure,
    Humidity,
    CloudCover,
    Precipitation,
    Condition,
    // ocean
    SeaSurfaceTemperature,
    WaveHeight,
    WavePeriod,
    Salinity,
    CurrentSpeed,
    // imagery
    ImageUrl,
    ImageCloudScore,
    // lists
    Events,
    Alerts,
}

impl Field {
    pub const ALL: [Field; 17] = [
        Field::Temperature,
        Field::WindSpeed,
        Field::WindDirection,
        Field::Pressure,
        Field::Humidity,
        Field::CloudCover,
        Field::Precipitation,
        Field::Condition,
        Field::SeaSurfaceTemperature,
        Field::WaveHeight,
        Field::WavePeriod,
        Field::Salinity,
        Field::CurrentSpeed,
        Field::ImageUrl,
        Field::ImageCloudScore,
        Field::Events,
        Field::Alerts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::WindSpeed => "wind_speed",
            Field::WindDirection => "wind_direction",
            Field::Pressure => "pressure",
            Field::Humidity => "humidity",
            Field::CloudCover => "cloud_cover",
            Field::Precipitation => "precipitation",
            Field::Condition => "condition",
            Field::SeaSurfaceTemperature => "sea_surface_temperature",
            Field::WaveHeight => "wave_height",
            Field::WavePeriod => "wave_period",
            Field::Salinity => "salinity",
            Field::CurrentSpeed => "current_speed",
            Field::ImageUrl => "image_url",
            Field::ImageCloudScore => "image_cloud_score",
            Field::Events => "events",
            Field::Alerts => "alerts",
        }
    }

    pub fn group(&self) -> Group {
        use Field::*;
        match self {
            Temperature | WindSpeed | WindDirection | Pressure | Humidity | CloudCover
            | Precipitation | Condition => Group::Weather,
            SeaSurfaceTemperature | WaveHeight | WavePeriod | Salinity | CurrentSpeed => {
                Group::Ocean
            }
            ImageUrl | ImageCloudScore => Group::Imagery,
            Events => Group::Events,
            Alerts => Group::Alerts,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::WindDirection => FieldKind::Angular,
            Field::Condition | Field::ImageUrl => FieldKind::Categorical,
            Field::Events | Field::Alerts => FieldKind::List,
            _ => FieldKind::Continuous,
        }
    }

    /// Spread over which two readings are considered to fully disagree.
    pub fn agreement_span(&self) -> f64 {
        match self {
            Field::Temperature => 20.0,
            Field::WindSpeed => 20.0,
            Field::WindDirection => 180.0,
            Field::Pressure => 50.0,
            Field::Humidity => 100.0,
            Field::CloudCover => 100.0,
            Field::Precipitation => 25.0,
            Field::SeaSurfaceTemperature => 10.0,
            Field::WaveHeight => 5.0,
            Field::WavePeriod => 10.0,
            Field::Salinity => 10.0,
            Field::CurrentSpeed => 2.0,
            Field::ImageCloudScore => 1.0,
            Field::Condition | Field::ImageUrl | Field::Events | Field::Alerts => 1.0,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Field::Temperature | Field::SeaSurfaceTemperature => "degC",
            Field::WindSpeed | Field::CurrentSpeed => "m/s",
            Field::WindDirection => "deg",
            Field::Pressure => "hPa",
            Field::Humidity | Field::CloudCover => "%",
            Field::Precipitation => "mm/h",
            Field::WaveHeight => "m",
            Field::WavePeriod => "s",
            Field::Salinity => "PSU",
            Field::ImageCloudScore => "ratio",
            Field::Condition | Field::ImageUrl | Field::Events | Field::Alerts => "",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_field_has_distinct_name() {
        let mut names: Vec<_> = Field::ALL.iter().map(|f| f.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Field::ALL.len());
    }

    #[test]
    fn serde_name_matches_name() {
        for f in Field::ALL {
            let s = serde_json::to_string(&f).unwrap();
            assert_eq!(s, format!("\"{}\"", f.name()));
        }
    }

    #[test]
    fn groups_and_kinds() {
        assert_eq!(Field::SeaSurfaceTemperature.group(), Group::Ocean);
        assert_eq!(Field::Alerts.group(), Group::Alerts);
        assert_eq!(Field::WindDirection.kind(), FieldKind::Angular);
        assert_eq!(Field::Condition.kind(), FieldKind::Categorical);
        assert_eq!(Field::Events.kind(), FieldKind::List);
        assert_eq!(Field::Pressure.kind(), FieldKind::Continuous);
    }
}
