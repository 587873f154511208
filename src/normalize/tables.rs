// src/normalize/tables.rs
//! Mapping tables: where each field lives in a provider payload and how to convert it.
//!
//! Paths are JSON pointers (RFC 6901). List fields point at an array; `item`
//! selects the text inside each element (or the element itself when absent).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::normalize::fields::{Field, FieldKind, FieldValue};
use crate::normalize::text::normalize_text;
use crate::types::{Category, Location};

/// How the observation timestamp is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// RFC 3339, zone-less ISO date-time (read as UTC) or plain date.
    Iso,
    UnixSeconds,
    UnixMillis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub field: Field,
    pub path: String,
    pub item: Option<String>,
    pub scale: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    pub fields: Vec<FieldMapping>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub time: Option<(String, TimeFormat)>,
    pub quality_hint_path: Option<String>,
    pub quality_hint: Option<f64>,
    /// Payload describes the queried point (imagery looked up by coordinates).
    pub point_scoped: bool,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(self, field: Field, path: &str) -> Self {
        self.map_scaled(field, path, 1.0, 0.0)
    }

    /// `value * scale + offset`, e.g. km/h -> m/s is `scale = 1/3.6`.
    pub fn map_scaled(mut self, field: Field, path: &str, scale: f64, offset: f64) -> Self {
        self.fields.push(FieldMapping {
            field,
            path: path.to_string(),
            item: None,
            scale,
            offset,
        });
        self
    }

    pub fn list(mut self, field: Field, path: &str, item: Option<&str>) -> Self {
        self.fields.push(FieldMapping {
            field,
            path: path.to_string(),
            item: item.map(str::to_string),
            scale: 1.0,
            offset: 0.0,
        });
        self
    }

    pub fn coords(mut self, lat: &str, lon: &str) -> Self {
        self.lat = Some(lat.to_string());
        self.lon = Some(lon.to_string());
        self
    }

    pub fn time(mut self, path: &str, format: TimeFormat) -> Self {
        self.time = Some((path.to_string(), format));
        self
    }

    pub fn hint(mut self, hint: f64) -> Self {
        self.quality_hint = Some(hint);
        self
    }

    pub fn hint_path(mut self, path: &str) -> Self {
        self.quality_hint_path = Some(path.to_string());
        self
    }

    pub fn point_scoped(mut self) -> Self {
        self.point_scoped = true;
        self
    }

    /// Table for payloads that already use canonical field names at the top level:
    /// `{"temperature": 21.0, "lat": .., "lon": .., "observed_at": "..", "quality": 0.9}`.
    pub fn canonical() -> Self {
        let mut t = MappingTable::new()
            .coords("/lat", "/lon")
            .time("/observed_at", TimeFormat::Iso)
            .hint_path("/quality");
        for f in Field::ALL {
            let path = format!("/{}", f.name());
            t = match f.kind() {
                FieldKind::List => t.list(f, &path, None),
                _ => t.map(f, &path),
            };
        }
        t
    }

    /// Pull every mapped field that is present and well-typed. Missing values stay missing.
    pub fn extract_fields(&self, payload: &Value) -> Vec<(Field, FieldValue)> {
        let mut out = Vec::new();
        for m in &self.fields {
            let Some(raw) = payload.pointer(&m.path) else {
                continue;
            };
            let value = match m.field.kind() {
                FieldKind::Continuous | FieldKind::Angular => {
                    as_f64(raw).map(|n| FieldValue::Number(n * m.scale + m.offset))
                }
                FieldKind::Categorical => raw
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| FieldValue::Text(s.to_string())),
                FieldKind::List => extract_list(raw, m.item.as_deref()).map(FieldValue::List),
            };
            if let Some(v) = value {
                out.push((m.field, v));
            }
        }
        out
    }

    pub fn extract_coordinates(&self, payload: &Value) -> Option<Location> {
        let lat = payload.pointer(self.lat.as_deref()?).and_then(as_f64)?;
        let lon = payload.pointer(self.lon.as_deref()?).and_then(as_f64)?;
        let loc = Location::new(lat, lon);
        loc.is_valid().then_some(loc)
    }

    pub fn extract_time(&self, payload: &Value) -> Option<DateTime<Utc>> {
        let (path, format) = self.time.as_ref()?;
        let raw = payload.pointer(path)?;
        match format {
            TimeFormat::Iso => raw.as_str().and_then(parse_iso),
            TimeFormat::UnixSeconds => as_f64(raw).and_then(|s| Utc.timestamp_opt(s as i64, 0).single()),
            TimeFormat::UnixMillis => as_f64(raw).and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        }
    }

    pub fn extract_quality_hint(&self, payload: &Value) -> Option<f64> {
        self.quality_hint_path
            .as_deref()
            .and_then(|p| payload.pointer(p))
            .and_then(as_f64)
            .or(self.quality_hint)
            .map(|h| h.clamp(0.0, 1.0))
    }
}

/// Numbers may arrive as JSON numbers or numeric strings; sentinels like "MM" are missing.
fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn extract_list(raw: &Value, item: Option<&str>) -> Option<Vec<String>> {
    let arr = raw.as_array()?;
    let out = arr
        .iter()
        .filter_map(|el| match item {
            Some(p) => el.pointer(p).and_then(Value::as_str),
            None => el.as_str(),
        })
        .map(normalize_text)
        .filter(|s| !s.is_empty())
        .collect();
    Some(out)
}

pub(crate) fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&n));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n))
}

/// Built-in tables for the seeded providers, keyed by (source id, category).
pub fn builtin() -> Vec<(&'static str, Category, MappingTable)> {
    const KMH: f64 = 1.0 / 3.6;

    let open_meteo = MappingTable::new()
        .map(Field::Temperature, "/current/temperature_2m")
        .map(Field::Humidity, "/current/relative_humidity_2m")
        .map(Field::Precipitation, "/current/precipitation")
        .map(Field::CloudCover, "/current/cloud_cover")
        .map(Field::Pressure, "/current/surface_pressure")
        .map_scaled(Field::WindSpeed, "/current/wind_speed_10m", KMH, 0.0)
        .map(Field::WindDirection, "/current/wind_direction_10m")
        .coords("/latitude", "/longitude")
        .time("/current/time", TimeFormat::Iso)
        .hint(0.85);

    let openweathermap = MappingTable::new()
        .map(Field::Temperature, "/main/temp")
        .map(Field::Humidity, "/main/humidity")
        .map(Field::Pressure, "/main/pressure")
        .map(Field::WindSpeed, "/wind/speed")
        .map(Field::WindDirection, "/wind/deg")
        .map(Field::CloudCover, "/clouds/all")
        .map(Field::Precipitation, "/rain/1h")
        .map(Field::Condition, "/weather/0/description")
        .coords("/coord/lat", "/coord/lon")
        .time("/dt", TimeFormat::UnixSeconds)
        .hint(0.8);

    let marine = MappingTable::new()
        .map(Field::SeaSurfaceTemperature, "/current/sea_surface_temperature")
        .map(Field::WaveHeight, "/current/wave_height")
        .map(Field::WavePeriod, "/current/wave_period")
        .map_scaled(Field::CurrentSpeed, "/current/ocean_current_velocity", KMH, 0.0)
        .coords("/latitude", "/longitude")
        .time("/current/time", TimeFormat::Iso)
        .hint(0.85);

    let buoy = MappingTable::new()
        .map(Field::SeaSurfaceTemperature, "/observation/water_temperature")
        .map(Field::WaveHeight, "/observation/wave_height")
        .map(Field::WavePeriod, "/observation/dominant_period")
        .map(Field::Salinity, "/observation/salinity")
        .map(Field::Temperature, "/observation/air_temperature")
        .map(Field::WindSpeed, "/observation/wind_speed")
        .map(Field::WindDirection, "/observation/wind_direction")
        .map(Field::Pressure, "/observation/pressure")
        .coords("/station/lat", "/station/lon")
        .time("/observation/time", TimeFormat::Iso)
        .hint(0.9);

    let imagery = MappingTable::new()
        .map(Field::ImageUrl, "/url")
        .map(Field::ImageCloudScore, "/cloud_score")
        .time("/date", TimeFormat::Iso)
        .point_scoped()
        .hint(0.8);

    let stac = MappingTable::new()
        .map(Field::ImageUrl, "/features/0/assets/thumbnail/href")
        .map_scaled(Field::ImageCloudScore, "/features/0/properties/eo:cloud_cover", 0.01, 0.0)
        .time("/features/0/properties/datetime", TimeFormat::Iso)
        .point_scoped()
        .hint(0.8);

    let eonet = MappingTable::new()
        .list(Field::Events, "/events", Some("/title"))
        .hint(0.9);

    let usgs = MappingTable::new()
        .list(Field::Events, "/features", Some("/properties/title"))
        .coords("/features/0/geometry/coordinates/1", "/features/0/geometry/coordinates/0")
        .time("/metadata/generated", TimeFormat::UnixMillis)
        .hint(0.85);

    let nws = MappingTable::new()
        .list(Field::Alerts, "/items", Some("/title"))
        .time("/items/0/published", TimeFormat::Iso)
        .hint(0.75);

    vec![
        ("open-meteo", Category::Weather, open_meteo),
        ("openweathermap", Category::Weather, openweathermap),
        ("open-meteo-marine", Category::Ocean, marine),
        ("ndbc-buoy", Category::Ocean, buoy.clone()),
        ("ndbc-buoy", Category::Weather, buoy),
        ("nasa-earth-imagery", Category::Satellite, imagery),
        ("earth-search-stac", Category::Satellite, stac),
        ("nasa-eonet", Category::Events, eonet),
        ("usgs-earthquakes", Category::Events, usgs),
        ("nws-alerts", Category::Events, nws),
    ]
}
