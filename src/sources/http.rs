// src/sources/http.rs
//! REST + query-string provider client. JSON bodies pass through untouched;
//! RSS alert feeds are flattened into `{"items": [{title, link, published}]}`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::json;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    OffsetDateTime, UtcOffset,
};

use crate::error::SourceError;
use crate::sources::{PayloadFormat, SourceClient, SourceDescriptor};
use crate::types::{Category, FetchParams, Location, RawPayload};

pub struct HttpSourceClient {
    descriptor: SourceDescriptor,
    http: reqwest::Client,
}

impl HttpSourceClient {
    pub fn new(descriptor: SourceDescriptor) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("enviro-fusion/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reqwest client")?;
        Ok(Self { descriptor, http })
    }

    /// Query-string pairs for one request: static params, then coordinates (or a
    /// bounding box) and the optional radius / days knobs. Per-request values
    /// replace a static param of the same name.
    pub fn query_pairs(&self, location: Location, params: &FetchParams) -> Vec<(String, String)> {
        let d = &self.descriptor;
        let mut out = d.query.clone();
        match &d.bbox_param {
            Some(name) => {
                out.insert(name.clone(), point_bbox(location));
            }
            None => {
                out.insert(d.lat_param.clone(), format!("{:.4}", location.lat));
                out.insert(d.lon_param.clone(), format!("{:.4}", location.lon));
            }
        }
        if let (Some(name), Some(r)) = (&d.radius_param, params.radius_km) {
            out.insert(name.clone(), format!("{r}"));
        }
        if let (Some(name), Some(days)) = (&d.days_param, params.days) {
            out.insert(name.clone(), days.to_string());
        }
        out.into_iter().collect()
    }
}

/// Half-width in degrees of the box sent to bbox-searched providers.
const BBOX_HALF_DEG: f64 = 0.01;

/// `minLon,minLat,maxLon,maxLat` around the point, clamped to valid ranges.
fn point_bbox(location: Location) -> String {
    let min_lon = (location.lon - BBOX_HALF_DEG).max(-180.0);
    let max_lon = (location.lon + BBOX_HALF_DEG).min(180.0);
    let min_lat = (location.lat - BBOX_HALF_DEG).max(-90.0);
    let max_lat = (location.lat + BBOX_HALF_DEG).min(90.0);
    format!("{min_lon:.4},{min_lat:.4},{max_lon:.4},{max_lat:.4}")
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn request(
        &self,
        location: Location,
        _category: Category,
        params: &FetchParams,
    ) -> Result<RawPayload, SourceError> {
        let resp = self
            .http
            .get(&self.descriptor.base_endpoint)
            .query(&self.query_pairs(location, params))
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        match self.descriptor.format {
            PayloadFormat::Json => {
                serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))
            }
            PayloadFormat::Rss => parse_rss(&body).map_err(|e| SourceError::Malformed(format!("{e:#}"))),
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.id
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

fn rfc2822_to_rfc3339(ts: &str) -> Option<String> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC))
        .and_then(|dt| dt.format(&Rfc3339).ok())
}

/// Flatten an RSS channel into a JSON document the normalizer can map.
pub fn parse_rss(xml: &str) -> Result<RawPayload> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

    let items: Vec<_> = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = it.title?.trim().to_string();
            if title.is_empty() {
                return None;
            }
            Some(json!({
                "title": title,
                "link": it.link,
                "published": it.pub_date.as_deref().and_then(rfc2822_to_rfc3339),
            }))
        })
        .collect();

    Ok(json!({ "items": items }))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
