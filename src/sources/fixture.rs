// src/sources/fixture.rs
//! In-process client serving a fixed response. Used by tests and offline runs
//! (`FUSION_FIXTURES_DIR`), never talks to the network.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::SourceError;
use crate::sources::SourceClient;
use crate::types::{Category, FetchParams, Location, RawPayload};

enum Mode {
    Payload(RawPayload),
    Status(u16),
    Malformed(String),
}

pub struct FixtureClient {
    name: String,
    mode: Mode,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FixtureClient {
    pub fn payload(name: &str, payload: RawPayload) -> Self {
        Self::with_mode(name, Mode::Payload(payload))
    }

    /// Always answers with a non-success status.
    pub fn status(name: &str, status: u16) -> Self {
        Self::with_mode(name, Mode::Status(status))
    }

    /// Always answers with an undecodable body.
    pub fn malformed(name: &str, detail: &str) -> Self {
        Self::with_mode(name, Mode::Malformed(detail.to_string()))
    }

    /// Load a JSON fixture from disk.
    pub fn from_file(name: &str, path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let v: RawPayload =
            serde_json::from_str(&s).with_context(|| format!("parsing fixture {}", path.display()))?;
        Ok(Self::payload(name, v))
    }

    fn with_mode(name: &str, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulate network latency before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for FixtureClient {
    async fn request(
        &self,
        _location: Location,
        _category: Category,
        _params: &FetchParams,
    ) -> Result<RawPayload, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match &self.mode {
            Mode::Payload(v) => Ok(v.clone()),
            Mode::Status(code) => Err(SourceError::Status(*code)),
            Mode::Malformed(detail) => Err(SourceError::Malformed(detail.clone())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
