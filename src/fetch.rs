// src/fetch.rs
//! Fetch orchestrator: concurrent fan-out to every eligible source for one request.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;

use crate::rate_limit::{Acquire, RateLimiters};
use crate::sources::{fetch_with_timeout, SourceRegistry};
use crate::types::{Category, FailureKind, FetchParams, FetchResult, Location};

#[derive(Clone)]
pub struct FetchOrchestrator {
    registry: SourceRegistry,
    limiters: RateLimiters,
    timeout: Duration,
}

impl FetchOrchestrator {
    pub fn new(registry: SourceRegistry, limiters: RateLimiters, timeout: Duration) -> Self {
        Self {
            registry,
            limiters,
            timeout,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of sources declaring `category`.
    pub fn eligible_count(&self, category: Category) -> usize {
        self.registry.eligible(category).len()
    }

    /// One entry per eligible source. Rate-limited sources are recorded as
    /// `RATE_LIMITED` without dispatch; every dispatched call settles before return.
    pub async fn fetch_all(
        &self,
        location: Location,
        category: Category,
        params: &FetchParams,
    ) -> BTreeMap<String, FetchResult> {
        let mut out = BTreeMap::new();
        let mut dispatched = Vec::new();

        for source in self.registry.eligible(category) {
            let id = source.descriptor.id.as_str();
            match self.limiters.try_acquire(id) {
                Acquire::Granted => dispatched.push(fetch_with_timeout(
                    source,
                    location,
                    category,
                    params,
                    self.timeout,
                )),
                Acquire::Denied { wait } => {
                    tracing::warn!(
                        target: "fetch",
                        source = id,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited; skipped"
                    );
                    counter!(
                        "fusion_source_requests_total",
                        "source" => id.to_string(),
                        "outcome" => FailureKind::RateLimited.code()
                    )
                    .increment(1);
                    out.insert(
                        id.to_string(),
                        FetchResult::failed(
                            id,
                            source.descriptor.priority,
                            FailureKind::RateLimited,
                            format!("next slot in {} ms", wait.as_millis()),
                            0,
                        ),
                    );
                }
            }
        }

        for res in join_all(dispatched).await {
            out.insert(res.source_id.clone(), res);
        }

        let ok = out.values().filter(|r| r.success).count();
        tracing::debug!(
            target: "fetch",
            category = %category,
            total = out.len(),
            ok,
            "fan-out settled"
        );
        out
    }
}
