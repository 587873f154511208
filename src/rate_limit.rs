//! Per-source request budgets.
//!
//! Each source gets a GCRA limiter with burst 1 and a replenish period of
//! `3600s / hourly_budget`, i.e. a minimum spacing between granted calls.
//! Nothing is queued: a denied caller gets the remaining wait and decides
//! for itself whether to wait, skip or fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultDirectRateLimiter, Quota,
};

use crate::sources::SourceDescriptor;

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Denied { wait: Duration },
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted)
    }
}

pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
    interval: Duration,
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Build a limiter for `hourly_budget` requests per hour (must be >= 1).
    pub fn per_hour(hourly_budget: u32) -> Result<Self> {
        if hourly_budget == 0 {
            return Err(anyhow!("hourly budget must be at least 1"));
        }
        let interval = Duration::from_secs_f64(3600.0 / hourly_budget as f64);
        let quota = Quota::with_period(interval)
            .ok_or_else(|| anyhow!("invalid replenish period {interval:?}"))?;
        Ok(Self {
            limiter: governor::RateLimiter::direct(quota),
            clock: DefaultClock::default(),
            interval,
            last_granted: Mutex::new(None),
        })
    }

    /// Minimum spacing between two granted calls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Grant a slot if the minimum interval has elapsed since the last grant.
    /// Atomic across concurrent callers.
    pub fn try_acquire(&self) -> Acquire {
        match self.limiter.check() {
            Ok(()) => {
                if let Ok(mut g) = self.last_granted.lock() {
                    *g = Some(Instant::now());
                }
                Acquire::Granted
            }
            Err(not_until) => Acquire::Denied {
                wait: not_until.wait_time_from(self.clock.now()),
            },
        }
    }

    /// Remaining time until the next slot opens (zero if one is open now).
    pub fn wait_time(&self) -> Duration {
        let last = self.last_granted.lock().ok().and_then(|g| *g);
        match last {
            Some(at) => self.interval.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Wait until a slot is available, then take it.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
        if let Ok(mut g) = self.last_granted.lock() {
            *g = Some(Instant::now());
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .finish()
    }
}

/// Shared limiter service, one limiter per source id. Injected into the orchestrator
/// and shared across concurrent aggregation calls.
#[derive(Debug, Default, Clone)]
pub struct RateLimiters {
    inner: Arc<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiters {
    pub fn from_descriptors(descriptors: &[SourceDescriptor]) -> Result<Self> {
        let mut map = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            let limiter = RateLimiter::per_hour(d.hourly_budget)
                .map_err(|e| anyhow!("source '{}': {e}", d.id))?;
            map.insert(d.id.clone(), Arc::new(limiter));
        }
        Ok(Self {
            inner: Arc::new(map),
        })
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<RateLimiter>> {
        self.inner.get(source_id).cloned()
    }

    /// Sources without a registered limiter are not budgeted and always granted.
    pub fn try_acquire(&self, source_id: &str) -> Acquire {
        match self.inner.get(source_id) {
            Some(l) => l.try_acquire(),
            None => Acquire::Granted,
        }
    }

    pub fn wait_time(&self, source_id: &str) -> Duration {
        self.inner
            .get(source_id)
            .map(|l| l.wait_time())
            .unwrap_or(Duration::ZERO)
    }
}
