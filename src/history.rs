//! history.rs: bounded in-memory log of recent aggregation outcomes for `/debug/history`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Category;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub key: String,
    pub category: Category,
    /// `PASS`, `HIT`, `QUALITY_INSUFFICIENT` or `NO_SOURCES_AVAILABLE`.
    pub outcome: String,
    pub score: Option<f64>,
    pub sources: Vec<String>,
}

#[derive(Debug)]
pub struct History {
    inner: Mutex<Vec<HistoryEntry>>,
    cap: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(200)
    }
}

impl History {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, entry: HistoryEntry) {
        let mut v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<HistoryEntry> {
        let v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
