// src/cache.rs
//! Result cache shared across concurrent aggregation calls.
//!
//! Entries hold the full `FusedResult` bundle plus creation time and TTL and
//! serialize to plain JSON, so the in-memory store and the file store are
//! interchangeable. Expired entries are dropped lazily on read.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::FusedResult;
use crate::geo::round_to;
use crate::types::{Category, FetchParams, Location};

/// `CATEGORY:lat:lon:radius:days`, coordinates rounded to a fixed precision so
/// nearby requests share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(category: Category, location: Location, params: &FetchParams, precision: u32) -> Self {
        let p = precision as usize;
        let radius = params
            .radius_km
            .map(|r| format!("{}", round_to(r, 3)))
            .unwrap_or_else(|| "-".to_string());
        let days = params
            .days
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        Self(format!(
            "{}:{:.p$}:{:.p$}:{}:{}",
            category,
            round_to(location.lat, precision),
            round_to(location.lon, precision),
            radius,
            days,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub result: FusedResult,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, result: FusedResult, ttl_secs: u64) -> Self {
        Self {
            key,
            result,
            created_at: Utc::now(),
            ttl_secs,
        }
    }

    /// Saturates instead of overflowing for absurd TTLs.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// TTL per category, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub weather: u64,
    pub ocean: u64,
    pub satellite: u64,
    pub events: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            weather: 600,
            ocean: 1800,
            satellite: 1800,
            events: 300,
        }
    }
}

impl CacheTtls {
    pub fn for_category(&self, category: Category) -> u64 {
        match category {
            Category::Weather => self.weather,
            Category::Ocean => self.ocean,
            Category::Satellite => self.satellite,
            Category::Events => self.events,
        }
    }
}

/// Key-value store with per-entry TTL. Writes to a key are last-writer-wins.
pub trait ResultCache: Send + Sync {
    /// Fresh entry for `key`, if any.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    fn put(&self, entry: CacheEntry);
    /// Returns whether an entry was present.
    fn remove(&self, key: &CacheKey) -> bool;
    /// Number of fresh entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        {
            let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match guard.get(key) {
                Some(e) if e.is_fresh() => return Some(e.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if guard.get(key).is_some_and(|e| !e.is_fresh()) {
            guard.remove(key);
            tracing::debug!(target: "cache", key = %key, "expired entry dropped");
        }
        None
    }

    fn put(&self, entry: CacheEntry) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(entry.key.clone(), entry);
    }

    fn remove(&self, key: &CacheKey) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(key).is_some()
    }

    fn len(&self) -> usize {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.values().filter(|e| e.is_fresh()).count()
    }
}

/// One JSON file per key under `dir`, written temp-then-rename.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        key.as_str().hash(&mut hasher);
        self.dir.join(format!("{:016x}.json", hasher.finish()))
    }

    fn read(path: &Path) -> Option<CacheEntry> {
        let s = fs::read_to_string(path).ok()?;
        serde_json::from_str(&s).ok()
    }

    /// Each writer gets its own temp file; the rename is the atomic insertion.
    fn write(&self, entry: &CacheEntry) -> io::Result<()> {
        let path = self.path_for(&entry.key);
        let json = serde_json::to_vec(entry).map_err(io::Error::other)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".entry-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path).map(|_| ()).map_err(|e| e.error)
    }
}

impl ResultCache for FileCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let entry = Self::read(&path)?;
        // hash collision guard
        if &entry.key != key {
            return None;
        }
        if entry.is_fresh() {
            Some(entry)
        } else {
            let _ = fs::remove_file(&path);
            tracing::debug!(target: "cache", key = %key, "expired file entry dropped");
            None
        }
    }

    fn put(&self, entry: CacheEntry) {
        if let Err(e) = self.write(&entry) {
            tracing::warn!(target: "cache", key = %entry.key, error = %e, "cache write failed");
        }
    }

    fn remove(&self, key: &CacheKey) -> bool {
        fs::remove_file(self.path_for(key)).is_ok()
    }

    fn len(&self) -> usize {
        let Ok(rd) = fs::read_dir(&self.dir) else {
            return 0;
        };
        rd.filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|p| Self::read(&p))
            .filter(CacheEntry::is_fresh)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::FusedResult;

    fn key(lat: f64) -> CacheKey {
        CacheKey::new(Category::Weather, Location::new(lat, -80.19), &FetchParams::default(), 4)
    }

    fn entry(k: CacheKey, ttl: u64) -> CacheEntry {
        CacheEntry::new(k.clone(), FusedResult::empty_for_tests(k), ttl)
    }

    #[test]
    fn key_rounds_coordinates_into_buckets() {
        assert_eq!(key(25.76001), key(25.76004));
        assert_ne!(key(25.7600), key(25.7602));
        assert_eq!(key(25.76).as_str(), "WEATHER:25.7600:-80.1900:-:-");

        let p = FetchParams {
            radius_km: Some(50.0),
            days: Some(7),
        };
        let k = CacheKey::new(Category::Events, Location::new(0.0, 0.0), &p, 2);
        assert_eq!(k.as_str(), "EVENTS:0.00:0.00:50:7");
    }

    #[test]
    fn memory_cache_expires_lazily() {
        let c = MemoryCache::new();
        let mut stale = entry(key(1.0), 1);
        stale.created_at = Utc::now() - Duration::seconds(5);
        c.put(stale);
        c.put(entry(key(2.0), 600));
        assert!(c.get(&key(1.0)).is_none());
        assert!(c.get(&key(2.0)).is_some());
        assert_eq!(c.len(), 1);
        assert!(c.remove(&key(2.0)));
        assert!(c.is_empty());
    }

    #[test]
    fn file_cache_roundtrips_and_expires() {
        let dir = tempfile::tempdir().unwrap();
        let c = FileCache::new(dir.path()).unwrap();
        let e = entry(key(3.0), 600);
        c.put(e.clone());
        assert_eq!(c.get(&key(3.0)), Some(e));
        assert_eq!(c.len(), 1);

        let mut stale = entry(key(4.0), 1);
        stale.created_at = Utc::now() - Duration::seconds(5);
        c.put(stale);
        assert!(c.get(&key(4.0)).is_none());
        assert_eq!(c.len(), 1);

        assert!(c.remove(&key(3.0)));
        assert!(!c.remove(&key(3.0)));
    }

    #[test]
    fn concurrent_writers_to_one_key_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let c = std::sync::Arc::new(FileCache::new(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        c.write(&entry(key(5.0), 600)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(c.get(&key(5.0)).is_some());
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_panicking() {
        let e = entry(key(6.0), u64::MAX);
        assert_eq!(e.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(e.is_fresh());
        let e = entry(key(6.0), 100_000_000_000_000_000);
        assert!(e.is_fresh());
    }

    #[test]
    fn ttl_defaults_per_category() {
        let t = CacheTtls::default();
        assert_eq!(t.for_category(Category::Events), 300);
        assert_eq!(t.for_category(Category::Ocean), 1800);
    }
}
