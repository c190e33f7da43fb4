//! Adaptive TTL cache for analysis results.
//!
//! The TTL of an entry is picked when it is stored, from the record kind and
//! the age of the underlying record: recent data may still be reorganised or
//! re-indexed and gets a short TTL, settled data a long one. Lifetime is
//! measured from the entry's creation, so an entry never becomes valid again
//! once it has expired.
//!
//! All operations are best effort. A poisoned lock is logged and treated as a
//! miss instead of failing the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::RecordKind;

/// Fraction of `max_entries` left after an eviction round.
const RETAIN_NUMERATOR: usize = 4;
const RETAIN_DENOMINATOR: usize = 5;

/// Expiry chosen by record kind and age. The age is the record's age on
/// chain at insertion, not the entry's age in the cache; the chosen TTL then
/// runs from the entry's `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub fresh_threshold: Duration,
    pub fresh_ttl: Duration,
    pub settled_ttl: Duration,
}

impl TtlPolicy {
    pub const fn for_kind(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Transaction => Self {
                fresh_threshold: Duration::from_secs(10 * 60),
                fresh_ttl: Duration::from_secs(5 * 60),
                settled_ttl: Duration::from_secs(60 * 60),
            },
            RecordKind::Block => Self {
                fresh_threshold: Duration::from_secs(30 * 60),
                fresh_ttl: Duration::from_secs(5 * 60),
                settled_ttl: Duration::from_secs(30 * 60),
            },
        }
    }

    pub fn ttl(&self, record_age: Duration) -> Duration {
        if record_age < self.fresh_threshold {
            self.fresh_ttl
        } else {
            self.settled_ttl
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub kind: RecordKind,
    pub created_at: Instant,
    pub created_at_ms: u64,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub fingerprint: Option<String>,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Read-only view of an entry; reading it does not count as an access.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub kind: RecordKind,
    pub created_at_ms: u64,
    pub ttl_secs: u64,
    pub access_count: u64,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessStats {
    pub total_accesses: u64,
    pub avg_access_count: f64,
    pub most_accessed_key: Option<String>,
    pub oldest_entry_age_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub access_stats: AccessStats,
    pub kind_breakdown: BTreeMap<String, usize>,
}

struct Inner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct AdaptiveCache<T> {
    inner: Mutex<Inner<T>>,
    max_entries: usize,
}

/// SHA-256 over the JSON form of `data`, hex encoded.
pub fn fingerprint<T: Serialize>(data: &T) -> Option<String> {
    match serde_json::to_vec(data) {
        Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
        Err(err) => {
            debug!(error = %err, "cache value not serializable; storing without fingerprint");
            None
        }
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl<T: Clone + Serialize> AdaptiveCache<T> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner<T>>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("cache lock poisoned; treating operation as a miss");
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<T> {
        let mut inner = self.lock()?;
        match inner.entries.get(key).map(|entry| entry.is_expired(now)) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(true) => {
                inner.entries.remove(key);
                inner.misses += 1;
                debug!(key, "cache entry expired");
                return None;
            }
            Some(false) => {}
        }
        inner.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        entry.access_count += 1;
        Some(entry.data.clone())
    }

    /// Stores data that is treated as freshly produced.
    pub fn set(&self, key: &str, data: T, kind: RecordKind) {
        self.set_with_age(key, data, kind, Duration::ZERO);
    }

    /// Stores data whose underlying record is `record_age` old.
    pub fn set_with_age(&self, key: &str, data: T, kind: RecordKind, record_age: Duration) {
        self.set_at(key, data, kind, record_age, Instant::now());
    }

    pub(crate) fn set_at(
        &self,
        key: &str,
        data: T,
        kind: RecordKind,
        record_age: Duration,
        now: Instant,
    ) {
        let Some(mut inner) = self.lock() else {
            return;
        };
        let fingerprint = fingerprint(&data);
        let ttl = TtlPolicy::for_kind(kind).ttl(record_age);

        let unchanged = fingerprint.is_some()
            && inner
                .entries
                .get(key)
                .is_some_and(|existing| existing.fingerprint == fingerprint);
        if unchanged {
            if let Some(existing) = inner.entries.get_mut(key) {
                existing.created_at = now;
                existing.created_at_ms = unix_ms();
                existing.ttl = ttl;
            }
            debug!(key, "cache entry unchanged; refreshed timestamp");
            return;
        }
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            self.evict(&mut inner, now);
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                kind,
                created_at: now,
                created_at_ms: unix_ms(),
                last_accessed_at: now,
                access_count: 0,
                fingerprint,
                ttl,
            },
        );
    }

    /// Drops expired entries, then least recently accessed ones until one
    /// insertion leaves the cache at 80% of capacity.
    fn evict(&self, inner: &mut Inner<T>, now: Instant) {
        let target = self.max_entries * RETAIN_NUMERATOR / RETAIN_DENOMINATOR;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));

        let excess = (inner.entries.len() + 1).saturating_sub(target);
        if excess > 0 {
            let mut by_access: Vec<(Instant, String)> = inner
                .entries
                .iter()
                .map(|(key, entry)| (entry.last_accessed_at, key.clone()))
                .collect();
            by_access.sort();
            for (_, key) in by_access.into_iter().take(excess) {
                inner.entries.remove(&key);
            }
        }

        let removed = before - inner.entries.len();
        inner.evictions += removed as u64;
        debug!(removed, remaining = inner.entries.len(), "cache eviction round");
    }

    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .is_some_and(|inner| inner.entries.get(key).is_some_and(|e| !e.is_expired(now)))
    }

    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        let inner = self.lock()?;
        inner.entries.get(key).map(|entry| EntryMetadata {
            kind: entry.kind,
            created_at_ms: entry.created_at_ms,
            ttl_secs: entry.ttl.as_secs(),
            access_count: entry.access_count,
            fingerprint: entry.fingerprint.clone(),
        })
    }

    pub fn clean_expired(&self) -> usize {
        self.clean_expired_at(Instant::now())
    }

    pub(crate) fn clean_expired_at(&self, now: Instant) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        before - inner.entries.len()
    }

    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !pattern.is_match(key));
        let removed = before - inner.entries.len();
        if removed > 0 {
            info!(pattern = %pattern, removed, "invalidated cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        if let Some(mut inner) = self.lock() {
            inner.entries.clear();
            inner.hits = 0;
            inner.misses = 0;
            inner.evictions = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let Some(inner) = self.lock() else {
            return CacheStats {
                size: 0,
                max_size: self.max_entries,
                hits: 0,
                misses: 0,
                hit_rate: 0.0,
                evictions: 0,
                access_stats: AccessStats {
                    total_accesses: 0,
                    avg_access_count: 0.0,
                    most_accessed_key: None,
                    oldest_entry_age_secs: None,
                },
                kind_breakdown: BTreeMap::new(),
            };
        };

        let mut kind_breakdown = BTreeMap::new();
        for entry in inner.entries.values() {
            *kind_breakdown.entry(entry.kind.to_string()).or_insert(0) += 1;
        }
        let total_accesses: u64 = inner.entries.values().map(|e| e.access_count).sum();
        let size = inner.entries.len();
        let lookups = inner.hits + inner.misses;

        CacheStats {
            size,
            max_size: self.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (inner.hits * 10_000 / lookups) as f64 / 100.0
            },
            evictions: inner.evictions,
            access_stats: AccessStats {
                total_accesses,
                avg_access_count: if size == 0 {
                    0.0
                } else {
                    total_accesses as f64 / size as f64
                },
                most_accessed_key: inner
                    .entries
                    .iter()
                    .max_by(|a, b| a.1.access_count.cmp(&b.1.access_count).then(b.0.cmp(a.0)))
                    .map(|(key, _)| key.clone()),
                oldest_entry_age_secs: inner
                    .entries
                    .values()
                    .map(|e| now.saturating_duration_since(e.created_at).as_secs())
                    .max(),
            },
            kind_breakdown,
        }
    }
}

/// Periodically drops expired entries until the returned task is aborted.
pub fn spawn_sweeper<T>(cache: Arc<AdaptiveCache<T>>, every: Duration) -> JoinHandle<()>
where
    T: Clone + Serialize + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.clean_expired();
            if removed > 0 {
                info!(removed, remaining = cache.len(), "cache sweep");
            } else {
                debug!("cache sweep found nothing to remove");
            }
        }
    })
}
