use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters for one pipeline context.
#[derive(Debug, Default)]
pub struct PipelineStats {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
    narratives: AtomicU64,
}

impl PipelineStats {
    pub const fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            narratives: AtomicU64::new(0),
        }
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_narratives(&self) {
        self.narratives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            narratives: self.narratives.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub narratives: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let stats = PipelineStats::new();
        stats.inc_requests();
        stats.inc_requests();
        stats.inc_cache_hits();
        stats.inc_failures();
        let snap = stats.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.narratives, 0);
    }
}
