//! Token bucket guarding the analysis pipeline.
//!
//! Tokens accrue at `refill_per_sec` up to `capacity`; each request takes one.
//! An empty bucket rejects the request outright instead of queueing it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Bucket that admits bursts of `per_sec` and refills at the same rate.
    pub fn per_second(per_sec: u32) -> Self {
        let rate = f64::from(per_sec.max(1));
        Self {
            capacity: rate,
            refill_per_sec: rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> bool {
        let Ok(mut bucket) = self.bucket.lock() else {
            warn!("rate limiter lock poisoned; admitting request");
            return true;
        };
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = bucket.last_refill.max(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next request would be admitted.
    pub fn wait_time(&self) -> Duration {
        self.wait_time_at(Instant::now())
    }

    pub(crate) fn wait_time_at(&self, now: Instant) -> Duration {
        let Ok(bucket) = self.bucket.lock() else {
            return Duration::ZERO;
        };
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        let tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        let deficit = 1.0 - tokens;
        if deficit <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}
