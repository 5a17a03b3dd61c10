//! Token-bucket rate limiter, one bucket per client key.
//!
//! Adapted from the `refill_and_try_consume`/`DashMap`-backed bucket pattern used by the
//! rate-limit crate in the example pack, generalized to the gateway's `Allow(key) ->
//! (ok, retry_after)` contract with an optional bounded wait and idle-bucket eviction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

fn refill(tokens: &mut f64, last_refill: &mut Instant, capacity: f64, refill_per_sec: f64) {
    let now = Instant::now();
    let elapsed = now.duration_since(*last_refill).as_secs_f64();
    *tokens = (*tokens + elapsed * refill_per_sec).min(capacity);
    *last_refill = now;
}

/// Per-client-key token bucket rate limiter.
///
/// Capacity is `requests_per_minute`; refill rate is `capacity / 60` tokens/sec. A limiter
/// with `requests_per_minute <= 0` is disabled and always allows.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    capacity: f64,
    refill_per_sec: f64,
    enabled: bool,
    max_wait: Duration,
    idle_grace: Duration,
}

/// Outcome of an [`RateLimiter::allow`] check: whether the request may proceed, and if
/// not, how long (in seconds) the caller should wait before retrying.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub ok: bool,
    pub retry_after_secs: u64,
}

impl RateLimiter {
    /// `requests_per_minute <= 0` disables limiting entirely. `rate_limit_max_wait_seconds`
    /// bounds how long [`allow_or_wait`](Self::allow_or_wait) will suspend before giving up.
    pub fn new(requests_per_minute: i64, max_wait: Duration, idle_grace: Duration) -> Arc<Self> {
        let enabled = requests_per_minute > 0;
        let capacity = requests_per_minute.max(0) as f64;
        Arc::new(Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_sec: capacity / 60.0,
            enabled,
            max_wait,
            idle_grace,
        })
    }

    /// Non-blocking check: consumes a token for `key` if one is available.
    pub fn allow(&self, key: &str) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision {
                ok: true,
                retry_after_secs: 0,
            };
        }

        let now = Instant::now();
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| TokenBucket {
            tokens: self.capacity,
            last_refill: now,
            last_seen: now,
        });

        let bucket = entry.value_mut();
        refill(
            &mut bucket.tokens,
            &mut bucket.last_refill,
            self.capacity,
            self.refill_per_sec,
        );
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision {
                ok: true,
                retry_after_secs: 0,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = if self.refill_per_sec > 0.0 {
                (deficit / self.refill_per_sec).ceil() as u64
            } else {
                u64::MAX
            };
            RateLimitDecision {
                ok: false,
                retry_after_secs: wait_secs.max(1),
            }
        }
    }

    /// Suspends up to `rate_limit_max_wait_seconds` (configured at construction) before
    /// giving up, per the dispatcher's optional bounded-wait policy.
    pub async fn allow_or_wait(&self, key: &str) -> RateLimitDecision {
        let first = self.allow(key);
        if first.ok || self.max_wait.is_zero() {
            return first;
        }

        let deadline = Instant::now() + self.max_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.allow(key);
            }
            let sleep_for = Duration::from_millis(100).min(remaining);
            tokio::time::sleep(sleep_for).await;
            let decision = self.allow(key);
            if decision.ok || Instant::now() >= deadline {
                return decision;
            }
        }
    }

    /// Drops buckets idle longer than the configured grace window.
    pub fn evict_idle(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < self.idle_grace);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Spawns a periodic idle-bucket eviction task.
    pub fn spawn_evictor(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                limiter.evict_idle();
            }
        })
    }
}

/// Resolves the rate-limit key per the gateway's precedence: session id when present, else
/// the transport-provided remote identity, else a constant fallback.
pub fn rate_limit_key(session_id: Option<&str>, remote_identity: Option<&str>) -> String {
    session_id
        .or(remote_identity)
        .unwrap_or("__anonymous__")
        .to_string()
}
