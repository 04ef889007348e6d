//! Per-caller token-bucket rate limiting.
//!
//! One bucket per caller id, created on first use with capacity = refill
//! rate = the caller's QPS. A background sweeper evicts buckets that have
//! been idle long enough; the next request rebuilds a full one. The map is
//! guarded by a reader-writer lock, each bucket by its own mutex, so the
//! common admission path is a read-lock plus one bucket lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sweeper period.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Buckets idle longer than this are evicted.
pub const MAX_BUCKET_IDLE: Duration = Duration::from_secs(600);

struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_rate: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(qps: u32) -> Self {
        Self {
            capacity: qps,
            tokens: qps,
            refill_rate: qps,
            last_refill: Instant::now(),
        }
    }

    /// Apply a QPS change from the caller record: rate and capacity follow
    /// the new value, tokens clamp to the new capacity.
    fn reconfigure(&mut self, qps: u32) {
        if self.refill_rate != qps {
            self.refill_rate = qps;
            self.capacity = qps;
            if self.tokens > self.capacity {
                self.tokens = self.capacity;
            }
        }
    }

    /// Refill whole-second earnings, then try to take one token.
    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.last_refill).as_secs();
        let earned = (elapsed_secs as u32).saturating_mul(self.refill_rate);
        if earned > 0 {
            self.tokens = self.tokens.saturating_add(earned).min(self.capacity);
            self.last_refill = now;
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_refill)
    }
}

/// Shared limiter state. Process-scoped: a horizontally scaled deployment
/// rate-limits per instance, not globally.
pub struct RateLimiterService {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiterService {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for the caller at the given QPS.
    pub fn try_acquire(&self, client_id: &str, qps: u32) -> bool {
        let qps = qps.max(1);
        let bucket = self.bucket_for(client_id, qps);

        let mut bucket = bucket.lock().expect("token bucket lock poisoned");
        bucket.reconfigure(qps);
        bucket.try_take()
    }

    fn bucket_for(&self, client_id: &str, qps: u32) -> Arc<Mutex<TokenBucket>> {
        {
            let buckets = self.buckets.read().expect("bucket map lock poisoned");
            if let Some(bucket) = buckets.get(client_id) {
                return bucket.clone();
            }
        }

        let mut buckets = self.buckets.write().expect("bucket map lock poisoned");
        // Re-check under the write lock so two racing requests share one bucket.
        if let Some(bucket) = buckets.get(client_id) {
            return bucket.clone();
        }

        debug!(client_id, qps, "created token bucket");
        let bucket = Arc::new(Mutex::new(TokenBucket::new(qps)));
        buckets.insert(client_id.to_string(), bucket.clone());
        bucket
    }

    /// Drop buckets idle longer than `max_idle`; returns how many were evicted.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().expect("bucket map lock poisoned");
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().expect("token bucket lock poisoned");
            bucket.idle_for(now) <= max_idle
        });
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().expect("bucket map lock poisoned").len()
    }

    /// Run the periodic eviction sweep until cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("rate limiter sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep(MAX_BUCKET_IDLE);
                        if evicted > 0 {
                            debug!(evicted, "evicted idle token buckets");
                        }
                    }
                }
            }
        })
    }
}

impl Default for RateLimiterService {
    fn default() -> Self {
        Self::new()
    }
}
