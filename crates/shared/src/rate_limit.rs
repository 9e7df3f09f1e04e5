//! Token-bucket rate limiting for credential-issuing endpoints
//!
//! Buckets are keyed by `(EndpointClass, client IP)` and created lazily on
//! first request from a key. Refill is interval-based: the full capacity is
//! restored at the window boundary rather than dripped smoothly. That is a
//! deliberate simplification for abuse deterrence, not traffic smoothing.
//!
//! State is node-local and in-memory only; correctness is best effort per
//! node, never global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

/// Maximum tracked buckets. If an attacker churns through many unique source
/// IPs, the oldest buckets are evicted to keep memory bounded.
const MAX_BUCKETS: usize = 10_000;

/// Endpoint classes gated by the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Login,
    Refresh,
    Register,
    PasswordReset,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Login => "login",
            EndpointClass::Refresh => "refresh",
            EndpointClass::Register => "register",
            EndpointClass::PasswordReset => "password_reset",
        }
    }
}

/// Per-class limit: how many requests fit in one refill window
#[derive(Debug, Clone, Copy)]
pub struct ClassLimit {
    pub capacity: u32,
    pub window: Duration,
}

impl ClassLimit {
    pub fn new(capacity: u32, window_minutes: u64) -> Self {
        Self {
            capacity,
            window: Duration::from_secs(window_minutes * 60),
        }
    }
}

/// Limits for every gated endpoint class
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub login: ClassLimit,
    pub refresh: ClassLimit,
    pub register: ClassLimit,
    pub password_reset: ClassLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: ClassLimit::new(5, 15),
            refresh: ClassLimit::new(10, 15),
            register: ClassLimit::new(3, 60),
            password_reset: ClassLimit::new(3, 60),
        }
    }
}

impl RateLimitConfig {
    fn limit_for(&self, class: EndpointClass) -> ClassLimit {
        match class {
            EndpointClass::Login => self.login,
            EndpointClass::Refresh => self.refresh,
            EndpointClass::Register => self.register,
            EndpointClass::PasswordReset => self.password_reset,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Rejected; the caller should retry after the remaining window
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Counter state for one `(endpoint class, client IP)` key
#[derive(Debug)]
struct Bucket {
    tokens: u32,
    window_started_at: Instant,
}

type BucketKey = (EndpointClass, String);
type BucketMap = HashMap<BucketKey, Arc<Mutex<Bucket>>>;

/// Node-local token-bucket rate limiter
///
/// The outer map takes a read lock on the hot path; each bucket has its own
/// lock so contention on a popular key (e.g. a shared NAT address) does not
/// serialize unrelated keys.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<RwLock<BucketMap>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Consume one token for `(class, client_ip)`
    pub async fn try_consume(&self, class: EndpointClass, client_ip: &str) -> Decision {
        self.try_consume_at(class, client_ip, Instant::now()).await
    }

    /// Consume one token, evaluating windows against an explicit instant
    pub async fn try_consume_at(
        &self,
        class: EndpointClass,
        client_ip: &str,
        now: Instant,
    ) -> Decision {
        let limit = self.config.limit_for(class);
        let bucket = self.bucket_for(class, client_ip, now).await;
        let mut bucket = bucket.lock().await;

        let elapsed = now.saturating_duration_since(bucket.window_started_at);
        if elapsed >= limit.window {
            // Interval refill: restore the whole capacity at once
            bucket.tokens = limit.capacity;
            bucket.window_started_at = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Decision::Allowed
        } else {
            let remaining = limit
                .window
                .saturating_sub(now.saturating_duration_since(bucket.window_started_at));
            Decision::Limited {
                retry_after: remaining,
            }
        }
    }

    async fn bucket_for(
        &self,
        class: EndpointClass,
        client_ip: &str,
        now: Instant,
    ) -> Arc<Mutex<Bucket>> {
        let key = (class, client_ip.to_string());

        // Fast path: existing bucket under a read lock
        if let Some(bucket) = self.buckets.read().await.get(&key) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;

        // Evict the stalest bucket if at capacity
        if buckets.len() >= MAX_BUCKETS && !buckets.contains_key(&key) {
            let oldest = {
                let mut candidates = Vec::with_capacity(buckets.len());
                for (k, b) in buckets.iter() {
                    if let Ok(b) = b.try_lock() {
                        candidates.push((k.clone(), b.window_started_at));
                    }
                }
                candidates.into_iter().min_by_key(|(_, at)| *at)
            };
            if let Some((oldest_key, _)) = oldest {
                buckets.remove(&oldest_key);
                tracing::debug!(class = class.as_str(), "Evicted stalest rate bucket");
            }
        }

        let limit = self.config.limit_for(class);
        buckets
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: limit.capacity,
                    window_started_at: now,
                }))
            })
            .clone()
    }
}
