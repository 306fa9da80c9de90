//! Per-(tenant-or-identity, endpoint) token bucket rate limiting.
//!
//! Single coarse-grained process-wide store, keyed two levels deep (endpoint
//! then identity) under one mutex. Distributed rate limiting is out of
//! scope; contention at expected request rates is acceptable.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::Timestamp;

/// Outcome of a rate-limit check, carrying the values needed for the
/// `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the bucket will next have a full token
    /// available (burst case) or be fully refilled.
    pub reset_at: i64,
    /// Only meaningful when `allowed` is false.
    pub retry_after_seconds: f64,
}

/// A single token bucket: current token count and the last time it was
/// touched. Refill is computed lazily on each check, not on a timer.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_update: Timestamp,
}

impl Bucket {
    fn refilled(self, now: Timestamp, capacity: f64, rate_per_second: f64) -> Self {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        let tokens = (self.tokens + elapsed * rate_per_second).min(capacity);
        Self {
            tokens,
            last_update: now,
        }
    }
}

/// Configuration for a single bucket: burst capacity and steady-state
/// refill rate.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub rate_per_second: f64,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, rate_per_second: f64) -> Self {
        Self {
            capacity,
            rate_per_second,
        }
    }

    /// Convenience constructor from "N requests per minute".
    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, capacity as f64 / 60.0)
    }
}

/// Process-wide, mutex-guarded store of token buckets keyed by
/// `(endpoint, identity)`.
pub struct RateLimiterStore {
    buckets: Mutex<HashMap<String, HashMap<String, Bucket>>>,
    idle_eviction: std::time::Duration,
}

impl RateLimiterStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            idle_eviction: std::time::Duration::from_secs(3600),
        }
    }

    /// Check and, if allowed, consume one token from the bucket for
    /// `(endpoint, identity)`, lazily creating it with a full bucket minus
    /// one token on first use.
    pub fn check(&self, endpoint: &str, identity: &str, config: RateLimitConfig, now: Timestamp) -> RateLimitDecision {
        let capacity = config.capacity as f64;
        let mut store = self.buckets.lock().expect("rate limiter mutex poisoned");
        let endpoint_buckets = store.entry(endpoint.to_string()).or_default();

        let bucket = endpoint_buckets
            .entry(identity.to_string())
            .or_insert(Bucket {
                tokens: capacity,
                last_update: now,
            });

        let refilled = bucket.refilled(now, capacity, config.rate_per_second);

        if refilled.tokens >= 1.0 {
            let remaining = refilled.tokens - 1.0;
            *bucket = Bucket {
                tokens: remaining,
                last_update: now,
            };
            let tokens_to_fill = capacity - remaining;
            let reset_at = now.unix_seconds() + (tokens_to_fill / config.rate_per_second).ceil() as i64;
            RateLimitDecision {
                allowed: true,
                limit: config.capacity,
                remaining: remaining as u32,
                reset_at,
                retry_after_seconds: 0.0,
            }
        } else {
            *bucket = refilled;
            let wait_seconds = (1.0 - refilled.tokens) / config.rate_per_second;
            RateLimitDecision {
                allowed: false,
                limit: config.capacity,
                remaining: 0,
                reset_at: now.unix_seconds() + wait_seconds.ceil() as i64,
                retry_after_seconds: wait_seconds,
            }
        }
    }

    /// Remove buckets untouched for longer than the idle-eviction window.
    /// Intended to run on a periodic sweep (default every 5 minutes).
    pub fn evict_idle(&self, now: Timestamp) -> usize {
        let mut store = self.buckets.lock().expect("rate limiter mutex poisoned");
        let mut removed = 0;
        store.retain(|_, identities| {
            identities.retain(|_, bucket| {
                let idle = now.duration_since(bucket.last_update);
                let keep = idle <= self.idle_eviction;
                if !keep {
                    removed += 1;
                }
                keep
            });
            !identities.is_empty()
        });
        removed
    }

    /// Total number of tracked (endpoint, identity) buckets, for the
    /// `rate_limit_tracked_identities` gauge.
    pub fn tracked_count(&self) -> usize {
        let store = self.buckets.lock().expect("rate limiter mutex poisoned");
        store.values().map(|m| m.len()).sum()
    }
}

impl Default for RateLimiterStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolution order for the identity a rate-limit bucket is keyed on:
/// authenticated tenant id, else an explicit identity header, else the
/// remote IP. Mirrors the upstream precedence chain for callers that are
/// not yet authenticated when the limiter runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitIdentity {
    Tenant(String),
    Header(String),
    RemoteIp(String),
}

impl RateLimitIdentity {
    pub fn resolve(tenant_id: Option<&str>, identity_header: Option<&str>, remote_ip: &str) -> Self {
        if let Some(tenant) = tenant_id {
            return Self::Tenant(tenant.to_string());
        }
        if let Some(header) = identity_header {
            return Self::Header(header.to_string());
        }
        Self::RemoteIp(remote_ip.to_string())
    }

    pub fn as_key(&self) -> &str {
        match self {
            Self::Tenant(v) | Self::Header(v) | Self::RemoteIp(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject_then_refill() {
        let store = RateLimiterStore::new();
        let config = RateLimitConfig::new(10, 10.0 / 60.0);
        let t0 = Timestamp::now();

        for _ in 0..10 {
            let decision = store.check("ep", "tenant-a", config, t0);
            assert!(decision.allowed);
        }

        let rejected = store.check("ep", "tenant-a", config, t0);
        assert!(!rejected.allowed);
        assert!((rejected.retry_after_seconds - 6.0).abs() < 0.5);

        let later = t0.add_seconds(6);
        let allowed_again = store.check("ep", "tenant-a", config, later);
        assert!(allowed_again.allowed);
    }

    #[test]
    fn distinct_identities_have_independent_buckets() {
        let store = RateLimiterStore::new();
        let config = RateLimitConfig::new(1, 1.0);
        let now = Timestamp::now();
        assert!(store.check("ep", "a", config, now).allowed);
        assert!(store.check("ep", "b", config, now).allowed);
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let store = RateLimiterStore::new();
        let config = RateLimitConfig::new(1, 1.0);
        let now = Timestamp::now();
        store.check("ep", "a", config, now);
        assert_eq!(store.tracked_count(), 1);
        let later = now.add_seconds(3700);
        let removed = store.evict_idle(later);
        assert_eq!(removed, 1);
        assert_eq!(store.tracked_count(), 0);
    }

    #[test]
    fn identity_precedence_prefers_tenant_then_header_then_ip() {
        assert_eq!(
            RateLimitIdentity::resolve(Some("t1"), Some("h1"), "1.2.3.4"),
            RateLimitIdentity::Tenant("t1".to_string())
        );
        assert_eq!(
            RateLimitIdentity::resolve(None, Some("h1"), "1.2.3.4"),
            RateLimitIdentity::Header("h1".to_string())
        );
        assert_eq!(
            RateLimitIdentity::resolve(None, None, "1.2.3.4"),
            RateLimitIdentity::RemoteIp("1.2.3.4".to_string())
        );
    }
}
