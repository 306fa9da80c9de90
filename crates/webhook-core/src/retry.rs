//! Retry scheduling for outbound webhook deliveries.
//!
//! Pure, deterministic decision function from `(attempt_count,
//! last_response_status)` to either "retry after Δt" or "give up"
//! (dead-letter). Exponential backoff with jitter; no I/O, no clock reads
//! except through [`RetryPolicy::next_retry_at`] which takes "now" as a
//! parameter so it stays testable.

use rand::RngExt;
use std::time::Duration;

use crate::Timestamp;

/// HTTP statuses that warrant a retry. Any other status is treated as a
/// partner-side client error that retrying will not fix.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// The outcome of consulting the retry policy after a failed delivery
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Retry at the given timestamp.
    RetryAt(Timestamp),
    /// Give up; the row should move to `dead_letter`.
    GiveUp,
}

/// Exponential-backoff-with-jitter retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter_fraction: 0.1,
        }
    }

    /// Whether an HTTP status code (absent for network errors) indicates a
    /// retryable failure.
    pub fn is_retryable_status(status: Option<u16>) -> bool {
        match status {
            None => true,
            Some(code) => RETRYABLE_STATUSES.contains(&code),
        }
    }

    /// Decide whether to retry given the attempt count so far and the
    /// outcome's response status (`None` for a network-level failure).
    ///
    /// `attempt_count` is the number of attempts already made (1 after the
    /// first failed attempt). `now` is injected so callers can test without
    /// relying on the wall clock.
    pub fn decide(&self, attempt_count: u32, response_status: Option<u16>, now: Timestamp) -> RetryDecision {
        if attempt_count >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        if !Self::is_retryable_status(response_status) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAt(now.add_seconds(self.delay_seconds(attempt_count) as i64))
    }

    /// Delay in seconds before the `attempt_count`-th retry (0-indexed: the
    /// first retry uses `attempt_count == 0`).
    pub fn delay_seconds(&self, attempt_count: u32) -> f64 {
        let base = self.base_delay.as_secs_f64();
        let uncapped = base * 2f64.powi(attempt_count as i32);
        let capped = uncapped.min(self.max_delay.as_secs_f64());
        Self::jitter(capped, self.jitter_fraction)
    }

    fn jitter(delay: f64, fraction: f64) -> f64 {
        let mut rng = rand::rng();
        let spread = delay * fraction;
        let offset: f64 = rng.random_range(-spread..=spread);
        (delay + offset).max(0.0)
    }
}

impl Default for RetryPolicy {
    /// Base 30s, cap 3600s (1 hour), 5 attempts, ±10% jitter.
    /// Schedule: ~30s, ~60s, ~120s, ~240s, ~480s.
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(3600), 5)
    }
}

/// Dead-letter alerting threshold policy.
///
/// Operators are alerted once the dead-letter count for a tenant crosses a
/// threshold (default 10), rather than on every single dead-lettered row.
#[derive(Debug, Clone, Copy)]
pub struct DeadLetterPolicy {
    pub alert_threshold: u64,
}

impl DeadLetterPolicy {
    pub fn new(alert_threshold: u64) -> Self {
        Self { alert_threshold }
    }

    pub fn should_alert(&self, dead_letter_count: u64) -> bool {
        dead_letter_count >= self.alert_threshold
    }

    pub fn notification_message(&self, dead_letter_count: u64, tenant_id: &str) -> String {
        format!(
            "Dead letter queue alert: {dead_letter_count} webhooks failed for tenant {tenant_id}. \
             Partner endpoint may be down or webhook configuration invalid."
        )
    }
}

impl Default for DeadLetterPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}
