//! # Webhook Core
//!
//! Domain logic for the call-outcome ingestion pipeline and the outbound
//! partner-webhook delivery worker. This crate owns no I/O: it defines the
//! domain types, the repository trait abstractions implemented elsewhere
//! (`webhook-storage`), and the pure logic (signing, retry scheduling,
//! outcome classification, rate limiting) that the HTTP service and the
//! worker binary both depend on.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions (`repository`).
//! - Infrastructure implementations are injected at runtime by callers.
//! - Pure components (`signer`, `retry`, `rate_limit`, `ingestion`) have no
//!   knowledge of HTTP or SQL and are unit-testable in isolation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Standard result type for webhook-core operations.
pub type CoreResult<T> = Result<T, WebhookCoreError>;

// ============================================================================
// Domain identifier types
// ============================================================================

/// Tenant identifier. Every row in the system carries one for isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
                    expected: "UUID format".to_string(),
                    actual: s.to_string(),
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(CallLogId, "Primary key of a `CallLog` row.");
uuid_id!(UpstreamEventRowId, "Primary key of an `UpstreamCallEvent` row.");
uuid_id!(PartnerWebhookId, "Primary key of a `PartnerWebhook` row.");
uuid_id!(DeliveryQueueId, "Primary key of a `WebhookDeliveryQueue` row.");
uuid_id!(DeliveryAttemptLogId, "Primary key of a `DeliveryAttemptLog` row.");

/// The upstream event's own identifier string (e.g. `evt_...`).
///
/// This, not a row id, is the idempotency key: the unique constraint lives
/// on this value, not on any surrogate key we generate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamEventId(String);

impl UpstreamEventId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "event_id".to_string(),
            });
        }
        if value.len() > 256 {
            return Err(ValidationError::TooLong {
                field: "event_id".to_string(),
                max_length: 256,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpstreamEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Time
// ============================================================================

/// UTC timestamp, serialized as RFC3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self)
    }

    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn add_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(seconds))
    }

    /// Whole seconds elapsed from `self` to `other`. Negative if `other`
    /// precedes `self`.
    pub fn seconds_until(&self, other: Self) -> i64 {
        (other.0 - self.0).num_seconds()
    }

    pub fn duration_since(&self, other: Self) -> Duration {
        let delta = self.0.signed_duration_since(other.0);
        delta.to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error type for input validation failures.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("field '{field}' is required")]
    Required { field: String },

    #[error("field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Error type for string/value parsing failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// High-level error categorization driving HTTP status and retry decisions.
///
/// These correspond to the error kinds named in the design: AuthFailure,
/// MalformedInput, NotFound, DuplicateEvent, TransientDownstream,
/// PermanentDownstream, StorageError, Exhausted.
#[derive(Debug, thiserror::Error)]
pub enum WebhookCoreError {
    /// Bad HMAC, stale timestamp, or missing secret.
    #[error("authentication failed: {reason}")]
    AuthFailure { reason: String },

    /// Unparseable JSON or a missing required field.
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    /// A referenced entity (CallLog by room key, PartnerWebhook by slug)
    /// does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The idempotency gate rejected a re-delivered event. Not an error to
    /// the caller; carried as a variant so callers can match on it.
    #[error("duplicate event: {event_id}")]
    DuplicateEvent { event_id: String },

    /// Network error, timeout, or a 5xx/408/429 response from a partner.
    #[error("transient downstream failure: {reason}")]
    TransientDownstream { reason: String },

    /// Partner 4xx (other than 408/429), or an unparseable delivery URL.
    #[error("permanent downstream failure: {reason}")]
    PermanentDownstream { reason: String },

    /// Database unavailable, or a constraint violation not covered by the
    /// idempotency gate.
    #[error("storage error: {reason}")]
    StorageError { reason: String },

    /// Retries exhausted; the row has moved to dead_letter.
    #[error("delivery exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl WebhookCoreError {
    /// Whether the upstream caller's retry would plausibly help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientDownstream { .. } | Self::StorageError { .. }
        )
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::StorageError {
            reason: reason.into(),
        }
    }
}

pub mod ingestion;
pub mod rate_limit;
pub mod repository;
pub mod retry;
pub mod room_name;
pub mod signer;

pub mod models;

pub use models::{CallDirection, CallOutcome, CallStatus, QueueStatus};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitIdentity, RateLimiterStore};
pub use retry::{DeadLetterPolicy, RetryDecision, RetryPolicy};
pub use signer::Signer;
