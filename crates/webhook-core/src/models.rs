//! Domain entities shared between the ingestion pipeline and the delivery
//! worker. These are plain data; persistence lives in `webhook-storage`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    CallLogId, DeliveryAttemptLogId, DeliveryQueueId, PartnerWebhookId, TenantId, Timestamp,
    UpstreamEventId, UpstreamEventRowId,
};

/// Direction of a call relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Lifecycle status of a `CallLog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Active,
    Ended,
}

/// Classified business outcome of a call. Non-null iff `status = Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Completed,
    NoAnswer,
    Busy,
    Failed,
    Voicemail,
    Unknown,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NoAnswer => "no_answer",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::Voicemail => "voicemail",
            Self::Unknown => "unknown",
        }
    }
}

/// The row-of-record for a single call, independent of how many upstream
/// events reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub id: CallLogId,
    pub tenant_id: TenantId,
    pub agent_id: Option<String>,
    pub room_name: String,
    pub room_sid: Option<String>,
    pub direction: CallDirection,
    pub phone_number: Option<String>,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    pub duration_seconds: Option<i64>,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub recording_url: Option<String>,
    pub metadata: Value,
}

impl CallLog {
    /// Apply the state transition described in the ingestion design:
    /// `active` → `ended` with a classified outcome. Returns an error
    /// message if the row is not currently active (callers translate this
    /// into a `WebhookCoreError::StorageError`, since it indicates the row
    /// vanished or transitioned between lookup and update).
    pub fn transition_to_ended(
        &mut self,
        ended_at: Timestamp,
        outcome: CallOutcome,
        recording_url: Option<String>,
        metadata_patch: Value,
    ) -> Result<(), String> {
        if self.status != CallStatus::Active {
            return Err(format!(
                "CallLog {} is not active (status={:?})",
                self.id, self.status
            ));
        }

        let duration = ended_at.unix_seconds() - self.started_at.unix_seconds();
        self.status = CallStatus::Ended;
        self.ended_at = Some(ended_at);
        self.duration_seconds = Some(duration.max(0));
        self.outcome = Some(outcome);
        if let Some(url) = recording_url {
            self.recording_url = Some(url);
        }
        merge_json_objects(&mut self.metadata, &metadata_patch);
        Ok(())
    }
}

/// Merge `patch` into `target` in place; `target` wins on key collision.
/// Non-object values replace wholesale.
pub fn merge_json_objects(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                target_map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        _ => {
            if target.is_null() {
                *target = patch.clone();
            }
        }
    }
}

/// One row per processed upstream webhook event; the idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamCallEvent {
    pub id: UpstreamEventRowId,
    pub tenant_id: TenantId,
    pub call_log_id: Option<CallLogId>,
    pub event_id: UpstreamEventId,
    pub event_type: String,
    pub room_name: String,
    pub room_sid: Option<String>,
    pub participant_identity: Option<String>,
    pub participant_sid: Option<String>,
    pub event_timestamp: i64,
    pub raw_payload: Value,
    pub processed: bool,
    pub processed_at: Option<Timestamp>,
}

/// A tenant-configured outbound delivery target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerWebhook {
    pub id: PartnerWebhookId,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub url: String,
    /// Opaque secret bytes. Encryption at rest is an external concern.
    pub secret: Vec<u8>,
    pub enabled_events: Vec<String>,
    pub custom_payload_fields: Option<Value>,
    pub enabled: bool,
}

impl PartnerWebhook {
    pub fn wants_event(&self, event_type: &str) -> bool {
        self.enabled && self.enabled_events.iter().any(|e| e == event_type)
    }
}

/// Status of a `WebhookDeliveryQueue` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InFlight,
    Delivered,
    Failed,
    DeadLetter,
}

impl QueueStatus {
    /// `delivered` and `dead_letter` are immutable terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLetter)
    }
}

/// One row per outbound delivery attempt-cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryQueue {
    pub id: DeliveryQueueId,
    pub tenant_id: TenantId,
    pub partner_webhook_id: Option<PartnerWebhookId>,
    /// Frozen snapshot of the target at enqueue time; later partner edits
    /// must not mutate in-flight items.
    pub url: String,
    pub secret: Vec<u8>,
    pub event_type: String,
    pub payload: Value,
    pub status: QueueStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: Timestamp,
    pub last_attempt_at: Option<Timestamp>,
    pub last_response_status: Option<u16>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub scheduled_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
}

/// Append-only audit trail: one row per physical HTTP attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttemptLog {
    pub id: DeliveryAttemptLogId,
    pub queue_id: Option<DeliveryQueueId>,
    pub tenant_id: TenantId,
    pub attempt_number: u32,
    pub attempt_timestamp: Timestamp,
    pub target_url: String,
    pub request_headers: Value,
    pub request_body: Value,
    pub response_status: Option<u16>,
    pub response_headers: Option<Value>,
    pub response_body: Option<Value>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub network_error: bool,
    pub success: bool,
}
