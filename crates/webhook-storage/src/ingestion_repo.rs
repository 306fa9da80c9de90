//! Orchestrates a single upstream call-event through the repository traits.
//!
//! This is the transactional glue named in the workspace layout: it drives
//! transform → resolve call → idempotent insert → classify → update →
//! enqueue, calling each repository trait in the order that makes the
//! `event_id` unique constraint the sole serialization point (see
//! `webhook_core::repository::UpstreamEventRepository::insert`'s
//! contract). It is generic over the trait objects so the same code path
//! runs against `memory` fakes in tests and `postgres::PostgresStore` in
//! production.

use serde_json::{json, Value};

use webhook_core::ingestion::{classify_outcome, merge_custom_fields, transform};
use webhook_core::models::{CallOutcome, UpstreamCallEvent, WebhookDeliveryQueue};
use webhook_core::repository::{
    CallLogRepository, DeliveryQueueRepository, PartnerWebhookRepository, UpstreamEventRepository,
};
use webhook_core::{
    CallLogId, DeliveryQueueId, QueueStatus, TenantId, Timestamp, UpstreamEventId, UpstreamEventRowId,
    WebhookCoreError,
};

/// Result of driving a single upstream payload through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event transitioned a CallLog and (if any partners subscribe)
    /// enqueued deliveries.
    Processed { call_log_id: CallLogId, outcome: &'static str },
    /// `event_type` was not in the processable set; nothing was persisted.
    Ignored,
    /// The upstream `event_id` was already recorded; the caller should
    /// still respond success.
    AlreadyProcessed,
    /// No active CallLog matched the event's room; some events legitimately
    /// fire before a CallLog exists or reference administrative rooms.
    CallContextNotFound,
}

/// Drive `raw_payload` through transform, idempotency, classification,
/// CallLog update, and partner-delivery enqueue.
///
/// `now` is the wall-clock instant the request was received, threaded
/// through so the whole pipeline is testable without relying on the
/// system clock.
pub async fn ingest_event(
    call_log_repo: &dyn CallLogRepository,
    upstream_event_repo: &dyn UpstreamEventRepository,
    partner_webhook_repo: &dyn PartnerWebhookRepository,
    delivery_queue_repo: &dyn DeliveryQueueRepository,
    tenant_id: TenantId,
    raw_payload: &Value,
    now: Timestamp,
) -> Result<IngestOutcome, WebhookCoreError> {
    let Some(normalized) = transform(raw_payload)? else {
        return Ok(IngestOutcome::Ignored);
    };

    let preferred_room_key = normalized.room_sid.as_deref().unwrap_or(&normalized.room_name);
    let Some(mut call_log) = call_log_repo
        .find_active_by_room(tenant_id, preferred_room_key)
        .await?
        .or(
            // Fall back to the room name when the sid-keyed lookup (above)
            // found nothing, matching the room_sid-preferred / room_name
            // fallback order in the design.
            if normalized.room_sid.is_some() {
                call_log_repo.find_active_by_room(tenant_id, &normalized.room_name).await?
            } else {
                None
            },
        )
    else {
        return Ok(IngestOutcome::CallContextNotFound);
    };

    let event_id = UpstreamEventId::new(normalized.event_id.clone())?;
    let row_id = UpstreamEventRowId::new();
    let event_row = UpstreamCallEvent {
        id: row_id,
        tenant_id,
        call_log_id: Some(call_log.id),
        event_id,
        event_type: normalized.event_type.clone(),
        room_name: normalized.room_name.clone(),
        room_sid: normalized.room_sid.clone(),
        participant_identity: normalized.participant_identity.clone(),
        participant_sid: normalized.participant_sid.clone(),
        event_timestamp: normalized.created_at.unwrap_or_else(|| now.unix_seconds()),
        raw_payload: normalized.raw_payload.clone(),
        processed: false,
        processed_at: None,
    };

    match upstream_event_repo.insert(&event_row).await {
        Ok(()) => {}
        Err(WebhookCoreError::DuplicateEvent { .. }) => return Ok(IngestOutcome::AlreadyProcessed),
        Err(e) => return Err(e),
    }

    let duration_seconds = match (normalized.created_at, normalized.room_creation_time) {
        (Some(ended), Some(started)) => ended - started,
        _ => 0,
    };
    let outcome = classify_outcome(&normalized.disconnect_reason, duration_seconds);
    let ended_at = normalized
        .created_at
        .and_then(Timestamp::from_unix_seconds)
        .unwrap_or(now);

    let metadata_patch = json!({
        "disconnect_reason": normalized.disconnect_reason,
        "participant_sid": normalized.participant_sid,
    });

    call_log
        .transition_to_ended(ended_at, outcome, normalized.recording_url.clone(), metadata_patch)
        .map_err(WebhookCoreError::storage)?;
    call_log_repo.update(&call_log).await?;
    upstream_event_repo.mark_processed(row_id, now).await?;

    enqueue_partner_deliveries(
        partner_webhook_repo,
        delivery_queue_repo,
        tenant_id,
        &normalized.event_type,
        &call_log_payload(&call_log, outcome),
        now,
    )
    .await?;

    Ok(IngestOutcome::Processed {
        call_log_id: call_log.id,
        outcome: outcome.as_str(),
    })
}

/// Shape of the outbound payload describing a call outcome. Left as an
/// opaque JSON object, not a fixed struct, so partner `custom_payload_fields`
/// can merge in arbitrary keys at runtime.
fn call_log_payload(call_log: &webhook_core::models::CallLog, outcome: CallOutcome) -> Value {
    json!({
        "call_id": call_log.id.to_string(),
        "room_name": call_log.room_name,
        "outcome": outcome.as_str(),
        "duration_seconds": call_log.duration_seconds,
        "started_at": call_log.started_at.to_rfc3339(),
        "ended_at": call_log.ended_at.map(|t| t.to_rfc3339()),
        "recording_url": call_log.recording_url,
    })
}

/// The sole place event-type filters and custom-field merges are
/// consulted. Once a row is enqueued, the worker trusts the snapshot.
async fn enqueue_partner_deliveries(
    partner_webhook_repo: &dyn PartnerWebhookRepository,
    delivery_queue_repo: &dyn DeliveryQueueRepository,
    tenant_id: TenantId,
    event_type: &str,
    payload: &Value,
    now: Timestamp,
) -> Result<(), WebhookCoreError> {
    let partners = partner_webhook_repo.find_enabled_for_event(tenant_id, event_type).await?;
    for partner in partners {
        let merged_payload = merge_custom_fields(payload, partner.custom_payload_fields.as_ref(), true);
        let item = WebhookDeliveryQueue {
            id: DeliveryQueueId::new(),
            tenant_id,
            partner_webhook_id: Some(partner.id),
            url: partner.url.clone(),
            secret: partner.secret.clone(),
            event_type: event_type.to_string(),
            payload: merged_payload,
            status: QueueStatus::Pending,
            attempt_count: 0,
            max_attempts: 5,
            next_retry_at: now,
            last_attempt_at: None,
            last_response_status: None,
            last_error: None,
            created_at: now,
            scheduled_at: now,
            delivered_at: None,
        };
        delivery_queue_repo.enqueue(&item).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryCallLogRepository, InMemoryDeliveryQueueRepository, InMemoryPartnerWebhookRepository,
        InMemoryUpstreamEventRepository,
    };
    use serde_json::json;
    use webhook_core::models::{CallLog, PartnerWebhook};
    use webhook_core::{CallDirection, CallStatus, PartnerWebhookId};

    fn sample_event(event_id: &str, room_name: &str, room_sid: &str, disconnect_reason: &str, elapsed: i64) -> Value {
        let created = 1_730_000_045i64;
        json!({
            "id": event_id,
            "event": "participant_left",
            "createdAt": created,
            "room": { "name": room_name, "sid": room_sid, "creationTime": created - elapsed },
            "participant": { "sid": "PA_1", "identity": "agent", "disconnectReason": disconnect_reason },
        })
    }

    async fn seed_active_call(repo: &InMemoryCallLogRepository, tenant_id: TenantId, room_name: &str, room_sid: &str) -> CallLogId {
        let call = CallLog {
            id: CallLogId::new(),
            tenant_id,
            agent_id: None,
            room_name: room_name.to_string(),
            room_sid: Some(room_sid.to_string()),
            direction: CallDirection::Inbound,
            phone_number: None,
            status: CallStatus::Active,
            outcome: None,
            duration_seconds: None,
            started_at: Timestamp::from_unix_seconds(1_730_000_000).unwrap(),
            ended_at: None,
            recording_url: None,
            metadata: json!({}),
        };
        let id = call.id;
        repo.insert(&call).await.unwrap();
        id
    }

    #[tokio::test]
    async fn happy_path_transitions_call_and_records_event() {
        let call_logs = InMemoryCallLogRepository::new();
        let upstream_events = InMemoryUpstreamEventRepository::new();
        let partners = InMemoryPartnerWebhookRepository::new();
        let queue = InMemoryDeliveryQueueRepository::new();
        let tenant_id = TenantId::new();

        let call_log_id = seed_active_call(&call_logs, tenant_id, "sip-7678189426__1730000000__abc", "RM_abc").await;
        let payload = sample_event("evt_1", "sip-7678189426__1730000000__abc", "RM_abc", "CLIENT_INITIATED", 45);

        let outcome = ingest_event(&call_logs, &upstream_events, &partners, &queue, tenant_id, &payload, Timestamp::now())
            .await
            .unwrap();

        match outcome {
            IngestOutcome::Processed { call_log_id: id, outcome } => {
                assert_eq!(id, call_log_id);
                assert_eq!(outcome, "completed");
            }
            other => panic!("expected Processed, got {other:?}"),
        }

        let updated = call_logs.find_by_id(call_log_id).await.unwrap().unwrap();
        assert_eq!(updated.status, CallStatus::Ended);
        assert_eq!(updated.duration_seconds, Some(45));
    }

    #[tokio::test]
    async fn replay_is_idempotent() {
        let call_logs = InMemoryCallLogRepository::new();
        let upstream_events = InMemoryUpstreamEventRepository::new();
        let partners = InMemoryPartnerWebhookRepository::new();
        let queue = InMemoryDeliveryQueueRepository::new();
        let tenant_id = TenantId::new();

        seed_active_call(&call_logs, tenant_id, "sip-7678189426__1730000000__abc", "RM_abc").await;
        let payload = sample_event("evt_1", "sip-7678189426__1730000000__abc", "RM_abc", "CLIENT_INITIATED", 45);

        for _ in 0..3 {
            ingest_event(&call_logs, &upstream_events, &partners, &queue, tenant_id, &payload, Timestamp::now())
                .await
                .unwrap();
        }

        let count = upstream_events.find_by_event_id(tenant_id, &UpstreamEventId::new("evt_1").unwrap()).await.unwrap();
        assert!(count.is_some());
    }

    #[tokio::test]
    async fn busy_overrides_duration() {
        let call_logs = InMemoryCallLogRepository::new();
        let upstream_events = InMemoryUpstreamEventRepository::new();
        let partners = InMemoryPartnerWebhookRepository::new();
        let queue = InMemoryDeliveryQueueRepository::new();
        let tenant_id = TenantId::new();

        let call_log_id = seed_active_call(&call_logs, tenant_id, "sip-7678189426__1730000000__abc", "RM_abc").await;
        let payload = sample_event("evt_2", "sip-7678189426__1730000000__abc", "RM_abc", "BUSY", 45);

        let outcome = ingest_event(&call_logs, &upstream_events, &partners, &queue, tenant_id, &payload, Timestamp::now())
            .await
            .unwrap();

        match outcome {
            IngestOutcome::Processed { outcome, .. } => assert_eq!(outcome, "busy"),
            other => panic!("expected Processed, got {other:?}"),
        }
        let _ = call_log_id;
    }

    #[tokio::test]
    async fn missing_call_context_is_not_found_and_persists_nothing() {
        let call_logs = InMemoryCallLogRepository::new();
        let upstream_events = InMemoryUpstreamEventRepository::new();
        let partners = InMemoryPartnerWebhookRepository::new();
        let queue = InMemoryDeliveryQueueRepository::new();
        let tenant_id = TenantId::new();

        let payload = sample_event("evt_3", "sip-no-match__1730000000__abc", "RM_missing", "CLIENT_INITIATED", 45);
        let outcome = ingest_event(&call_logs, &upstream_events, &partners, &queue, tenant_id, &payload, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::CallContextNotFound);
        assert!(upstream_events
            .find_by_event_id(tenant_id, &UpstreamEventId::new("evt_3").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn enqueues_delivery_for_subscribed_partner() {
        let call_logs = InMemoryCallLogRepository::new();
        let upstream_events = InMemoryUpstreamEventRepository::new();
        let partners = InMemoryPartnerWebhookRepository::new();
        let queue = InMemoryDeliveryQueueRepository::new();
        let tenant_id = TenantId::new();

        seed_active_call(&call_logs, tenant_id, "sip-7678189426__1730000000__abc", "RM_abc").await;
        partners.add(PartnerWebhook {
            id: PartnerWebhookId::new(),
            tenant_id,
            name: "acme".to_string(),
            slug: "acme".to_string(),
            url: "https://acme.example/hook".to_string(),
            secret: b"s3cret".to_vec(),
            enabled_events: vec!["participant_left".to_string()],
            custom_payload_fields: None,
            enabled: true,
        });

        let payload = sample_event("evt_4", "sip-7678189426__1730000000__abc", "RM_abc", "CLIENT_INITIATED", 45);
        ingest_event(&call_logs, &upstream_events, &partners, &queue, tenant_id, &payload, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(queue.tracked_count(), 1);
    }
}
