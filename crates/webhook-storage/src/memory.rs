//! In-memory repository implementations for tests.
//!
//! Thread-safe, `Arc<RwLock<HashMap<..>>>`-backed stand-ins for the
//! Postgres-backed repositories. Used by `webhook-core`'s and
//! `webhook-worker`'s integration-style tests so the core ingestion and
//! delivery logic can be exercised without a running database.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use webhook_core::models::{CallLog, DeliveryAttemptLog, PartnerWebhook, UpstreamCallEvent, WebhookDeliveryQueue};
use webhook_core::repository::{
    CallLogRepository, DeliveryAttemptLogRepository, DeliveryQueueRepository, PartnerWebhookRepository,
    UpstreamEventRepository,
};
use webhook_core::{
    CallLogId, DeliveryAttemptLogId, DeliveryQueueId, PartnerWebhookId, QueueStatus, TenantId, Timestamp,
    UpstreamEventId, UpstreamEventRowId, WebhookCoreError,
};

/// In-memory `CallLogRepository`.
#[derive(Default)]
pub struct InMemoryCallLogRepository {
    rows: RwLock<HashMap<CallLogId, CallLog>>,
}

impl InMemoryCallLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallLogRepository for InMemoryCallLogRepository {
    async fn find_by_id(&self, id: CallLogId) -> Result<Option<CallLog>, WebhookCoreError> {
        Ok(self.rows.read().expect("poisoned").get(&id).cloned())
    }

    async fn find_active_by_room(
        &self,
        tenant_id: TenantId,
        room_name: &str,
    ) -> Result<Option<CallLog>, WebhookCoreError> {
        Ok(self
            .rows
            .read()
            .expect("poisoned")
            .values()
            .find(|c| c.tenant_id == tenant_id && c.room_name == room_name && c.status == webhook_core::CallStatus::Active)
            .cloned())
    }

    async fn insert(&self, call_log: &CallLog) -> Result<(), WebhookCoreError> {
        self.rows.write().expect("poisoned").insert(call_log.id, call_log.clone());
        Ok(())
    }

    async fn update(&self, call_log: &CallLog) -> Result<(), WebhookCoreError> {
        let mut rows = self.rows.write().expect("poisoned");
        if !rows.contains_key(&call_log.id) {
            return Err(WebhookCoreError::NotFound {
                what: format!("call_log {}", call_log.id),
            });
        }
        rows.insert(call_log.id, call_log.clone());
        Ok(())
    }
}

/// In-memory `UpstreamEventRepository`. Enforces the global `event_id`
/// uniqueness constraint the Postgres schema enforces via a unique index.
#[derive(Default)]
pub struct InMemoryUpstreamEventRepository {
    rows: RwLock<HashMap<UpstreamEventRowId, UpstreamCallEvent>>,
    by_event_id: RwLock<HashMap<String, UpstreamEventRowId>>,
}

impl InMemoryUpstreamEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpstreamEventRepository for InMemoryUpstreamEventRepository {
    async fn insert(&self, event: &UpstreamCallEvent) -> Result<(), WebhookCoreError> {
        let key = event.event_id.as_str().to_string();
        let mut by_event_id = self.by_event_id.write().expect("poisoned");
        if by_event_id.contains_key(&key) {
            return Err(WebhookCoreError::DuplicateEvent { event_id: key });
        }
        by_event_id.insert(key, event.id);
        self.rows.write().expect("poisoned").insert(event.id, event.clone());
        Ok(())
    }

    async fn find_by_event_id(
        &self,
        tenant_id: TenantId,
        event_id: &UpstreamEventId,
    ) -> Result<Option<UpstreamCallEvent>, WebhookCoreError> {
        let by_event_id = self.by_event_id.read().expect("poisoned");
        let Some(row_id) = by_event_id.get(event_id.as_str()) else {
            return Ok(None);
        };
        Ok(self
            .rows
            .read()
            .expect("poisoned")
            .get(row_id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned())
    }

    async fn mark_processed(&self, id: UpstreamEventRowId, processed_at: Timestamp) -> Result<(), WebhookCoreError> {
        let mut rows = self.rows.write().expect("poisoned");
        let event = rows.get_mut(&id).ok_or_else(|| WebhookCoreError::NotFound {
            what: format!("upstream_call_event {id}"),
        })?;
        event.processed = true;
        event.processed_at = Some(processed_at);
        Ok(())
    }
}

/// In-memory `PartnerWebhookRepository`.
#[derive(Default)]
pub struct InMemoryPartnerWebhookRepository {
    rows: RwLock<HashMap<PartnerWebhookId, PartnerWebhook>>,
}

impl InMemoryPartnerWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, webhook: PartnerWebhook) {
        self.rows.write().expect("poisoned").insert(webhook.id, webhook);
    }
}

#[async_trait]
impl PartnerWebhookRepository for InMemoryPartnerWebhookRepository {
    async fn find_by_id(&self, id: PartnerWebhookId) -> Result<Option<PartnerWebhook>, WebhookCoreError> {
        Ok(self.rows.read().expect("poisoned").get(&id).cloned())
    }

    async fn find_enabled_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<PartnerWebhook>, WebhookCoreError> {
        Ok(self
            .rows
            .read()
            .expect("poisoned")
            .values()
            .filter(|w| w.tenant_id == tenant_id && w.wants_event(event_type))
            .cloned()
            .collect())
    }
}

/// In-memory `DeliveryQueueRepository`.
#[derive(Default)]
pub struct InMemoryDeliveryQueueRepository {
    rows: RwLock<HashMap<DeliveryQueueId, WebhookDeliveryQueue>>,
}

impl InMemoryDeliveryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows currently held, for tests that assert enqueue counts.
    pub fn tracked_count(&self) -> usize {
        self.rows.read().expect("poisoned").len()
    }
}

#[async_trait]
impl DeliveryQueueRepository for InMemoryDeliveryQueueRepository {
    async fn enqueue(&self, item: &WebhookDeliveryQueue) -> Result<(), WebhookCoreError> {
        self.rows.write().expect("poisoned").insert(item.id, item.clone());
        Ok(())
    }

    async fn claim_due(&self, limit: u32, now: Timestamp) -> Result<Vec<WebhookDeliveryQueue>, WebhookCoreError> {
        let mut rows = self.rows.write().expect("poisoned");
        let mut due: Vec<DeliveryQueueId> = rows
            .values()
            .filter(|item| {
                matches!(item.status, QueueStatus::Pending | QueueStatus::Failed) && item.next_retry_at <= now
            })
            .map(|item| item.id)
            .collect();
        due.sort_by_key(|id| rows[id].next_retry_at);
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let item = rows.get_mut(&id).expect("id came from this map");
            item.status = QueueStatus::InFlight;
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn update(&self, item: &WebhookDeliveryQueue) -> Result<(), WebhookCoreError> {
        let mut rows = self.rows.write().expect("poisoned");
        if !rows.contains_key(&item.id) {
            return Err(WebhookCoreError::NotFound {
                what: format!("webhook_delivery_queue {}", item.id),
            });
        }
        rows.insert(item.id, item.clone());
        Ok(())
    }

    async fn reap_stale_in_flight(&self, older_than: Timestamp) -> Result<u64, WebhookCoreError> {
        let mut rows = self.rows.write().expect("poisoned");
        let mut reaped = 0;
        for item in rows.values_mut() {
            if item.status == QueueStatus::InFlight
                && item.last_attempt_at.map(|ts| ts <= older_than).unwrap_or(true)
            {
                item.status = QueueStatus::Failed;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn count_dead_letter(&self, tenant_id: TenantId) -> Result<u64, WebhookCoreError> {
        Ok(self
            .rows
            .read()
            .expect("poisoned")
            .values()
            .filter(|item| item.tenant_id == tenant_id && item.status == QueueStatus::DeadLetter)
            .count() as u64)
    }

    async fn find_by_id(&self, id: DeliveryQueueId) -> Result<Option<WebhookDeliveryQueue>, WebhookCoreError> {
        Ok(self.rows.read().expect("poisoned").get(&id).cloned())
    }
}

/// In-memory `DeliveryAttemptLogRepository`.
#[derive(Default)]
pub struct InMemoryDeliveryAttemptLogRepository {
    rows: RwLock<HashMap<DeliveryAttemptLogId, DeliveryAttemptLog>>,
}

impl InMemoryDeliveryAttemptLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryAttemptLogRepository for InMemoryDeliveryAttemptLogRepository {
    async fn insert(&self, attempt: &DeliveryAttemptLog) -> Result<(), WebhookCoreError> {
        self.rows.write().expect("poisoned").insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn list_for_queue_item(&self, queue_id: DeliveryQueueId) -> Result<Vec<DeliveryAttemptLog>, WebhookCoreError> {
        Ok(self
            .rows
            .read()
            .expect("poisoned")
            .values()
            .filter(|a| a.queue_id == Some(queue_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webhook_core::{CallDirection, CallStatus};

    fn sample_call_log(tenant_id: TenantId) -> CallLog {
        CallLog {
            id: CallLogId::new(),
            tenant_id,
            agent_id: None,
            room_name: "sip-7678189426__1__abc".to_string(),
            room_sid: Some("RM_1".to_string()),
            direction: CallDirection::Inbound,
            phone_number: None,
            status: CallStatus::Active,
            outcome: None,
            duration_seconds: None,
            started_at: Timestamp::now(),
            ended_at: None,
            recording_url: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn insert_then_find_active_by_room_round_trips() {
        let repo = InMemoryCallLogRepository::new();
        let tenant_id = TenantId::new();
        let call = sample_call_log(tenant_id);
        repo.insert(&call).await.unwrap();

        let found = repo.find_active_by_room(tenant_id, &call.room_name).await.unwrap();
        assert_eq!(found.unwrap().id, call.id);
    }

    #[tokio::test]
    async fn upstream_event_repository_rejects_duplicate_event_id() {
        let repo = InMemoryUpstreamEventRepository::new();
        let tenant_id = TenantId::new();
        let event = UpstreamCallEvent {
            id: UpstreamEventRowId::new(),
            tenant_id,
            call_log_id: None,
            event_id: UpstreamEventId::new("evt_1").unwrap(),
            event_type: "participant_left".to_string(),
            room_name: "room".to_string(),
            room_sid: None,
            participant_identity: None,
            participant_sid: None,
            event_timestamp: 0,
            raw_payload: json!({}),
            processed: false,
            processed_at: None,
        };
        repo.insert(&event).await.unwrap();

        let mut duplicate = event.clone();
        duplicate.id = UpstreamEventRowId::new();
        let result = repo.insert(&duplicate).await;
        assert!(matches!(result, Err(WebhookCoreError::DuplicateEvent { .. })));
    }

    #[tokio::test]
    async fn claim_due_transitions_status_and_respects_limit() {
        let repo = InMemoryDeliveryQueueRepository::new();
        let tenant_id = TenantId::new();
        let now = Timestamp::now();
        for _ in 0..3 {
            let item = WebhookDeliveryQueue {
                id: DeliveryQueueId::new(),
                tenant_id,
                partner_webhook_id: None,
                url: "https://partner.example/hook".to_string(),
                secret: b"secret".to_vec(),
                event_type: "call_completed".to_string(),
                payload: json!({}),
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
            repo.enqueue(&item).await.unwrap();
        }

        let claimed = repo.claim_due(2, now).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|item| item.status == QueueStatus::InFlight));
    }
}
