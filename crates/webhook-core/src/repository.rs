//! Repository trait abstractions.
//!
//! Business logic (ingestion, the delivery worker) depends only on these
//! traits. `webhook-storage` provides a Postgres implementation for
//! production and an in-memory implementation for tests.

use async_trait::async_trait;

use crate::models::{CallLog, DeliveryAttemptLog, PartnerWebhook, UpstreamCallEvent, WebhookDeliveryQueue};
use crate::{
    CallLogId, DeliveryQueueId, PartnerWebhookId, TenantId, Timestamp, UpstreamEventId, WebhookCoreError,
};

/// Persistence for `CallLog` rows.
#[async_trait]
pub trait CallLogRepository: Send + Sync {
    async fn find_by_id(&self, id: CallLogId) -> Result<Option<CallLog>, WebhookCoreError>;

    /// Look up the active call for a room, scoped to the tenant. Used to
    /// resolve the call a `participant_left`/`room_finished` event belongs
    /// to.
    async fn find_active_by_room(
        &self,
        tenant_id: TenantId,
        room_name: &str,
    ) -> Result<Option<CallLog>, WebhookCoreError>;

    async fn insert(&self, call_log: &CallLog) -> Result<(), WebhookCoreError>;

    async fn update(&self, call_log: &CallLog) -> Result<(), WebhookCoreError>;
}

/// Persistence for `UpstreamCallEvent` rows: the idempotency ledger.
#[async_trait]
pub trait UpstreamEventRepository: Send + Sync {
    /// Insert a new event row. Implementations must reject a duplicate
    /// `event_id` for the same tenant with
    /// `WebhookCoreError::DuplicateEvent` rather than a generic storage
    /// error, so callers can short-circuit.
    async fn insert(&self, event: &UpstreamCallEvent) -> Result<(), WebhookCoreError>;

    async fn find_by_event_id(
        &self,
        tenant_id: TenantId,
        event_id: &UpstreamEventId,
    ) -> Result<Option<UpstreamCallEvent>, WebhookCoreError>;

    async fn mark_processed(&self, id: crate::UpstreamEventRowId, processed_at: Timestamp) -> Result<(), WebhookCoreError>;
}

/// Persistence for tenant-configured `PartnerWebhook` targets.
#[async_trait]
pub trait PartnerWebhookRepository: Send + Sync {
    async fn find_by_id(&self, id: PartnerWebhookId) -> Result<Option<PartnerWebhook>, WebhookCoreError>;

    /// All enabled webhooks for a tenant that want a given event type.
    async fn find_enabled_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<PartnerWebhook>, WebhookCoreError>;
}

/// Persistence for `WebhookDeliveryQueue` rows, including the worker's claim
/// query.
#[async_trait]
pub trait DeliveryQueueRepository: Send + Sync {
    async fn enqueue(&self, item: &WebhookDeliveryQueue) -> Result<(), WebhookCoreError>;

    /// Atomically claim up to `limit` rows that are due for delivery
    /// (`status IN (pending, failed)` and `next_retry_at <= now`),
    /// transitioning them to `in_flight`. Implementations must use
    /// row-level locking (`FOR UPDATE SKIP LOCKED` in Postgres) so that
    /// concurrent worker instances never claim the same row twice.
    async fn claim_due(&self, limit: u32, now: Timestamp) -> Result<Vec<WebhookDeliveryQueue>, WebhookCoreError>;

    async fn update(&self, item: &WebhookDeliveryQueue) -> Result<(), WebhookCoreError>;

    /// Requeue rows stuck in `in_flight` past their claim's grace period,
    /// for a worker that restarts after an unclean shutdown.
    async fn reap_stale_in_flight(&self, older_than: Timestamp) -> Result<u64, WebhookCoreError>;

    async fn count_dead_letter(&self, tenant_id: TenantId) -> Result<u64, WebhookCoreError>;

    async fn find_by_id(&self, id: DeliveryQueueId) -> Result<Option<WebhookDeliveryQueue>, WebhookCoreError>;
}

/// Persistence for the append-only `DeliveryAttemptLog` audit trail.
#[async_trait]
pub trait DeliveryAttemptLogRepository: Send + Sync {
    async fn insert(&self, attempt: &DeliveryAttemptLog) -> Result<(), WebhookCoreError>;

    async fn list_for_queue_item(&self, queue_id: DeliveryQueueId) -> Result<Vec<DeliveryAttemptLog>, WebhookCoreError>;
}
