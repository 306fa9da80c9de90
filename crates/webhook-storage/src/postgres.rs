//! PostgreSQL-backed repository implementations.
//!
//! Runtime-checked queries (`sqlx::query`/`query_as`, not the `query!`
//! macros) since the macros require a live `DATABASE_URL` at build time.
//! The worker's claim query uses `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never double-claim a row.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use webhook_core::models::{CallLog, DeliveryAttemptLog, PartnerWebhook, UpstreamCallEvent, WebhookDeliveryQueue};
use webhook_core::repository::{
    CallLogRepository, DeliveryAttemptLogRepository, DeliveryQueueRepository, PartnerWebhookRepository,
    UpstreamEventRepository,
};
use webhook_core::{
    CallDirection, CallLogId, CallOutcome, CallStatus, DeliveryAttemptLogId, DeliveryQueueId, PartnerWebhookId,
    QueueStatus, TenantId, Timestamp, UpstreamEventId, UpstreamEventRowId, WebhookCoreError,
};

/// Shared Postgres-backed repository bundle. Cheap to clone: wraps a pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_err(err: sqlx::Error) -> WebhookCoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return WebhookCoreError::storage(format!("unique constraint violated: {db_err}"));
        }
    }
    WebhookCoreError::storage(err.to_string())
}

fn direction_to_str(direction: CallDirection) -> &'static str {
    match direction {
        CallDirection::Inbound => "inbound",
        CallDirection::Outbound => "outbound",
    }
}

fn direction_from_str(value: &str) -> Result<CallDirection, WebhookCoreError> {
    match value {
        "inbound" => Ok(CallDirection::Inbound),
        "outbound" => Ok(CallDirection::Outbound),
        other => Err(WebhookCoreError::storage(format!("unknown call direction: {other}"))),
    }
}

fn status_to_str(status: CallStatus) -> &'static str {
    match status {
        CallStatus::Active => "active",
        CallStatus::Ended => "ended",
    }
}

fn status_from_str(value: &str) -> Result<CallStatus, WebhookCoreError> {
    match value {
        "active" => Ok(CallStatus::Active),
        "ended" => Ok(CallStatus::Ended),
        other => Err(WebhookCoreError::storage(format!("unknown call status: {other}"))),
    }
}

fn outcome_to_str(outcome: CallOutcome) -> &'static str {
    outcome.as_str()
}

fn outcome_from_str(value: &str) -> Result<CallOutcome, WebhookCoreError> {
    match value {
        "completed" => Ok(CallOutcome::Completed),
        "no_answer" => Ok(CallOutcome::NoAnswer),
        "busy" => Ok(CallOutcome::Busy),
        "failed" => Ok(CallOutcome::Failed),
        "voicemail" => Ok(CallOutcome::Voicemail),
        "unknown" => Ok(CallOutcome::Unknown),
        other => Err(WebhookCoreError::storage(format!("unknown call outcome: {other}"))),
    }
}

fn queue_status_to_str(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Pending => "pending",
        QueueStatus::InFlight => "in_flight",
        QueueStatus::Delivered => "delivered",
        QueueStatus::Failed => "failed",
        QueueStatus::DeadLetter => "dead_letter",
    }
}

fn queue_status_from_str(value: &str) -> Result<QueueStatus, WebhookCoreError> {
    match value {
        "pending" => Ok(QueueStatus::Pending),
        "in_flight" => Ok(QueueStatus::InFlight),
        "delivered" => Ok(QueueStatus::Delivered),
        "failed" => Ok(QueueStatus::Failed),
        "dead_letter" => Ok(QueueStatus::DeadLetter),
        other => Err(WebhookCoreError::storage(format!("unknown queue status: {other}"))),
    }
}

fn call_log_from_row(row: &sqlx::postgres::PgRow) -> Result<CallLog, WebhookCoreError> {
    Ok(CallLog {
        id: CallLogId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx_err)?),
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(map_sqlx_err)?),
        agent_id: row.try_get("agent_id").map_err(map_sqlx_err)?,
        room_name: row.try_get("room_name").map_err(map_sqlx_err)?,
        room_sid: row.try_get("room_sid").map_err(map_sqlx_err)?,
        direction: direction_from_str(row.try_get::<String, _>("direction").map_err(map_sqlx_err)?.as_str())?,
        phone_number: row.try_get("phone_number").map_err(map_sqlx_err)?,
        status: status_from_str(row.try_get::<String, _>("status").map_err(map_sqlx_err)?.as_str())?,
        outcome: row
            .try_get::<Option<String>, _>("outcome")
            .map_err(map_sqlx_err)?
            .map(|s| outcome_from_str(&s))
            .transpose()?,
        duration_seconds: row.try_get("duration_seconds").map_err(map_sqlx_err)?,
        started_at: Timestamp::from_datetime(row.try_get("started_at").map_err(map_sqlx_err)?),
        ended_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("ended_at")
            .map_err(map_sqlx_err)?
            .map(Timestamp::from_datetime),
        recording_url: row.try_get("recording_url").map_err(map_sqlx_err)?,
        metadata: row.try_get("metadata").map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl CallLogRepository for PostgresStore {
    async fn find_by_id(&self, id: CallLogId) -> Result<Option<CallLog>, WebhookCoreError> {
        let row = sqlx::query("SELECT * FROM call_logs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(call_log_from_row).transpose()
    }

    async fn find_active_by_room(
        &self,
        tenant_id: TenantId,
        room_name: &str,
    ) -> Result<Option<CallLog>, WebhookCoreError> {
        let row = sqlx::query(
            "SELECT * FROM call_logs WHERE tenant_id = $1 AND room_name = $2 AND status = 'active' \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(tenant_id.as_uuid())
        .bind(room_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(call_log_from_row).transpose()
    }

    async fn insert(&self, call_log: &CallLog) -> Result<(), WebhookCoreError> {
        sqlx::query(
            "INSERT INTO call_logs \
             (id, tenant_id, agent_id, room_name, room_sid, direction, phone_number, status, \
              outcome, duration_seconds, started_at, ended_at, recording_url, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(call_log.id.as_uuid())
        .bind(call_log.tenant_id.as_uuid())
        .bind(&call_log.agent_id)
        .bind(&call_log.room_name)
        .bind(&call_log.room_sid)
        .bind(direction_to_str(call_log.direction))
        .bind(&call_log.phone_number)
        .bind(status_to_str(call_log.status))
        .bind(call_log.outcome.map(outcome_to_str))
        .bind(call_log.duration_seconds)
        .bind(call_log.started_at.as_datetime())
        .bind(call_log.ended_at.map(|ts| ts.as_datetime()))
        .bind(&call_log.recording_url)
        .bind(&call_log.metadata)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update(&self, call_log: &CallLog) -> Result<(), WebhookCoreError> {
        let result = sqlx::query(
            "UPDATE call_logs SET agent_id = $2, room_sid = $3, phone_number = $4, status = $5, \
             outcome = $6, duration_seconds = $7, ended_at = $8, recording_url = $9, metadata = $10 \
             WHERE id = $1",
        )
        .bind(call_log.id.as_uuid())
        .bind(&call_log.agent_id)
        .bind(&call_log.room_sid)
        .bind(&call_log.phone_number)
        .bind(status_to_str(call_log.status))
        .bind(call_log.outcome.map(outcome_to_str))
        .bind(call_log.duration_seconds)
        .bind(call_log.ended_at.map(|ts| ts.as_datetime()))
        .bind(&call_log.recording_url)
        .bind(&call_log.metadata)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(WebhookCoreError::NotFound {
                what: format!("call_log {}", call_log.id),
            });
        }
        Ok(())
    }
}

fn upstream_event_from_row(row: &sqlx::postgres::PgRow) -> Result<UpstreamCallEvent, WebhookCoreError> {
    Ok(UpstreamCallEvent {
        id: UpstreamEventRowId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx_err)?),
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(map_sqlx_err)?),
        call_log_id: row
            .try_get::<Option<Uuid>, _>("call_log_id")
            .map_err(map_sqlx_err)?
            .map(CallLogId::from_uuid),
        event_id: UpstreamEventId::new(row.try_get::<String, _>("event_id").map_err(map_sqlx_err)?)
            .map_err(WebhookCoreError::from)?,
        event_type: row.try_get("event_type").map_err(map_sqlx_err)?,
        room_name: row.try_get("room_name").map_err(map_sqlx_err)?,
        room_sid: row.try_get("room_sid").map_err(map_sqlx_err)?,
        participant_identity: row.try_get("participant_identity").map_err(map_sqlx_err)?,
        participant_sid: row.try_get("participant_sid").map_err(map_sqlx_err)?,
        event_timestamp: row.try_get("event_timestamp").map_err(map_sqlx_err)?,
        raw_payload: row.try_get("raw_payload").map_err(map_sqlx_err)?,
        processed: row.try_get("processed").map_err(map_sqlx_err)?,
        processed_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("processed_at")
            .map_err(map_sqlx_err)?
            .map(Timestamp::from_datetime),
    })
}

#[async_trait]
impl UpstreamEventRepository for PostgresStore {
    async fn insert(&self, event: &UpstreamCallEvent) -> Result<(), WebhookCoreError> {
        let result = sqlx::query(
            "INSERT INTO upstream_call_events \
             (id, tenant_id, call_log_id, event_id, event_type, room_name, room_sid, \
              participant_identity, participant_sid, event_timestamp, raw_payload, processed, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(event.id.as_uuid())
        .bind(event.tenant_id.as_uuid())
        .bind(event.call_log_id.map(|id| id.as_uuid()))
        .bind(event.event_id.as_str())
        .bind(&event.event_type)
        .bind(&event.room_name)
        .bind(&event.room_sid)
        .bind(&event.participant_identity)
        .bind(&event.participant_sid)
        .bind(event.event_timestamp)
        .bind(&event.raw_payload)
        .bind(event.processed)
        .bind(event.processed_at.map(|ts| ts.as_datetime()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.as_database_error().map(|e| e.is_unique_violation()).unwrap_or(false) {
                    Err(WebhookCoreError::DuplicateEvent {
                        event_id: event.event_id.to_string(),
                    })
                } else {
                    Err(map_sqlx_err(err))
                }
            }
        }
    }

    async fn find_by_event_id(
        &self,
        tenant_id: TenantId,
        event_id: &UpstreamEventId,
    ) -> Result<Option<UpstreamCallEvent>, WebhookCoreError> {
        let row = sqlx::query("SELECT * FROM upstream_call_events WHERE tenant_id = $1 AND event_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(upstream_event_from_row).transpose()
    }

    async fn mark_processed(&self, id: UpstreamEventRowId, processed_at: Timestamp) -> Result<(), WebhookCoreError> {
        let result = sqlx::query("UPDATE upstream_call_events SET processed = TRUE, processed_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(processed_at.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(WebhookCoreError::NotFound {
                what: format!("upstream_call_event {id}"),
            });
        }
        Ok(())
    }
}

fn partner_webhook_from_row(row: &sqlx::postgres::PgRow) -> Result<PartnerWebhook, WebhookCoreError> {
    let enabled_events: Value = row.try_get("enabled_events").map_err(map_sqlx_err)?;
    let enabled_events = enabled_events
        .as_array()
        .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    Ok(PartnerWebhook {
        id: PartnerWebhookId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx_err)?),
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(map_sqlx_err)?),
        name: row.try_get("name").map_err(map_sqlx_err)?,
        slug: row.try_get("slug").map_err(map_sqlx_err)?,
        url: row.try_get("url").map_err(map_sqlx_err)?,
        secret: row.try_get("secret").map_err(map_sqlx_err)?,
        enabled_events,
        custom_payload_fields: row.try_get("custom_payload_fields").map_err(map_sqlx_err)?,
        enabled: row.try_get("enabled").map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl PartnerWebhookRepository for PostgresStore {
    async fn find_by_id(&self, id: PartnerWebhookId) -> Result<Option<PartnerWebhook>, WebhookCoreError> {
        let row = sqlx::query("SELECT * FROM partner_webhooks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(partner_webhook_from_row).transpose()
    }

    async fn find_enabled_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<PartnerWebhook>, WebhookCoreError> {
        let rows = sqlx::query(
            "SELECT * FROM partner_webhooks WHERE tenant_id = $1 AND enabled = TRUE \
             AND enabled_events @> to_jsonb($2::text)",
        )
        .bind(tenant_id.as_uuid())
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(partner_webhook_from_row).collect()
    }
}

fn delivery_queue_item_from_row(row: &sqlx::postgres::PgRow) -> Result<WebhookDeliveryQueue, WebhookCoreError> {
    Ok(WebhookDeliveryQueue {
        id: DeliveryQueueId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx_err)?),
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(map_sqlx_err)?),
        partner_webhook_id: row
            .try_get::<Option<Uuid>, _>("partner_webhook_id")
            .map_err(map_sqlx_err)?
            .map(PartnerWebhookId::from_uuid),
        url: row.try_get("url").map_err(map_sqlx_err)?,
        secret: row.try_get("secret").map_err(map_sqlx_err)?,
        event_type: row.try_get("event_type").map_err(map_sqlx_err)?,
        payload: row.try_get("payload").map_err(map_sqlx_err)?,
        status: queue_status_from_str(row.try_get::<String, _>("status").map_err(map_sqlx_err)?.as_str())?,
        attempt_count: row.try_get::<i32, _>("attempt_count").map_err(map_sqlx_err)? as u32,
        max_attempts: row.try_get::<i32, _>("max_attempts").map_err(map_sqlx_err)? as u32,
        next_retry_at: Timestamp::from_datetime(row.try_get("next_retry_at").map_err(map_sqlx_err)?),
        last_attempt_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("last_attempt_at")
            .map_err(map_sqlx_err)?
            .map(Timestamp::from_datetime),
        last_response_status: row
            .try_get::<Option<i32>, _>("last_response_status")
            .map_err(map_sqlx_err)?
            .map(|v| v as u16),
        last_error: row.try_get("last_error").map_err(map_sqlx_err)?,
        created_at: Timestamp::from_datetime(row.try_get("created_at").map_err(map_sqlx_err)?),
        scheduled_at: Timestamp::from_datetime(row.try_get("scheduled_at").map_err(map_sqlx_err)?),
        delivered_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("delivered_at")
            .map_err(map_sqlx_err)?
            .map(Timestamp::from_datetime),
    })
}

#[async_trait]
impl DeliveryQueueRepository for PostgresStore {
    async fn enqueue(&self, item: &WebhookDeliveryQueue) -> Result<(), WebhookCoreError> {
        sqlx::query(
            "INSERT INTO webhook_delivery_queue \
             (id, tenant_id, partner_webhook_id, url, secret, event_type, payload, status, \
              attempt_count, max_attempts, next_retry_at, last_attempt_at, last_response_status, \
              last_error, created_at, scheduled_at, delivered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(item.id.as_uuid())
        .bind(item.tenant_id.as_uuid())
        .bind(item.partner_webhook_id.map(|id| id.as_uuid()))
        .bind(&item.url)
        .bind(&item.secret)
        .bind(&item.event_type)
        .bind(&item.payload)
        .bind(queue_status_to_str(item.status))
        .bind(item.attempt_count as i32)
        .bind(item.max_attempts as i32)
        .bind(item.next_retry_at.as_datetime())
        .bind(item.last_attempt_at.map(|ts| ts.as_datetime()))
        .bind(item.last_response_status.map(|v| v as i32))
        .bind(&item.last_error)
        .bind(item.created_at.as_datetime())
        .bind(item.scheduled_at.as_datetime())
        .bind(item.delivered_at.map(|ts| ts.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn claim_due(&self, limit: u32, now: Timestamp) -> Result<Vec<WebhookDeliveryQueue>, WebhookCoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let rows = sqlx::query(
            "WITH eligible AS ( \
                 SELECT id FROM webhook_delivery_queue \
                 WHERE status IN ('pending', 'failed') AND next_retry_at <= $1 \
                 ORDER BY next_retry_at ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE webhook_delivery_queue \
             SET status = 'in_flight' \
             WHERE id IN (SELECT id FROM eligible) \
             RETURNING *",
        )
        .bind(now.as_datetime())
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        rows.iter().map(delivery_queue_item_from_row).collect()
    }

    async fn update(&self, item: &WebhookDeliveryQueue) -> Result<(), WebhookCoreError> {
        let result = sqlx::query(
            "UPDATE webhook_delivery_queue SET status = $2, attempt_count = $3, next_retry_at = $4, \
             last_attempt_at = $5, last_response_status = $6, last_error = $7, delivered_at = $8 \
             WHERE id = $1",
        )
        .bind(item.id.as_uuid())
        .bind(queue_status_to_str(item.status))
        .bind(item.attempt_count as i32)
        .bind(item.next_retry_at.as_datetime())
        .bind(item.last_attempt_at.map(|ts| ts.as_datetime()))
        .bind(item.last_response_status.map(|v| v as i32))
        .bind(&item.last_error)
        .bind(item.delivered_at.map(|ts| ts.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(WebhookCoreError::NotFound {
                what: format!("webhook_delivery_queue {}", item.id),
            });
        }
        Ok(())
    }

    async fn reap_stale_in_flight(&self, older_than: Timestamp) -> Result<u64, WebhookCoreError> {
        let result = sqlx::query(
            "UPDATE webhook_delivery_queue SET status = 'failed' \
             WHERE status = 'in_flight' AND (last_attempt_at IS NULL OR last_attempt_at <= $1)",
        )
        .bind(older_than.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn count_dead_letter(&self, tenant_id: TenantId) -> Result<u64, WebhookCoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM webhook_delivery_queue WHERE tenant_id = $1 AND status = 'dead_letter'",
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        let count: i64 = row.try_get("count").map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn find_by_id(&self, id: DeliveryQueueId) -> Result<Option<WebhookDeliveryQueue>, WebhookCoreError> {
        let row = sqlx::query("SELECT * FROM webhook_delivery_queue WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(delivery_queue_item_from_row).transpose()
    }
}

fn attempt_log_from_row(row: &sqlx::postgres::PgRow) -> Result<DeliveryAttemptLog, WebhookCoreError> {
    Ok(DeliveryAttemptLog {
        id: DeliveryAttemptLogId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx_err)?),
        queue_id: row
            .try_get::<Option<Uuid>, _>("queue_id")
            .map_err(map_sqlx_err)?
            .map(DeliveryQueueId::from_uuid),
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(map_sqlx_err)?),
        attempt_number: row.try_get::<i32, _>("attempt_number").map_err(map_sqlx_err)? as u32,
        attempt_timestamp: Timestamp::from_datetime(row.try_get("attempt_timestamp").map_err(map_sqlx_err)?),
        target_url: row.try_get("target_url").map_err(map_sqlx_err)?,
        request_headers: row.try_get("request_headers").map_err(map_sqlx_err)?,
        request_body: row.try_get("request_body").map_err(map_sqlx_err)?,
        response_status: row
            .try_get::<Option<i32>, _>("response_status")
            .map_err(map_sqlx_err)?
            .map(|v| v as u16),
        response_headers: row.try_get("response_headers").map_err(map_sqlx_err)?,
        response_body: row.try_get("response_body").map_err(map_sqlx_err)?,
        response_time_ms: row.try_get::<i64, _>("response_time_ms").map_err(map_sqlx_err)? as u64,
        error_message: row.try_get("error_message").map_err(map_sqlx_err)?,
        network_error: row.try_get("network_error").map_err(map_sqlx_err)?,
        success: row.try_get("success").map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl DeliveryAttemptLogRepository for PostgresStore {
    async fn insert(&self, attempt: &DeliveryAttemptLog) -> Result<(), WebhookCoreError> {
        sqlx::query(
            "INSERT INTO delivery_attempt_logs \
             (id, queue_id, tenant_id, attempt_number, attempt_timestamp, target_url, request_headers, \
              request_body, response_status, response_headers, response_body, response_time_ms, \
              error_message, network_error, success) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.queue_id.map(|id| id.as_uuid()))
        .bind(attempt.tenant_id.as_uuid())
        .bind(attempt.attempt_number as i32)
        .bind(attempt.attempt_timestamp.as_datetime())
        .bind(&attempt.target_url)
        .bind(&attempt.request_headers)
        .bind(&attempt.request_body)
        .bind(attempt.response_status.map(|v| v as i32))
        .bind(&attempt.response_headers)
        .bind(&attempt.response_body)
        .bind(attempt.response_time_ms as i64)
        .bind(&attempt.error_message)
        .bind(attempt.network_error)
        .bind(attempt.success)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_for_queue_item(&self, queue_id: DeliveryQueueId) -> Result<Vec<DeliveryAttemptLog>, WebhookCoreError> {
        let rows = sqlx::query("SELECT * FROM delivery_attempt_logs WHERE queue_id = $1 ORDER BY attempt_number ASC")
            .bind(queue_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(attempt_log_from_row).collect()
    }
}
