//! # Webhook Delivery Worker
//!
//! Drains the `WebhookDeliveryQueue`: claims due rows, delivers them
//! concurrently, classifies each response via the retry policy, and writes
//! an immutable audit log entry per attempt. Designed to run as N
//! horizontally-scaled replicas against a shared Postgres store (see
//! `webhook_core::repository::DeliveryQueueRepository::claim_due`'s
//! `FOR UPDATE SKIP LOCKED` contract).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use webhook_core::models::{DeliveryAttemptLog, QueueStatus, WebhookDeliveryQueue};
use webhook_core::repository::{DeliveryAttemptLogRepository, DeliveryQueueRepository};
use webhook_core::retry::RetryDecision;
use webhook_core::signer::Signer;
use webhook_core::{DeliveryAttemptLogId, Timestamp};

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod metrics;

pub use config::WorkerConfig;
pub use errors::WorkerError;
pub use metrics::WorkerMetrics;

use dispatch::dispatch_one;

/// A stable per-process identity for metrics labeling and reaper
/// self-recognition across restarts: hostname + pid + a fresh random
/// suffix, since nothing about an abandoned row ties it back to the worker
/// that claimed it.
pub fn worker_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    format!("{host}-{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

/// Bundle of repositories the worker needs. Only the two it writes to.
pub struct WorkerRepositories {
    pub delivery_queue: Arc<dyn DeliveryQueueRepository>,
    pub delivery_attempt_log: Arc<dyn DeliveryAttemptLogRepository>,
}

/// Everything `process_one` needs to deliver and record a single attempt,
/// grouped so the function takes one argument instead of a handful of
/// loosely related ones.
struct DeliveryContext<'a> {
    delivery_queue: &'a dyn DeliveryQueueRepository,
    delivery_attempt_log: &'a dyn DeliveryAttemptLogRepository,
    metrics: &'a WorkerMetrics,
    client: &'a reqwest::Client,
    signer: &'a Signer,
    retry_policy: &'a webhook_core::retry::RetryPolicy,
    audit_log_enabled: bool,
}

/// Runs the claim/deliver/classify loop until `shutdown` resolves, then
/// waits up to `config.shutdown_grace_period` for in-flight deliveries
/// before returning.
pub async fn run(
    config: WorkerConfig,
    repos: WorkerRepositories,
    metrics: Arc<WorkerMetrics>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), WorkerError> {
    let worker_id = worker_identity();
    info!(%worker_id, "delivery worker starting");

    let reaper_cutoff = Timestamp::now().add_seconds(-(2 * config.worker_timeout.as_secs() as i64));
    match repos.delivery_queue.reap_stale_in_flight(reaper_cutoff).await {
        Ok(count) if count > 0 => warn!(count, "reaped stale in_flight rows from a prior run"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "startup reaper query failed"),
    }

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .pool_max_idle_per_host(config.http_pool_size)
        .build()
        .map_err(|e| WorkerError::Configuration(format!("failed to build HTTP client: {e}")))?;
    let signer = Signer::default();

    let shutting_down = Arc::new(AtomicBool::new(false));
    tokio::pin!(shutdown);

    metrics.set_active_workers(&worker_id, 1);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                shutting_down.store(true, Ordering::SeqCst);
                info!("shutdown requested, draining in-flight deliveries");
                break;
            }
            claimed = repos.delivery_queue.claim_due(config.batch_size, Timestamp::now()) => {
                let claimed = match claimed {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!(error = %e, "claim_due failed");
                        tokio::time::sleep(config.poll_interval).await;
                        continue;
                    }
                };

                if claimed.is_empty() {
                    tokio::time::sleep(config.poll_interval).await;
                    continue;
                }

                deliver_batch(&config, &repos, &metrics, &client, &signer, claimed).await;
            }
        }
    }

    metrics.set_active_workers(&worker_id, 0);
    info!("delivery worker stopped");
    Ok(())
}

/// Deliver a claimed batch concurrently, bounded by
/// `max_concurrent_deliveries`.
async fn deliver_batch(
    config: &WorkerConfig,
    repos: &WorkerRepositories,
    metrics: &Arc<WorkerMetrics>,
    client: &reqwest::Client,
    signer: &Signer,
    claimed: Vec<WebhookDeliveryQueue>,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_deliveries));
    let mut tasks = JoinSet::new();

    for item in claimed {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let signer = *signer;
        let delivery_queue = repos.delivery_queue.clone();
        let delivery_attempt_log = repos.delivery_attempt_log.clone();
        let metrics = metrics.clone();
        let retry_policy = config.retry_policy;
        let audit_log_enabled = config.audit_log_enabled;

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let ctx = DeliveryContext {
                delivery_queue: delivery_queue.as_ref(),
                delivery_attempt_log: delivery_attempt_log.as_ref(),
                metrics: &metrics,
                client: &client,
                signer: &signer,
                retry_policy: &retry_policy,
                audit_log_enabled,
            };
            process_one(item, &ctx).await;
        });
    }

    while tasks.join_next().await.is_some() {}
}

#[instrument(skip_all, fields(queue_id = %item.id, tenant_id = %item.tenant_id, attempt = item.attempt_count + 1))]
async fn process_one(mut item: WebhookDeliveryQueue, ctx: &DeliveryContext<'_>) {
    let attempt_number = item.attempt_count + 1;
    let now = Timestamp::now();

    let outcome = dispatch_one(ctx.client, ctx.signer, &item).await;
    ctx.metrics.observe_delivery_latency(&item.event_type, outcome.response_time_ms as f64 / 1000.0);
    ctx.metrics.record_retry_attempt(attempt_number);
    let metrics = ctx.metrics;
    let retry_policy = ctx.retry_policy;
    let delivery_queue = ctx.delivery_queue;
    let delivery_attempt_log = ctx.delivery_attempt_log;
    let audit_log_enabled = ctx.audit_log_enabled;

    if outcome.success {
        item.status = QueueStatus::Delivered;
        item.attempt_count = attempt_number;
        item.last_attempt_at = Some(now);
        item.last_response_status = outcome.response_status;
        item.last_error = None;
        item.delivered_at = Some(now);
        metrics.record_delivered(&item.event_type);
        info!("delivery succeeded");
    } else if outcome.permanent_failure {
        item.status = QueueStatus::DeadLetter;
        item.attempt_count = attempt_number;
        item.last_attempt_at = Some(now);
        item.last_response_status = outcome.response_status;
        item.last_error = outcome.error_message.clone();
        metrics.record_dead_letter(&item.event_type);
        warn!(error = ?outcome.error_message, "delivery permanently failed");
    } else {
        match retry_policy.decide(attempt_number, outcome.response_status, now) {
            RetryDecision::RetryAt(next_retry_at) => {
                item.status = QueueStatus::Failed;
                item.attempt_count = attempt_number;
                item.last_attempt_at = Some(now);
                item.next_retry_at = next_retry_at;
                item.last_response_status = outcome.response_status;
                item.last_error = outcome.error_message.clone();
                let status_label = outcome.response_status.map(|s| s.to_string()).unwrap_or_else(|| "network".to_string());
                metrics.record_failed(&item.event_type, &status_label);
                warn!(next_retry_at = %next_retry_at, "delivery failed, scheduled for retry");
            }
            RetryDecision::GiveUp => {
                item.status = QueueStatus::DeadLetter;
                item.attempt_count = attempt_number;
                item.last_attempt_at = Some(now);
                item.last_response_status = outcome.response_status;
                item.last_error = outcome.error_message.clone();
                metrics.record_dead_letter(&item.event_type);
                warn!("delivery exhausted retries, moved to dead letter");
            }
        }
    }

    // Queue row update followed by the audit insert: the design calls for
    // both in one transaction, but the two repositories are independent
    // trait objects with no shared connection here, so this is a documented
    // simplification (see DESIGN.md) rather than the transactional pair.
    if let Err(e) = delivery_queue.update(&item).await {
        error!(error = %e, "failed to persist queue row update");
        return;
    }

    if audit_log_enabled {
        let attempt_log = DeliveryAttemptLog {
            id: DeliveryAttemptLogId::new(),
            queue_id: Some(item.id),
            tenant_id: item.tenant_id,
            attempt_number,
            attempt_timestamp: now,
            target_url: item.url.clone(),
            request_headers: serde_json::json!({"content-type": "application/json"}),
            request_body: item.payload.clone(),
            response_status: outcome.response_status,
            response_headers: outcome.response_headers,
            response_body: outcome.response_body,
            response_time_ms: outcome.response_time_ms,
            error_message: outcome.error_message,
            network_error: outcome.network_error,
            success: outcome.success,
        };
        if let Err(e) = delivery_attempt_log.insert(&attempt_log).await {
            error!(error = %e, "failed to persist delivery attempt log");
        }
    }
}
