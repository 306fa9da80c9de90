//! # Webhook API
//!
//! Inbound HTTP service for the call-outcome ingestion pipeline: the
//! upstream webhook endpoint, per-identity rate limiting, and the
//! Prometheus `/metrics` exposition.
//!
//! This crate owns HTTP wiring only; the transactional ingestion logic
//! lives in `webhook_storage::ingestion_repo::ingest_event`, which is
//! generic over the `webhook-core` repository traits.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use webhook_core::repository::{
    CallLogRepository, DeliveryQueueRepository, PartnerWebhookRepository, UpstreamEventRepository,
};
use webhook_core::{rate_limit::RateLimiterStore, signer, TenantId, Timestamp, WebhookCoreError};
use webhook_storage::ingestion_repo::{ingest_event, IngestOutcome};

pub mod config;
pub mod errors;
pub mod metrics;
pub mod rate_limit_middleware;

pub use config::ServiceConfig;
pub use errors::WebhookHandlerError;
pub use metrics::ServiceMetrics;
use rate_limit_middleware::rate_limit_middleware;

/// Header carrying the upstream media service's HMAC signature (no
/// timestamp prefix, raw-body scheme — see `webhook_core::signer`).
const SIGNATURE_HEADER: &str = "x-signature";

/// Header identifying the tenant a webhook belongs to. Authenticating this
/// value is an external collaborator's concern (see spec §1); this service
/// trusts whatever upstream routing/auth layer set it.
const TENANT_HEADER: &str = "x-tenant-id";

/// Bundle of the four repository traits the ingestion pipeline depends on.
/// Grouped so `AppState` doesn't carry four separate constructor
/// parameters that always travel together.
#[derive(Clone)]
pub struct Repositories {
    pub call_logs: Arc<dyn CallLogRepository>,
    pub upstream_events: Arc<dyn UpstreamEventRepository>,
    pub partner_webhooks: Arc<dyn PartnerWebhookRepository>,
    pub delivery_queue: Arc<dyn DeliveryQueueRepository>,
}

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub repos: Repositories,
    pub rate_limiter: Arc<RateLimiterStore>,
    pub metrics: Arc<ServiceMetrics>,
    /// Shared secret the upstream media service signs requests with.
    pub upstream_secret: Arc<Vec<u8>>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        repos: Repositories,
        metrics: Arc<ServiceMetrics>,
        upstream_secret: Vec<u8>,
    ) -> Self {
        Self {
            config,
            repos,
            rate_limiter: Arc::new(RateLimiterStore::new()),
            metrics,
            upstream_secret: Arc::new(upstream_secret),
        }
    }
}

/// Error returned by [`start_server`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("server failed: {message}")]
    ServerFailed { message: String },
}

/// Build the axum router for the ingestion service.
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route(&state.config.webhooks.endpoint_path, post(handle_call_completed))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    let observability_routes = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route("/health", get(handle_health_check));

    let mut router = Router::new()
        .merge(webhook_routes)
        .merge(observability_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state.clone());

    if state.config.server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Bind and run the ingestion HTTP service until the process is asked to
/// shut down (Ctrl-C / SIGTERM).
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server.port));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!(%addr, "ingestion service listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ServiceError::ServerFailed { message: e.to_string() })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /webhooks/call_completed` — the upstream call-lifecycle webhook.
///
/// Per spec §4.4: verify the upstream signature, transform the payload,
/// resolve the call context, idempotently record the event, classify the
/// outcome, and transition the matching `CallLog`. Every branch responds
/// per §7's error-propagation table: auth/malformed failures are
/// synchronous 4xx, unrecognized event types and duplicates and missing
/// call context are all 200s, storage failures are 500 so the upstream
/// redelivers.
#[instrument(skip(state, headers, body), fields(tenant_id))]
async fn handle_call_completed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookHandlerError> {
    let start = Instant::now();

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookHandlerError::MissingHeader("X-Signature"))?;

    let tenant_header = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookHandlerError::MissingHeader("X-Tenant-Id"))?;
    let tenant_id: TenantId = tenant_header
        .parse()
        .map_err(|_| WebhookHandlerError::MalformedInput("invalid X-Tenant-Id".to_string()))?;

    tracing::Span::current().record("tenant_id", tracing::field::display(tenant_id));

    // Same sentinel path regardless of why verification failed (missing
    // secret vs. bad signature vs. stale timestamp are indistinguishable
    // here too — there is no timestamp in the upstream scheme at all, see
    // `webhook_core::signer::verify_upstream_signature`).
    if !signer::verify_upstream_signature(&body, &state.upstream_secret, signature) {
        return Err(WebhookHandlerError::AuthFailure("signature verification failed".to_string()));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| WebhookHandlerError::MalformedInput(format!("invalid JSON body: {e}")))?;
    let event_type = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let result = ingest_event(
        state.repos.call_logs.as_ref(),
        state.repos.upstream_events.as_ref(),
        state.repos.partner_webhooks.as_ref(),
        state.repos.delivery_queue.as_ref(),
        tenant_id,
        &payload,
        Timestamp::now(),
    )
    .await;

    state
        .metrics
        .observe_ingestion_duration(&event_type, start.elapsed().as_secs_f64());

    match result {
        Ok(IngestOutcome::Processed { call_log_id, outcome }) => {
            state.metrics.record_ingested(&event_type, outcome);
            info!(%call_log_id, outcome, "call outcome processed");
            Ok(Json(json!({
                "status": "processed",
                "call_log_id": call_log_id.to_string(),
                "outcome": outcome,
            })))
        }
        Ok(IngestOutcome::Ignored) => Ok(Json(json!({ "status": "ignored", "reason": "event type not processed" }))),
        Ok(IngestOutcome::AlreadyProcessed) => {
            state.metrics.record_duplicate(&event_type);
            Ok(Json(json!({ "status": "already_processed" })))
        }
        Ok(IngestOutcome::CallContextNotFound) => {
            warn!(%tenant_id, "no matching call log for upstream event");
            Ok(Json(json!({ "status": "ignored", "reason": "call context not found" })))
        }
        Err(e @ WebhookCoreError::MalformedInput { .. }) => Err(WebhookHandlerError::from(e)),
        Err(e) => {
            error!(error = %e, "ingestion failed");
            Err(WebhookHandlerError::from(e))
        }
    }
}

async fn handle_health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .rate_limiter
        .evict_idle(Timestamp::now());
    state.metrics.encode().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::ConnectInfo as AxumConnectInfo;
    use axum::http::Request;
    use tower::ServiceExt;
    use webhook_core::models::{CallLog, PartnerWebhook};
    use webhook_core::{CallDirection, CallStatus, PartnerWebhookId};
    use webhook_storage::memory::{
        InMemoryCallLogRepository, InMemoryDeliveryQueueRepository, InMemoryPartnerWebhookRepository,
        InMemoryUpstreamEventRepository,
    };

    fn with_peer(builder: axum::http::request::Builder) -> axum::http::request::Builder {
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        builder.extension(AxumConnectInfo(addr))
    }

    fn test_state() -> (AppState, TenantId) {
        let tenant_id = TenantId::new();
        let repos = Repositories {
            call_logs: Arc::new(InMemoryCallLogRepository::new()),
            upstream_events: Arc::new(InMemoryUpstreamEventRepository::new()),
            partner_webhooks: Arc::new(InMemoryPartnerWebhookRepository::new()),
            delivery_queue: Arc::new(InMemoryDeliveryQueueRepository::new()),
        };
        let metrics = ServiceMetrics::new().unwrap();
        let state = AppState::new(ServiceConfig::default(), repos, metrics, b"upstream-secret".to_vec());
        (state, tenant_id)
    }

    fn sign(body: &[u8], secret: &[u8]) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn missing_signature_header_is_unauthorized() {
        let (state, tenant_id) = test_state();
        let app = create_router(state);
        let response = app
            .oneshot(
                with_peer(Request::builder())
                    .method("POST")
                    .uri("/webhooks/call_completed")
                    .header("x-tenant-id", tenant_id.to_string())
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let (state, tenant_id) = test_state();
        let app = create_router(state);
        let response = app
            .oneshot(
                with_peer(Request::builder())
                    .method("POST")
                    .uri("/webhooks/call_completed")
                    .header("x-tenant-id", tenant_id.to_string())
                    .header("x-signature", "deadbeef")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ignored_event_type_returns_200() {
        let (state, tenant_id) = test_state();
        let secret = state.upstream_secret.clone();
        let app = create_router(state);

        let body = serde_json::to_vec(&json!({"id": "evt_1", "event": "participant_joined"})).unwrap();
        let sig = sign(&body, &secret);

        let response = app
            .oneshot(
                with_peer(Request::builder())
                    .method("POST")
                    .uri("/webhooks/call_completed")
                    .header("x-tenant-id", tenant_id.to_string())
                    .header("x-signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn happy_path_ends_call_and_returns_outcome() {
        let (state, tenant_id) = test_state();
        let call_logs = InMemoryCallLogRepository::new();
        let call = CallLog {
            id: webhook_core::CallLogId::new(),
            tenant_id,
            agent_id: None,
            room_name: "sip-7678189426__1730000000__abc".to_string(),
            room_sid: Some("RM_abc".to_string()),
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
        call_logs.insert(&call).await.unwrap();

        let mut state = state;
        state.repos.call_logs = Arc::new(call_logs);
        let secret = state.upstream_secret.clone();
        let app = create_router(state);

        let body = serde_json::to_vec(&json!({
            "id": "evt_1",
            "event": "participant_left",
            "createdAt": 1_730_000_045i64,
            "room": { "name": "sip-7678189426__1730000000__abc", "sid": "RM_abc", "creationTime": 1_730_000_000i64 },
            "participant": { "sid": "PA_1", "identity": "agent", "disconnectReason": "CLIENT_INITIATED" },
        }))
        .unwrap();
        let sig = sign(&body, &secret);

        let response = app
            .oneshot(
                with_peer(Request::builder())
                    .method("POST")
                    .uri("/webhooks/call_completed")
                    .header("x-tenant-id", tenant_id.to_string())
                    .header("x-signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn replay_is_idempotent_over_http() {
        let (mut state, tenant_id) = test_state();
        let call_logs = InMemoryCallLogRepository::new();
        let call = CallLog {
            id: webhook_core::CallLogId::new(),
            tenant_id,
            agent_id: None,
            room_name: "sip-7678189426__1730000000__abc".to_string(),
            room_sid: Some("RM_abc".to_string()),
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
        call_logs.insert(&call).await.unwrap();
        state.repos.call_logs = Arc::new(call_logs);
        let secret = state.upstream_secret.clone();

        let body = serde_json::to_vec(&json!({
            "id": "evt_replay",
            "event": "participant_left",
            "createdAt": 1_730_000_045i64,
            "room": { "name": "sip-7678189426__1730000000__abc", "sid": "RM_abc", "creationTime": 1_730_000_000i64 },
            "participant": { "sid": "PA_1", "identity": "agent", "disconnectReason": "CLIENT_INITIATED" },
        }))
        .unwrap();
        let sig = sign(&body, &secret);

        for _ in 0..3 {
            let app = create_router(state.clone());
            let response = app
                .oneshot(
                    with_peer(Request::builder())
                        .method("POST")
                        .uri("/webhooks/call_completed")
                        .header("x-tenant-id", tenant_id.to_string())
                        .header("x-signature", sig.clone())
                        .body(Body::from(body.clone()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let (state, _tenant) = test_state();
        let app = create_router(state);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn enqueues_for_subscribed_partner_over_http() {
        let (mut state, tenant_id) = test_state();
        let call_logs = InMemoryCallLogRepository::new();
        let call = CallLog {
            id: webhook_core::CallLogId::new(),
            tenant_id,
            agent_id: None,
            room_name: "sip-7678189426__1730000000__abc".to_string(),
            room_sid: Some("RM_abc".to_string()),
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
        call_logs.insert(&call).await.unwrap();
        state.repos.call_logs = Arc::new(call_logs);

        let partners = InMemoryPartnerWebhookRepository::new();
        partners.add(PartnerWebhook {
            id: PartnerWebhookId::new(),
            tenant_id,
            name: "acme".to_string(),
            slug: "acme".to_string(),
            url: "https://acme.example/hook".to_string(),
            secret: b"partner-secret".to_vec(),
            enabled_events: vec!["participant_left".to_string()],
            custom_payload_fields: None,
            enabled: true,
        });
        state.repos.partner_webhooks = Arc::new(partners);
        let queue = Arc::new(InMemoryDeliveryQueueRepository::new());
        state.repos.delivery_queue = queue.clone();
        let secret = state.upstream_secret.clone();

        let body = serde_json::to_vec(&json!({
            "id": "evt_partner",
            "event": "participant_left",
            "createdAt": 1_730_000_045i64,
            "room": { "name": "sip-7678189426__1730000000__abc", "sid": "RM_abc", "creationTime": 1_730_000_000i64 },
            "participant": { "sid": "PA_1", "identity": "agent", "disconnectReason": "CLIENT_INITIATED" },
        }))
        .unwrap();
        let sig = sign(&body, &secret);

        let app = create_router(state);
        let response = app
            .oneshot(
                with_peer(Request::builder())
                    .method("POST")
                    .uri("/webhooks/call_completed")
                    .header("x-tenant-id", tenant_id.to_string())
                    .header("x-signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(queue.tracked_count(), 1);
    }
}
