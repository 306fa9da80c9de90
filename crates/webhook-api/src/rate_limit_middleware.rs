//! Token-bucket rate limiting for the ingestion endpoint.
//!
//! Identity resolution mirrors the precedence chain carried over from the
//! original rate-limiting middleware: an authenticated tenant id, else an
//! explicit identity header, else the remote IP (see
//! `webhook_core::rate_limit::RateLimitIdentity::resolve`).

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use webhook_core::rate_limit::{RateLimitConfig, RateLimitIdentity};
use webhook_core::Timestamp;

use crate::AppState;

const TENANT_HEADER: &str = "x-tenant-id";
const IDENTITY_HEADER: &str = "x-user-id";

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let headers = request.headers();
    let tenant_header = headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok());
    let identity_header = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
    let identity = RateLimitIdentity::resolve(tenant_header, identity_header, &addr.ip().to_string());

    let config = RateLimitConfig::per_minute(state.config.rate_limit.requests_per_minute);
    let endpoint = request.uri().path().to_string();
    let decision = state.rate_limiter.check(&endpoint, identity.as_key(), config, Timestamp::now());

    state
        .metrics
        .set_rate_limit_tracked_identities(&endpoint, state.rate_limiter.tracked_count() as i64);

    if !decision.allowed {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let retry_after = decision.retry_after_seconds.ceil() as u64;
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from_str(&retry_after.to_string()).unwrap());
        insert_rate_limit_headers(&mut response, decision);
        return response;
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(&mut response, decision);
    response
}

fn insert_rate_limit_headers(response: &mut Response, decision: webhook_core::rate_limit::RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
}
