//! Single-delivery dispatch: sign, POST, and classify the result.
//!
//! Kept separate from the poll loop so it can be unit-tested against a mock
//! HTTP server without spinning up the whole worker.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use webhook_core::models::WebhookDeliveryQueue;
use webhook_core::signer::{Signer, USER_AGENT};

/// Result of one physical HTTP attempt, shaped to feed directly into a
/// `DeliveryAttemptLog` row and the retry decision.
#[derive(Debug, Clone)]
pub struct DeliveryAttemptOutcome {
    pub response_status: Option<u16>,
    pub response_headers: Option<Value>,
    pub response_body: Option<Value>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub network_error: bool,
    pub success: bool,
    /// Set when the failure is non-retryable independent of HTTP status
    /// (currently: an unparseable or schemeless target URL).
    pub permanent_failure: bool,
}

/// Validate, sign, and POST one claimed delivery row.
pub async fn dispatch_one(
    client: &reqwest::Client,
    signer: &Signer,
    item: &WebhookDeliveryQueue,
) -> DeliveryAttemptOutcome {
    let parsed_url = match url::Url::parse(&item.url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => u,
        _ => {
            warn!(url = %item.url, queue_id = %item.id, "unparseable or schemeless delivery URL");
            return DeliveryAttemptOutcome {
                response_status: None,
                response_headers: None,
                response_body: None,
                response_time_ms: 0,
                error_message: Some(format!("invalid delivery URL: {}", item.url)),
                network_error: false,
                success: false,
                permanent_failure: true,
            };
        }
    };

    let (signature, timestamp) = signer.sign_now(&item.payload, &item.secret);
    let start = Instant::now();

    let response = client
        .post(parsed_url)
        .header("content-type", "application/json")
        .header("user-agent", USER_AGENT)
        .header("x-webhook-signature", signature)
        .header("x-webhook-timestamp", timestamp.to_string())
        .json(&item.payload)
        .send()
        .await;

    let elapsed_ms = start.elapsed().as_millis() as u64;

    match response {
        Ok(resp) => {
            let status = resp.status();
            let headers = response_headers_json(resp.headers());
            let body_text = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str::<Value>(&body_text).ok();

            DeliveryAttemptOutcome {
                response_status: Some(status.as_u16()),
                response_headers: Some(headers),
                response_body: body,
                response_time_ms: elapsed_ms,
                error_message: if status.is_success() {
                    None
                } else {
                    Some(format!("partner responded {status}"))
                },
                network_error: false,
                success: status.is_success(),
                permanent_failure: false,
            }
        }
        Err(err) => DeliveryAttemptOutcome {
            response_status: None,
            response_headers: None,
            response_body: None,
            response_time_ms: elapsed_ms,
            error_message: Some(truncate(&err.to_string(), 1024)),
            network_error: true,
            success: false,
            permanent_failure: false,
        },
    }
}

fn response_headers_json(headers: &reqwest::header::HeaderMap) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), json!(value.to_str().unwrap_or(""))))
        .collect();
    Value::Object(map)
}

fn truncate(message: &str, max_len: usize) -> String {
    if message.len() <= max_len {
        message.to_string()
    } else {
        format!("{}…", &message[..max_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webhook_core::models::QueueStatus;
    use webhook_core::{DeliveryQueueId, TenantId, Timestamp};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_item(url: String) -> WebhookDeliveryQueue {
        let now = Timestamp::now();
        WebhookDeliveryQueue {
            id: DeliveryQueueId::new(),
            tenant_id: TenantId::new(),
            partner_webhook_id: None,
            url,
            secret: b"secret".to_vec(),
            event_type: "participant_left".to_string(),
            payload: json!({"call_id": "c1"}),
            status: QueueStatus::InFlight,
            attempt_count: 0,
            max_attempts: 5,
            next_retry_at: now,
            last_attempt_at: Some(now),
            last_response_status: None,
            last_error: None,
            created_at: now,
            scheduled_at: now,
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn successful_post_is_classified_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let signer = Signer::default();
        let item = sample_item(format!("{}/hook", server.uri()));

        let outcome = dispatch_one(&client, &signer, &item).await;
        assert!(outcome.success);
        assert_eq!(outcome.response_status, Some(200));
        assert!(!outcome.network_error);
    }

    #[tokio::test]
    async fn server_error_is_classified_as_failure_not_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let signer = Signer::default();
        let item = sample_item(format!("{}/hook", server.uri()));

        let outcome = dispatch_one(&client, &signer, &item).await;
        assert!(!outcome.success);
        assert_eq!(outcome.response_status, Some(500));
        assert!(!outcome.network_error);
        assert!(!outcome.permanent_failure);
    }

    #[tokio::test]
    async fn not_found_is_classified_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let signer = Signer::default();
        let item = sample_item(format!("{}/hook", server.uri()));

        let outcome = dispatch_one(&client, &signer, &item).await;
        assert!(!outcome.success);
        assert_eq!(outcome.response_status, Some(404));
    }

    #[tokio::test]
    async fn invalid_url_is_a_permanent_failure() {
        let client = reqwest::Client::new();
        let signer = Signer::default();
        let item = sample_item("not-a-url".to_string());

        let outcome = dispatch_one(&client, &signer, &item).await;
        assert!(!outcome.success);
        assert!(outcome.permanent_failure);
        assert!(outcome.response_status.is_none());
    }
}
