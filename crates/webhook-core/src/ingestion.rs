//! Upstream webhook transformation and outcome classification.
//!
//! Pure functions: parse the upstream LiveKit-style payload into a
//! normalized event, classify a business outcome from it, and merge partner
//! custom-field configuration into an outbound payload. No I/O, no
//! repository access — `webhook-api`'s ingestion handler and
//! `webhook-storage`'s transactional repository glue sit around this.

use serde::Deserialize;
use serde_json::Value;

use crate::models::CallOutcome;
use crate::WebhookCoreError;

/// Event types the ingestion pipeline processes. Anything else is
/// acknowledged and dropped without a DB write.
pub const PROCESSABLE_EVENT_TYPES: [&str; 3] = ["participant_left", "room_finished", "egress_ended"];

pub fn is_processable(event_type: &str) -> bool {
    PROCESSABLE_EVENT_TYPES.contains(&event_type)
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    id: Option<String>,
    event: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<Value>,
    room: Option<RawRoom>,
    participant: Option<RawParticipant>,
    #[serde(rename = "egressInfo")]
    egress_info: Option<RawEgressInfo>,
}

#[derive(Debug, Deserialize)]
struct RawRoom {
    name: Option<String>,
    sid: Option<String>,
    #[serde(rename = "creationTime")]
    creation_time: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawParticipant {
    sid: Option<String>,
    identity: Option<String>,
    #[serde(rename = "disconnectReason")]
    disconnect_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEgressInfo {
    #[serde(rename = "fileResults")]
    file_results: Option<Vec<RawFileResult>>,
}

#[derive(Debug, Deserialize)]
struct RawFileResult {
    #[serde(alias = "downloadUrl")]
    download_url: Option<String>,
}

/// The upstream payload transformed into the shape the ingestion service
/// operates on.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub event_type: String,
    pub room_name: String,
    pub room_sid: Option<String>,
    pub room_creation_time: Option<i64>,
    pub participant_sid: Option<String>,
    pub participant_identity: Option<String>,
    pub disconnect_reason: String,
    pub recording_url: Option<String>,
    pub created_at: Option<i64>,
    pub raw_payload: Value,
}

/// Parse a tolerant timestamp value: an integer Unix timestamp, a numeric
/// string, or an RFC3339/ISO-8601 string (`Z` suffix accepted).
pub fn parse_timestamp_tolerant(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(n) = s.parse::<i64>() {
                return Some(n);
            }
            let normalized = s.replace('Z', "+00:00");
            chrono::DateTime::parse_from_rfc3339(&normalized)
                .ok()
                .map(|dt| dt.timestamp())
        }
        _ => None,
    }
}

/// Transform a raw upstream JSON payload into a [`NormalizedEvent`].
///
/// Returns `Ok(None)` when the event type is not in
/// [`PROCESSABLE_EVENT_TYPES`] — the caller should respond success and write
/// nothing. Returns `Err(WebhookCoreError::MalformedInput)` when a required
/// field (`id`, `room.name`) is missing.
pub fn transform(raw_payload: &Value) -> Result<Option<NormalizedEvent>, WebhookCoreError> {
    let raw: RawPayload = serde_json::from_value(raw_payload.clone()).map_err(|e| {
        WebhookCoreError::MalformedInput {
            reason: format!("could not parse payload: {e}"),
        }
    })?;

    let event_type = match raw.event {
        Some(event_type) => event_type,
        None => {
            return Err(WebhookCoreError::MalformedInput {
                reason: "missing 'event' field".to_string(),
            })
        }
    };

    if !is_processable(&event_type) {
        return Ok(None);
    }

    let event_id = raw.id.ok_or_else(|| WebhookCoreError::MalformedInput {
        reason: "missing 'id' field".to_string(),
    })?;

    let room = raw.room.ok_or_else(|| WebhookCoreError::MalformedInput {
        reason: "missing 'room.name' field".to_string(),
    })?;
    let room_name = room.name.ok_or_else(|| WebhookCoreError::MalformedInput {
        reason: "missing 'room.name' field".to_string(),
    })?;

    let room_creation_time = room.creation_time.as_ref().and_then(parse_timestamp_tolerant);
    let created_at = raw.created_at.as_ref().and_then(parse_timestamp_tolerant);

    let (participant_sid, participant_identity, disconnect_reason) = match raw.participant {
        Some(p) => (p.sid, p.identity, p.disconnect_reason.unwrap_or_default()),
        None => (None, None, String::new()),
    };

    let recording_url = raw
        .egress_info
        .and_then(|info| info.file_results)
        .and_then(|results| results.into_iter().next())
        .and_then(|first| first.download_url);

    Ok(Some(NormalizedEvent {
        event_id,
        event_type,
        room_name,
        room_sid: room.sid,
        room_creation_time,
        participant_sid,
        participant_identity,
        disconnect_reason,
        recording_url,
        created_at,
        raw_payload: raw_payload.clone(),
    }))
}

/// Classify a call outcome from the disconnect reason and computed
/// duration.
///
/// Priority order (reason signals dominate duration-derived guesses):
/// 1. `busy` if the reason mentions busy.
/// 2. `no_answer` if the reason mentions no-answer.
/// 3. `failed` if the reason mentions failure/error.
/// 4. `failed` if duration < 3s.
/// 5. `no_answer` if duration < 10s.
/// 6. `completed` if duration >= 10s.
pub fn classify_outcome(disconnect_reason: &str, duration_seconds: i64) -> CallOutcome {
    let reason = disconnect_reason.to_lowercase();

    if reason.contains("busy") {
        return CallOutcome::Busy;
    }
    if reason.contains("no_answer") || reason.contains("no answer") {
        return CallOutcome::NoAnswer;
    }
    if reason.contains("failed") || reason.contains("error") {
        return CallOutcome::Failed;
    }
    if duration_seconds < 3 {
        return CallOutcome::Failed;
    }
    if duration_seconds < 10 {
        return CallOutcome::NoAnswer;
    }
    CallOutcome::Completed
}

/// Merge a partner's `custom_payload_fields` into an outbound payload.
///
/// Payload wins on key collision: the configured fields are defaults, not
/// authoritative (resolves the merge-order ambiguity in the original
/// `enqueue_for_all_partners` call sites). When `payload_wins` is `false`,
/// the partner's custom fields take precedence instead, for operators who
/// need the other order.
pub fn merge_custom_fields(payload: &Value, custom_fields: Option<&Value>, payload_wins: bool) -> Value {
    let Some(custom) = custom_fields.and_then(|v| v.as_object()) else {
        return payload.clone();
    };
    let Some(payload_map) = payload.as_object() else {
        return payload.clone();
    };

    let mut merged = if payload_wins {
        custom.clone()
    } else {
        payload_map.clone()
    };

    let overlay = if payload_wins { payload_map } else { custom };
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }

    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "id": "evt_1",
            "event": "participant_left",
            "createdAt": "2025-10-29T12:34:56Z",
            "room": {
                "name": "sip-7678189426__1730000000__abc123",
                "sid": "RM_test123",
                "creationTime": "2025-10-29T12:34:10Z"
            },
            "participant": {
                "sid": "PA_agent123",
                "identity": "agent",
                "disconnectReason": "CLIENT_INITIATED"
            }
        })
    }

    #[test]
    fn transforms_processable_event() {
        let normalized = transform(&sample_payload()).unwrap().unwrap();
        assert_eq!(normalized.event_id, "evt_1");
        assert_eq!(normalized.room_sid.as_deref(), Some("RM_test123"));
        assert!(normalized.created_at.is_some());
    }

    #[test]
    fn ignores_non_processable_event_type() {
        let mut payload = sample_payload();
        payload["event"] = json!("participant_joined");
        assert!(transform(&payload).unwrap().is_none());
    }

    #[test]
    fn missing_id_is_malformed() {
        let mut payload = sample_payload();
        payload.as_object_mut().unwrap().remove("id");
        assert!(matches!(transform(&payload), Err(WebhookCoreError::MalformedInput { .. })));
    }

    #[test]
    fn missing_room_name_is_malformed() {
        let mut payload = sample_payload();
        payload["room"].as_object_mut().unwrap().remove("name");
        assert!(matches!(transform(&payload), Err(WebhookCoreError::MalformedInput { .. })));
    }

    #[test]
    fn tolerant_timestamp_handles_unix_integer() {
        assert_eq!(parse_timestamp_tolerant(&json!(1730000000)), Some(1730000000));
    }

    #[test]
    fn tolerant_timestamp_handles_numeric_string() {
        assert_eq!(parse_timestamp_tolerant(&json!("1730000000")), Some(1730000000));
    }

    #[test]
    fn tolerant_timestamp_handles_iso8601() {
        assert!(parse_timestamp_tolerant(&json!("2025-10-29T12:34:56Z")).is_some());
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify_outcome("", 2), CallOutcome::Failed);
        assert_eq!(classify_outcome("", 3), CallOutcome::NoAnswer);
        assert_eq!(classify_outcome("", 9), CallOutcome::NoAnswer);
        assert_eq!(classify_outcome("", 10), CallOutcome::Completed);
        assert_eq!(classify_outcome("BUSY", 10), CallOutcome::Busy);
    }

    #[test]
    fn reason_dominates_duration() {
        assert_eq!(classify_outcome("CLIENT_INITIATED no_answer", 45), CallOutcome::NoAnswer);
        assert_eq!(classify_outcome("SIP error occurred", 45), CallOutcome::Failed);
    }

    #[test]
    fn merge_custom_fields_payload_wins_by_default() {
        let payload = json!({"a": 1, "b": 2});
        let custom = json!({"b": 99, "c": 3});
        let merged = merge_custom_fields(&payload, Some(&custom), true);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
        assert_eq!(merged["c"], 3);
    }

    #[test]
    fn merge_custom_fields_partner_wins_when_configured() {
        let payload = json!({"a": 1, "b": 2});
        let custom = json!({"b": 99, "c": 3});
        let merged = merge_custom_fields(&payload, Some(&custom), false);
        assert_eq!(merged["b"], 99);
    }

    #[test]
    fn merge_custom_fields_with_no_custom_fields_returns_payload() {
        let payload = json!({"a": 1});
        assert_eq!(merge_custom_fields(&payload, None, true), payload);
    }
}
