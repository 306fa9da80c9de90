//! HMAC-SHA256 signing and verification for outbound partner webhooks.
//!
//! Outbound deliveries are signed over the canonical message
//! `"{timestamp}.{payload_json}"`, where `payload_json` is serialized with
//! sorted keys and no insignificant whitespace (`serde_json` with a
//! `BTreeMap`-backed `Value` already sorts object keys). Signatures are
//! hex-encoded and carried in the `X-Webhook-Signature` /
//! `X-Webhook-Timestamp` headers.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::Timestamp;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance for the timestamp freshness check, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Fixed `User-Agent` sent with every outbound delivery.
pub const USER_AGENT: &str = "EventDelivery/1.0";

/// HMAC-SHA256 signer/verifier for outbound webhook deliveries.
///
/// Carries no secret; the secret is supplied per call since each delivery
/// uses the partner's own (frozen, per-queue-row) secret.
#[derive(Debug, Clone, Copy)]
pub struct Signer {
    tolerance_seconds: i64,
}

impl Signer {
    pub fn new(tolerance_seconds: i64) -> Self {
        Self { tolerance_seconds }
    }

    /// Canonicalize a payload to sorted-key, whitespace-free JSON.
    ///
    /// `serde_json::Value::Object` is backed by a `BTreeMap` when the
    /// `preserve_order` feature is not enabled, so round-tripping through
    /// `Value` already yields sorted keys.
    fn canonical_json(payload: &Value) -> String {
        let sorted: Value = serde_json::from_str(&payload.to_string())
            .unwrap_or_else(|_| payload.clone());
        serde_json::to_string(&sorted).unwrap_or_default()
    }

    fn message(timestamp: i64, payload: &Value) -> String {
        format!("{}.{}", timestamp, Self::canonical_json(payload))
    }

    /// Sign `payload` with `secret` at `timestamp` (unix seconds), returning
    /// the hex-encoded HMAC-SHA256 digest.
    pub fn sign(&self, payload: &Value, secret: &[u8], timestamp: i64) -> String {
        let message = Self::message(timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Sign `payload` with `secret` using the current time, returning the
    /// `(signature, timestamp)` pair to place in the two signature headers.
    pub fn sign_now(&self, payload: &Value, secret: &[u8]) -> (String, i64) {
        let timestamp = Timestamp::now().unix_seconds();
        (self.sign(payload, secret, timestamp), timestamp)
    }

    /// Verify a provided signature and timestamp against `payload` and
    /// `secret`.
    ///
    /// Both the timestamp tolerance check and the signature comparison must
    /// pass. The function does not short-circuit in a way that would let an
    /// attacker distinguish "stale timestamp" from "bad signature" through
    /// timing: both paths compute the expected signature and perform a
    /// constant-time comparison before returning.
    pub fn verify(
        &self,
        payload: &Value,
        secret: &[u8],
        provided_signature: &str,
        provided_timestamp: i64,
    ) -> bool {
        let now = Timestamp::now().unix_seconds();
        let within_tolerance = (now - provided_timestamp).abs() <= self.tolerance_seconds;

        let expected = self.sign(payload, secret, provided_timestamp);
        let signatures_match = constant_time_hex_eq(&expected, provided_signature);

        within_tolerance & signatures_match
    }
}

impl Default for Signer {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_SECONDS)
    }
}

/// Constant-time comparison of two hex strings, tolerant of a `sha256=`
/// prefix on either side (some upstreams prefix their signatures).
fn constant_time_hex_eq(expected: &str, provided: &str) -> bool {
    let expected = expected.strip_prefix("sha256=").unwrap_or(expected);
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Verify the upstream media service's signature over a raw request body.
///
/// The upstream scheme differs from our outbound scheme: it signs the raw
/// body directly, with no timestamp prefix and no tolerance window (the
/// request itself carries no timestamp to check).
pub fn verify_upstream_signature(body: &[u8], secret: &[u8], provided_signature_hex: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_hex_eq(&expected, provided_signature_hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Signer::default();
        let payload = json!({"b": 1, "a": 2});
        let secret = b"shh";
        let (sig, ts) = signer.sign_now(&payload, secret);
        assert!(signer.verify(&payload, secret, &sig, ts));
    }

    #[test]
    fn mutated_payload_fails_verification() {
        let signer = Signer::default();
        let secret = b"shh";
        let (sig, ts) = signer.sign_now(&json!({"a": 1}), secret);
        assert!(!signer.verify(&json!({"a": 2}), secret, &sig, ts));
    }

    #[test]
    fn mutated_secret_fails_verification() {
        let signer = Signer::default();
        let payload = json!({"a": 1});
        let (sig, ts) = signer.sign_now(&payload, b"secret-one");
        assert!(!signer.verify(&payload, b"secret-two", &sig, ts));
    }

    #[test]
    fn stale_timestamp_fails_even_with_correct_signature() {
        let signer = Signer::new(300);
        let payload = json!({"a": 1});
        let secret = b"shh";
        let old_ts = Timestamp::now().unix_seconds() - 10_000;
        let sig = signer.sign(&payload, secret, old_ts);
        assert!(!signer.verify(&payload, secret, &sig, old_ts));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a = Signer::canonical_json(&json!({"b": 1, "a": 2}));
        let b = Signer::canonical_json(&json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn upstream_signature_verifies_raw_body() {
        let body = br#"{"id":"evt_1"}"#;
        let secret = b"upstream-secret";
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_upstream_signature(body, secret, &sig));
        assert!(!verify_upstream_signature(b"tampered", secret, &sig));
    }
}
