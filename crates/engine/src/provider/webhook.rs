//! Inbound provider webhooks: signature checks and payload shape.
//!
//! The provider signs each request with the webhook secret:
//!
//! ```text
//! X-Locker-Timestamp: 1760870400
//! X-Locker-Signature: v1=<hex(HMAC-SHA256(secret, "v1:{timestamp}:{body}"))>
//! ```

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use locker_pickup_core::EventType;

use crate::models::OrderHint;

pub const TIMESTAMP_HEADER: &str = "X-Locker-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Locker-Signature";

/// Requests older (or newer) than this are refused as replays.
const MAX_CLOCK_SKEW_SECS: u64 = 300;

/// Webhook signature failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("request timestamp outside the replay window")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,
}

/// Body of a provider event webhook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderWebhook {
    /// Drop-off request id the event belongs to.
    #[serde(default)]
    pub delivery_id: Option<String>,
    /// Pickup request id, present once the provider has issued one.
    #[serde(default)]
    pub pickup_delivery_id: Option<String>,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    /// Compartment id.
    #[serde(default)]
    pub locker_id: Option<String>,
    /// Location id.
    #[serde(default)]
    pub tower_id: Option<String>,
    /// Customer pickup link on `pickup.ready`.
    #[serde(default)]
    pub access_link: Option<String>,
}

impl ProviderWebhook {
    /// What the payload says about which order it concerns.
    ///
    /// The drop-off id wins over the pickup id when both are present.
    #[must_use]
    pub fn hint(&self) -> OrderHint {
        OrderHint {
            delivery_id: self
                .delivery_id
                .clone()
                .or_else(|| self.pickup_delivery_id.clone()),
            locker_id: self.locker_id.clone(),
            tower_id: self.tower_id.clone(),
            occurred_at: self.occurred_at,
        }
    }
}

/// Verify a webhook signature against the shared secret.
///
/// # Errors
///
/// Returns `SignatureError` if the timestamp is unparseable or outside the
/// replay window, or if the signature does not match.
pub fn verify_signature(
    secret: &SecretString,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;

    if now.timestamp().abs_diff(ts) > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = sign(secret, timestamp.trim(), body);
    if !constant_time_compare(&expected, signature.trim()) {
        return Err(SignatureError::Mismatch);
    }

    tracing::debug!("Provider webhook signature verified");
    Ok(())
}

/// Compute the `v1=` signature header value for a body.
#[must_use]
pub fn sign(secret: &SecretString, timestamp: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()) else {
        return String::new();
    };
    mac.update(b"v1:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn secret() -> SecretString {
        SecretString::from("whsec_test")
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).single().expect("timestamp")
    }

    #[test]
    fn test_valid_signature_passes() {
        let body = br#"{"event_type":"pickup.ready"}"#;
        let signature = sign(&secret(), "1760870400", body);
        assert!(signature.starts_with("v1="));
        assert_eq!(
            verify_signature(&secret(), "1760870400", body, &signature, at(1_760_870_460)),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let signature = sign(&secret(), "1760870400", b"{\"a\":1}");
        assert_eq!(
            verify_signature(&secret(), "1760870400", b"{\"a\":2}", &signature, at(1_760_870_400)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let signature = sign(&SecretString::from("other"), "1760870400", b"{}");
        assert_eq!(
            verify_signature(&secret(), "1760870400", b"{}", &signature, at(1_760_870_400)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_old_timestamp_is_a_replay() {
        let signature = sign(&secret(), "1760870400", b"{}");
        assert_eq!(
            verify_signature(&secret(), "1760870400", b"{}", &signature, at(1_760_870_400 + 301)),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        for ts in [i64::MIN.to_string(), i64::MAX.to_string()] {
            let signature = sign(&secret(), &ts, b"{}");
            assert_eq!(
                verify_signature(&secret(), &ts, b"{}", &signature, at(1_760_870_400)),
                Err(SignatureError::Stale)
            );
        }
    }

    #[test]
    fn test_garbage_timestamp() {
        assert_eq!(
            verify_signature(&secret(), "yesterday", b"{}", "v1=00", at(0)),
            Err(SignatureError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    #[test]
    fn test_payload_parses_with_optional_fields_missing() {
        let webhook: ProviderWebhook = serde_json::from_value(serde_json::json!({
            "event_type": "dropoff.completed",
            "occurred_at": "2026-10-19T10:00:00Z",
            "locker_id": "B4",
            "tower_id": "loc-1"
        }))
        .expect("payload");

        assert_eq!(webhook.event_type, EventType::DropoffCompleted);
        let hint = webhook.hint();
        assert_eq!(hint.delivery_id, None);
        assert_eq!(hint.locker_id.as_deref(), Some("B4"));
    }

    #[test]
    fn test_hint_prefers_dropoff_id() {
        let webhook: ProviderWebhook = serde_json::from_value(serde_json::json!({
            "delivery_id": "dr-77",
            "pickup_delivery_id": "pr-9",
            "event_type": "pickup.completed",
            "occurred_at": "2026-10-19T10:00:00Z"
        }))
        .expect("payload");
        assert_eq!(webhook.hint().delivery_id.as_deref(), Some("dr-77"));
    }

    #[test]
    fn test_missing_event_type_is_malformed() {
        let result = serde_json::from_value::<ProviderWebhook>(serde_json::json!({
            "delivery_id": "dr-77",
            "occurred_at": "2026-10-19T10:00:00Z"
        }));
        assert!(result.is_err());
    }
}
