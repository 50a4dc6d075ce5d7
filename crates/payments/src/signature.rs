//! Webhook signature verification.
//!
//! The gateway signs each delivery with a shared secret:
//! `signature` header is `t=<unix-seconds>,v1=<hex hmac>` and the signed
//! message is `"{t}.{payload}"` (HMAC-SHA256). The timestamp is bounded to
//! reject replayed deliveries of old payloads.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Replay tolerance for the signed timestamp.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signed timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a delivery's authenticity.
///
/// All failure modes are fatal to the caller: the gateway will not redeliver
/// on a rejection, and must not, since redelivery cannot make a forged or
/// stale signature valid.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<&str> = None;

    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1 = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let v1 = v1.ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(v1).map_err(|_| SignatureError::Malformed)?;

    if (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Malformed)?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());

    // verify_slice is constant-time.
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Produce a signature header for `payload` as the gateway would.
///
/// Used by tests and local tooling to exercise the webhook path end to end.
pub fn sign_payload(payload: &str, secret: &str, at: DateTime<Utc>) -> String {
    let timestamp = at.timestamp();
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={digest}")
}
