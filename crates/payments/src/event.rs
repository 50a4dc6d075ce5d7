//! Typed parsing of gateway webhook payloads.

use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use wayfare_core::{BookingId, OrderId};

use crate::intent::PaymentRef;

/// Gateway event types this core settles on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    PaymentSucceeded,
    PaymentFailed,
    ChargeRefunded,
    /// Delivered but not handled here (the gateway emits many more types).
    Other(String),
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentEventKind::PaymentSucceeded => "payment_succeeded",
            PaymentEventKind::PaymentFailed => "payment_failed",
            PaymentEventKind::ChargeRefunded => "charge_refunded",
            PaymentEventKind::Other(other) => other,
        }
    }
}

impl From<&str> for PaymentEventKind {
    fn from(value: &str) -> Self {
        match value {
            "payment_succeeded" => PaymentEventKind::PaymentSucceeded,
            "payment_failed" => PaymentEventKind::PaymentFailed,
            "charge_refunded" => PaymentEventKind::ChargeRefunded,
            other => PaymentEventKind::Other(other.to_string()),
        }
    }
}

/// The entity a payment event settles, decided once at parse time.
///
/// The gateway carries the target in a free-form metadata bag; resolving it
/// here keeps the settlement gateway free of stringly-typed branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTarget {
    Booking(BookingId),
    Order(OrderId),
    /// Metadata named neither a booking nor an order (or an unparsable id).
    /// A warning condition, not an error: the event concerns an entity
    /// outside this core.
    Unknown,
}

/// A verified, parsed gateway event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    /// The gateway's own event identifier — the idempotency key.
    pub external_id: String,
    pub kind: PaymentEventKind,
    pub payment_ref: PaymentRef,
    pub target: PaymentTarget,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventParseError {
    #[error("payload is not valid gateway JSON: {0}")]
    Json(String),
    #[error("payload is missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    payment_ref: String,
    #[serde(default)]
    metadata: JsonValue,
}

impl GatewayEvent {
    /// Parse a raw payload. Signature verification happens before this;
    /// a payload that fails here is malformed, not forged.
    pub fn parse(payload: &str) -> Result<Self, EventParseError> {
        let raw: RawEvent =
            serde_json::from_str(payload).map_err(|e| EventParseError::Json(e.to_string()))?;

        if raw.id.is_empty() {
            return Err(EventParseError::MissingField("id"));
        }
        if raw.data.payment_ref.is_empty() {
            return Err(EventParseError::MissingField("data.payment_ref"));
        }

        Ok(Self {
            external_id: raw.id,
            kind: PaymentEventKind::from(raw.kind.as_str()),
            payment_ref: PaymentRef::new(raw.data.payment_ref),
            target: resolve_target(&raw.data.metadata),
        })
    }
}

fn resolve_target(metadata: &JsonValue) -> PaymentTarget {
    let field = |key: &str| metadata.get(key).and_then(JsonValue::as_str);

    if let Some(raw) = field("booking_id") {
        return match BookingId::from_str(raw) {
            Ok(id) => PaymentTarget::Booking(id),
            Err(_) => PaymentTarget::Unknown,
        };
    }
    if let Some(raw) = field("order_id") {
        return match OrderId::from_str(raw) {
            Ok(id) => PaymentTarget::Order(id),
            Err(_) => PaymentTarget::Unknown,
        };
    }
    PaymentTarget::Unknown
}
