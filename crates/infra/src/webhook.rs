//! Webhook settlement gateway.
//!
//! Translates payment-gateway deliveries into workflow transitions, exactly
//! once per external event id regardless of how many times the gateway
//! retries the delivery. The idempotency mechanism is the ledger row keyed
//! by the external id (unique constraint); the business transitions behind
//! it are themselves no-op-on-repeat, which also covers two deliveries of
//! the same event racing on different workers.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use wayfare_events::{CommerceEvent, EventBus, EventEnvelope};
use wayfare_payments::{
    GatewayEvent, PaymentEventKind, PaymentIntents, PaymentTarget, signature,
};

use crate::occ::ServiceError;
use crate::services::{FulfillmentService, ReservationService};
use crate::store::{CommerceStore, LedgerInsert, StoreError, WebhookRecord};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared signing secret agreed with the payment gateway.
    pub secret: String,
    /// Replay tolerance for the signed timestamp, in seconds.
    pub tolerance_secs: i64,
}

impl WebhookConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: signature::DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }
}

/// What handling a delivery amounted to. All variants are acknowledged to
/// the gateway as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event drove a workflow transition (or an idempotent no-op on an
    /// already-settled entity).
    Processed,
    /// The ledger already had this event id marked processed; nothing was
    /// re-invoked.
    Duplicate,
    /// The event targets nothing this core owns (unknown target or
    /// unhandled event type).
    Ignored,
    /// A business-rule error was recorded on the ledger row; redelivery
    /// cannot fix it, so the gateway is answered success-equivalent.
    RecordedError,
}

/// Errors the caller must surface to the payment gateway.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Authenticity check failed. Fatal: answered 4xx, never redelivered.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// The payload is not a gateway event. Fatal for the same reason.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Infrastructure-level failure; the gateway should redeliver once the
    /// store recovers.
    #[error("transient webhook failure: {0}")]
    Retriable(ServiceError),
}

/// Consumes payment-gateway events and drives settlement.
pub struct WebhookGateway<S, B, P> {
    config: WebhookConfig,
    store: S,
    reservations: Arc<ReservationService<S, B, P>>,
    fulfillment: Arc<FulfillmentService<S, B, P>>,
}

impl<S, B, P> WebhookGateway<S, B, P>
where
    S: CommerceStore,
    B: EventBus<EventEnvelope<CommerceEvent>>,
    P: PaymentIntents,
{
    pub fn new(
        config: WebhookConfig,
        store: S,
        reservations: Arc<ReservationService<S, B, P>>,
        fulfillment: Arc<FulfillmentService<S, B, P>>,
    ) -> Self {
        Self {
            config,
            store,
            reservations,
            fulfillment,
        }
    }

    /// Handle one delivery: verify, deduplicate, dispatch, record.
    #[instrument(skip_all, fields(payload_len = payload.len()))]
    pub fn handle_event(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        signature::verify_signature(
            payload,
            signature_header,
            &self.config.secret,
            self.config.tolerance_secs,
            Utc::now(),
        )
        .map_err(|error| {
            warn!(%error, "webhook signature rejected");
            WebhookError::InvalidSignature
        })?;

        let event = GatewayEvent::parse(payload)
            .map_err(|error| WebhookError::InvalidPayload(error.to_string()))?;

        // Idempotent skip: the core correctness property of this gateway.
        if let Some(existing) = self
            .store
            .webhook_event(&event.external_id)
            .map_err(retriable)?
        {
            if existing.processed {
                debug!(external_id = %event.external_id, "duplicate delivery skipped");
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        // Insert "seen but not completed" before any business mutation, so
        // a crash mid-processing leaves a detectable record.
        let raw_payload =
            serde_json::from_str(payload).unwrap_or(serde_json::Value::Null);
        let mut record = WebhookRecord::seen(
            event.external_id.clone(),
            event.kind.as_str(),
            raw_payload,
            Utc::now(),
        );
        match self.store.record_event_seen(record.clone()).map_err(retriable)? {
            LedgerInsert::Inserted => {}
            LedgerInsert::Duplicate(existing) => {
                if existing.processed {
                    return Ok(WebhookOutcome::Duplicate);
                }
                // A concurrent delivery inserted first but has not finished.
                // Proceed: the transitions behind dispatch are idempotent.
                record = existing;
            }
        }

        match self.dispatch(&event) {
            Ok(outcome) => {
                record.mark_processed(Utc::now());
                self.store.update_webhook_event(&record).map_err(retriable)?;
                Ok(outcome)
            }
            Err(error) if error.is_retriable() => {
                warn!(external_id = %event.external_id, %error, "webhook processing failed, requesting redelivery");
                Err(WebhookError::Retriable(error))
            }
            Err(error) => {
                warn!(external_id = %event.external_id, %error, "business error recorded on ledger");
                record.mark_failed(error.to_string(), Utc::now());
                self.store.update_webhook_event(&record).map_err(retriable)?;
                Ok(WebhookOutcome::RecordedError)
            }
        }
    }

    fn dispatch(&self, event: &GatewayEvent) -> Result<WebhookOutcome, ServiceError> {
        match (&event.kind, event.target) {
            (PaymentEventKind::PaymentSucceeded, PaymentTarget::Booking(id)) => {
                self.reservations.confirm_booking(id, &event.payment_ref)?;
                Ok(WebhookOutcome::Processed)
            }
            (PaymentEventKind::PaymentFailed, PaymentTarget::Booking(id)) => {
                self.reservations.fail_booking(id)?;
                Ok(WebhookOutcome::Processed)
            }
            (PaymentEventKind::ChargeRefunded, PaymentTarget::Booking(id)) => {
                self.reservations.cancel_booking(id, None)?;
                Ok(WebhookOutcome::Processed)
            }
            (PaymentEventKind::PaymentSucceeded, PaymentTarget::Order(id)) => {
                self.fulfillment.mark_order_paid(id, &event.payment_ref)?;
                Ok(WebhookOutcome::Processed)
            }
            (PaymentEventKind::PaymentFailed, PaymentTarget::Order(id)) => {
                self.fulfillment.fail_order(id)?;
                Ok(WebhookOutcome::Processed)
            }
            (PaymentEventKind::ChargeRefunded, PaymentTarget::Order(id)) => {
                self.fulfillment.refund_order(id)?;
                Ok(WebhookOutcome::Processed)
            }
            (PaymentEventKind::Other(kind), _) => {
                debug!(kind = kind.as_str(), "unhandled gateway event type ignored");
                Ok(WebhookOutcome::Ignored)
            }
            (_, PaymentTarget::Unknown) => {
                warn!(
                    external_id = %event.external_id,
                    kind = event.kind.as_str(),
                    "event metadata names no booking or order; ignoring"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

fn retriable(error: StoreError) -> WebhookError {
    WebhookError::Retriable(ServiceError::Store(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use wayfare_core::{Entity, SlotId, UserId};
    use wayfare_events::InMemoryEventBus;
    use wayfare_inventory::ReservableSlot;
    use wayfare_payments::{StaticIntents, sign_payload};

    type Store = Arc<InMemoryStore>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<CommerceEvent>>>;
    type Intents = Arc<StaticIntents>;

    const SECRET: &str = "whsec_test";

    fn gateway() -> (WebhookGateway<Store, Bus, Intents>, Store) {
        let store: Store = Arc::new(InMemoryStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let intents: Intents = Arc::new(StaticIntents::new());

        let reservations = Arc::new(ReservationService::new(
            store.clone(),
            bus.clone(),
            intents.clone(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            store.clone(),
            bus.clone(),
            intents,
        ));
        let gateway = WebhookGateway::new(
            WebhookConfig::new(SECRET),
            store.clone(),
            reservations,
            fulfillment,
        );
        (gateway, store)
    }

    fn signed(payload: &str) -> String {
        sign_payload(payload, SECRET, Utc::now())
    }

    #[test]
    fn forged_signature_is_fatal() {
        let (gateway, _) = gateway();
        let payload = r#"{"id":"evt_1","type":"payment_succeeded","data":{"payment_ref":"pi_1"}}"#;
        let header = sign_payload(payload, "whsec_wrong", Utc::now());

        assert!(matches!(
            gateway.handle_event(payload, &header),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn malformed_payload_is_fatal_and_not_ledgered() {
        let (gateway, store) = gateway();
        let payload = r#"{"nope":true}"#;

        assert!(matches!(
            gateway.handle_event(payload, &signed(payload)),
            Err(WebhookError::InvalidPayload(_))
        ));
        assert!(store.webhook_event("evt_1").unwrap().is_none());
    }

    #[test]
    fn unknown_target_is_acknowledged_and_ledgered() {
        let (gateway, store) = gateway();
        let payload = r#"{"id":"evt_7","type":"payment_succeeded","data":{"payment_ref":"pi_1","metadata":{"invoice":"inv_1"}}}"#;

        let outcome = gateway.handle_event(payload, &signed(payload)).unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);

        let record = store.webhook_event("evt_7").unwrap().unwrap();
        assert!(record.processed);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn business_error_is_recorded_and_acknowledged() {
        let (gateway, store) = gateway();
        // Booking id that does not exist.
        let payload = format!(
            r#"{{"id":"evt_9","type":"payment_succeeded","data":{{"payment_ref":"pi_1","metadata":{{"booking_id":"{}"}}}}}}"#,
            wayfare_core::BookingId::new()
        );

        let outcome = gateway.handle_event(&payload, &signed(&payload)).unwrap();
        assert_eq!(outcome, WebhookOutcome::RecordedError);

        let record = store.webhook_event("evt_9").unwrap().unwrap();
        assert!(record.processed);
        assert!(record.last_error.is_some());
    }

    #[test]
    fn replayed_event_settles_exactly_once() {
        let (gateway, store) = gateway();
        let slot_id = SlotId::new();
        store
            .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
            .unwrap();

        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let reservations = ReservationService::new(
            store.clone(),
            bus,
            Arc::new(StaticIntents::new()),
        );
        let booking = reservations
            .create_booking(UserId::new(), slot_id, 2)
            .unwrap();

        let payload = format!(
            r#"{{"id":"evt_once","type":"payment_succeeded","data":{{"payment_ref":"{}","metadata":{{"booking_id":"{}"}}}}}}"#,
            booking.payment_ref(),
            booking.id()
        );

        let first = gateway.handle_event(&payload, &signed(&payload)).unwrap();
        assert_eq!(first, WebhookOutcome::Processed);

        let replay = gateway.handle_event(&payload, &signed(&payload)).unwrap();
        assert_eq!(replay, WebhookOutcome::Duplicate);

        let settled = store.booking(*booking.id()).unwrap().unwrap();
        assert_eq!(settled.status(), wayfare_booking::BookingStatus::Confirmed);
        // Exactly one transition: version went 1 (insert) -> 2 (confirm).
        assert_eq!(wayfare_core::Versioned::version(&settled), 2);
    }
}
