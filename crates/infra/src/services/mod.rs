//! Workflow services: the only writers of booking/order state.
//!
//! Both services are generic over the store, the outbound event bus and the
//! payment-intent port, so tests run them against in-memory implementations
//! and production wires Postgres + a real bus without touching workflow
//! code.

pub mod fulfillment;
pub mod reservation;

pub use fulfillment::FulfillmentService;
pub use reservation::ReservationService;

use tracing::warn;

use wayfare_events::{CommerceEvent, EventBus, EventEnvelope};

/// Publish an outbound event for an already-committed transition.
///
/// Delivery is best-effort: the store is the source of truth and consumers
/// can resynchronize from it, so a publish failure is logged, never
/// propagated.
pub(crate) fn publish<B>(bus: &B, event: CommerceEvent)
where
    B: EventBus<EventEnvelope<CommerceEvent>>,
{
    let envelope = EventEnvelope::wrap(event);
    if let Err(error) = bus.publish(envelope) {
        warn!(?error, "outbound event publish failed");
    }
}
