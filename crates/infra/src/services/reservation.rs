//! Reservation workflow: slot bookings.

use chrono::Utc;
use tracing::{info, instrument};

use wayfare_booking::{Booking, CancelOutcome};
use wayfare_core::{BookingId, DomainError, SlotId, Transition, UserId, Versioned};
use wayfare_events::{CommerceEvent, EventBus, EventEnvelope};
use wayfare_payments::{PaymentIntents, PaymentRef};

use crate::occ::{OptimisticExecutor, RetryPolicy, ServiceError};
use crate::store::{CommerceStore, ReviewItem, ReviewReason, WriteBatch};

use super::publish;

/// Creates bookings and drives their state machine.
///
/// Mutations of the shared slot row go exclusively through the optimistic
/// executor; booking rows are CAS-written in the same batch so the webhook
/// gateway and the reclaimer can never interleave destructively.
pub struct ReservationService<S, B, P> {
    exec: OptimisticExecutor<S>,
    bus: B,
    intents: P,
}

impl<S, B, P> ReservationService<S, B, P>
where
    S: CommerceStore,
    B: EventBus<EventEnvelope<CommerceEvent>>,
    P: PaymentIntents,
{
    pub fn new(store: S, bus: B, intents: P) -> Self {
        Self {
            exec: OptimisticExecutor::new(store),
            bus,
            intents,
        }
    }

    pub fn with_policy(store: S, bus: B, intents: P, policy: RetryPolicy) -> Self {
        Self {
            exec: OptimisticExecutor::with_policy(store, policy),
            bus,
            intents,
        }
    }

    pub fn executor(&self) -> &OptimisticExecutor<S> {
        &self.exec
    }

    /// Reserve capacity and create a `PendingPayment` booking.
    ///
    /// Capacity is rechecked on every retry of the conditional write; a
    /// caller that loses the race against a filling slot gets
    /// [`DomainError::SlotUnavailable`], the intended admission-control
    /// behavior.
    #[instrument(skip(self), fields(%slot_id, %buyer, guests))]
    pub fn create_booking(
        &self,
        buyer: UserId,
        slot_id: SlotId,
        guests: u32,
    ) -> Result<Booking, ServiceError> {
        if guests == 0 {
            return Err(DomainError::validation("guest count must be positive").into());
        }

        // Fast admission check + price snapshot before paying the gateway
        // round-trip for an intent.
        let slot = self
            .exec
            .store()
            .slot(slot_id)?
            .ok_or(DomainError::NotFound("slot"))?;
        slot.reserve(guests)?;
        let total_price = slot.price_per_guest() * u64::from(guests);

        let payment_ref = self.intents.create_intent(total_price)?;
        let booking_id = BookingId::new();

        let mut booking = self.exec.run("slot", |store| {
            let slot = store
                .slot(slot_id)?
                .ok_or(DomainError::NotFound("slot"))?;
            let reserved = slot.reserve(guests)?;

            let booking = Booking::pending(
                booking_id,
                slot_id,
                buyer,
                guests,
                total_price,
                payment_ref.clone(),
                Utc::now(),
            );

            let mut batch = WriteBatch::new();
            batch.put_slot(slot.version(), reserved);
            batch.insert_booking(booking.clone());
            store.commit(batch)?;
            Ok(booking)
        })?;
        booking.set_version(1);

        info!(%booking_id, "booking created");
        publish(
            &self.bus,
            CommerceEvent::BookingCreated {
                booking_id,
                slot_id,
                buyer,
                guests,
                occurred_at: booking.created_at(),
            },
        );
        Ok(booking)
    }

    /// Payment success for a booking (webhook path).
    #[instrument(skip(self, reference), fields(%booking_id))]
    pub fn confirm_booking(
        &self,
        booking_id: BookingId,
        reference: &PaymentRef,
    ) -> Result<Transition<Booking>, ServiceError> {
        let transition = self.exec.run("booking", |store| {
            let booking = store
                .booking(booking_id)?
                .ok_or(DomainError::NotFound("booking"))?;

            match booking.confirm(reference, Utc::now())? {
                Transition::Changed(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_booking(booking.version(), next.clone());
                    store.commit(batch)?;
                    Ok(Transition::Changed(next))
                }
                Transition::Unchanged => Ok(Transition::Unchanged),
            }
        })?;

        if let Transition::Changed(next) = &transition {
            info!(%booking_id, "booking confirmed");
            publish(
                &self.bus,
                CommerceEvent::BookingConfirmed {
                    booking_id,
                    occurred_at: next.confirmed_at().unwrap_or_else(Utc::now),
                },
            );
        }
        Ok(transition)
    }

    /// Payment failure for a booking (webhook path). Success is
    /// authoritative: confirmed bookings are untouched.
    #[instrument(skip(self), fields(%booking_id))]
    pub fn fail_booking(&self, booking_id: BookingId) -> Result<Transition<Booking>, ServiceError> {
        let transition = self.exec.run("booking", |store| {
            let booking = store
                .booking(booking_id)?
                .ok_or(DomainError::NotFound("booking"))?;

            match booking.fail_payment(Utc::now()) {
                Transition::Changed(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_booking(booking.version(), next.clone());
                    store.commit(batch)?;
                    Ok(Transition::Changed(next))
                }
                Transition::Unchanged => Ok(Transition::Unchanged),
            }
        })?;

        if transition.is_changed() {
            info!(%booking_id, "booking payment failed");
            publish(
                &self.bus,
                CommerceEvent::BookingPaymentFailed {
                    booking_id,
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(transition)
    }

    /// Cancel a booking and restore its slot capacity in the same atomic
    /// batch.
    ///
    /// `actor` is the resolved current user for self-service cancellation
    /// (must be the buyer); `None` is the system path used by the webhook
    /// gateway and the reclaimer. A refund against a completed booking is
    /// refused and queued for manual review.
    #[instrument(skip(self), fields(%booking_id))]
    pub fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: Option<UserId>,
    ) -> Result<CancelOutcome, ServiceError> {
        let outcome = self.exec.run("booking", |store| {
            let booking = store
                .booking(booking_id)?
                .ok_or(DomainError::NotFound("booking"))?;

            if let Some(actor) = actor {
                if actor != booking.buyer() {
                    return Err(DomainError::Forbidden.into());
                }
            }

            match booking.cancel(Utc::now()) {
                CancelOutcome::Cancelled(next) => {
                    let slot = store
                        .slot(next.slot_id())?
                        .ok_or(DomainError::NotFound("slot"))?;
                    let released = slot.release(next.guests());

                    let mut batch = WriteBatch::new();
                    batch.put_booking(booking.version(), next.clone());
                    batch.put_slot(slot.version(), released);
                    store.commit(batch)?;
                    Ok(CancelOutcome::Cancelled(next))
                }
                CancelOutcome::AlreadyCancelled => Ok(CancelOutcome::AlreadyCancelled),
                CancelOutcome::RequiresReview => {
                    store.push_review(
                        ReviewItem::for_booking(
                            booking_id,
                            ReviewReason::RefundAfterCompletion,
                            Utc::now(),
                        )
                        .with_payment_ref(booking.payment_ref().as_str()),
                    )?;
                    Ok(CancelOutcome::RequiresReview)
                }
            }
        })?;

        if let CancelOutcome::Cancelled(next) = &outcome {
            info!(%booking_id, guests = next.guests(), "booking cancelled, capacity restored");
            publish(
                &self.bus,
                CommerceEvent::BookingCancelled {
                    booking_id,
                    slot_id: next.slot_id(),
                    guests_released: next.guests(),
                    occurred_at: next.cancelled_at().unwrap_or_else(Utc::now),
                },
            );
        }
        Ok(outcome)
    }

    /// The experience was delivered; close out a confirmed booking.
    #[instrument(skip(self), fields(%booking_id))]
    pub fn complete_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Transition<Booking>, ServiceError> {
        let transition = self.exec.run("booking", |store| {
            let booking = store
                .booking(booking_id)?
                .ok_or(DomainError::NotFound("booking"))?;

            match booking.complete(Utc::now())? {
                Transition::Changed(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_booking(booking.version(), next.clone());
                    store.commit(batch)?;
                    Ok(Transition::Changed(next))
                }
                Transition::Unchanged => Ok(Transition::Unchanged),
            }
        })?;

        if transition.is_changed() {
            publish(
                &self.bus,
                CommerceEvent::BookingCompleted {
                    booking_id,
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(transition)
    }
}
