use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfare_core::{BookingId, DomainError, DomainResult, Entity, SlotId, Transition, UserId, Versioned};
use wayfare_payments::PaymentRef;

/// Booking lifecycle.
///
/// `PendingPayment → {Confirmed, PaymentFailed, Cancelled}`,
/// `Confirmed → {Completed, Cancelled}`; `Completed` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    PaymentFailed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::PaymentFailed => "payment_failed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// States the stale-reservation sweep may cancel.
    pub fn is_reclaimable(&self) -> bool {
        matches!(
            self,
            BookingStatus::PendingPayment | BookingStatus::PaymentFailed
        )
    }
}

impl core::str::FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(BookingStatus::PendingPayment),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "payment_failed" => Ok(BookingStatus::PaymentFailed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown booking status '{other}'"
            ))),
        }
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Commit the returned row and restore the slot capacity.
    Cancelled(Booking),
    /// Nothing to do.
    AlreadyCancelled,
    /// The booking already completed; cancellation is refused and the case
    /// goes to the manual-review queue.
    RequiresReview,
}

/// A reservation against one [`SlotId`].
///
/// The guest count and price are a snapshot taken at creation time,
/// independent of later slot edits. Never physically deleted — the status
/// column carries history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    slot_id: SlotId,
    buyer: UserId,
    guests: u32,
    /// Total in minor currency units.
    total_price: u64,
    status: BookingStatus,
    payment_ref: PaymentRef,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: BookingId,
        slot_id: SlotId,
        buyer: UserId,
        guests: u32,
        total_price: u64,
        payment_ref: PaymentRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            slot_id,
            buyer,
            guests,
            total_price,
            status: BookingStatus::PendingPayment,
            payment_ref,
            created_at,
            confirmed_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    /// Reconstruct a row loaded from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: BookingId,
        slot_id: SlotId,
        buyer: UserId,
        guests: u32,
        total_price: u64,
        status: BookingStatus,
        payment_ref: PaymentRef,
        created_at: DateTime<Utc>,
        confirmed_at: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            id,
            slot_id,
            buyer,
            guests,
            total_price,
            status,
            payment_ref,
            created_at,
            confirmed_at,
            cancelled_at,
            version,
        }
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    pub fn buyer(&self) -> UserId {
        self.buyer
    }

    pub fn guests(&self) -> u32 {
        self.guests
    }

    pub fn total_price(&self) -> u64 {
        self.total_price
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn payment_ref(&self) -> &PaymentRef {
        &self.payment_ref
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// Payment success. `PendingPayment → Confirmed`; repeated deliveries
    /// and deliveries after a terminal state are no-ops.
    ///
    /// A reference that does not match the booking's intent is a
    /// data-integrity problem, never silently absorbed.
    pub fn confirm(
        &self,
        reference: &PaymentRef,
        at: DateTime<Utc>,
    ) -> DomainResult<Transition<Self>> {
        if reference != &self.payment_ref {
            return Err(DomainError::payment_mismatch(
                format!("booking {}", self.id),
                reference.as_str(),
            ));
        }

        match self.status {
            BookingStatus::PendingPayment => {
                let mut next = self.clone();
                next.status = BookingStatus::Confirmed;
                next.confirmed_at = Some(at);
                Ok(Transition::Changed(next))
            }
            _ => Ok(Transition::Unchanged),
        }
    }

    /// Payment failure. `PendingPayment → PaymentFailed`. Success is
    /// authoritative: a failure event never downgrades `Confirmed` or
    /// `Completed`.
    pub fn fail_payment(&self, _at: DateTime<Utc>) -> Transition<Self> {
        match self.status {
            BookingStatus::PendingPayment => {
                let mut next = self.clone();
                next.status = BookingStatus::PaymentFailed;
                Transition::Changed(next)
            }
            _ => Transition::Unchanged,
        }
    }

    /// Cancellation (buyer, refund, or reclamation sweep).
    ///
    /// Whoever commits the `Cancelled` row must restore the slot capacity
    /// in the same write batch; `Cancelled` is reached at most once, so the
    /// restore happens at most once.
    pub fn cancel(&self, at: DateTime<Utc>) -> CancelOutcome {
        match self.status {
            BookingStatus::Cancelled => CancelOutcome::AlreadyCancelled,
            BookingStatus::Completed => CancelOutcome::RequiresReview,
            BookingStatus::PendingPayment
            | BookingStatus::PaymentFailed
            | BookingStatus::Confirmed => {
                let mut next = self.clone();
                next.status = BookingStatus::Cancelled;
                next.cancelled_at = Some(at);
                CancelOutcome::Cancelled(next)
            }
        }
    }

    /// The experience was delivered. `Confirmed → Completed`.
    pub fn complete(&self, _at: DateTime<Utc>) -> DomainResult<Transition<Self>> {
        match self.status {
            BookingStatus::Confirmed => {
                let mut next = self.clone();
                next.status = BookingStatus::Completed;
                Ok(Transition::Changed(next))
            }
            BookingStatus::Completed => Ok(Transition::Unchanged),
            from => Err(DomainError::InvalidTransition {
                from: from.as_str(),
                to: "completed",
            }),
        }
    }
}

impl Entity for Booking {
    type Id = BookingId;

    fn id(&self) -> &BookingId {
        &self.id
    }
}

impl Versioned for Booking {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
