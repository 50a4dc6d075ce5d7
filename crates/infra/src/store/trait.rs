use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use wayfare_booking::Booking;
use wayfare_core::{BookingId, OrderId, ProductId, SlotId};
use wayfare_inventory::{ReservableSlot, StockableProduct};
use wayfare_ordering::Order;

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency at the row
/// level) as opposed to domain errors. `Conflict` is consumed by the
/// optimistic executor's retry loop and only reaches callers re-labelled as
/// a domain `ConcurrencyConflict` once retries are exhausted.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// A conditional write found a stale version (zero rows affected).
    #[error("version conflict: {0}")]
    Conflict(String),

    /// An insert hit a uniqueness constraint.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// An update targeted a row that does not exist.
    #[error("row not found: {0}")]
    Missing(String),

    /// The backing store could not be reached or failed mid-operation.
    /// Retriable once the infrastructure recovers.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True when retrying the same operation later can succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// One write in an atomic batch.
///
/// `Put*` writes are conditional: they carry the version the caller read,
/// and the store commits the row at `expected_version + 1` only if the
/// stored version still matches. `Insert*` writes create fresh rows at
/// version 1.
#[derive(Debug, Clone)]
pub enum Write {
    PutSlot {
        expected_version: u64,
        slot: ReservableSlot,
    },
    PutProduct {
        expected_version: u64,
        product: StockableProduct,
    },
    InsertBooking(Booking),
    PutBooking {
        expected_version: u64,
        booking: Booking,
    },
    InsertOrder(Order),
    PutOrder {
        expected_version: u64,
        order: Order,
    },
}

/// An all-or-nothing unit of work.
///
/// This is the explicit transaction handle of the core: every multi-row
/// mutation (N stock decrements + the order insert, a cancellation + its
/// capacity restore) is built as one batch and committed through
/// [`CommerceStore::commit`], so partial application is impossible even
/// under process crash.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_slot(&mut self, expected_version: u64, slot: ReservableSlot) -> &mut Self {
        self.writes.push(Write::PutSlot {
            expected_version,
            slot,
        });
        self
    }

    pub fn put_product(&mut self, expected_version: u64, product: StockableProduct) -> &mut Self {
        self.writes.push(Write::PutProduct {
            expected_version,
            product,
        });
        self
    }

    pub fn insert_booking(&mut self, booking: Booking) -> &mut Self {
        self.writes.push(Write::InsertBooking(booking));
        self
    }

    pub fn put_booking(&mut self, expected_version: u64, booking: Booking) -> &mut Self {
        self.writes.push(Write::PutBooking {
            expected_version,
            booking,
        });
        self
    }

    pub fn insert_order(&mut self, order: Order) -> &mut Self {
        self.writes.push(Write::InsertOrder(order));
        self
    }

    pub fn put_order(&mut self, expected_version: u64, order: Order) -> &mut Self {
        self.writes.push(Write::PutOrder {
            expected_version,
            order,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Idempotency-ledger row for one externally-identified gateway event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRecord {
    /// The gateway's event identifier (unique).
    pub external_id: String,
    pub kind: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub payload: JsonValue,
    pub first_seen_at: DateTime<Utc>,
}

impl WebhookRecord {
    /// A freshly-seen, not-yet-completed event. Inserted before any
    /// business mutation so a crash mid-processing leaves a detectable
    /// record.
    pub fn seen(
        external_id: impl Into<String>,
        kind: impl Into<String>,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            kind: kind.into(),
            processed: false,
            processed_at: None,
            last_error: None,
            payload,
            first_seen_at: now,
        }
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.processed = true;
        self.processed_at = Some(now);
        self.last_error = None;
    }

    /// Record a business-rule failure. The row stays `processed = true`
    /// so the gateway is not asked to redeliver a condition redelivery
    /// cannot fix; the error text is kept for operators.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.processed = true;
        self.processed_at = Some(now);
        self.last_error = Some(error.into());
    }
}

/// Outcome of inserting a ledger row under the uniqueness constraint.
#[derive(Debug, Clone)]
pub enum LedgerInsert {
    Inserted,
    /// Another delivery won the insert race; here is its row.
    Duplicate(WebhookRecord),
}

/// Why an entity landed in the manual-review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    RefundAfterCompletion,
    RefundAfterDelivery,
}

/// A case an operator must reconcile by hand (e.g. a refund arriving for a
/// completed booking, which is never auto-cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub booking_id: Option<BookingId>,
    pub order_id: Option<OrderId>,
    pub reason: ReviewReason,
    pub payment_ref: Option<String>,
    pub noted_at: DateTime<Utc>,
}

impl ReviewItem {
    pub fn for_booking(id: BookingId, reason: ReviewReason, now: DateTime<Utc>) -> Self {
        Self {
            booking_id: Some(id),
            order_id: None,
            reason,
            payment_ref: None,
            noted_at: now,
        }
    }

    pub fn for_order(id: OrderId, reason: ReviewReason, now: DateTime<Utc>) -> Self {
        Self {
            booking_id: None,
            order_id: Some(id),
            reason,
            payment_ref: None,
            noted_at: now,
        }
    }

    pub fn with_payment_ref(mut self, reference: impl Into<String>) -> Self {
        self.payment_ref = Some(reference.into());
        self
    }
}

/// Row-state store for the commerce core.
///
/// ## Design principles
///
/// - **No storage assumptions**: in-memory implementation for tests/dev,
///   Postgres for production, both behind this trait.
/// - **Optimistic locking**: slots, products, bookings and orders carry a
///   version column; all mutation goes through [`CommerceStore::commit`]
///   with conditional writes. No long-lived locks.
/// - **Atomic batches**: `commit` applies every write or none. A version
///   mismatch anywhere in the batch fails the whole batch with
///   [`StoreError::Conflict`].
/// - **Ledger uniqueness**: `record_event_seen` enforces at most one row
///   per external event id and reports the surviving row on a lost race.
pub trait CommerceStore: Send + Sync {
    fn slot(&self, id: SlotId) -> Result<Option<ReservableSlot>, StoreError>;
    fn product(&self, id: ProductId) -> Result<Option<StockableProduct>, StoreError>;
    fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;
    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Seed a slot row (catalog management path; not part of the workflow
    /// surface).
    fn insert_slot(&self, slot: ReservableSlot) -> Result<(), StoreError>;

    /// Seed a product row (catalog management path).
    fn insert_product(&self, product: StockableProduct) -> Result<(), StoreError>;

    /// Bookings still awaiting payment resolution, created strictly before
    /// `cutoff`.
    fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;

    /// Orders still awaiting payment resolution, created strictly before
    /// `cutoff`.
    fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookRecord>, StoreError>;

    /// Insert a ledger row, enforcing the unique external id.
    fn record_event_seen(&self, record: WebhookRecord) -> Result<LedgerInsert, StoreError>;

    /// Update a ledger row in place (processed flag, error note).
    fn update_webhook_event(&self, record: &WebhookRecord) -> Result<(), StoreError>;

    fn push_review(&self, item: ReviewItem) -> Result<(), StoreError>;
    fn pending_reviews(&self) -> Result<Vec<ReviewItem>, StoreError>;

    /// Apply a batch atomically. Conditional writes re-validate their
    /// expected versions inside the same transaction boundary; the
    /// committed row version is `expected_version + 1` (inserts commit at
    /// version 1).
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

impl<S> CommerceStore for Arc<S>
where
    S: CommerceStore + ?Sized,
{
    fn slot(&self, id: SlotId) -> Result<Option<ReservableSlot>, StoreError> {
        (**self).slot(id)
    }

    fn product(&self, id: ProductId) -> Result<Option<StockableProduct>, StoreError> {
        (**self).product(id)
    }

    fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        (**self).booking(id)
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).order(id)
    }

    fn insert_slot(&self, slot: ReservableSlot) -> Result<(), StoreError> {
        (**self).insert_slot(slot)
    }

    fn insert_product(&self, product: StockableProduct) -> Result<(), StoreError> {
        (**self).insert_product(product)
    }

    fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        (**self).pending_bookings_before(cutoff)
    }

    fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        (**self).pending_orders_before(cutoff)
    }

    fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookRecord>, StoreError> {
        (**self).webhook_event(external_id)
    }

    fn record_event_seen(&self, record: WebhookRecord) -> Result<LedgerInsert, StoreError> {
        (**self).record_event_seen(record)
    }

    fn update_webhook_event(&self, record: &WebhookRecord) -> Result<(), StoreError> {
        (**self).update_webhook_event(record)
    }

    fn push_review(&self, item: ReviewItem) -> Result<(), StoreError> {
        (**self).push_review(item)
    }

    fn pending_reviews(&self) -> Result<Vec<ReviewItem>, StoreError> {
        (**self).pending_reviews()
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit(batch)
    }
}
