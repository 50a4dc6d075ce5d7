use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use wayfare_booking::Booking;
use wayfare_core::{BookingId, Entity, OrderId, ProductId, SlotId, Versioned};
use wayfare_inventory::{ReservableSlot, StockableProduct};
use wayfare_ordering::Order;

use super::r#trait::{
    CommerceStore, LedgerInsert, ReviewItem, StoreError, WebhookRecord, Write, WriteBatch,
};

#[derive(Debug, Default)]
struct State {
    slots: HashMap<SlotId, ReservableSlot>,
    products: HashMap<ProductId, StockableProduct>,
    bookings: HashMap<BookingId, Booking>,
    orders: HashMap<OrderId, Order>,
    webhook_events: HashMap<String, WebhookRecord>,
    reviews: Vec<ReviewItem>,
}

/// In-memory commerce store.
///
/// Intended for tests/dev. One mutex guards all tables, which makes
/// `commit` trivially all-or-nothing: preconditions are validated and
/// writes applied under the same guard, so concurrent committers serialize
/// exactly like transactions against a single database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

fn check_version(kind: &str, id: impl core::fmt::Display, found: u64, expected: u64) -> Result<(), StoreError> {
    if found != expected {
        return Err(StoreError::Conflict(format!(
            "{kind} {id}: expected version {expected}, found {found}"
        )));
    }
    Ok(())
}

impl CommerceStore for InMemoryStore {
    fn slot(&self, id: SlotId) -> Result<Option<ReservableSlot>, StoreError> {
        Ok(self.lock()?.slots.get(&id).cloned())
    }

    fn product(&self, id: ProductId) -> Result<Option<StockableProduct>, StoreError> {
        Ok(self.lock()?.products.get(&id).cloned())
    }

    fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.lock()?.bookings.get(&id).cloned())
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    fn insert_slot(&self, mut slot: ReservableSlot) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.slots.contains_key(slot.id()) {
            return Err(StoreError::DuplicateKey(format!("slot {}", slot.id())));
        }
        slot.set_version(1);
        state.slots.insert(*slot.id(), slot);
        Ok(())
    }

    fn insert_product(&self, mut product: StockableProduct) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.products.contains_key(product.id()) {
            return Err(StoreError::DuplicateKey(format!("product {}", product.id())));
        }
        product.set_version(1);
        state.products.insert(*product.id(), product);
        Ok(())
    }

    fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let state = self.lock()?;
        let mut stale: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.status().is_reclaimable() && b.created_at() < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(Booking::created_at);
        Ok(stale)
    }

    fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let state = self.lock()?;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status().is_reclaimable() && o.created_at() < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(Order::created_at);
        Ok(stale)
    }

    fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookRecord>, StoreError> {
        Ok(self.lock()?.webhook_events.get(external_id).cloned())
    }

    fn record_event_seen(&self, record: WebhookRecord) -> Result<LedgerInsert, StoreError> {
        let mut state = self.lock()?;
        if let Some(existing) = state.webhook_events.get(&record.external_id) {
            return Ok(LedgerInsert::Duplicate(existing.clone()));
        }
        state
            .webhook_events
            .insert(record.external_id.clone(), record);
        Ok(LedgerInsert::Inserted)
    }

    fn update_webhook_event(&self, record: &WebhookRecord) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        match state.webhook_events.get_mut(&record.external_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(format!(
                "webhook event {}",
                record.external_id
            ))),
        }
    }

    fn push_review(&self, item: ReviewItem) -> Result<(), StoreError> {
        self.lock()?.reviews.push(item);
        Ok(())
    }

    fn pending_reviews(&self) -> Result<Vec<ReviewItem>, StoreError> {
        Ok(self.lock()?.reviews.clone())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        // Phase 1: validate every precondition under the guard.
        for write in batch.writes() {
            match write {
                Write::PutSlot {
                    expected_version,
                    slot,
                } => {
                    let found = state
                        .slots
                        .get(slot.id())
                        .ok_or_else(|| StoreError::Missing(format!("slot {}", slot.id())))?;
                    check_version("slot", slot.id(), found.version(), *expected_version)?;
                }
                Write::PutProduct {
                    expected_version,
                    product,
                } => {
                    let found = state
                        .products
                        .get(product.id())
                        .ok_or_else(|| StoreError::Missing(format!("product {}", product.id())))?;
                    check_version("product", product.id(), found.version(), *expected_version)?;
                }
                Write::InsertBooking(booking) => {
                    if state.bookings.contains_key(booking.id()) {
                        return Err(StoreError::DuplicateKey(format!("booking {}", booking.id())));
                    }
                }
                Write::PutBooking {
                    expected_version,
                    booking,
                } => {
                    let found = state
                        .bookings
                        .get(booking.id())
                        .ok_or_else(|| StoreError::Missing(format!("booking {}", booking.id())))?;
                    check_version("booking", booking.id(), found.version(), *expected_version)?;
                }
                Write::InsertOrder(order) => {
                    if state.orders.contains_key(order.id()) {
                        return Err(StoreError::DuplicateKey(format!("order {}", order.id())));
                    }
                }
                Write::PutOrder {
                    expected_version,
                    order,
                } => {
                    let found = state
                        .orders
                        .get(order.id())
                        .ok_or_else(|| StoreError::Missing(format!("order {}", order.id())))?;
                    check_version("order", order.id(), found.version(), *expected_version)?;
                }
            }
        }

        // Phase 2: apply. Nothing below can fail, so the batch is atomic.
        for write in batch.into_writes() {
            match write {
                Write::PutSlot {
                    expected_version,
                    mut slot,
                } => {
                    slot.set_version(expected_version + 1);
                    state.slots.insert(*slot.id(), slot);
                }
                Write::PutProduct {
                    expected_version,
                    mut product,
                } => {
                    product.set_version(expected_version + 1);
                    state.products.insert(*product.id(), product);
                }
                Write::InsertBooking(mut booking) => {
                    booking.set_version(1);
                    state.bookings.insert(*booking.id(), booking);
                }
                Write::PutBooking {
                    expected_version,
                    mut booking,
                } => {
                    booking.set_version(expected_version + 1);
                    state.bookings.insert(*booking.id(), booking);
                }
                Write::InsertOrder(mut order) => {
                    order.set_version(1);
                    state.orders.insert(*order.id(), order);
                }
                Write::PutOrder {
                    expected_version,
                    mut order,
                } => {
                    order.set_version(expected_version + 1);
                    state.orders.insert(*order.id(), order);
                }
            }
        }

        Ok(())
    }
}
