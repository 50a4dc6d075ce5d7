use serde::{Deserialize, Serialize};

use wayfare_core::{DomainError, DomainResult, Entity, SlotId, Versioned};

/// Bookable capacity for one time window of one experience.
///
/// Invariant at every committed state: `0 <= booked <= capacity`.
/// Descriptive fields (capacity, price) are owned by catalog management;
/// this core mutates only `booked` and the availability flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservableSlot {
    id: SlotId,
    capacity: u32,
    booked: u32,
    /// Cleared when the slot fills; set again when capacity is released.
    available: bool,
    /// Price per guest in minor currency units (cents).
    price_per_guest: u64,
    version: u64,
}

impl ReservableSlot {
    pub fn new(id: SlotId, capacity: u32, price_per_guest: u64) -> Self {
        Self {
            id,
            capacity,
            booked: 0,
            available: capacity > 0,
            price_per_guest,
            version: 0,
        }
    }

    /// Reconstruct a row loaded from storage.
    pub fn from_parts(
        id: SlotId,
        capacity: u32,
        booked: u32,
        available: bool,
        price_per_guest: u64,
        version: u64,
    ) -> Self {
        Self {
            id,
            capacity,
            booked,
            available,
            price_per_guest,
            version,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn booked(&self) -> u32 {
        self.booked
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn price_per_guest(&self) -> u64 {
        self.price_per_guest
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.booked)
    }

    /// Reserve capacity for `guests`. Pure: returns the next row state.
    ///
    /// Fails with [`DomainError::SlotUnavailable`] when the slot is marked
    /// unavailable or the remaining capacity is insufficient. Callers retry
    /// through the optimistic executor, so this is re-evaluated against
    /// fresh state on every attempt.
    pub fn reserve(&self, guests: u32) -> DomainResult<Self> {
        if guests == 0 {
            return Err(DomainError::validation("guest count must be positive"));
        }
        if !self.available || guests > self.remaining() {
            return Err(DomainError::SlotUnavailable {
                slot_id: self.id,
                requested: guests,
                available: if self.available { self.remaining() } else { 0 },
            });
        }

        let mut next = self.clone();
        next.booked += guests;
        if next.booked == next.capacity {
            next.available = false;
        }
        Ok(next)
    }

    /// Release previously reserved capacity. Pure: returns the next row
    /// state. Saturates rather than underflowing if called against a row
    /// that never held the reservation.
    pub fn release(&self, guests: u32) -> Self {
        let mut next = self.clone();
        next.booked = next.booked.saturating_sub(guests);
        if next.booked < next.capacity {
            next.available = true;
        }
        next
    }
}

impl Entity for ReservableSlot {
    type Id = SlotId;

    fn id(&self) -> &SlotId {
        &self.id
    }
}

impl Versioned for ReservableSlot {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
