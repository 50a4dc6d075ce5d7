//! `wayfare-inventory` — the shared mutable resources of the commerce core.
//!
//! [`ReservableSlot`] (bookable capacity) and [`StockableProduct`] (unit
//! stock) are the only rows written by more than one workflow. Their mutation
//! methods are pure row→row functions; all persistence goes through the
//! optimistic executor in the infra crate, never direct field writes.

pub mod product;
pub mod slot;

pub use product::{ProductStatus, StockableProduct};
pub use slot::ReservableSlot;
