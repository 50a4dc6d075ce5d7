//! `wayfare-ordering` — the Order entity and its state machine.

pub mod order;

pub use order::{CartLine, CartSnapshot, Order, OrderLine, OrderStatus, RefundOutcome};
