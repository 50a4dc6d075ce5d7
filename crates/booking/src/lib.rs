//! `wayfare-booking` — the Booking entity and its state machine.
//!
//! Transitions are pure row→row functions. The idempotent no-op rules and
//! the authoritative-success rule live here, in one place, so the creation
//! workflow, the webhook gateway and the reclaimer cannot disagree on
//! transition legality.

pub mod booking;

pub use booking::{Booking, BookingStatus, CancelOutcome};
