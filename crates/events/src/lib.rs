//! `wayfare-events` — outbound domain-event plumbing.
//!
//! Workflows publish a typed [`CommerceEvent`] after every *committed* state
//! transition. Delivery is at-least-once and best-effort: workflow
//! correctness never depends on a publish succeeding, so publish failures
//! are logged and swallowed at the call site.

pub mod bus;
pub mod commerce;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use commerce::CommerceEvent;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
