//! `wayfare-payments` — the payment-gateway boundary.
//!
//! Everything the commerce core needs from the external gateway lives here:
//! payment-intent issuance (a port with a deterministic test double), typed
//! parsing of webhook payloads into [`GatewayEvent`] with the target entity
//! decided once at parse time, and HMAC signature verification for inbound
//! deliveries.

pub mod event;
pub mod intent;
pub mod signature;

pub use event::{GatewayEvent, PaymentEventKind, PaymentTarget};
pub use intent::{PaymentError, PaymentIntents, PaymentRef, StaticIntents};
pub use signature::{SignatureError, sign_payload, verify_signature};
