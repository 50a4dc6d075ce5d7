//! Payment-intent issuance port.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque reference to a payment intent/charge at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRef(String);

impl PaymentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The gateway rejected the intent request.
    #[error("payment gateway rejected intent: {0}")]
    Rejected(String),
    /// The gateway could not be reached.
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),
}

/// Issues payment intents at reservation/order-creation time.
///
/// The real implementation talks to the gateway's HTTP API in the calling
/// layer; the core only needs the returned reference to stamp on the entity.
pub trait PaymentIntents: Send + Sync {
    fn create_intent(&self, amount_minor: u64) -> Result<PaymentRef, PaymentError>;
}

impl<P> PaymentIntents for std::sync::Arc<P>
where
    P: PaymentIntents + ?Sized,
{
    fn create_intent(&self, amount_minor: u64) -> Result<PaymentRef, PaymentError> {
        (**self).create_intent(amount_minor)
    }
}

/// Deterministic in-process intent issuer for tests/dev.
#[derive(Debug, Default)]
pub struct StaticIntents {
    counter: AtomicU64,
}

impl StaticIntents {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PaymentIntents for StaticIntents {
    fn create_intent(&self, _amount_minor: u64) -> Result<PaymentRef, PaymentError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(PaymentRef::new(format!("pi_test_{n:08}")))
    }
}
