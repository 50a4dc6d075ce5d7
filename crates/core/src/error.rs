//! Domain error model.

use thiserror::Error;

use crate::id::{ProductId, SlotId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// One line item that failed stock validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockShortage {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (capacity exhausted,
/// illegal transitions, authorization). Infrastructure concerns belong to the
/// store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The slot cannot accommodate the requested guest count.
    ///
    /// Not retriable with the same parameters; the caller should offer
    /// alternatives.
    #[error("slot {slot_id} unavailable: requested {requested}, available {available}")]
    SlotUnavailable {
        slot_id: SlotId,
        requested: u32,
        available: u32,
    },

    /// One or more cart lines exceed current stock. Carries every failing
    /// line, not just the first.
    #[error("insufficient stock for {} line item(s)", shortages.len())]
    InsufficientStock { shortages: Vec<StockShortage> },

    /// Optimistic retries were exhausted without a successful conditional
    /// write. Transient; retriable by the caller.
    #[error("concurrency conflict on {entity} after {attempts} attempt(s)")]
    ConcurrencyConflict { entity: String, attempts: u32 },

    /// The payment reference on an event does not match the entity it
    /// targets. Indicates a data-integrity problem; never auto-recovered.
    #[error("payment reference mismatch on {entity}: got '{reference}'")]
    PaymentMismatch { entity: String, reference: String },

    /// A requested entity is absent.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Authorization failure at the workflow boundary.
    #[error("forbidden")]
    Forbidden,

    /// A state transition that the machine does not define.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// A value failed validation (e.g. zero guests, empty cart).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(entity: impl Into<String>, attempts: u32) -> Self {
        Self::ConcurrencyConflict {
            entity: entity.into(),
            attempts,
        }
    }

    pub fn payment_mismatch(entity: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::PaymentMismatch {
            entity: entity.into(),
            reference: reference.into(),
        }
    }

    pub fn not_found(kind: &'static str) -> Self {
        Self::NotFound(kind)
    }

    /// True for rejections that cannot succeed on retry with the same
    /// parameters.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DomainError::ConcurrencyConflict { .. })
    }
}
