//! Persistence layer for the commerce core.
//!
//! This module defines the row-state store boundary without making storage
//! assumptions: the in-memory implementation backs tests/dev, the Postgres
//! implementation backs production, and both enforce the same conditional
//! write semantics.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    CommerceStore, LedgerInsert, ReviewItem, ReviewReason, StoreError, WebhookRecord, Write,
    WriteBatch,
};
