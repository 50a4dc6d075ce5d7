//! Entity and versioning traits shared by all row-state domain types.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// A row carrying a monotonic version counter for optimistic concurrency.
///
/// The version is the sole serialization mechanism for shared mutable rows:
/// every committed conditional write bumps it by exactly one, and a write
/// whose expected version is stale affects zero rows. Domain code never
/// bumps the counter itself; the store does on commit.
pub trait Versioned: Entity {
    /// Current committed version of the row.
    fn version(&self) -> u64;

    /// Set the version. Called by the store when materializing a committed
    /// write; not part of any public workflow contract.
    fn set_version(&mut self, version: u64);
}

/// Outcome of an idempotent state-machine transition.
///
/// The no-op arm is how repeated webhook deliveries and
/// authoritative-success downgrades stay invisible: the transition reports
/// "nothing to do" instead of failing, and the caller commits nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    /// The transition applied; commit the returned row.
    Changed(T),
    /// Already in (or past) the requested state; commit nothing.
    Unchanged,
}

impl<T> Transition<T> {
    pub fn changed(self) -> Option<T> {
        match self {
            Transition::Changed(value) => Some(value),
            Transition::Unchanged => None,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed(_))
    }
}
