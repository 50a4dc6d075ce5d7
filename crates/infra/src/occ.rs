//! Optimistic update executor: bounded, jittered retry around conditional
//! writes.
//!
//! The executor has no knowledge of booking/order semantics. It re-invokes
//! an attempt closure while the closure fails with a store-level version
//! conflict; everything else — business rejections, infrastructure failures,
//! success — passes straight through. The reservation workflow, the
//! fulfillment workflow and the reclaimer all ride the same loop, which is
//! what makes them agree on conflict behavior.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use wayfare_core::{DomainError, DomainResult, ProductId, SlotId, Versioned};
use wayfare_inventory::{ReservableSlot, StockableProduct};
use wayfare_payments::PaymentError;

use crate::store::{CommerceStore, StoreError, WriteBatch};

/// Error surface of the workflow layer.
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    /// Deterministic business rejection; terminal for this call.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure failure from the store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The payment gateway rejected or could not issue an intent.
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl ServiceError {
    /// True when the caller may retry the whole call and expect it to
    /// succeed (transient conflict or recoverable infrastructure).
    pub fn is_retriable(&self) -> bool {
        match self {
            ServiceError::Domain(e) => !e.is_terminal(),
            ServiceError::Store(e) => e.is_retriable(),
            ServiceError::Payment(PaymentError::Unreachable(_)) => true,
            ServiceError::Payment(PaymentError::Rejected(_)) => false,
        }
    }
}

/// Backoff strategy for conflict retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy for the executor.
///
/// Delays stay in the tens-of-milliseconds range: conflicts under hot
/// contention resolve quickly, and anything longer just stacks latency onto
/// the losing request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts (first try included).
    pub max_attempts: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to de-synchronize herds of retriers.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that fails on the first conflict (useful in tests that
    /// assert conflict surfacing).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Calculate the delay before the retry following `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * f64::from(attempt)).min(max_ms),
        };

        // Deterministic attempt-derived jitter; good enough to spread a
        // thundering herd without pulling in an RNG.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((f64::from(attempt) * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Generic compare-and-swap retry loop over a [`CommerceStore`].
#[derive(Debug, Clone)]
pub struct OptimisticExecutor<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> OptimisticExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<S: CommerceStore> OptimisticExecutor<S> {
    /// Run `attempt` until it succeeds, fails with a non-conflict error, or
    /// retries are exhausted.
    ///
    /// The closure must re-read every row it conditionally writes — the
    /// whole point of the loop is that each attempt sees fresh state.
    /// Exhaustion surfaces as [`DomainError::ConcurrencyConflict`] carrying
    /// `entity` and the attempt count.
    pub fn run<T, F>(&self, entity: &str, mut attempt: F) -> Result<T, ServiceError>
    where
        F: FnMut(&S) -> Result<T, ServiceError>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt(&self.store) {
                Err(ServiceError::Store(StoreError::Conflict(detail))) => {
                    if attempts >= self.policy.max_attempts {
                        warn!(entity, attempts, %detail, "optimistic retries exhausted");
                        return Err(DomainError::conflict(entity, attempts).into());
                    }
                    let delay = self.policy.delay_for_attempt(attempts);
                    debug!(entity, attempts, ?delay, %detail, "version conflict, retrying");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    /// Single-row contract: read the slot, apply a pure mutation,
    /// conditionally write, retry on stale version.
    pub fn update_slot<F>(&self, id: SlotId, mutate: F) -> Result<ReservableSlot, ServiceError>
    where
        F: Fn(&ReservableSlot) -> DomainResult<ReservableSlot>,
    {
        self.run("slot", |store| {
            let current = store
                .slot(id)?
                .ok_or(DomainError::NotFound("slot"))?;
            let mut next = mutate(&current).map_err(ServiceError::Domain)?;

            let mut batch = WriteBatch::new();
            batch.put_slot(current.version(), next.clone());
            store.commit(batch)?;

            next.set_version(current.version() + 1);
            Ok(next)
        })
    }

    /// Single-row contract for products; see [`Self::update_slot`].
    pub fn update_product<F>(
        &self,
        id: ProductId,
        mutate: F,
    ) -> Result<StockableProduct, ServiceError>
    where
        F: Fn(&StockableProduct) -> DomainResult<StockableProduct>,
    {
        self.run("product", |store| {
            let current = store
                .product(id)?
                .ok_or(DomainError::NotFound("product"))?;
            let mut next = mutate(&current).map_err(ServiceError::Domain)?;

            let mut batch = WriteBatch::new();
            batch.put_product(current.version(), next.clone());
            store.commit(batch)?;

            next.set_version(current.version() + 1);
            Ok(next)
        })
    }
}
