//! Stale reservation reclamation.
//!
//! Bookings and orders abandoned in a pending-payment (or failed-but-
//! unresolved) state past the staleness threshold are cancelled and their
//! capacity/stock restored. The sweep re-reads each entity through the
//! optimistic executor immediately before restoring, and skips anything
//! that has since settled — so a late-arriving success webhook always wins
//! over a concurrently-running sweep.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use wayfare_booking::{Booking, CancelOutcome};
use wayfare_core::{BookingId, DomainError, Entity, OrderId, Versioned};
use wayfare_events::{CommerceEvent, EventBus, EventEnvelope};
use wayfare_ordering::{Order, RefundOutcome};

use crate::occ::{OptimisticExecutor, RetryPolicy, ServiceError};
use crate::services::publish;
use crate::store::{CommerceStore, WriteBatch};

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Age past which a pending-payment entity is considered abandoned.
    pub threshold: chrono::Duration,
    /// How often the background worker sweeps.
    pub interval: Duration,
    /// Name for logging/thread naming.
    pub name: String,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            threshold: chrono::Duration::minutes(30),
            interval: Duration::from_secs(60),
            name: "stale-reclaimer".to_string(),
        }
    }
}

impl ReclaimConfig {
    pub fn with_threshold(mut self, threshold: chrono::Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// One reclaimed entity, for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimedEntity {
    Booking(BookingId),
    Order(OrderId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimDetail {
    pub entity: ReclaimedEntity,
    /// Guest seats or stock units returned to the shared counter.
    pub units_restored: u32,
}

/// Sweep result summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimSummary {
    pub cancelled: u32,
    pub units_restored: u64,
    pub details: Vec<ReclaimDetail>,
}

/// The reclamation sweep.
pub struct Reclaimer<S, B> {
    exec: OptimisticExecutor<S>,
    bus: B,
}

impl<S, B> Reclaimer<S, B>
where
    S: CommerceStore,
    B: EventBus<EventEnvelope<CommerceEvent>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            exec: OptimisticExecutor::new(store),
            bus,
        }
    }

    pub fn with_policy(store: S, bus: B, policy: RetryPolicy) -> Self {
        Self {
            exec: OptimisticExecutor::with_policy(store, policy),
            bus,
        }
    }

    /// Cancel everything stuck in a pending-payment state for longer than
    /// `threshold`, restoring capacity/stock.
    pub fn reclaim_stale(&self, threshold: chrono::Duration) -> Result<ReclaimSummary, ServiceError> {
        self.reclaim_stale_at(threshold, Utc::now())
    }

    /// Clock-explicit variant, used by tests and the worker.
    #[instrument(skip(self), fields(?threshold))]
    pub fn reclaim_stale_at(
        &self,
        threshold: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<ReclaimSummary, ServiceError> {
        let cutoff = now - threshold;
        let mut summary = ReclaimSummary::default();

        for candidate in self.exec.store().pending_bookings_before(cutoff)? {
            match self.reclaim_booking(*candidate.id(), now) {
                Ok(Some(booking)) => {
                    summary.cancelled += 1;
                    summary.units_restored += u64::from(booking.guests());
                    summary.details.push(ReclaimDetail {
                        entity: ReclaimedEntity::Booking(*booking.id()),
                        units_restored: booking.guests(),
                    });
                    publish(
                        &self.bus,
                        CommerceEvent::BookingCancelled {
                            booking_id: *booking.id(),
                            slot_id: booking.slot_id(),
                            guests_released: booking.guests(),
                            occurred_at: now,
                        },
                    );
                }
                Ok(None) => {}
                Err(ServiceError::Store(error)) => return Err(error.into()),
                Err(error) => {
                    // One stubborn entity must not abort the sweep.
                    warn!(booking_id = %candidate.id(), %error, "skipping booking this sweep");
                }
            }
        }

        for candidate in self.exec.store().pending_orders_before(cutoff)? {
            match self.reclaim_order(*candidate.id(), now) {
                Ok(Some(order)) => {
                    let units = order.unit_count();
                    summary.cancelled += 1;
                    summary.units_restored += u64::from(units);
                    summary.details.push(ReclaimDetail {
                        entity: ReclaimedEntity::Order(*order.id()),
                        units_restored: units,
                    });
                    publish(
                        &self.bus,
                        CommerceEvent::OrderCancelled {
                            order_id: *order.id(),
                            units_restored: units,
                            occurred_at: now,
                        },
                    );
                }
                Ok(None) => {}
                Err(ServiceError::Store(error)) => return Err(error.into()),
                Err(error) => {
                    warn!(order_id = %candidate.id(), %error, "skipping order this sweep");
                }
            }
        }

        info!(
            cancelled = summary.cancelled,
            units_restored = summary.units_restored,
            "reclamation sweep finished"
        );
        Ok(summary)
    }

    /// Cancel one stale booking. Returns `None` when the booking settled
    /// between the scan and this write — the authoritative-success re-check
    /// that makes the sweep safe against a racing confirm.
    fn reclaim_booking(
        &self,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, ServiceError> {
        self.exec.run("booking", |store| {
            let booking = store
                .booking(booking_id)?
                .ok_or(DomainError::NotFound("booking"))?;

            if !booking.status().is_reclaimable() {
                return Ok(None);
            }
            let CancelOutcome::Cancelled(next) = booking.cancel(now) else {
                return Ok(None);
            };

            let slot = store
                .slot(next.slot_id())?
                .ok_or(DomainError::NotFound("slot"))?;
            let released = slot.release(next.guests());

            let mut batch = WriteBatch::new();
            batch.put_booking(booking.version(), next.clone());
            batch.put_slot(slot.version(), released);
            store.commit(batch)?;
            Ok(Some(next))
        })
    }

    /// Cancel one stale order, restoring stock for every line.
    fn reclaim_order(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, ServiceError> {
        self.exec.run("order", |store| {
            let order = store
                .order(order_id)?
                .ok_or(DomainError::NotFound("order"))?;

            if !order.status().is_reclaimable() {
                return Ok(None);
            }
            let RefundOutcome::Applied(next) = order.cancel(now) else {
                return Ok(None);
            };

            let mut batch = WriteBatch::new();
            batch.put_order(order.version(), next.clone());
            for line in next.lines() {
                let product = store
                    .product(line.product_id)?
                    .ok_or(DomainError::NotFound("product"))?;
                batch.put_product(product.version(), product.restock(line.quantity));
            }
            store.commit(batch)?;
            Ok(Some(next))
        })
    }
}

/// Handle to control and join the background sweep worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Periodic background sweep: a plain interval thread with a
/// graceful-shutdown channel.
#[derive(Debug)]
pub struct ReclaimWorker;

impl ReclaimWorker {
    pub fn spawn<S, B>(reclaimer: Arc<Reclaimer<S, B>>, config: ReclaimConfig) -> WorkerHandle
    where
        S: CommerceStore + 'static,
        B: EventBus<EventEnvelope<CommerceEvent>> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(&reclaimer, &config, &shutdown_rx))
            .expect("failed to spawn reclaim worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<S, B>(
    reclaimer: &Reclaimer<S, B>,
    config: &ReclaimConfig,
    shutdown_rx: &mpsc::Receiver<()>,
) where
    S: CommerceStore,
    B: EventBus<EventEnvelope<CommerceEvent>>,
{
    loop {
        match shutdown_rx.recv_timeout(config.interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!(name = %config.name, "reclaim worker shutting down");
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Err(error) = reclaimer.reclaim_stale(config.threshold) {
                    warn!(%error, "reclamation sweep failed; will retry next interval");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ReservationService;
    use crate::store::InMemoryStore;
    use wayfare_booking::BookingStatus;
    use wayfare_core::{SlotId, UserId};
    use wayfare_events::InMemoryEventBus;
    use wayfare_inventory::ReservableSlot;
    use wayfare_payments::{PaymentRef, StaticIntents};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<CommerceEvent>>>;

    fn setup() -> (Arc<InMemoryStore>, Bus) {
        (Arc::new(InMemoryStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn seed_stale_booking(store: &Arc<InMemoryStore>, slot_id: SlotId, guests: u32) -> Booking {
        let slot = store.slot(slot_id).unwrap().unwrap();
        let booking = Booking::pending(
            BookingId::new(),
            slot_id,
            UserId::new(),
            guests,
            1000 * u64::from(guests),
            PaymentRef::new("pi_stale"),
            Utc::now() - chrono::Duration::minutes(45),
        );
        let mut batch = WriteBatch::new();
        batch.put_slot(slot.version(), slot.reserve(guests).unwrap());
        batch.insert_booking(booking.clone());
        store.commit(batch).unwrap();
        store.booking(*booking.id()).unwrap().unwrap()
    }

    #[test]
    fn sweep_cancels_stale_and_restores_capacity_exactly_once() {
        let (store, bus) = setup();
        let slot_id = SlotId::new();
        store.insert_slot(ReservableSlot::new(slot_id, 5, 1000)).unwrap();
        let booking = seed_stale_booking(&store, slot_id, 3);

        let reclaimer = Reclaimer::new(store.clone(), bus);
        let summary = reclaimer
            .reclaim_stale(chrono::Duration::minutes(30))
            .unwrap();

        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.units_restored, 3);
        assert_eq!(
            summary.details,
            vec![ReclaimDetail {
                entity: ReclaimedEntity::Booking(*booking.id()),
                units_restored: 3,
            }]
        );

        let slot = store.slot(slot_id).unwrap().unwrap();
        assert_eq!(slot.booked(), 0);
        assert_eq!(
            store.booking(*booking.id()).unwrap().unwrap().status(),
            BookingStatus::Cancelled
        );

        // Conservation: an immediate second sweep is a no-op.
        let again = reclaimer
            .reclaim_stale(chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(again.cancelled, 0);
        assert_eq!(store.slot(slot_id).unwrap().unwrap().booked(), 0);
    }

    #[test]
    fn fresh_pending_bookings_are_left_alone() {
        let (store, bus) = setup();
        let slot_id = SlotId::new();
        store.insert_slot(ReservableSlot::new(slot_id, 5, 1000)).unwrap();

        let reservations = ReservationService::new(
            store.clone(),
            bus.clone(),
            Arc::new(StaticIntents::new()),
        );
        let booking = reservations
            .create_booking(UserId::new(), slot_id, 2)
            .unwrap();

        let reclaimer = Reclaimer::new(store.clone(), bus);
        let summary = reclaimer
            .reclaim_stale(chrono::Duration::minutes(30))
            .unwrap();

        assert_eq!(summary.cancelled, 0);
        assert_eq!(
            store.booking(*booking.id()).unwrap().unwrap().status(),
            BookingStatus::PendingPayment
        );
    }

    #[test]
    fn settled_bookings_survive_a_sweep_even_when_stale() {
        let (store, bus) = setup();
        let slot_id = SlotId::new();
        store.insert_slot(ReservableSlot::new(slot_id, 5, 1000)).unwrap();
        let booking = seed_stale_booking(&store, slot_id, 2);

        // Settle it before the sweep runs.
        let confirmed = booking
            .confirm(&PaymentRef::new("pi_stale"), Utc::now())
            .unwrap()
            .changed()
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.put_booking(booking.version(), confirmed);
        store.commit(batch).unwrap();

        let reclaimer = Reclaimer::new(store.clone(), bus);
        let summary = reclaimer
            .reclaim_stale(chrono::Duration::minutes(30))
            .unwrap();

        assert_eq!(summary.cancelled, 0);
        let after = store.booking(*booking.id()).unwrap().unwrap();
        assert_eq!(after.status(), BookingStatus::Confirmed);
        // Capacity is NOT restored for a confirmed booking.
        assert_eq!(store.slot(slot_id).unwrap().unwrap().booked(), 2);
    }

    #[test]
    fn worker_runs_sweeps_until_shutdown() {
        let (store, bus) = setup();
        let slot_id = SlotId::new();
        store.insert_slot(ReservableSlot::new(slot_id, 5, 1000)).unwrap();
        seed_stale_booking(&store, slot_id, 3);

        let reclaimer = Arc::new(Reclaimer::new(store.clone(), bus));
        let handle = ReclaimWorker::spawn(
            reclaimer,
            ReclaimConfig::default()
                .with_interval(Duration::from_millis(10))
                .with_threshold(chrono::Duration::minutes(30)),
        );

        // Give the worker a couple of intervals to run.
        std::thread::sleep(Duration::from_millis(100));
        handle.shutdown();

        assert_eq!(store.slot(slot_id).unwrap().unwrap().booked(), 0);
    }
}
