//! Integration tests for the reservation/settlement core.
//!
//! These exercise the full stack — services, optimistic executor, webhook
//! gateway and reclaimer — against the in-memory store, including the
//! concurrency properties: no oversell, webhook idempotency, authoritative
//! success, and confirm-vs-reclaim race safety.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use wayfare_booking::BookingStatus;
use wayfare_core::{DomainError, Entity, SlotId, UserId, Versioned};
use wayfare_events::{CommerceEvent, EventEnvelope, InMemoryEventBus};
use wayfare_inventory::{ReservableSlot, StockableProduct};
use wayfare_ordering::{CartLine, CartSnapshot, OrderStatus};
use wayfare_payments::{PaymentRef, StaticIntents, sign_payload};

use crate::occ::{RetryPolicy, ServiceError};
use crate::reclaim::Reclaimer;
use crate::services::{FulfillmentService, ReservationService};
use crate::store::{CommerceStore, InMemoryStore, WriteBatch};
use crate::webhook::{WebhookConfig, WebhookGateway, WebhookOutcome};

type Store = Arc<InMemoryStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<CommerceEvent>>>;
type Intents = Arc<StaticIntents>;

const SECRET: &str = "whsec_integration";

struct Harness {
    store: Store,
    reservations: Arc<ReservationService<Store, Bus, Intents>>,
    fulfillment: Arc<FulfillmentService<Store, Bus, Intents>>,
    gateway: WebhookGateway<Store, Bus, Intents>,
    reclaimer: Reclaimer<Store, Bus>,
}

fn setup() -> Harness {
    wayfare_observability::init();

    let store: Store = Arc::new(InMemoryStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let intents: Intents = Arc::new(StaticIntents::new());

    // Generous retry budget so contention tests fail on capacity, not on
    // conflict exhaustion.
    let policy = RetryPolicy::fixed(16, Duration::from_millis(1));

    let reservations = Arc::new(ReservationService::with_policy(
        store.clone(),
        bus.clone(),
        intents.clone(),
        policy.clone(),
    ));
    let fulfillment = Arc::new(FulfillmentService::with_policy(
        store.clone(),
        bus.clone(),
        intents.clone(),
        policy.clone(),
    ));
    let gateway = WebhookGateway::new(
        WebhookConfig::new(SECRET),
        store.clone(),
        reservations.clone(),
        fulfillment.clone(),
    );
    let reclaimer = Reclaimer::with_policy(store.clone(), bus, policy);

    Harness {
        store,
        reservations,
        fulfillment,
        gateway,
        reclaimer,
    }
}

fn signed(payload: &str) -> String {
    sign_payload(payload, SECRET, Utc::now())
}

fn booking_event(kind: &str, external_id: &str, payment_ref: &PaymentRef, booking_id: impl core::fmt::Display) -> String {
    format!(
        r#"{{"id":"{external_id}","type":"{kind}","data":{{"payment_ref":"{payment_ref}","metadata":{{"booking_id":"{booking_id}"}}}}}}"#
    )
}

fn order_event(kind: &str, external_id: &str, payment_ref: &PaymentRef, order_id: impl core::fmt::Display) -> String {
    format!(
        r#"{{"id":"{external_id}","type":"{kind}","data":{{"payment_ref":"{payment_ref}","metadata":{{"order_id":"{order_id}"}}}}}}"#
    )
}

#[test]
fn concurrent_bookings_never_oversell_a_slot() {
    let h = setup();
    let slot_id = SlotId::new();
    let capacity = 10;
    h.store
        .insert_slot(ReservableSlot::new(slot_id, capacity, 1000))
        .unwrap();

    let workers = 16;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for i in 0..workers {
        let reservations = h.reservations.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            let guests = (i % 2 + 1) as u32;
            barrier.wait();
            reservations.create_booking(UserId::new(), slot_id, guests)
        }));
    }

    let mut booked_total = 0u32;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(booking) => booked_total += booking.guests(),
            Err(ServiceError::Domain(DomainError::SlotUnavailable { .. })) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let slot = h.store.slot(slot_id).unwrap().unwrap();
    assert_eq!(slot.booked(), booked_total);
    assert!(slot.booked() <= capacity, "slot oversold: {}", slot.booked());
}

#[test]
fn two_bookings_of_three_on_a_slot_of_five_admit_exactly_one() {
    let h = setup();
    let slot_id = SlotId::new();
    h.store
        .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let reservations = h.reservations.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                reservations.create_booking(UserId::new(), slot_id, 3)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of the two rivals must win");
    assert!(results.iter().any(|r| matches!(
        r,
        Err(ServiceError::Domain(DomainError::SlotUnavailable {
            requested: 3,
            ..
        }))
    )));

    assert_eq!(h.store.slot(slot_id).unwrap().unwrap().booked(), 3);
}

#[test]
fn concurrent_orders_never_oversell_stock() {
    let h = setup();
    let seller = UserId::new();
    let product_id = wayfare_core::ProductId::new();
    h.store
        .insert_product(StockableProduct::new(product_id, seller, 10, 500))
        .unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let fulfillment = h.fulfillment.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let cart = CartSnapshot::new(vec![CartLine {
                    product_id,
                    quantity: 3,
                }]);
                barrier.wait();
                fulfillment.create_order(UserId::new(), &cart)
            })
        })
        .collect();

    let mut units_sold = 0u32;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(order) => units_sold += order.unit_count(),
            Err(ServiceError::Domain(DomainError::InsufficientStock { .. })) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert!(units_sold <= 10);
    let product = h.store.product(product_id).unwrap().unwrap();
    assert_eq!(product.stock(), 10 - units_sold);
}

#[test]
fn insufficient_stock_reports_every_failing_line_and_mutates_nothing() {
    let h = setup();
    let seller = UserId::new();
    let scarce = wayfare_core::ProductId::new();
    let empty = wayfare_core::ProductId::new();
    let plenty = wayfare_core::ProductId::new();
    h.store
        .insert_product(StockableProduct::new(scarce, seller, 1, 100))
        .unwrap();
    h.store
        .insert_product(StockableProduct::new(empty, seller, 0, 100))
        .unwrap();
    h.store
        .insert_product(StockableProduct::new(plenty, seller, 5, 100))
        .unwrap();

    let cart = CartSnapshot::new(vec![
        CartLine {
            product_id: scarce,
            quantity: 2,
        },
        CartLine {
            product_id: empty,
            quantity: 1,
        },
        CartLine {
            product_id: plenty,
            quantity: 1,
        },
    ]);

    let err = h.fulfillment.create_order(UserId::new(), &cart).unwrap_err();
    match err {
        ServiceError::Domain(DomainError::InsufficientStock { shortages }) => {
            assert_eq!(shortages.len(), 2, "both failing lines must be reported");
            assert!(shortages.iter().any(|s| s.product_id == scarce && s.available == 1));
            assert!(shortages.iter().any(|s| s.product_id == empty && s.available == 0));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The healthy line must not have been decremented.
    assert_eq!(h.store.product(plenty).unwrap().unwrap().stock(), 5);
}

#[test]
fn payment_failed_after_success_never_downgrades() {
    let h = setup();
    let slot_id = SlotId::new();
    h.store
        .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
        .unwrap();
    let booking = h
        .reservations
        .create_booking(UserId::new(), slot_id, 2)
        .unwrap();

    let success = booking_event("payment_succeeded", "evt_s", booking.payment_ref(), booking.id());
    let failure = booking_event("payment_failed", "evt_f", booking.payment_ref(), booking.id());

    assert_eq!(
        h.gateway.handle_event(&success, &signed(&success)).unwrap(),
        WebhookOutcome::Processed
    );
    assert_eq!(
        h.gateway.handle_event(&failure, &signed(&failure)).unwrap(),
        WebhookOutcome::Processed
    );

    let settled = h.store.booking(*booking.id()).unwrap().unwrap();
    assert_eq!(settled.status(), BookingStatus::Confirmed);
}

#[test]
fn refund_delivered_twice_restores_stock_exactly_once() {
    let h = setup();
    let seller = UserId::new();
    let product_id = wayfare_core::ProductId::new();
    h.store
        .insert_product(StockableProduct::new(product_id, seller, 10, 500))
        .unwrap();

    let cart = CartSnapshot::new(vec![CartLine {
        product_id,
        quantity: 3,
    }]);
    let order = h.fulfillment.create_order(UserId::new(), &cart).unwrap();
    assert_eq!(h.store.product(product_id).unwrap().unwrap().stock(), 7);

    let paid = order_event("payment_succeeded", "evt_paid", order.payment_ref(), order.id());
    h.gateway.handle_event(&paid, &signed(&paid)).unwrap();

    let refund = order_event("charge_refunded", "evt_refund", order.payment_ref(), order.id());
    assert_eq!(
        h.gateway.handle_event(&refund, &signed(&refund)).unwrap(),
        WebhookOutcome::Processed
    );
    assert_eq!(h.store.product(product_id).unwrap().unwrap().stock(), 10);

    // Redelivery of the identical event: ledger skip, no second restore.
    assert_eq!(
        h.gateway.handle_event(&refund, &signed(&refund)).unwrap(),
        WebhookOutcome::Duplicate
    );
    assert_eq!(h.store.product(product_id).unwrap().unwrap().stock(), 10);
    assert_eq!(
        h.store.order(*order.id()).unwrap().unwrap().status(),
        OrderStatus::Refunded
    );
}

#[test]
fn concurrent_duplicate_deliveries_settle_exactly_once() {
    let h = setup();
    let slot_id = SlotId::new();
    h.store
        .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
        .unwrap();
    let booking = h
        .reservations
        .create_booking(UserId::new(), slot_id, 2)
        .unwrap();

    let payload = booking_event("payment_succeeded", "evt_race", booking.payment_ref(), booking.id());
    let header = signed(&payload);

    let gateway = Arc::new(h.gateway);
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gateway = gateway.clone();
            let payload = payload.clone();
            let header = header.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                gateway.handle_event(&payload, &header)
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let settled = h.store.booking(*booking.id()).unwrap().unwrap();
    assert_eq!(settled.status(), BookingStatus::Confirmed);
    // Exactly one transition happened: insert (v1) then confirm (v2).
    assert_eq!(settled.version(), 2);

    let record = h.store.webhook_event("evt_race").unwrap().unwrap();
    assert!(record.processed);
}

#[test]
fn reclaim_sweep_and_confirm_webhook_agree_under_race() {
    // Run the race repeatedly; whichever side wins, the committed state
    // must be internally consistent: a confirmed booking keeps its
    // capacity, a cancelled one has returned it. Both-at-once is the bug
    // this test exists to catch.
    for round in 0..20 {
        let h = setup();
        let slot_id = SlotId::new();
        h.store
            .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
            .unwrap();

        // Seed a booking that is already past the staleness threshold.
        let slot = h.store.slot(slot_id).unwrap().unwrap();
        let booking = wayfare_booking::Booking::pending(
            wayfare_core::BookingId::new(),
            slot_id,
            UserId::new(),
            2,
            2000,
            PaymentRef::new(format!("pi_race_{round}")),
            Utc::now() - chrono::Duration::minutes(45),
        );
        let mut batch = WriteBatch::new();
        batch.put_slot(slot.version(), slot.reserve(2).unwrap());
        batch.insert_booking(booking.clone());
        h.store.commit(batch).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let reservations = h.reservations.clone();
        let reference = booking.payment_ref().clone();
        let booking_id = *booking.id();
        let confirm = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                reservations.confirm_booking(booking_id, &reference)
            })
        };
        let reclaimer = h.reclaimer;
        let sweep = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                reclaimer.reclaim_stale(chrono::Duration::minutes(30))
            })
        };

        confirm.join().unwrap().unwrap();
        let summary = sweep.join().unwrap().unwrap();

        let settled = h.store.booking(booking_id).unwrap().unwrap();
        let slot = h.store.slot(slot_id).unwrap().unwrap();
        match settled.status() {
            BookingStatus::Confirmed => {
                assert_eq!(slot.booked(), 2, "confirmed booking lost its capacity");
                assert_eq!(summary.cancelled, 0, "sweep cancelled a confirmed booking");
            }
            BookingStatus::Cancelled => {
                assert_eq!(slot.booked(), 0, "cancelled booking kept its capacity");
                assert_eq!(summary.cancelled, 1);
            }
            other => panic!("round {round}: unexpected terminal status {other:?}"),
        }
    }
}

#[test]
fn stale_order_reclaim_restores_stock_and_is_idempotent() {
    let h = setup();
    let seller = UserId::new();
    let product_id = wayfare_core::ProductId::new();
    h.store
        .insert_product(StockableProduct::new(product_id, seller, 10, 500))
        .unwrap();

    // Seed a stale pending order the way the workflow would have written it.
    let product = h.store.product(product_id).unwrap().unwrap();
    let order = wayfare_ordering::Order::pending(
        wayfare_core::OrderId::new(),
        UserId::new(),
        seller,
        vec![wayfare_ordering::OrderLine {
            product_id,
            quantity: 4,
            unit_price: 500,
        }],
        PaymentRef::new("pi_stale_order"),
        Utc::now() - chrono::Duration::minutes(90),
    );
    let mut batch = WriteBatch::new();
    batch.put_product(product.version(), product.reserve_stock(4).unwrap());
    batch.insert_order(order.clone());
    h.store.commit(batch).unwrap();
    assert_eq!(h.store.product(product_id).unwrap().unwrap().stock(), 6);

    let summary = h
        .reclaimer
        .reclaim_stale(chrono::Duration::minutes(30))
        .unwrap();
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.units_restored, 4);
    assert_eq!(h.store.product(product_id).unwrap().unwrap().stock(), 10);
    assert_eq!(
        h.store.order(*order.id()).unwrap().unwrap().status(),
        OrderStatus::Cancelled
    );

    let again = h
        .reclaimer
        .reclaim_stale(chrono::Duration::minutes(30))
        .unwrap();
    assert_eq!(again.cancelled, 0);
    assert_eq!(h.store.product(product_id).unwrap().unwrap().stock(), 10);
}

#[test]
fn seller_fulfillment_progression_is_authorized_and_ordered() {
    let h = setup();
    let seller = UserId::new();
    let product_id = wayfare_core::ProductId::new();
    h.store
        .insert_product(StockableProduct::new(product_id, seller, 10, 500))
        .unwrap();

    let cart = CartSnapshot::new(vec![CartLine {
        product_id,
        quantity: 1,
    }]);
    let order = h.fulfillment.create_order(UserId::new(), &cart).unwrap();
    h.fulfillment
        .mark_order_paid(*order.id(), order.payment_ref())
        .unwrap();

    // A stranger may not advance someone else's order.
    assert!(matches!(
        h.fulfillment
            .advance_order(*order.id(), UserId::new(), OrderStatus::Processing),
        Err(ServiceError::Domain(DomainError::Forbidden))
    ));

    h.fulfillment
        .advance_order(*order.id(), seller, OrderStatus::Processing)
        .unwrap();
    h.fulfillment
        .advance_order(*order.id(), seller, OrderStatus::Shipped)
        .unwrap();
    h.fulfillment
        .advance_order(*order.id(), seller, OrderStatus::Delivered)
        .unwrap();

    assert_eq!(
        h.store.order(*order.id()).unwrap().unwrap().status(),
        OrderStatus::Delivered
    );
}

#[test]
fn cancelling_a_booking_requires_the_buyer() {
    let h = setup();
    let slot_id = SlotId::new();
    h.store
        .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
        .unwrap();
    let buyer = UserId::new();
    let booking = h.reservations.create_booking(buyer, slot_id, 2).unwrap();

    assert!(matches!(
        h.reservations.cancel_booking(*booking.id(), Some(UserId::new())),
        Err(ServiceError::Domain(DomainError::Forbidden))
    ));

    h.reservations
        .cancel_booking(*booking.id(), Some(buyer))
        .unwrap();
    assert_eq!(h.store.slot(slot_id).unwrap().unwrap().booked(), 0);
}

#[test]
fn refund_against_a_completed_booking_lands_in_the_review_queue() {
    let h = setup();
    let slot_id = SlotId::new();
    h.store
        .insert_slot(ReservableSlot::new(slot_id, 5, 1000))
        .unwrap();
    let booking = h
        .reservations
        .create_booking(UserId::new(), slot_id, 2)
        .unwrap();

    h.reservations
        .confirm_booking(*booking.id(), booking.payment_ref())
        .unwrap();
    h.reservations.complete_booking(*booking.id()).unwrap();

    let refund = booking_event("charge_refunded", "evt_late_refund", booking.payment_ref(), booking.id());
    assert_eq!(
        h.gateway.handle_event(&refund, &signed(&refund)).unwrap(),
        WebhookOutcome::Processed
    );

    // Not cancelled, capacity untouched, but an operator has a case to work.
    let settled = h.store.booking(*booking.id()).unwrap().unwrap();
    assert_eq!(settled.status(), BookingStatus::Completed);
    assert_eq!(h.store.slot(slot_id).unwrap().unwrap().booked(), 2);

    let reviews = h.store.pending_reviews().unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].booking_id, Some(*booking.id()));
}
