use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use wayfare_core::{SlotId, UserId};
use wayfare_events::{CommerceEvent, EventEnvelope, InMemoryEventBus};
use wayfare_infra::occ::RetryPolicy;
use wayfare_infra::services::ReservationService;
use wayfare_infra::store::{CommerceStore, InMemoryStore};
use wayfare_inventory::ReservableSlot;
use wayfare_payments::StaticIntents;

type Store = Arc<InMemoryStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<CommerceEvent>>>;
type Intents = Arc<StaticIntents>;

fn service(store: Store) -> Arc<ReservationService<Store, Bus, Intents>> {
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    Arc::new(ReservationService::with_policy(
        store,
        bus,
        Arc::new(StaticIntents::new()),
        RetryPolicy::fixed(32, Duration::from_micros(50)),
    ))
}

/// Uncontended booking creation throughput: one caller, fresh slot per
/// batch.
fn bench_sequential_bookings(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_booking_sequential");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_caller", |b| {
        let store: Store = Arc::new(InMemoryStore::new());
        let reservations = service(store.clone());

        b.iter_with_setup(
            || {
                let slot_id = SlotId::new();
                store
                    .insert_slot(ReservableSlot::new(slot_id, u32::MAX, 1000))
                    .unwrap();
                slot_id
            },
            |slot_id| {
                black_box(
                    reservations
                        .create_booking(UserId::new(), slot_id, 1)
                        .unwrap(),
                );
            },
        );
    });

    group.finish();
}

/// Contended case: N threads hammering the same slot. Measures the full
/// conflict-retry cost of the optimistic executor under a hot row.
fn bench_contended_bookings(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_booking_contended");

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                let store: Store = Arc::new(InMemoryStore::new());
                let reservations = service(store.clone());

                b.iter_with_setup(
                    || {
                        let slot_id = SlotId::new();
                        store
                            .insert_slot(ReservableSlot::new(slot_id, u32::MAX, 1000))
                            .unwrap();
                        slot_id
                    },
                    |slot_id| {
                        let barrier = Arc::new(Barrier::new(threads));
                        let handles: Vec<_> = (0..threads)
                            .map(|_| {
                                let reservations = reservations.clone();
                                let barrier = barrier.clone();
                                thread::spawn(move || {
                                    barrier.wait();
                                    reservations.create_booking(UserId::new(), slot_id, 1)
                                })
                            })
                            .collect();
                        for handle in handles {
                            black_box(handle.join().unwrap().unwrap());
                        }
                    },
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_bookings, bench_contended_bookings);
criterion_main!(benches);
