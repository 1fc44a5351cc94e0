use common::{AggregateId, ProductId};
use criterion::{Criterion, criterion_group, criterion_main};
use ledger::{InMemoryReservationLedger, ReservationLedger};

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = InMemoryReservationLedger::with_stock([("SKU-BENCH", 1_000)]);
    let product = ProductId::new("SKU-BENCH");

    c.bench_function("ledger/reserve_then_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order_id = AggregateId::new();
                ledger.try_reserve(&product, order_id, 1).await.unwrap();
                ledger.release_held(&product, order_id).await.unwrap();
            });
        });
    });
}

fn bench_contended_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("ledger/contended_reserve_x32", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryReservationLedger::with_stock([("HOT", 16)]);
                let handles: Vec<_> = (0..32)
                    .map(|_| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move {
                            let product = ProductId::new("HOT");
                            let order_id = AggregateId::new();
                            loop {
                                match ledger.try_reserve(&product, order_id, 1).await.unwrap() {
                                    ledger::ReserveOutcome::VersionConflict { .. } => {
                                        tokio::task::yield_now().await
                                    }
                                    _ => break,
                                }
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_reserve_release, bench_contended_reserve);
criterion_main!(benches);
