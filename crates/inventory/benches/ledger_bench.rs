use std::sync::Arc;

use common::{OrderId, ProductId};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{AtomicStockLedger, InMemoryDatabase, InventoryReservationStore, Product};

fn bench_try_reserve_uncontended(c: &mut Criterion) {
    let ledger = AtomicStockLedger::new();
    ledger.preheat("iPhone15", i64::MAX);
    let id = ProductId::new("iPhone15");

    c.bench_function("ledger/try_reserve_uncontended", |b| {
        b.iter(|| ledger.try_reserve(&id, 1));
    });
}

fn bench_flash_sale_burst(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .build()
        .unwrap();

    c.bench_function("ledger/flash_sale_burst_1000_callers_stock_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = AtomicStockLedger::new();
                ledger.preheat("iPhone15", 100);
                let ledger = Arc::new(ledger);

                let callers: Vec<_> = (0..1000)
                    .map(|_| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move {
                            ledger.try_reserve(&ProductId::new("iPhone15"), 1)
                        })
                    })
                    .collect();
                for caller in callers {
                    caller.await.unwrap();
                }
            });
        });
    });
}

fn bench_reserve_and_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InventoryReservationStore::new(InMemoryDatabase::with_products([Product::new(
        "iPhone15",
        "iPhone 15",
        i64::MAX / 2,
        8_000,
    )]));
    let items = vec![ProductId::new("iPhone15")];
    let mut n = 0u64;

    c.bench_function("reservation/reserve_then_release", |b| {
        b.iter(|| {
            n += 1;
            let order = OrderId::new(format!("ORD-{n}"));
            rt.block_on(async {
                store.reserve(&order, &items).await.unwrap();
                store.release(&order, &items).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_try_reserve_uncontended,
    bench_flash_sale_burst,
    bench_reserve_and_release
);
criterion_main!(benches);
