//! Performance benchmarks for paddock-engine

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use paddock_engine::{
    Animal, AnimalType, ConnectivityMonitor, Filter, MemoryRemote, Order, Report, Store,
    SyncEngine, SyncOptions,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .checked_add_days(chrono::Days::new(offset))
        .unwrap()
}

/// `animals` animals with `days` reports each, all unsynced.
async fn populated_store(animals: usize, days: u64) -> Store {
    let store = Store::open_in_memory().await.unwrap();
    for n in 0..animals {
        let animal = store
            .insert(Animal::new(format!("Cow {n}"), AnimalType::Cow))
            .await
            .unwrap();
        for d in 0..days {
            store
                .insert(Report::new(animal, day(d)).with_milk(10.0 + d as f64))
                .await
                .unwrap();
        }
    }
    store
}

fn bench_store_operations(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("insert_animal", |b| {
        let store = rt.block_on(Store::open_in_memory()).unwrap();
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move {
                store
                    .insert(black_box(Animal::new("Bessie", AnimalType::Cow)))
                    .await
                    .unwrap()
            }
        })
    });

    group.bench_function("insert_report", |b| {
        let store = rt.block_on(Store::open_in_memory()).unwrap();
        let animal = rt
            .block_on(store.insert(Animal::new("Bessie", AnimalType::Cow)))
            .unwrap();
        let mut next = 0u64;
        b.to_async(&rt).iter(|| {
            next += 1;
            let report = Report::new(animal, day(next)).with_milk(12.0);
            let store = store.clone();
            async move { store.insert(black_box(report)).await.unwrap() }
        })
    });

    group.bench_function("query_unsynced_reports", |b| {
        let store = rt.block_on(populated_store(10, 100));
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move {
                store
                    .query::<Report>(black_box(&Filter::new().unsynced()), Order::Newest)
                    .await
                    .unwrap()
            }
        })
    });

    group.finish();
}

fn bench_sync_pass(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("sync_pass");
    group.sample_size(10);

    for animals in [1usize, 10, 50] {
        group.bench_with_input(
            BenchmarkId::new("push_all", animals * 11),
            &animals,
            |b, &animals| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        let store = populated_store(animals, 10).await;
                        let engine = SyncEngine::new(
                            store,
                            Arc::new(MemoryRemote::new()),
                            Arc::new(ConnectivityMonitor::online()),
                            SyncOptions::default(),
                        );
                        let start = Instant::now();
                        black_box(engine.sync_all().await.unwrap());
                        total += start.elapsed();
                    }
                    total
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_sync_pass);
criterion_main!(benches);
