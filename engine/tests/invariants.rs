//! Property tests for store invariants that hold for any sequence of writes.

use chrono::NaiveDate;
use paddock_engine::{
    Animal, AnimalType, EntityKind, Error, Filter, LocalId, Order, Report, Store,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1 + offset).unwrap()
}

async fn herd(store: &Store, size: usize) -> Vec<LocalId> {
    let mut ids = Vec::with_capacity(size);
    for n in 0..size {
        let id = store
            .insert(Animal::new(format!("Cow {n}"), AnimalType::Cow))
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn one_report_per_animal_and_day(
        writes in prop::collection::vec((0usize..3, 0u32..4, 0.0f64..40.0), 1..24),
    ) {
        runtime().block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let animals = herd(&store, 3).await;
            let mut taken = BTreeSet::new();

            for (animal, offset, milk) in writes {
                let result = store
                    .insert(Report::new(animals[animal], day(offset)).with_milk(milk))
                    .await;
                if taken.insert((animal, offset)) {
                    assert!(result.is_ok(), "{result:?}");
                } else {
                    assert!(matches!(result, Err(Error::DuplicateRecord { .. })));
                }
            }

            let total = store.count(EntityKind::Report, &Filter::new()).await.unwrap();
            assert_eq!(total, taken.len() as u64);
            for (animal, offset) in &taken {
                let slot = Filter::new().slot(animals[*animal], day(*offset));
                assert_eq!(store.count(EntityKind::Report, &slot).await.unwrap(), 1);
            }
        });
    }

    #[test]
    fn deleting_an_animal_leaves_no_dangling_reports(
        slots in prop::collection::btree_set((0usize..4, 0u32..6), 0..20),
        victim in 0usize..4,
    ) {
        runtime().block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let animals = herd(&store, 4).await;
            for (animal, offset) in &slots {
                store
                    .insert(Report::new(animals[*animal], day(*offset)))
                    .await
                    .unwrap();
            }

            let removed = store.delete::<Animal>(animals[victim]).await.unwrap();
            assert!(removed.is_some());

            let orphans = store
                .count(EntityKind::Report, &Filter::new().owner(animals[victim]))
                .await
                .unwrap();
            assert_eq!(orphans, 0);

            let survivors = store.query::<Report>(&Filter::new(), Order::Oldest).await.unwrap();
            let expected = slots.iter().filter(|(animal, _)| *animal != victim).count();
            assert_eq!(survivors.len(), expected);
            for report in survivors {
                assert!(store.exists(EntityKind::Animal, report.data.animal_id).await.unwrap());
            }

            // A retried delete finds nothing and changes nothing.
            assert!(store.delete::<Animal>(animals[victim]).await.unwrap().is_none());
        });
    }
}
