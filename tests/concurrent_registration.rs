mod common;

use std::sync::Arc;

use rayon::prelude::*;

use common::{FireCounter, SETTLE_TIMEOUT, heap_with_capacity, init_logging, wait_until};
use finref::{FinalizableList, FinalizableSet};

#[test]
fn parallel_adds_all_fire_exactly_once() {
    init_logging();
    let heap = heap_with_capacity(1 << 20);
    let set = FinalizableSet::weak(heap.clone()).unwrap();
    let fired = FireCounter::default();

    let values: Vec<Arc<usize>> = (0..512).map(Arc::new).collect();
    values.par_iter().for_each(|value| {
        set.add(value, fired.callback());
    });
    assert_eq!(set.len(), 512);
    assert_eq!(heap.tracked_count(), 512);

    drop(values);
    assert_eq!(heap.collect(), 512);
    assert!(wait_until(SETTLE_TIMEOUT, || fired.get() == 512));
    assert!(set.is_empty());
    assert_eq!(set.get_stats().ignored, 0);
}

#[test]
fn removals_racing_collection_never_double_fire() {
    let heap = heap_with_capacity(1 << 20);
    let set = FinalizableSet::weak(heap.clone()).unwrap();
    let fired = FireCounter::default();

    let values: Vec<Arc<usize>> = (0..256).map(Arc::new).collect();
    for value in &values {
        set.add(value, fired.callback());
    }

    // Even values are removed explicitly, odd ones are left to the heap.
    let removed: usize = values
        .par_iter()
        .enumerate()
        .map(|(index, value)| {
            if index % 2 == 0 && set.remove(value) {
                1
            } else {
                0
            }
        })
        .sum();
    assert_eq!(removed, 128);

    drop(values);
    heap.collect();
    assert!(wait_until(SETTLE_TIMEOUT, || set.is_empty()));
    assert_eq!(fired.get(), 128);
}

#[test]
fn readers_and_writers_share_a_list() {
    let heap = heap_with_capacity(1 << 20);
    let list = FinalizableList::weak(heap.clone()).unwrap();
    let anchor = Arc::new(0usize);

    (0..64usize).into_par_iter().for_each(|index| {
        if index % 4 == 0 {
            let _ = list.handles();
            let _ = list.to_string();
        } else {
            list.add(&anchor, || {});
        }
    });
    assert_eq!(list.len(), 48);

    drop(anchor);
    heap.collect();
    assert!(wait_until(SETTLE_TIMEOUT, || list.is_empty()));
    assert_eq!(list.get_stats().fired, 48);
}

#[test]
fn allocations_from_many_threads_respect_capacity() {
    let heap = heap_with_capacity(64 * 1024);
    let soft = FinalizableSet::soft(heap.clone()).unwrap();
    let fired = FireCounter::default();
    for _ in 0..8 {
        soft.add(&Arc::new(vec![0u8; 16]), fired.callback());
    }

    let outcomes: Vec<bool> = (0..32)
        .into_par_iter()
        .map(|_| heap.allocate(1024).map(drop).is_ok())
        .collect();
    assert!(outcomes.iter().all(|ok| *ok));
    assert_eq!(heap.used_bytes(), 0);

    let held: Vec<_> = (0..16).map(|_| heap.allocate(4 * 1024).unwrap()).collect();
    assert!(heap.allocate(1).is_err());
    assert!(wait_until(SETTLE_TIMEOUT, || fired.get() == 8));
    drop(held);
    assert_eq!(heap.available_bytes(), 64 * 1024);
}
