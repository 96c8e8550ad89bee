mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{FireCounter, Payload, SETTLE_TIMEOUT, heap_with_capacity, wait_until};
use finref::{FinalizableList, RegistryError};

fn labels(list: &FinalizableList<Payload>) -> Vec<&'static str> {
    list.iter()
        .map(|handle| handle.get().map_or("?", |value| value.0))
        .collect()
}

#[test]
fn positional_operations_keep_order() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::weak(heap).unwrap();
    let a = Arc::new(Payload("a"));
    let b = Arc::new(Payload("b"));
    let c = Arc::new(Payload("c"));

    list.add(&a, || {});
    list.add(&c, || {});
    list.insert(1, &b, || {}).unwrap();
    assert_eq!(labels(&list), ["a", "b", "c"]);

    list.insert(3, &a, || {}).unwrap();
    assert_eq!(labels(&list), ["a", "b", "c", "a"]);

    let removed = list.remove(0).unwrap();
    assert!(removed.refers_to(&a));
    assert_eq!(labels(&list), ["b", "c", "a"]);
}

#[test]
fn out_of_range_indices_are_rejected() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::weak(heap).unwrap();
    let value = Arc::new(Payload("only"));
    list.add(&value, || {});

    assert!(matches!(list.get(1), Err(RegistryError::NoSuchElement(_))));
    assert!(matches!(list.remove(1), Err(RegistryError::NoSuchElement(_))));
    assert!(matches!(list.set(1, &value, || {}), Err(RegistryError::NoSuchElement(_))));
    assert!(matches!(list.insert(2, &value, || {}), Err(RegistryError::NoSuchElement(_))));
    assert_eq!(list.len(), 1);

    let message = list.get(7).unwrap_err().to_string();
    assert_eq!(message, "No such element: index 7 out of range for length 1");
}

#[test]
fn set_replaces_entry_and_abandons_old_callback() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::weak(heap.clone()).unwrap();
    let old_fired = FireCounter::default();
    let new_fired = FireCounter::default();
    let old = Arc::new(Payload("old"));
    let new = Arc::new(Payload("new"));

    list.add(&old, old_fired.callback());
    let previous = list.set(0, &new, new_fired.callback()).unwrap();
    assert!(previous.refers_to(&old));
    assert_eq!(labels(&list), ["new"]);

    drop(old);
    drop(new);
    heap.collect();
    assert!(wait_until(SETTLE_TIMEOUT, || new_fired.get() == 1));
    assert_eq!(old_fired.get(), 0);
    assert!(list.is_empty());
}

#[test]
fn reclaimed_entries_leave_the_list() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::weak(heap.clone()).unwrap();
    let fired = FireCounter::default();
    let kept = Arc::new(Payload("kept"));
    let lost = Arc::new(Payload("lost"));

    list.add(&kept, fired.callback());
    list.add(&lost, fired.callback());
    list.add(&kept, fired.callback());

    drop(lost);
    heap.collect();
    assert!(wait_until(SETTLE_TIMEOUT, || list.len() == 2));
    assert_eq!(fired.get(), 1);
    assert_eq!(labels(&list), ["kept", "kept"]);
}

#[test]
fn remove_handle_and_clear_skip_callbacks() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::weak(heap.clone()).unwrap();
    let fired = FireCounter::default();
    let a = Arc::new(Payload("a"));
    let b = Arc::new(Payload("b"));

    list.add(&a, fired.callback());
    list.add(&b, fired.callback());
    let first = list.get(0).unwrap();
    assert!(list.remove_handle(&first));
    assert!(!list.remove_handle(&first));

    list.clear();
    assert!(list.is_empty());
    drop(a);
    drop(b);
    heap.collect();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fired.get(), 0);
}

#[test]
fn phantom_list_entries_are_unobservable() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::phantom(heap).unwrap();
    assert_eq!(list.to_string(), "list is empty");

    let value = Arc::new(Payload("ghost"));
    list.add(&value, || {});
    assert!(list.get(0).unwrap().get().is_none());
    assert!(list.to_string().ends_with("<unobservable>"));
}

#[test]
fn iteration_restarts_from_a_fresh_snapshot() {
    let heap = heap_with_capacity(1 << 16);
    let list = FinalizableList::weak(heap).unwrap();
    let a = Arc::new(Payload("a"));
    list.add(&a, || {});

    let before = list.iter();
    list.add(&a, || {});
    assert_eq!(before.count(), 1);
    assert_eq!(list.iter().count(), 2);
}

#[test]
fn dropping_the_list_stops_its_worker() {
    let heap = heap_with_capacity(1 << 16);
    let fired = FireCounter::default();
    let value = Arc::new(Payload("orphan"));
    {
        let list = FinalizableList::weak(heap.clone()).unwrap();
        list.add(&value, fired.callback());
    }

    drop(value);
    heap.collect();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fired.get(), 0);
}
