use std::sync::Arc;
use std::thread;

use tether_rt::{AllocationSet, NativeHeap, StructRef, TrackingAllocator};

fn tracked_heap() -> (Arc<TrackingAllocator>, Arc<NativeHeap>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tracker = Arc::new(TrackingAllocator::new());
    let heap = NativeHeap::new(tracker.clone());
    (tracker, heap)
}

#[test]
fn test_free_twice_equals_free_once() {
    let (tracker, heap) = tracked_heap();
    let set = AllocationSet::new(heap.clone());
    set.add(heap.calloc(1, 16));
    set.add(heap.calloc(3, 8));

    set.free();
    let after_first = tracker.stats();
    set.free();
    let after_second = tracker.stats();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.frees, 2);
    assert_eq!(after_second.live, 0);
    assert_eq!(after_second.invalid_frees, 0);
}

#[test]
fn test_borrow_then_free_releases_the_union_once() {
    let (tracker, heap) = tracked_heap();
    let owner = AllocationSet::new(heap.clone());
    let field = AllocationSet::new(heap.clone());
    owner.add(heap.calloc(1, 32));
    field.add(heap.calloc(1, 4));
    field.add(heap.calloc(1, 4));

    owner.borrow(&field);
    assert!(field.is_empty());
    assert_eq!(owner.len(), 3);

    owner.free();
    field.free();
    drop(field);
    drop(owner);

    let stats = tracker.stats();
    assert_eq!(stats.allocations, 3);
    assert_eq!(stats.frees, 3);
    assert_eq!(stats.invalid_frees, 0);
}

#[test]
fn test_crossed_borrows_do_not_deadlock() {
    let (tracker, heap) = tracked_heap();
    let a = Arc::new(AllocationSet::new(heap.clone()));
    let b = Arc::new(AllocationSet::new(heap.clone()));

    let spawn = |dst: Arc<AllocationSet>, src: Arc<AllocationSet>, heap: Arc<NativeHeap>| {
        thread::spawn(move || {
            for _ in 0..500 {
                src.add(heap.calloc(1, 1));
                dst.borrow(&src);
            }
        })
    };
    let left = spawn(a.clone(), b.clone(), heap.clone());
    let right = spawn(b.clone(), a.clone(), heap.clone());
    left.join().expect("left thread panicked");
    right.join().expect("right thread panicked");

    assert_eq!(a.len() + b.len(), 1000);
    a.free();
    b.free();
    let stats = tracker.stats();
    assert_eq!(stats.frees, 1000);
    assert_eq!(stats.live, 0);
    assert_eq!(stats.invalid_frees, 0);
}

#[test]
fn test_self_reference_adds_no_address() {
    let (tracker, heap) = tracked_heap();
    let mut node = StructRef::new(heap.clone(), 16);
    let addr = node.pass_ref();
    assert_eq!(tracker.stats().allocations, 1);
    assert_eq!(node.allocs().len(), 1);

    node.store_ref(8, addr);
    assert_eq!(node.allocs().len(), 1);
    assert_eq!(heap.registry().count(addr), Some(1));
    assert_eq!(node.load_ref(8), Some(addr));

    drop(node);
    let stats = tracker.stats();
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.invalid_frees, 0);
}

#[test]
fn test_shared_reference_is_freed_by_the_last_owner() {
    let (tracker, heap) = tracked_heap();
    let mut target = StructRef::new(heap.clone(), 8);
    let target_addr = target.pass_ref();

    let mut holder = StructRef::new(heap.clone(), 16);
    holder.store_ref(8, target_addr);
    assert_eq!(heap.registry().count(target_addr), Some(2));

    let alias = StructRef::from_raw(heap.clone(), 8, target_addr);
    assert_eq!(heap.registry().count(target_addr), Some(3));

    target.free_ref();
    drop(alias);
    assert!(tracker.is_live(target_addr));

    holder.free_ref();
    assert!(!tracker.is_live(target_addr));
    let stats = tracker.stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.frees, 2);
    assert_eq!(stats.invalid_frees, 0);
}

#[test]
fn test_reset_keeps_references_held_by_other_wrappers() {
    let (tracker, heap) = tracked_heap();
    let mut target = StructRef::new(heap.clone(), 8);
    let target_addr = target.pass_ref();

    let mut holder = StructRef::new(heap.clone(), 16);
    holder.store_ref(8, target_addr);
    let holder_addr = holder.reference().expect("holder is materialized");
    let alias = StructRef::from_raw(heap.clone(), 8, target_addr);
    assert_eq!(heap.registry().count(target_addr), Some(3));

    holder.reset_ref();
    assert_eq!(heap.registry().count(target_addr), Some(2));
    assert_eq!(heap.registry().count(holder_addr), None);

    target.free_ref();
    assert!(tracker.is_live(target_addr));
    drop(alias);
    assert!(!tracker.is_live(target_addr));
    drop(holder);

    let stats = tracker.stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.invalid_frees, 0);
    assert!(tracker.is_live(holder_addr));
    heap.release(holder_addr);
    assert_eq!(tracker.stats().live, 0);
}

#[test]
fn test_reset_of_a_shared_wrapper_leaves_the_other_owner_in_charge() {
    let (tracker, heap) = tracked_heap();
    let mut owner = StructRef::new(heap.clone(), 8);
    let addr = owner.pass_ref();
    let mut alias = StructRef::from_raw(heap.clone(), 8, addr);

    alias.reset_ref();
    assert_eq!(heap.registry().count(addr), Some(1));
    drop(alias);
    assert!(tracker.is_live(addr));

    drop(owner);
    let stats = tracker.stats();
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.live, 0);
    assert_eq!(stats.invalid_frees, 0);
}
