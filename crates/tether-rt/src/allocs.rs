use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::{NativeAddr, NativeHeap};

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Native addresses owned by one logical owner.
///
/// `borrow` moves addresses between sets, `free` releases them. Dropping a
/// set frees whatever it still owns.
pub struct AllocationSet {
    id: u64,
    heap: Arc<NativeHeap>,
    addrs: Mutex<FxHashSet<NativeAddr>>,
}

impl AllocationSet {
    pub fn new(heap: Arc<NativeHeap>) -> Self {
        AllocationSet {
            id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            heap,
            addrs: Mutex::new(FxHashSet::default()),
        }
    }

    /// Identity used to order lock acquisition between sets.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn heap(&self) -> &Arc<NativeHeap> {
        &self.heap
    }

    pub fn add(&self, addr: NativeAddr) {
        if addr.is_null() {
            return;
        }
        self.addrs.lock().insert(addr);
    }

    pub fn contains(&self, addr: NativeAddr) -> bool {
        self.addrs.lock().contains(&addr)
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.lock().len()
    }

    /// Owned addresses in ascending order.
    pub fn addresses(&self) -> Vec<NativeAddr> {
        let mut addrs: Vec<NativeAddr> = self.addrs.lock().iter().copied().collect();
        addrs.sort();
        addrs
    }

    /// Moves every address of `other` into this set and empties `other`.
    ///
    /// Both locks are taken lowest id first, so two sets borrowing from each
    /// other on different threads cannot deadlock.
    pub fn borrow(&self, other: &AllocationSet) {
        if self.id == other.id {
            return;
        }
        debug_assert!(
            Arc::ptr_eq(&self.heap, &other.heap),
            "allocation sets from different heaps"
        );
        let (mut dst, mut src) = if self.id < other.id {
            let dst = self.addrs.lock();
            let src = other.addrs.lock();
            (dst, src)
        } else {
            let src = other.addrs.lock();
            let dst = self.addrs.lock();
            (dst, src)
        };
        dst.extend(src.drain());
    }

    /// Releases every owned address and empties the set. Calling it again,
    /// or on a set emptied by `borrow`, does nothing.
    pub fn free(&self) {
        let addrs = std::mem::take(&mut *self.addrs.lock());
        if addrs.is_empty() {
            return;
        }
        log::trace!("allocation set {} releasing {} addresses", self.id, addrs.len());
        for addr in addrs {
            self.heap.release(addr);
        }
    }

    /// Empties the set without releasing anything and returns what it held.
    pub fn disown(&self) -> Vec<NativeAddr> {
        std::mem::take(&mut *self.addrs.lock()).into_iter().collect()
    }
}

impl Drop for AllocationSet {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for AllocationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationSet")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingAllocator;

    #[test]
    fn test_self_borrow_is_a_no_op() {
        let heap = NativeHeap::new(Arc::new(TrackingAllocator::new()));
        let set = AllocationSet::new(heap.clone());
        set.add(heap.calloc(1, 4));
        set.borrow(&set);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_null_is_never_owned() {
        let set = AllocationSet::new(NativeHeap::libc());
        set.add(NativeAddr::NULL);
        assert!(set.is_empty());
    }

    #[test]
    fn test_disown_keeps_memory_alive() {
        let tracker = Arc::new(TrackingAllocator::new());
        let heap = NativeHeap::new(tracker.clone());
        let set = AllocationSet::new(heap.clone());
        let addr = heap.calloc(1, 8);
        set.add(addr);
        assert_eq!(set.disown(), vec![addr]);
        drop(set);
        assert!(tracker.is_live(addr));
        heap.release(addr);
        assert!(!tracker.is_live(addr));
    }
}
