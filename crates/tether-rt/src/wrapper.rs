use std::sync::Arc;

use crate::{AllocationSet, NativeAddr, NativeHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    /// No native memory behind the wrapper yet.
    Detached,
    /// Backed by native memory.
    Materialized,
    /// Released by `free_ref`.
    Freed,
}

/// Native backing of one struct wrapper.
///
/// Mirrors the generated wrapper lifecycle: memory is allocated on the first
/// `pass_ref`, counted in the heap's registry so other wrappers can share it,
/// and released through the wrapper's own allocation set.
#[derive(Debug)]
pub struct StructRef {
    size: usize,
    reference: Option<NativeAddr>,
    allocs: AllocationSet,
    state: WrapperState,
}

impl StructRef {
    pub fn new(heap: Arc<NativeHeap>, size: usize) -> Self {
        StructRef {
            size,
            reference: None,
            allocs: AllocationSet::new(heap),
            state: WrapperState::Detached,
        }
    }

    /// Wraps existing memory. Counted memory gains a reference owned by the
    /// new wrapper; anything else stays owned by whoever allocated it.
    pub fn from_raw(heap: Arc<NativeHeap>, size: usize, addr: NativeAddr) -> Self {
        let mut wrapper = StructRef::new(heap, size);
        if addr.is_null() {
            return wrapper;
        }
        if wrapper.allocs.heap().registry().retain(addr) {
            wrapper.allocs.add(addr);
        }
        wrapper.reference = Some(addr);
        wrapper.state = WrapperState::Materialized;
        wrapper
    }

    pub fn state(&self) -> WrapperState {
        self.state
    }

    pub fn reference(&self) -> Option<NativeAddr> {
        self.reference
    }

    pub fn allocs(&self) -> &AllocationSet {
        &self.allocs
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Materializes the wrapper if needed and returns its native address.
    pub fn pass_ref(&mut self) -> NativeAddr {
        if let Some(addr) = self.reference {
            return addr;
        }
        let heap = self.allocs.heap().clone();
        let addr = heap.calloc(1, self.size);
        heap.registry().register(addr);
        self.allocs.add(addr);
        self.reference = Some(addr);
        self.state = WrapperState::Materialized;
        addr
    }

    /// Stores `target` in the pointer field at `offset`. The wrapper takes a
    /// counted reference unless it already owns that address, which is the
    /// case for a pointer back to itself.
    pub fn store_ref(&mut self, offset: usize, target: NativeAddr) {
        let base = self.pass_ref();
        debug_assert!(offset + std::mem::size_of::<usize>() <= self.size);
        unsafe {
            std::ptr::write_unaligned(base.offset(offset).as_ptr().cast::<usize>(), target.value());
        }
        if target.is_null() || self.allocs.contains(target) {
            return;
        }
        if self.allocs.heap().registry().retain(target) {
            self.allocs.add(target);
        }
    }

    /// Reads the pointer field at `offset`.
    pub fn load_ref(&self, offset: usize) -> Option<NativeAddr> {
        let base = self.reference?;
        let value = unsafe { std::ptr::read_unaligned(base.offset(offset).as_ptr().cast::<usize>()) };
        Some(NativeAddr::from_ptr(value as *mut u8))
    }

    /// Releases everything the wrapper owns and clears the reference.
    pub fn free_ref(&mut self) {
        self.allocs.free();
        if self.reference.take().is_some() {
            self.state = WrapperState::Freed;
        }
    }

    /// Detaches from the native memory without freeing it, for memory that
    /// native code has already freed or taken over. Each owned address loses
    /// the one reference this wrapper held; references other wrappers hold
    /// stay counted.
    pub fn reset_ref(&mut self) {
        let registry = self.allocs.heap().registry();
        for addr in self.allocs.disown() {
            let remaining = registry.release(addr);
            log::trace!("reset dropped a reference to {}: {:?}", addr, remaining);
        }
        self.reference = None;
        self.state = WrapperState::Detached;
    }
}

impl Drop for StructRef {
    fn drop(&mut self) {
        self.free_ref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingAllocator;

    #[test]
    fn test_pass_ref_materializes_once() {
        let tracker = Arc::new(TrackingAllocator::new());
        let heap = NativeHeap::new(tracker.clone());
        let mut node = StructRef::new(heap, 16);
        assert_eq!(node.state(), WrapperState::Detached);
        let first = node.pass_ref();
        let second = node.pass_ref();
        assert_eq!(first, second);
        assert_eq!(tracker.stats().allocations, 1);
        assert_eq!(node.state(), WrapperState::Materialized);
    }

    #[test]
    fn test_foreign_memory_is_not_freed() {
        let tracker = Arc::new(TrackingAllocator::new());
        let heap = NativeHeap::new(tracker.clone());
        let foreign = heap.calloc(1, 8);
        let mut view = StructRef::from_raw(heap.clone(), 8, foreign);
        view.free_ref();
        assert!(tracker.is_live(foreign));
        assert_eq!(view.state(), WrapperState::Freed);
        heap.release(foreign);
    }

    #[test]
    fn test_reset_ref_detaches_without_freeing() {
        let tracker = Arc::new(TrackingAllocator::new());
        let heap = NativeHeap::new(tracker.clone());
        let mut node = StructRef::new(heap.clone(), 8);
        let addr = node.pass_ref();
        node.reset_ref();
        assert_eq!(node.state(), WrapperState::Detached);
        assert!(tracker.is_live(addr));
        assert!(heap.registry().is_empty());
        drop(node);
        assert!(tracker.is_live(addr));
        heap.release(addr);
    }
}
