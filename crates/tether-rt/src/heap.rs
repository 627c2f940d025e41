use std::sync::Arc;

use crate::{LibcAllocator, NativeAddr, NativeAllocator, ReferenceRegistry, Release};

/// An allocator together with the reference registry for its memory.
pub struct NativeHeap {
    allocator: Arc<dyn NativeAllocator>,
    registry: ReferenceRegistry,
}

impl NativeHeap {
    pub fn new(allocator: Arc<dyn NativeAllocator>) -> Arc<Self> {
        Arc::new(NativeHeap {
            allocator,
            registry: ReferenceRegistry::new(),
        })
    }

    pub fn libc() -> Arc<Self> {
        Self::new(Arc::new(LibcAllocator))
    }

    pub fn calloc(&self, count: usize, size: usize) -> NativeAddr {
        self.allocator.calloc(count, size)
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    /// Gives up one owner's claim on `addr`. Counted memory is freed when its
    /// last reference goes; uncounted memory has a single owner and is freed
    /// right away.
    pub fn release(&self, addr: NativeAddr) {
        if addr.is_null() {
            return;
        }
        match self.registry.release(addr) {
            Release::Shared(remaining) => {
                log::trace!("{} still has {} references", addr, remaining);
            }
            Release::Last | Release::Untracked => unsafe { self.allocator.free(addr) },
        }
    }
}

impl std::fmt::Debug for NativeHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHeap")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
