use std::alloc::{handle_alloc_error, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::NativeAddr;

/// The native allocator behind generated bindings.
///
/// Allocation never fails from the caller's point of view: exhaustion
/// terminates the process.
pub trait NativeAllocator: Send + Sync {
    /// Returns zeroed memory for `count` elements of `size` bytes.
    fn calloc(&self, count: usize, size: usize) -> NativeAddr;

    /// # Safety
    /// `addr` must come from [`NativeAllocator::calloc`] on this allocator and
    /// must not have been freed already.
    unsafe fn free(&self, addr: NativeAddr);
}

/// The C library allocator, what `C.calloc`/`C.free` use in generated code.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAllocator;

impl NativeAllocator for LibcAllocator {
    fn calloc(&self, count: usize, size: usize) -> NativeAddr {
        // calloc(0, n) may legally return NULL; always ask for at least one byte.
        let (count, size) = (count.max(1), size.max(1));
        let ptr = unsafe { libc::calloc(count, size) };
        if ptr.is_null() {
            allocation_failed(count.saturating_mul(size));
        }
        NativeAddr::from_ptr(ptr)
    }

    unsafe fn free(&self, addr: NativeAddr) {
        libc::free(addr.as_ptr().cast());
    }
}

fn allocation_failed(bytes: usize) -> ! {
    log::error!("native allocation of {} bytes failed", bytes);
    let layout = Layout::from_size_align(bytes.max(1), 1).unwrap_or(Layout::new::<u8>());
    handle_alloc_error(layout)
}

/// Counters reported by [`TrackingAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocStats {
    pub allocations: usize,
    pub frees: usize,
    pub live: usize,
    pub invalid_frees: usize,
}

/// Wraps another allocator and records every allocation and free.
///
/// Frees of addresses it never handed out (or already freed) are counted
/// and swallowed instead of reaching the inner allocator.
#[derive(Debug, Default)]
pub struct TrackingAllocator<A: NativeAllocator = LibcAllocator> {
    inner: A,
    live: Mutex<FxHashMap<NativeAddr, usize>>,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    invalid_frees: AtomicUsize,
}

impl TrackingAllocator<LibcAllocator> {
    pub fn new() -> Self {
        Self::wrap(LibcAllocator)
    }
}

impl<A: NativeAllocator> TrackingAllocator<A> {
    pub fn wrap(inner: A) -> Self {
        TrackingAllocator {
            inner,
            live: Mutex::new(FxHashMap::default()),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            invalid_frees: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            allocations: self.allocations.load(Ordering::SeqCst),
            frees: self.frees.load(Ordering::SeqCst),
            live: self.live.lock().len(),
            invalid_frees: self.invalid_frees.load(Ordering::SeqCst),
        }
    }

    pub fn is_live(&self, addr: NativeAddr) -> bool {
        self.live.lock().contains_key(&addr)
    }

    /// Requested size of a live allocation, in bytes.
    pub fn size_of(&self, addr: NativeAddr) -> Option<usize> {
        self.live.lock().get(&addr).copied()
    }
}

impl<A: NativeAllocator> NativeAllocator for TrackingAllocator<A> {
    fn calloc(&self, count: usize, size: usize) -> NativeAddr {
        let addr = self.inner.calloc(count, size);
        self.live.lock().insert(addr, count * size);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        addr
    }

    unsafe fn free(&self, addr: NativeAddr) {
        if self.live.lock().remove(&addr).is_none() {
            log::error!("free of untracked address {}", addr);
            self.invalid_frees.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.frees.fetch_add(1, Ordering::SeqCst);
        self.inner.free(addr);
    }
}
