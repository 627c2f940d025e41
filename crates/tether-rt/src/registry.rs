use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slab::Slab;

use crate::NativeAddr;

/// Outcome of releasing one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The address is not counted here; its single owner frees it.
    Untracked,
    /// Other references remain.
    Shared(usize),
    /// That was the last reference; the caller must free the memory.
    Last,
}

#[derive(Debug)]
struct Entry {
    addr: NativeAddr,
    count: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: Slab<Entry>,
    index: FxHashMap<NativeAddr, usize>,
}

/// Reference counts for native memory that several wrappers can reach.
///
/// A side table keyed by address: entries live in a slab and a hash index
/// maps addresses to slab slots, all behind one lock.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    state: Mutex<RegistryState>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting `addr` with one reference. Re-registering an address
    /// (memory reused after a native free) resets its count.
    pub fn register(&self, addr: NativeAddr) {
        if addr.is_null() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(&slot) = state.index.get(&addr) {
            state.entries[slot].count = 1;
            return;
        }
        let slot = state.entries.insert(Entry { addr, count: 1 });
        state.index.insert(addr, slot);
    }

    /// Adds a reference. Returns false when the address is not tracked.
    pub fn retain(&self, addr: NativeAddr) -> bool {
        let mut state = self.state.lock();
        match state.index.get(&addr).copied() {
            Some(slot) => {
                state.entries[slot].count += 1;
                true
            }
            None => false,
        }
    }

    /// Drops a reference.
    pub fn release(&self, addr: NativeAddr) -> Release {
        let mut state = self.state.lock();
        let Some(slot) = state.index.get(&addr).copied() else {
            return Release::Untracked;
        };
        let entry = &mut state.entries[slot];
        entry.count -= 1;
        if entry.count > 0 {
            return Release::Shared(entry.count);
        }
        let entry = state.entries.remove(slot);
        state.index.remove(&entry.addr);
        Release::Last
    }

    pub fn count(&self, addr: NativeAddr) -> Option<usize> {
        let state = self.state.lock();
        state.index.get(&addr).map(|&slot| state.entries[slot].count)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
