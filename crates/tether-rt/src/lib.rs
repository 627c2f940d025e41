//! Runtime side of native allocation ownership.
//!
//! Generated bindings group every native allocation made while crossing the
//! boundary under one [`AllocationSet`] per logical owner. Memory that more
//! than one wrapper can reach is counted in the [`ReferenceRegistry`], and
//! its last release performs the real free. [`StructRef`] is the wrapper
//! state machine built on top of both.

mod addr;
mod alloc;
mod allocs;
mod heap;
mod registry;
mod wrapper;

pub use addr::NativeAddr;
pub use alloc::{AllocStats, LibcAllocator, NativeAllocator, TrackingAllocator};
pub use allocs::AllocationSet;
pub use heap::NativeHeap;
pub use registry::{ReferenceRegistry, Release};
pub use wrapper::{StructRef, WrapperState};
