use std::fmt;

/// A native address. Kept as an integer so sets of addresses are `Send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeAddr(usize);

impl NativeAddr {
    pub const NULL: NativeAddr = NativeAddr(0);

    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        NativeAddr(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `bytes` past this one.
    pub fn offset(self, bytes: usize) -> NativeAddr {
        NativeAddr(self.0 + bytes)
    }

    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for NativeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
