use std::fmt;

use serde::Deserialize;

/// How a native pointer should be represented on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerHint {
    /// Keep every pointer as a host pointer.
    ByReference,
    /// The host owns the pointee directly; one pointer is dropped.
    ByValue,
    /// Pointers become dynamic views (slices).
    View,
    /// Keep the innermost pointer, view the rest.
    SelfRef,
}

/// How the memory behind a native type is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryHint {
    /// Memory-shaped: reinterpret the native layout in place.
    Raw,
    /// Wrapped and tracked by the allocation runtime.
    #[default]
    Managed,
}

impl fmt::Display for MemoryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryHint::Raw => write!(f, "raw"),
            MemoryHint::Managed => write!(f, "managed"),
        }
    }
}

impl MemoryHint {
    /// Memory hints take precedence over pointer hints: raw memory always
    /// keeps its innermost pointer.
    pub fn resolve(self, pointer: Option<PointerHint>) -> Option<PointerHint> {
        match self {
            MemoryHint::Raw => Some(PointerHint::SelfRef),
            MemoryHint::Managed => pointer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_memory_overrides_pointer_hint() {
        assert_eq!(
            MemoryHint::Raw.resolve(Some(PointerHint::View)),
            Some(PointerHint::SelfRef)
        );
        assert_eq!(
            MemoryHint::Managed.resolve(Some(PointerHint::ByValue)),
            Some(PointerHint::ByValue)
        );
        assert_eq!(MemoryHint::Managed.resolve(None), None);
    }
}
