//! Deterministic names of generated helpers.

use tether_shape::{BaseKind, HostShape, NativeBase, NativeShape};

/// Which way a conversion moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host value into native memory.
    Unpack,
    /// Native memory into a host value.
    Pack,
}

impl Direction {
    pub fn word(self) -> &'static str {
        match self {
            Direction::Unpack => "unpack",
            Direction::Pack => "pack",
        }
    }
}

/// `unpackArgSString_PPChar`: direction, argument context, host signature,
/// native signature. Records reinterpreted in place rather than wrapped are
/// marked `Raw`, since both spell the same Go type name.
pub fn conversion_name(direction: Direction, is_arg: bool, host: &HostShape, native: &NativeShape) -> String {
    let raw_record = host.kind == BaseKind::Plain && matches!(native.base, NativeBase::Record { .. });
    format!(
        "{}{}{}{}_{}",
        direction.word(),
        if is_arg { "Arg" } else { "" },
        if raw_record { "Raw" } else { "" },
        host.signature(),
        native.signature()
    )
}

pub fn alloc_name(element: &NativeShape) -> String {
    format!("alloc{}Memory", element.signature())
}

pub fn size_of_name(element: &NativeShape) -> String {
    format!("sizeOf{}Value", element.signature())
}
