//! Host and native shape model.
//!
//! A shape is a base plus its levels. Host shapes render as Go types and
//! native shapes as cgo types; both render a compact signature used to name
//! conversion helpers.

use std::fmt;

use crate::decl::{CBaseKind, Dim};
use crate::naming::camel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKind {
    Plain,
    Struct,
    Enum,
    Function,
}

/// A value's representation on the host side.
///
/// Level order is `outer` arrays, then `views` dynamic views, then
/// `pointers`, then `inner` arrays, matching native declarator order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostShape {
    pub kind: BaseKind,
    pub base_name: String,
    pub pointers: u8,
    pub outer: Vec<Dim>,
    pub views: u8,
    pub inner: Vec<Dim>,
    pub unsigned: bool,
}

impl HostShape {
    pub fn plain(base_name: impl Into<String>) -> Self {
        HostShape {
            kind: BaseKind::Plain,
            base_name: base_name.into(),
            pointers: 0,
            outer: Vec::new(),
            views: 0,
            inner: Vec::new(),
            unsigned: false,
        }
    }

    pub fn is_string(&self) -> bool {
        self.kind == BaseKind::Plain && self.base_name == "string"
    }

    pub fn is_void(&self) -> bool {
        self.base_name.is_empty()
    }

    pub fn is_unsafe_pointer(&self) -> bool {
        self.kind == BaseKind::Plain && self.base_name == "unsafe.Pointer"
    }

    /// Number of array and view levels a conversion has to peel.
    pub fn levels(&self) -> usize {
        self.outer.len() + self.views as usize
    }

    pub fn is_leveled(&self) -> bool {
        self.levels() > 0
    }

    /// The shape of one element after peeling `level` levels.
    pub fn at_level(&self, level: usize) -> HostShape {
        let mut shape = self.clone();
        let from_outer = level.min(shape.outer.len());
        shape.outer.drain(..from_outer);
        let rest = (level - from_outer).min(shape.views as usize);
        shape.views -= rest as u8;
        shape
    }

    /// The type used for a function parameter: fixed outer arrays are passed
    /// by pointer.
    pub fn arg_type(&self) -> String {
        if self.outer.is_empty() {
            self.to_string()
        } else {
            format!("*{}", self)
        }
    }

    /// Compact signature: `[4][]*string` becomes `A4SPString`.
    pub fn signature(&self) -> String {
        let mut sig = String::new();
        for dim in &self.outer {
            push_dim(&mut sig, dim);
        }
        sig.push_str(&"S".repeat(self.views as usize));
        sig.push_str(&"P".repeat(self.pointers as usize));
        for dim in &self.inner {
            push_dim(&mut sig, dim);
        }
        if self.unsigned && !self.base_name.starts_with('u') {
            sig.push('U');
        }
        if self.is_void() {
            sig.push_str("Void");
        } else {
            sig.push_str(&camel(&self.base_name));
        }
        sig
    }
}

impl fmt::Display for HostShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.outer {
            write!(f, "[{}]", dim)?;
        }
        for _ in 0..self.views {
            write!(f, "[]")?;
        }
        for _ in 0..self.pointers {
            write!(f, "*")?;
        }
        for dim in &self.inner {
            write!(f, "[{}]", dim)?;
        }
        write!(f, "{}", self.base_name)
    }
}

/// Base of a native shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeBase {
    Void,
    Builtin { kind: CBaseKind, cgo: String },
    Record { tag: String, union: bool },
    Enum(String),
    Function(String),
}

impl NativeBase {
    /// Whether the base absorbs one pointer level when rendered
    /// (`void*` is `unsafe.Pointer`, a function pointer is `*[0]byte`).
    fn absorbs_pointer(&self) -> bool {
        matches!(self, NativeBase::Void | NativeBase::Function(_))
    }

    pub fn cgo_name(&self) -> String {
        match self {
            NativeBase::Void => "unsafe.Pointer".to_string(),
            NativeBase::Builtin { cgo, .. } => cgo.clone(),
            NativeBase::Record { tag, union: false } => format!("C.struct_{}", tag),
            NativeBase::Record { tag, union: true } => format!("C.union_{}", tag),
            NativeBase::Enum(tag) => format!("C.enum_{}", tag),
            NativeBase::Function(_) => "*[0]byte".to_string(),
        }
    }

    pub fn signature(&self) -> String {
        match self {
            NativeBase::Void => "Void".to_string(),
            NativeBase::Builtin { cgo, .. } => camel(cgo.trim_start_matches("C.")),
            NativeBase::Record { tag, union: false } => format!("Struct{}", camel(tag)),
            NativeBase::Record { tag, union: true } => format!("Union{}", camel(tag)),
            NativeBase::Enum(tag) => format!("Enum{}", camel(tag)),
            NativeBase::Function(name) => format!("Func{}", camel(name)),
        }
    }
}

/// A value's layout on the native side: flat arrays and pointers only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeShape {
    pub base: NativeBase,
    pub pointers: u8,
    pub outer: Vec<Dim>,
    pub inner: Vec<Dim>,
}

impl NativeShape {
    pub fn new(base: NativeBase) -> Self {
        NativeShape {
            base,
            pointers: 0,
            outer: Vec::new(),
            inner: Vec::new(),
        }
    }

    pub fn levels(&self) -> usize {
        self.outer.len() + self.pointers as usize
    }

    /// The shape of one element after peeling `level` levels.
    pub fn at_level(&self, level: usize) -> NativeShape {
        let mut shape = self.clone();
        let from_outer = level.min(shape.outer.len());
        shape.outer.drain(..from_outer);
        let rest = (level - from_outer).min(shape.pointers as usize);
        shape.pointers -= rest as u8;
        shape
    }

    /// Pointers that remain visible after the base absorbed its own.
    pub fn rendered_pointers(&self) -> u8 {
        if self.base.absorbs_pointer() {
            self.pointers.saturating_sub(1)
        } else {
            self.pointers
        }
    }

    /// The type of a parameter, with the first outer array decayed to a pointer.
    pub fn arg_type(&self) -> String {
        if self.outer.is_empty() {
            return self.to_string();
        }
        let mut decayed = self.clone();
        decayed.outer.remove(0);
        format!("*{}", decayed)
    }

    /// Compact signature: `[4]*C.char` becomes `A4PChar`.
    pub fn signature(&self) -> String {
        let mut sig = String::new();
        for dim in &self.outer {
            push_dim(&mut sig, dim);
        }
        sig.push_str(&"P".repeat(self.pointers as usize));
        for dim in &self.inner {
            push_dim(&mut sig, dim);
        }
        sig.push_str(&self.base.signature());
        sig
    }
}

impl fmt::Display for NativeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.outer {
            write!(f, "[{}]", dim)?;
        }
        for _ in 0..self.rendered_pointers() {
            write!(f, "*")?;
        }
        for dim in &self.inner {
            write!(f, "[{}]", dim)?;
        }
        write!(f, "{}", self.base.cgo_name())
    }
}

fn push_dim(sig: &mut String, dim: &Dim) {
    match dim {
        Dim::Fixed(n) => {
            sig.push('A');
            sig.push_str(&n.to_string());
        }
        Dim::Named { name, .. } => {
            sig.push_str("AX");
            sig.push_str(&camel(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_char() -> NativeBase {
        NativeBase::Builtin {
            kind: CBaseKind::Char,
            cgo: "C.char".into(),
        }
    }

    #[test]
    fn test_host_display_and_signature() {
        let mut shape = HostShape::plain("string");
        shape.outer = vec![Dim::Fixed(4)];
        shape.views = 1;
        shape.pointers = 1;
        assert_eq!(shape.to_string(), "[4][]*string");
        assert_eq!(shape.signature(), "A4SPString");
        assert_eq!(shape.arg_type(), "*[4][]*string");
    }

    #[test]
    fn test_symbolic_dims_in_signature() {
        let mut shape = HostShape::plain("int32");
        shape.outer = vec![Dim::Named {
            name: "MAX_ITEMS".into(),
            value: 8,
        }];
        assert_eq!(shape.to_string(), "[MAX_ITEMS]int32");
        assert_eq!(shape.signature(), "AXMAXITEMSInt32");
    }

    #[test]
    fn test_host_at_level_peels_outer_then_views() {
        let mut shape = HostShape::plain("int32");
        shape.outer = vec![Dim::Fixed(2), Dim::Fixed(3)];
        shape.views = 1;
        assert_eq!(shape.at_level(1).to_string(), "[3][]int32");
        assert_eq!(shape.at_level(2).to_string(), "[]int32");
        assert_eq!(shape.at_level(3).to_string(), "int32");
    }

    #[test]
    fn test_native_rendering() {
        let mut shape = NativeShape::new(c_char());
        shape.pointers = 2;
        assert_eq!(shape.to_string(), "**C.char");
        assert_eq!(shape.signature(), "PPChar");
        assert_eq!(shape.at_level(1).to_string(), "*C.char");

        let mut void_ptr = NativeShape::new(NativeBase::Void);
        void_ptr.pointers = 1;
        assert_eq!(void_ptr.to_string(), "unsafe.Pointer");
    }

    #[test]
    fn test_native_arg_type_decays_first_dim() {
        let mut shape = NativeShape::new(c_char());
        shape.outer = vec![Dim::Fixed(4), Dim::Fixed(2)];
        shape.pointers = 1;
        assert_eq!(shape.to_string(), "[4][2]*C.char");
        assert_eq!(shape.arg_type(), "*[2]*C.char");
    }
}
