//! Native declaration model.
//!
//! This is what a C front end hands to the generator: canonical types with
//! their pointer depth and array extents already resolved. Everything here is
//! plain data and deserialises straight from a TOML manifest.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ShapeError;

/// Builtin C base types covered by the architecture data models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CBaseKind {
    Bool,
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    ComplexFloat,
    ComplexDouble,
    UintPtr,
    Pointer,
}

impl CBaseKind {
    pub const COUNT: usize = 19;

    pub const ALL: [CBaseKind; Self::COUNT] = [
        CBaseKind::Bool,
        CBaseKind::Char,
        CBaseKind::SChar,
        CBaseKind::UChar,
        CBaseKind::Short,
        CBaseKind::UShort,
        CBaseKind::Int,
        CBaseKind::UInt,
        CBaseKind::Long,
        CBaseKind::ULong,
        CBaseKind::LongLong,
        CBaseKind::ULongLong,
        CBaseKind::Float,
        CBaseKind::Double,
        CBaseKind::LongDouble,
        CBaseKind::ComplexFloat,
        CBaseKind::ComplexDouble,
        CBaseKind::UintPtr,
        CBaseKind::Pointer,
    ];

    /// Parses a C type spelling such as `unsigned long long` or `int32_t`.
    pub fn from_c_name(name: &str) -> Option<Self> {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let kind = match normalized.as_str() {
            "_Bool" | "bool" => CBaseKind::Bool,
            "char" => CBaseKind::Char,
            "signed char" | "int8_t" => CBaseKind::SChar,
            "unsigned char" | "uint8_t" => CBaseKind::UChar,
            "short" | "short int" | "signed short" | "signed short int" | "int16_t" => CBaseKind::Short,
            "unsigned short" | "unsigned short int" | "uint16_t" => CBaseKind::UShort,
            "int" | "signed" | "signed int" | "int32_t" => CBaseKind::Int,
            "unsigned" | "unsigned int" | "uint32_t" => CBaseKind::UInt,
            "long" | "long int" | "signed long" | "signed long int" | "ssize_t" | "intptr_t"
            | "ptrdiff_t" => CBaseKind::Long,
            "unsigned long" | "unsigned long int" => CBaseKind::ULong,
            "long long" | "long long int" | "signed long long" | "signed long long int"
            | "int64_t" => CBaseKind::LongLong,
            "unsigned long long" | "unsigned long long int" | "uint64_t" => CBaseKind::ULongLong,
            "float" => CBaseKind::Float,
            "double" => CBaseKind::Double,
            "long double" => CBaseKind::LongDouble,
            "float _Complex" | "_Complex float" | "complex float" => CBaseKind::ComplexFloat,
            "double _Complex" | "_Complex double" | "complex double" => CBaseKind::ComplexDouble,
            "size_t" | "uintptr_t" => CBaseKind::UintPtr,
            _ => return None,
        };
        Some(kind)
    }

    /// The canonical C spelling, used when a type is built programmatically.
    pub fn c_name(self) -> &'static str {
        match self {
            CBaseKind::Bool => "_Bool",
            CBaseKind::Char => "char",
            CBaseKind::SChar => "signed char",
            CBaseKind::UChar => "unsigned char",
            CBaseKind::Short => "short",
            CBaseKind::UShort => "unsigned short",
            CBaseKind::Int => "int",
            CBaseKind::UInt => "unsigned int",
            CBaseKind::Long => "long",
            CBaseKind::ULong => "unsigned long",
            CBaseKind::LongLong => "long long",
            CBaseKind::ULongLong => "unsigned long long",
            CBaseKind::Float => "float",
            CBaseKind::Double => "double",
            CBaseKind::LongDouble => "long double",
            CBaseKind::ComplexFloat => "float _Complex",
            CBaseKind::ComplexDouble => "double _Complex",
            CBaseKind::UintPtr => "uintptr_t",
            CBaseKind::Pointer => "void*",
        }
    }

    /// The name cgo exposes for the canonical spelling (`C.uint`, `C.longlong`).
    pub fn cgo_name(self) -> &'static str {
        match self {
            CBaseKind::Bool => "C._Bool",
            CBaseKind::Char => "C.char",
            CBaseKind::SChar => "C.schar",
            CBaseKind::UChar => "C.uchar",
            CBaseKind::Short => "C.short",
            CBaseKind::UShort => "C.ushort",
            CBaseKind::Int => "C.int",
            CBaseKind::UInt => "C.uint",
            CBaseKind::Long => "C.long",
            CBaseKind::ULong => "C.ulong",
            CBaseKind::LongLong => "C.longlong",
            CBaseKind::ULongLong => "C.ulonglong",
            CBaseKind::Float => "C.float",
            CBaseKind::Double | CBaseKind::LongDouble => "C.double",
            CBaseKind::ComplexFloat => "C.complexfloat",
            CBaseKind::ComplexDouble => "C.complexdouble",
            CBaseKind::UintPtr => "C.uintptr_t",
            CBaseKind::Pointer => "unsafe.Pointer",
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            CBaseKind::UChar
                | CBaseKind::UShort
                | CBaseKind::UInt
                | CBaseKind::ULong
                | CBaseKind::ULongLong
                | CBaseKind::UintPtr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            CBaseKind::Float | CBaseKind::Double | CBaseKind::LongDouble
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, CBaseKind::ComplexFloat | CBaseKind::ComplexDouble)
    }
}

/// The base of a C type after all declarators are stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum CBase {
    Void,
    Builtin { kind: CBaseKind, spelling: String },
    Struct(String),
    Union(String),
    Enum(String),
    /// A function type, referenced by the name of its callback declaration.
    Function(String),
}

impl CBase {
    pub fn builtin(kind: CBaseKind) -> Self {
        CBase::Builtin {
            kind,
            spelling: kind.c_name().to_string(),
        }
    }

    pub fn builtin_kind(&self) -> Option<CBaseKind> {
        match self {
            CBase::Builtin { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, CBase::Struct(_) | CBase::Union(_))
    }
}

impl FromStr for CBase {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "void" {
            return Ok(CBase::Void);
        }
        let tagged: [(&str, fn(String) -> CBase); 4] = [
            ("struct ", CBase::Struct),
            ("union ", CBase::Union),
            ("enum ", CBase::Enum),
            ("fn ", CBase::Function),
        ];
        for (prefix, ctor) in tagged {
            if let Some(tag) = s.strip_prefix(prefix) {
                let tag = tag.trim();
                if tag.is_empty() {
                    return Err(ShapeError::UnknownBase(s.to_string()));
                }
                return Ok(ctor(tag.to_string()));
            }
        }
        let kind = CBaseKind::from_c_name(s).ok_or_else(|| ShapeError::UnknownBase(s.to_string()))?;
        Ok(CBase::Builtin {
            kind,
            spelling: s.split_whitespace().collect::<Vec<_>>().join(" "),
        })
    }
}

impl TryFrom<String> for CBase {
    type Error = ShapeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for CBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CBase::Void => write!(f, "void"),
            CBase::Builtin { spelling, .. } => write!(f, "{}", spelling),
            CBase::Struct(tag) => write!(f, "struct {}", tag),
            CBase::Union(tag) => write!(f, "union {}", tag),
            CBase::Enum(tag) => write!(f, "enum {}", tag),
            CBase::Function(name) => write!(f, "fn {}", name),
        }
    }
}

/// An array extent: a literal or a named constant with its resolved value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(u64),
    Named { name: String, value: u64 },
}

impl Dim {
    pub fn extent(&self) -> u64 {
        match self {
            Dim::Fixed(n) => *n,
            Dim::Named { value, .. } => *value,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Dim::Named { .. })
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Named { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Coarse classification of a C type by its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CTypeKind {
    Plain,
    Struct,
    Union,
    Enum,
    Function,
}

/// A canonical C type.
///
/// Declarator order is `outer` arrays, then `pointers`, then `inner` arrays:
/// `int *x[4]` has `outer = [4], pointers = 1` and `int (*x)[4]` has
/// `pointers = 1, inner = [4]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct CType {
    pub base: CBase,
    #[serde(default)]
    pub pointers: u8,
    #[serde(default)]
    pub outer: Vec<Dim>,
    #[serde(default)]
    pub inner: Vec<Dim>,
    #[serde(default, rename = "const")]
    pub is_const: bool,
}

impl CType {
    pub fn new(base: CBase) -> Self {
        CType {
            base,
            pointers: 0,
            outer: Vec::new(),
            inner: Vec::new(),
            is_const: false,
        }
    }

    pub fn builtin(kind: CBaseKind) -> Self {
        CType::new(CBase::builtin(kind))
    }

    pub fn pointer(mut self, depth: u8) -> Self {
        self.pointers = depth;
        self
    }

    pub fn with_outer(mut self, dims: impl IntoIterator<Item = Dim>) -> Self {
        self.outer = dims.into_iter().collect();
        self
    }

    pub fn with_inner(mut self, dims: impl IntoIterator<Item = Dim>) -> Self {
        self.inner = dims.into_iter().collect();
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn kind(&self) -> CTypeKind {
        match self.base {
            CBase::Void | CBase::Builtin { .. } => CTypeKind::Plain,
            CBase::Struct(_) => CTypeKind::Struct,
            CBase::Union(_) => CTypeKind::Union,
            CBase::Enum(_) => CTypeKind::Enum,
            CBase::Function(_) => CTypeKind::Function,
        }
    }

    /// `void` with no declarators, i.e. the absence of a value.
    pub fn is_void(&self) -> bool {
        self.base == CBase::Void && self.pointers == 0 && self.outer.is_empty() && self.inner.is_empty()
    }

    /// True when the type carries no indirection or array at all.
    pub fn is_scalar(&self) -> bool {
        self.pointers == 0 && self.outer.is_empty() && self.inner.is_empty()
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const ")?;
        }
        write!(f, "{}", self.base)?;
        let stars = "*".repeat(self.pointers as usize);
        if !self.inner.is_empty() {
            write!(f, " ({}x)", stars)?;
            for dim in &self.inner {
                write!(f, "[{}]", dim)?;
            }
        } else {
            write!(f, " {}x", stars)?;
        }
        for dim in &self.outer {
            write!(f, "[{}]", dim)?;
        }
        Ok(())
    }
}

/// Source position of a declaration, used in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}

/// A named member of a struct or union.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: CType,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordSpec {
    pub tag: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnumSpec {
    pub tag: String,
    #[serde(default)]
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: CType,
}

/// A function or function-pointer type. A missing `ret` means `void`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub ret: Option<CType>,
}

impl FunctionSpec {
    pub fn returns_value(&self) -> bool {
        self.ret.as_ref().map_or(false, |ret| !ret.is_void())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeclKind {
    Struct(RecordSpec),
    Union(RecordSpec),
    Enum(EnumSpec),
    Function(FunctionSpec),
    Callback(FunctionSpec),
}

/// One top-level native declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Declaration {
    #[serde(default)]
    pub position: Position,
    #[serde(flatten)]
    pub kind: DeclKind,
}

impl Declaration {
    pub fn new(kind: DeclKind) -> Self {
        Declaration {
            position: Position::default(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            DeclKind::Struct(spec) | DeclKind::Union(spec) => &spec.tag,
            DeclKind::Enum(spec) => &spec.tag,
            DeclKind::Function(spec) | DeclKind::Callback(spec) => &spec.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            DeclKind::Struct(_) => "struct",
            DeclKind::Union(_) => "union",
            DeclKind::Enum(_) => "enum",
            DeclKind::Function(_) => "function",
            DeclKind::Callback(_) => "callback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_spellings() {
        let base: CBase = "unsigned   long long".parse().unwrap();
        assert_eq!(base.builtin_kind(), Some(CBaseKind::ULongLong));
        assert_eq!(base.to_string(), "unsigned long long");

        let base: CBase = "int32_t".parse().unwrap();
        assert_eq!(base.builtin_kind(), Some(CBaseKind::Int));
        assert_eq!(base.to_string(), "int32_t");
    }

    #[test]
    fn test_parse_tagged_bases() {
        assert_eq!("struct vec2".parse::<CBase>().unwrap(), CBase::Struct("vec2".into()));
        assert_eq!("union value".parse::<CBase>().unwrap(), CBase::Union("value".into()));
        assert_eq!("enum color".parse::<CBase>().unwrap(), CBase::Enum("color".into()));
        assert_eq!("fn cmp_t".parse::<CBase>().unwrap(), CBase::Function("cmp_t".into()));
        assert_eq!("void".parse::<CBase>().unwrap(), CBase::Void);
    }

    #[test]
    fn test_parse_unknown_base_fails() {
        assert!(matches!(
            "quadruple".parse::<CBase>(),
            Err(ShapeError::UnknownBase(_))
        ));
        assert!("struct ".parse::<CBase>().is_err());
    }

    #[test]
    fn test_ctype_display_follows_declarator_order() {
        let ty = CType::builtin(CBaseKind::Int).pointer(1).with_outer([Dim::Fixed(4)]);
        assert_eq!(ty.to_string(), "int *x[4]");
        let ty = CType::builtin(CBaseKind::Int).pointer(1).with_inner([Dim::Fixed(4)]);
        assert_eq!(ty.to_string(), "int (*x)[4]");
    }

    #[test]
    fn test_void_detection() {
        assert!(CType::new(CBase::Void).is_void());
        assert!(!CType::new(CBase::Void).pointer(1).is_void());
    }
}
