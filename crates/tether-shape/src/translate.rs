//! Native type to host shape translation.

use crate::decl::{CBase, CBaseKind, CType};
use crate::hints::{MemoryHint, PointerHint};
use crate::naming::NameTransformer;
use crate::shape::{BaseKind, HostShape, NativeBase, NativeShape};

/// Host spellings of the builtin C types for one target architecture.
pub trait HostBaseNames {
    fn host_base_name(&self, kind: CBaseKind) -> &str;
}

/// Maps native type descriptors plus hints to host shapes.
///
/// Translation is total: contradictory hints are settled by precedence
/// (memory hint first) and every input produces a shape. Whether a shape can
/// actually be marshalled is decided later, when a conversion is planned.
pub struct ShapeTranslator<'a> {
    names: &'a dyn HostBaseNames,
    transformer: &'a dyn NameTransformer,
}

impl<'a> ShapeTranslator<'a> {
    pub fn new(names: &'a dyn HostBaseNames, transformer: &'a dyn NameTransformer) -> Self {
        ShapeTranslator { names, transformer }
    }

    pub fn transformer(&self) -> &'a dyn NameTransformer {
        self.transformer
    }

    /// Translates a parameter or member type. Without a pointer hint, or
    /// with a view hint, pointers become views and `char*` becomes a string.
    pub fn translate(
        &self,
        ty: &CType,
        pointer: Option<PointerHint>,
        memory: MemoryHint,
    ) -> HostShape {
        let hint = memory.resolve(pointer);
        let mut shape = HostShape {
            kind: BaseKind::Plain,
            base_name: String::new(),
            pointers: 0,
            outer: ty.outer.clone(),
            views: 0,
            inner: ty.inner.clone(),
            unsigned: false,
        };
        let mut remaining = ty.pointers;

        match &ty.base {
            CBase::Void => {
                if remaining == 0 {
                    return shape;
                }
                remaining -= 1;
                shape.base_name = "unsafe.Pointer".to_string();
            }
            CBase::Function(name) => {
                // Callbacks are opaque; nothing below the function pointer is peeled.
                shape.kind = BaseKind::Function;
                shape.base_name = self.transformer.type_name(name);
                shape.pointers = remaining.saturating_sub(1);
                return shape;
            }
            CBase::Builtin { kind, .. } => {
                let string_rule = matches!(hint, None | Some(PointerHint::View));
                if *kind == CBaseKind::Char && remaining > 0 && string_rule && ty.inner.is_empty() {
                    remaining -= 1;
                    shape.base_name = "string".to_string();
                } else {
                    shape.base_name = self.names.host_base_name(*kind).to_string();
                    shape.unsigned = kind.is_unsigned();
                }
            }
            CBase::Struct(tag) | CBase::Union(tag) => {
                shape.kind = match memory {
                    MemoryHint::Raw => BaseKind::Plain,
                    MemoryHint::Managed => BaseKind::Struct,
                };
                shape.base_name = self.transformer.type_name(tag);
            }
            CBase::Enum(tag) => {
                shape.kind = BaseKind::Enum;
                shape.base_name = self.transformer.type_name(tag);
            }
        }

        let symbolic_inner = ty.inner.iter().any(|dim| dim.is_symbolic());
        if memory == MemoryHint::Raw && symbolic_inner && remaining > 0 {
            // No constant extent to build a fixed host array from.
            shape.views = remaining;
            return shape;
        }
        apply_pointer_policy(&mut shape, remaining, hint);
        shape
    }

    /// Translates a return type. Returns default to by-reference pointers.
    pub fn translate_return(
        &self,
        ty: &CType,
        pointer: Option<PointerHint>,
        memory: MemoryHint,
    ) -> HostShape {
        let is_c_string = ty.base.builtin_kind() == Some(CBaseKind::Char)
            && ty.pointers == 1
            && ty.inner.is_empty();
        if pointer.is_none() && is_c_string {
            return self.translate(ty, None, memory);
        }
        self.translate(ty, pointer.or(Some(PointerHint::ByReference)), memory)
    }

    pub fn native(&self, ty: &CType) -> NativeShape {
        native_shape(ty)
    }
}

/// The cgo-side shape of a native type. Needs no naming policy.
pub fn native_shape(ty: &CType) -> NativeShape {
    let base = match &ty.base {
        CBase::Void => NativeBase::Void,
        CBase::Builtin { kind, spelling } => NativeBase::Builtin {
            kind: *kind,
            cgo: cgo_builtin_name(*kind, spelling),
        },
        CBase::Struct(tag) => NativeBase::Record {
            tag: tag.clone(),
            union: false,
        },
        CBase::Union(tag) => NativeBase::Record {
            tag: tag.clone(),
            union: true,
        },
        CBase::Enum(tag) => NativeBase::Enum(tag.clone()),
        CBase::Function(name) => NativeBase::Function(name.clone()),
    };
    NativeShape {
        base,
        pointers: ty.pointers,
        outer: ty.outer.clone(),
        inner: ty.inner.clone(),
    }
}

fn apply_pointer_policy(shape: &mut HostShape, pointers: u8, hint: Option<PointerHint>) {
    let wrapper = shape.kind == BaseKind::Struct;
    match hint {
        Some(PointerHint::ByReference) => shape.pointers = pointers,
        Some(PointerHint::SelfRef) => {
            if pointers > 0 {
                shape.pointers = 1;
                shape.views = pointers - 1;
            }
        }
        Some(PointerHint::ByValue) => as_views(shape, pointers.saturating_sub(1), wrapper),
        Some(PointerHint::View) | None => as_views(shape, pointers, wrapper),
    }
}

fn as_views(shape: &mut HostShape, pointers: u8, wrapper: bool) {
    if pointers == 0 {
        return;
    }
    if wrapper {
        // Struct elements stay behind their reference wrapper.
        shape.pointers = 1;
        shape.views = pointers - 1;
    } else {
        shape.views = pointers;
    }
}

/// The cgo name for a builtin, keeping typedef spellings such as `C.int32_t`.
pub fn cgo_builtin_name(kind: CBaseKind, spelling: &str) -> String {
    let single_word = !spelling.contains(char::is_whitespace);
    let keyword_only = matches!(spelling, "signed" | "unsigned" | "bool");
    if single_word && !keyword_only && !spelling.is_empty() && kind != CBaseKind::Pointer {
        format!("C.{}", spelling)
    } else {
        kind.cgo_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::Dim;
    use crate::naming::GoNames;

    struct Names64;

    impl HostBaseNames for Names64 {
        fn host_base_name(&self, kind: CBaseKind) -> &str {
            match kind {
                CBaseKind::Char | CBaseKind::SChar => "int8",
                CBaseKind::UChar => "byte",
                CBaseKind::Int => "int32",
                CBaseKind::Long | CBaseKind::LongLong => "int64",
                CBaseKind::Double => "float64",
                _ => "uint64",
            }
        }
    }

    fn translate(ty: &CType, pointer: Option<PointerHint>, memory: MemoryHint) -> String {
        let names = GoNames::new();
        ShapeTranslator::new(&Names64, &names)
            .translate(ty, pointer, memory)
            .to_string()
    }

    fn ty(base: &str) -> CType {
        CType::new(base.parse().unwrap())
    }

    #[test]
    fn test_char_pointers_become_strings() {
        assert_eq!(translate(&ty("char").pointer(1), None, MemoryHint::Managed), "string");
        assert_eq!(translate(&ty("char").pointer(2), None, MemoryHint::Managed), "[]string");
        assert_eq!(
            translate(&ty("char").pointer(1), Some(PointerHint::ByReference), MemoryHint::Managed),
            "*int8"
        );
        assert_eq!(translate(&ty("unsigned char").pointer(1), None, MemoryHint::Managed), "[]byte");
    }

    #[test]
    fn test_view_hint_keeps_the_string_rule() {
        let view = Some(PointerHint::View);
        assert_eq!(translate(&ty("char").pointer(2), view, MemoryHint::Managed), "[]string");
        assert_eq!(translate(&ty("char").pointer(3), view, MemoryHint::Managed), "[][]string");
        assert_eq!(translate(&ty("char").pointer(2), Some(PointerHint::SelfRef), MemoryHint::Managed), "[]*int8");
    }

    #[test]
    fn test_raw_fixed_array_stays_fixed() {
        let t = ty("int").with_outer([Dim::Fixed(4)]);
        assert_eq!(translate(&t, None, MemoryHint::Raw), "[4]int32");
    }

    #[test]
    fn test_pointer_to_array_depends_on_memory_hint() {
        let t = ty("int").pointer(1).with_inner([Dim::Fixed(4)]);
        assert_eq!(translate(&t, None, MemoryHint::Raw), "*[4]int32");
        assert_eq!(translate(&t, None, MemoryHint::Managed), "[][4]int32");

        let symbolic = ty("int").pointer(1).with_inner([Dim::Named {
            name: "N".into(),
            value: 4,
        }]);
        assert_eq!(translate(&symbolic, None, MemoryHint::Raw), "[][N]int32");
    }

    #[test]
    fn test_struct_pointers_become_wrappers() {
        let names = GoNames::new();
        let translator = ShapeTranslator::new(&Names64, &names);
        let t = ty("struct vec2").pointer(1);

        let managed = translator.translate(&t, None, MemoryHint::Managed);
        assert_eq!(managed.kind, BaseKind::Struct);
        assert_eq!(managed.to_string(), "*Vec2");

        let raw = translator.translate(&t, Some(PointerHint::View), MemoryHint::Raw);
        assert_eq!(raw.kind, BaseKind::Plain);
        assert_eq!(raw.to_string(), "*Vec2");

        assert_eq!(translate(&ty("struct vec2").pointer(2), None, MemoryHint::Managed), "[]*Vec2");
        assert_eq!(
            translate(&t, Some(PointerHint::ByValue), MemoryHint::Managed),
            "Vec2"
        );
    }

    #[test]
    fn test_callbacks_are_opaque() {
        let names = GoNames::new();
        let translator = ShapeTranslator::new(&Names64, &names);
        let shape = translator.translate(&ty("fn compare_t").pointer(1), None, MemoryHint::Managed);
        assert_eq!(shape.kind, BaseKind::Function);
        assert_eq!(shape.to_string(), "CompareT");
    }

    #[test]
    fn test_void_pointers() {
        assert_eq!(translate(&ty("void").pointer(1), None, MemoryHint::Managed), "unsafe.Pointer");
        assert_eq!(translate(&ty("void").pointer(2), None, MemoryHint::Managed), "[]unsafe.Pointer");
        assert_eq!(translate(&ty("void"), None, MemoryHint::Managed), "");
    }

    #[test]
    fn test_returns_default_to_references() {
        let names = GoNames::new();
        let translator = ShapeTranslator::new(&Names64, &names);
        let shape = translator.translate_return(&ty("int").pointer(1), None, MemoryHint::Managed);
        assert_eq!(shape.to_string(), "*int32");
        let shape = translator.translate_return(&ty("char").pointer(1), None, MemoryHint::Managed);
        assert_eq!(shape.to_string(), "string");
    }

    #[test]
    fn test_native_shapes_keep_typedef_spellings() {
        let names = GoNames::new();
        let translator = ShapeTranslator::new(&Names64, &names);
        assert_eq!(translator.native(&ty("int32_t").pointer(1)).to_string(), "*C.int32_t");
        assert_eq!(translator.native(&ty("unsigned long long")).to_string(), "C.ulonglong");
        assert_eq!(translator.native(&ty("struct vec2").pointer(1)).to_string(), "*C.struct_vec2");
    }
}
