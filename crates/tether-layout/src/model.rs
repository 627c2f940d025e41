//! Per-architecture data models: size, alignment and Go spelling of every
//! builtin C type.

use repc::layout::{BuiltinType, Type, TypeVariant};
use repc::Target;
use tether_shape::{CBaseKind, HostBaseNames};

use crate::{LayoutError, TargetArch};

/// Size and alignment of one builtin, in bytes, plus its Go spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelItem {
    pub size: u64,
    pub align: u64,
    pub struct_align: u64,
    pub host_name: &'static str,
}

const fn item(size: u64, align: u64, host_name: &'static str) -> ModelItem {
    ModelItem {
        size,
        align,
        struct_align: align,
        host_name,
    }
}

/// Builtin layouts for one target architecture.
#[derive(Debug, Clone)]
pub struct DataModel {
    arch: TargetArch,
    items: [ModelItem; CBaseKind::COUNT],
    target: Option<Target>,
}

impl DataModel {
    pub fn for_arch(arch: TargetArch) -> Result<Self, LayoutError> {
        let (items, target) = match arch {
            TargetArch::I386 | TargetArch::Arm => (fixed_items(4, 4), None),
            TargetArch::X86_48 => (fixed_items(4, 8), None),
            TargetArch::X86_64 | TargetArch::Aarch64 => (fixed_items(8, 8), None),
            TargetArch::Host => {
                let target = repc::HOST_TARGET.ok_or(LayoutError::NoHostTarget)?;
                (host_items(target)?, Some(target))
            }
        };
        log::debug!(
            "data model for {}: pointer {} bytes, long {} bytes",
            arch,
            items[CBaseKind::Pointer as usize].size,
            items[CBaseKind::Long as usize].size
        );
        Ok(DataModel {
            arch,
            items,
            target,
        })
    }

    pub fn arch(&self) -> TargetArch {
        self.arch
    }

    /// The repc target when the model was computed for the build host.
    pub fn repc_target(&self) -> Option<Target> {
        self.target
    }

    pub fn item(&self, kind: CBaseKind) -> ModelItem {
        self.items[kind as usize]
    }

    pub fn pointer_size(&self) -> u64 {
        self.item(CBaseKind::Pointer).size
    }

    pub fn pointer_align(&self) -> u64 {
        self.item(CBaseKind::Pointer).align
    }
}

impl HostBaseNames for DataModel {
    fn host_base_name(&self, kind: CBaseKind) -> &str {
        self.item(kind).host_name
    }
}

/// The c-for-go style tables; `long` is the only builtin whose size varies
/// independently of the pointer size (x86_48 is ILP32 pointers with 64-bit long).
fn fixed_items(pointer: u64, long: u64) -> [ModelItem; CBaseKind::COUNT] {
    let (long_name, ulong_name) = if long == 8 {
        ("int64", "uint64")
    } else {
        ("int32", "uint32")
    };
    [
        item(1, 1, "bool"),
        item(1, 1, "int8"),
        item(1, 1, "int8"),
        item(1, 1, "byte"),
        item(2, 2, "int16"),
        item(2, 2, "uint16"),
        item(4, 4, "int32"),
        item(4, 4, "uint32"),
        item(long, long, long_name),
        item(long, long, ulong_name),
        item(8, 8, "int64"),
        item(8, 8, "uint64"),
        item(4, 4, "float32"),
        item(8, 8, "float64"),
        item(8, 8, "float64"),
        item(8, 8, "complex64"),
        item(16, 16, "complex128"),
        item(pointer, pointer, "uintptr"),
        item(pointer, pointer, "unsafe.Pointer"),
    ]
}

fn host_items(target: Target) -> Result<[ModelItem; CBaseKind::COUNT], LayoutError> {
    let mut items = fixed_items(8, 8);
    let builtins = [
        (CBaseKind::Bool, BuiltinType::Bool),
        (CBaseKind::Char, BuiltinType::Char),
        (CBaseKind::SChar, BuiltinType::SignedChar),
        (CBaseKind::UChar, BuiltinType::UnsignedChar),
        (CBaseKind::Short, BuiltinType::Short),
        (CBaseKind::UShort, BuiltinType::UnsignedShort),
        (CBaseKind::Int, BuiltinType::Int),
        (CBaseKind::UInt, BuiltinType::UnsignedInt),
        (CBaseKind::Long, BuiltinType::Long),
        (CBaseKind::ULong, BuiltinType::UnsignedLong),
        (CBaseKind::LongLong, BuiltinType::LongLong),
        (CBaseKind::ULongLong, BuiltinType::UnsignedLongLong),
        (CBaseKind::Float, BuiltinType::Float),
        (CBaseKind::Double, BuiltinType::Double),
        (CBaseKind::LongDouble, BuiltinType::Double),
        (CBaseKind::UintPtr, BuiltinType::Pointer),
        (CBaseKind::Pointer, BuiltinType::Pointer),
    ];
    for (kind, builtin) in builtins {
        let (size, align) = builtin_layout(target, builtin)?;
        let slot = &mut items[kind as usize];
        slot.size = size;
        slot.align = align;
        slot.struct_align = align;
    }
    let long = items[CBaseKind::Long as usize].size;
    if long == 4 {
        items[CBaseKind::Long as usize].host_name = "int32";
        items[CBaseKind::ULong as usize].host_name = "uint32";
    }
    // Complex types are laid out as two consecutive floating point values.
    for (complex, part) in [
        (CBaseKind::ComplexFloat, CBaseKind::Float),
        (CBaseKind::ComplexDouble, CBaseKind::Double),
    ] {
        let part = items[part as usize];
        let slot = &mut items[complex as usize];
        slot.size = part.size * 2;
        slot.align = part.align;
        slot.struct_align = part.align;
    }
    Ok(items)
}

fn builtin_layout(target: Target, builtin: BuiltinType) -> Result<(u64, u64), LayoutError> {
    let ty = Type {
        layout: (),
        annotations: vec![],
        variant: TypeVariant::Builtin(builtin),
    };
    let computed = repc::compute_layout(target, &ty)?;
    Ok((
        computed.layout.size_bits / 8,
        computed.layout.required_alignment_bits / 8,
    ))
}
