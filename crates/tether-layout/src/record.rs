//! C record layout.

use std::fmt;

use repc::layout::{BuiltinType, Record, RecordField, RecordKind, Type, TypeVariant};
use repc::Target;
use rustc_hash::{FxHashMap, FxHashSet};
use tether_shape::{native_shape, CBaseKind, Dim, NativeBase, NativeShape, RecordSpec};

use crate::{DataModel, LayoutError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub tag: String,
    pub union: bool,
}

impl RecordKey {
    pub fn new(tag: impl Into<String>, union: bool) -> Self {
        RecordKey {
            tag: tag.into(),
            union,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.union { "union" } else { "struct" };
        write!(f, "{} {}", kind, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub key: RecordKey,
    pub size: u64,
    pub align: u64,
    pub fields: Vec<FieldLayout>,
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Every record layout of one declaration set, computed up front so lookups
/// during generation are read-only and can be shared across threads.
#[derive(Debug)]
pub struct LayoutTable {
    model: DataModel,
    records: FxHashMap<RecordKey, RecordLayout>,
    failures: Vec<(RecordKey, LayoutError)>,
}

impl LayoutTable {
    /// Computes the layout of every record. `union` marks union declarations.
    ///
    /// A record whose layout cannot be computed is left out of the table and
    /// reported through [`LayoutTable::take_failures`]; the other records are
    /// unaffected.
    pub fn build<'a>(model: DataModel, records: impl IntoIterator<Item = (&'a RecordSpec, bool)>) -> Self {
        let specs: FxHashMap<RecordKey, &RecordSpec> = records
            .into_iter()
            .map(|(spec, union)| (RecordKey::new(spec.tag.clone(), union), spec))
            .collect();
        let mut keys: Vec<RecordKey> = specs.keys().cloned().collect();
        keys.sort();

        let mut builder = Builder {
            model: &model,
            specs,
            done: FxHashMap::default(),
            processing: FxHashSet::default(),
        };
        let mut failures = Vec::new();
        for key in &keys {
            if let Err(err) = builder.record(key) {
                log::debug!("no layout for {}: {}", key, err);
                builder.processing.clear();
                failures.push((key.clone(), err));
            }
        }
        let records = builder.done;
        log::debug!("computed {} record layouts for {}", records.len(), model.arch());
        LayoutTable {
            model,
            records,
            failures,
        }
    }

    /// Records whose layout failed, in tag order. Drains the list.
    pub fn take_failures(&mut self) -> Vec<(RecordKey, LayoutError)> {
        std::mem::take(&mut self.failures)
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    pub fn record(&self, key: &RecordKey) -> Result<&RecordLayout, LayoutError> {
        self.records
            .get(key)
            .ok_or_else(|| LayoutError::UnknownRecord(key.to_string()))
    }

    /// Size and alignment of a native shape.
    pub fn size_align(&self, shape: &NativeShape) -> Result<(u64, u64), LayoutError> {
        shape_size_align(&self.model, shape, &mut |key| {
            self.record(key).map(|layout| (layout.size, layout.align))
        })
    }

    pub fn size_of(&self, shape: &NativeShape) -> Result<u64, LayoutError> {
        Ok(self.size_align(shape)?.0)
    }

    /// Size of one element after peeling `level` levels of `shape`.
    pub fn element_size(&self, shape: &NativeShape, level: usize) -> Result<u64, LayoutError> {
        self.size_of(&shape.at_level(level))
    }
}

fn product(dims: &[Dim]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, dim| acc.checked_mul(dim.extent()))
}

fn scaled(size: u64, dims: &[Dim], shape: &NativeShape) -> Result<u64, LayoutError> {
    product(dims)
        .and_then(|count| size.checked_mul(count))
        .ok_or_else(|| LayoutError::Overflow(shape.to_string()))
}

fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        (value + align - 1) / align * align
    }
}

fn shape_size_align(
    model: &DataModel,
    shape: &NativeShape,
    record: &mut dyn FnMut(&RecordKey) -> Result<(u64, u64), LayoutError>,
) -> Result<(u64, u64), LayoutError> {
    let (element, align) = if shape.pointers > 0 {
        (model.pointer_size(), model.pointer_align())
    } else {
        let (size, align) = match &shape.base {
            NativeBase::Void => (0, 1),
            NativeBase::Builtin { kind, .. } => {
                let item = model.item(*kind);
                (item.size, item.struct_align)
            }
            NativeBase::Record { tag, union } => record(&RecordKey::new(tag.clone(), *union))?,
            NativeBase::Enum(_) => {
                let item = model.item(CBaseKind::Int);
                (item.size, item.struct_align)
            }
            NativeBase::Function(_) => (model.pointer_size(), model.pointer_align()),
        };
        (scaled(size, &shape.inner, shape)?, align)
    };
    Ok((scaled(element, &shape.outer, shape)?, align))
}

struct Builder<'m, 's> {
    model: &'m DataModel,
    specs: FxHashMap<RecordKey, &'s RecordSpec>,
    done: FxHashMap<RecordKey, RecordLayout>,
    processing: FxHashSet<RecordKey>,
}

impl Builder<'_, '_> {
    fn record(&mut self, key: &RecordKey) -> Result<(u64, u64), LayoutError> {
        if let Some(layout) = self.done.get(key) {
            return Ok((layout.size, layout.align));
        }
        let spec = *self
            .specs
            .get(key)
            .ok_or_else(|| LayoutError::UnknownRecord(key.to_string()))?;
        if !self.processing.insert(key.clone()) {
            return Err(LayoutError::TypeRecursion(key.to_string()));
        }
        let layout = match self.model.repc_target() {
            Some(target) => self.record_with_repc(target, key, spec)?,
            None => self.record_with_table(key, spec)?,
        };
        self.processing.remove(key);
        let size_align = (layout.size, layout.align);
        self.done.insert(key.clone(), layout);
        Ok(size_align)
    }

    fn record_with_table(&mut self, key: &RecordKey, spec: &RecordSpec) -> Result<RecordLayout, LayoutError> {
        let mut fields = Vec::with_capacity(spec.fields.len());
        let mut end = 0;
        let mut size = 0;
        let mut align = 1;
        for field in &spec.fields {
            let shape = native_shape(&field.ty);
            let model = self.model;
            let (field_size, field_align) =
                shape_size_align(model, &shape, &mut |nested| self.record(nested))?;
            let offset = if key.union { 0 } else { align_up(end, field_align) };
            fields.push(FieldLayout {
                name: field.name.clone(),
                offset,
                size: field_size,
                align: field_align,
            });
            end = offset
                .checked_add(field_size)
                .ok_or_else(|| LayoutError::Overflow(key.to_string()))?;
            size = size.max(end);
            align = align.max(field_align);
        }
        Ok(RecordLayout {
            key: key.clone(),
            size: align_up(size, align),
            align,
            fields,
        })
    }

    fn record_with_repc(
        &mut self,
        target: Target,
        key: &RecordKey,
        spec: &RecordSpec,
    ) -> Result<RecordLayout, LayoutError> {
        // repc counts bits; rule out overflow before handing it the record.
        let estimate = self.record_with_table(key, spec)?;
        estimate
            .size
            .checked_mul(8)
            .ok_or_else(|| LayoutError::Overflow(key.to_string()))?;
        let record_type = self.repc_record(target, key, spec)?;
        let computed = repc::compute_layout(target, &record_type)?;
        let record = match computed.variant {
            TypeVariant::Record(record) => record,
            _ => return Err(LayoutError::Other(format!("Expected record layout for {}", key))),
        };
        let mut fields = Vec::with_capacity(spec.fields.len());
        for (field, computed_field) in spec.fields.iter().zip(record.fields.iter()) {
            let offset = computed_field
                .layout
                .as_ref()
                .map(|layout| layout.offset_bits / 8)
                .ok_or_else(|| LayoutError::Other(format!("No offset for {}.{}", key, field.name)))?;
            fields.push(FieldLayout {
                name: field.name.clone(),
                offset,
                size: computed_field.ty.layout.size_bits / 8,
                align: computed_field.ty.layout.required_alignment_bits / 8,
            });
        }
        Ok(RecordLayout {
            key: key.clone(),
            size: computed.layout.size_bits / 8,
            align: computed.layout.required_alignment_bits / 8,
            fields,
        })
    }

    fn repc_record(&mut self, target: Target, key: &RecordKey, spec: &RecordSpec) -> Result<Type<()>, LayoutError> {
        let mut fields = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            let ty = self.repc_type(target, &native_shape(&field.ty))?;
            fields.push(RecordField {
                layout: None,
                annotations: vec![],
                named: true,
                bit_width: None,
                ty,
            });
        }
        let kind = if key.union { RecordKind::Union } else { RecordKind::Struct };
        Ok(Type {
            layout: (),
            annotations: vec![],
            variant: TypeVariant::Record(Record { kind, fields }),
        })
    }

    fn repc_type(&mut self, target: Target, shape: &NativeShape) -> Result<Type<()>, LayoutError> {
        let mut ty = if shape.pointers > 0 {
            builtin(BuiltinType::Pointer)
        } else {
            let base = match &shape.base {
                NativeBase::Builtin { kind, .. } => repc_builtin(*kind),
                NativeBase::Enum(_) => builtin(BuiltinType::Int),
                NativeBase::Function(_) => builtin(BuiltinType::Pointer),
                NativeBase::Record { tag, union } => {
                    let key = RecordKey::new(tag.clone(), *union);
                    let spec = *self
                        .specs
                        .get(&key)
                        .ok_or_else(|| LayoutError::UnknownRecord(key.to_string()))?;
                    if !self.processing.insert(key.clone()) {
                        return Err(LayoutError::TypeRecursion(key.to_string()));
                    }
                    let nested = self.repc_record(target, &key, spec)?;
                    self.processing.remove(&key);
                    nested
                }
                NativeBase::Void => {
                    return Err(LayoutError::Other("void has no layout".to_string()));
                }
            };
            wrap_arrays(base, &shape.inner)
        };
        ty = wrap_arrays(ty, &shape.outer);
        Ok(ty)
    }
}

fn builtin(builtin: BuiltinType) -> Type<()> {
    Type {
        layout: (),
        annotations: vec![],
        variant: TypeVariant::Builtin(builtin),
    }
}

fn repc_builtin(kind: CBaseKind) -> Type<()> {
    let pair = |part: BuiltinType| Type {
        layout: (),
        annotations: vec![],
        variant: TypeVariant::Array(repc::layout::Array {
            element_type: Box::new(builtin(part)),
            num_elements: Some(2),
        }),
    };
    match kind {
        CBaseKind::Bool => builtin(BuiltinType::Bool),
        CBaseKind::Char => builtin(BuiltinType::Char),
        CBaseKind::SChar => builtin(BuiltinType::SignedChar),
        CBaseKind::UChar => builtin(BuiltinType::UnsignedChar),
        CBaseKind::Short => builtin(BuiltinType::Short),
        CBaseKind::UShort => builtin(BuiltinType::UnsignedShort),
        CBaseKind::Int => builtin(BuiltinType::Int),
        CBaseKind::UInt => builtin(BuiltinType::UnsignedInt),
        CBaseKind::Long => builtin(BuiltinType::Long),
        CBaseKind::ULong => builtin(BuiltinType::UnsignedLong),
        CBaseKind::LongLong => builtin(BuiltinType::LongLong),
        CBaseKind::ULongLong => builtin(BuiltinType::UnsignedLongLong),
        CBaseKind::Float => builtin(BuiltinType::Float),
        CBaseKind::Double | CBaseKind::LongDouble => builtin(BuiltinType::Double),
        CBaseKind::ComplexFloat => pair(BuiltinType::Float),
        CBaseKind::ComplexDouble => pair(BuiltinType::Double),
        CBaseKind::UintPtr | CBaseKind::Pointer => builtin(BuiltinType::Pointer),
    }
}

fn wrap_arrays(mut ty: Type<()>, dims: &[Dim]) -> Type<()> {
    for dim in dims.iter().rev() {
        ty = Type {
            layout: (),
            annotations: vec![],
            variant: TypeVariant::Array(repc::layout::Array {
                element_type: Box::new(ty),
                num_elements: Some(dim.extent()),
            }),
        };
    }
    ty
}
