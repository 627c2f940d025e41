//! Struct and union wrappers.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use tether_layout::RecordKey;
use tether_shape::naming::unexported;
use tether_shape::{CBase, CType, NativeBase, NativeShape, Position, RecordSpec};

use crate::context::GenContext;
use crate::emit::CodeWriter;
use crate::engine::HelperEngine;
use crate::error::{GenError, GenResult};
use crate::names::Direction;
use crate::plan::{BaseStep, ConversionPlan, Level};
use crate::prelude;
use crate::unit::GeneratedBlock;

/// How a member is read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    Scalar,
    Pointer,
    String,
    StructValue,
    StructRef { host_value: bool },
    Callback,
    /// Fixed arrays of plain elements, copied as one block.
    PlainArray,
    /// Fixed arrays converted element by element.
    Array,
    /// Anything with a dynamic view.
    View,
}

impl FieldAccess {
    fn classify(plan: &ConversionPlan) -> Self {
        if !plan.is_leveled() {
            return match plan.base {
                BaseStep::Plain => FieldAccess::Scalar,
                BaseStep::PlainPointer => FieldAccess::Pointer,
                BaseStep::StringBorrow | BaseStep::StringCopy => FieldAccess::String,
                BaseStep::StructValue => FieldAccess::StructValue,
                BaseStep::StructRef { host_value } => FieldAccess::StructRef { host_value },
                BaseStep::Callback => FieldAccess::Callback,
            };
        }
        if !plan.arrays_only() {
            FieldAccess::View
        } else if matches!(plan.base, BaseStep::Plain | BaseStep::PlainPointer) {
            FieldAccess::PlainArray
        } else {
            FieldAccess::Array
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldBinding {
    pub c_name: String,
    /// Exported Go field name.
    pub name: String,
    /// Constructor parameter name.
    pub param: String,
    pub plan: ConversionPlan,
    pub access: FieldAccess,
    pub offset: u64,
    pub size: u64,
    /// Element size per level.
    pub strides: Vec<u64>,
}

impl FieldBinding {
    fn host_type(&self) -> String {
        self.plan.host.to_string()
    }

    fn native_type(&self) -> String {
        self.plan.native.to_string()
    }

    /// A single view that can be read back given its length.
    fn is_sized_view(&self) -> bool {
        self.plan.levels == [Level::View]
    }
}

/// Everything needed to emit one struct or union wrapper.
#[derive(Debug, Clone)]
pub struct StructBinding {
    pub tag: String,
    pub union: bool,
    pub type_name: String,
    pub raw: bool,
    pub fields: Vec<FieldBinding>,
    pub size: u64,
    pub align: u64,
    /// Suffix of the private fields, stable per declaration.
    pub hash: String,
    pub position: Position,
}

impl StructBinding {
    pub fn new(ctx: &GenContext, spec: &RecordSpec, union: bool, position: &Position) -> GenResult<Self> {
        let layout = ctx.layouts.record(&RecordKey::new(spec.tag.clone(), union))?;
        let hints = ctx.config.type_hints(&spec.tag);
        let names = ctx.names();

        let mut fields = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            ensure_known(ctx, &field.ty)?;
            let (host, native) = ctx.member_shapes(hints, &field.name, &field.ty);
            let plan = ConversionPlan::new(&host, &native).map_err(|err| match err {
                GenError::UnsupportedShape { reason, .. } => {
                    GenError::unsupported(format!("member `{}`: {}", field.name, reason))
                }
                other => other,
            })?;
            let field_layout = layout.field(&field.name).ok_or_else(|| {
                GenError::unsupported(format!("member `{}` has no layout", field.name))
            })?;
            let strides = (0..plan.depth())
                .map(|level| ctx.layouts.element_size(&native, level + 1))
                .collect::<Result<Vec<_>, _>>()?;
            fields.push(FieldBinding {
                c_name: field.name.clone(),
                name: names.field_name(&field.name),
                param: names.param_name(&field.name),
                access: FieldAccess::classify(&plan),
                plan,
                offset: field_layout.offset,
                size: field_layout.size,
                strides,
            });
        }

        Ok(StructBinding {
            tag: spec.tag.clone(),
            union,
            type_name: names.type_name(&spec.tag),
            raw: ctx.config.is_raw_type(&spec.tag),
            fields,
            size: layout.size,
            align: layout.align,
            hash: layout_hash(spec, union),
            position: position.clone(),
        })
    }

    pub fn native(&self) -> NativeShape {
        NativeShape::new(NativeBase::Record {
            tag: self.tag.clone(),
            union: self.union,
        })
    }

    fn cgo_type(&self) -> String {
        self.native().to_string()
    }

    fn const_prefix(&self) -> String {
        unexported(&self.type_name)
    }

    fn offset_const(&self, field: &FieldBinding) -> String {
        format!("{}{}Offset", self.const_prefix(), field.name)
    }

    fn stride_const(&self, field: &FieldBinding, level: usize) -> String {
        format!("{}{}Stride{}", self.const_prefix(), field.name, level)
    }

    fn ref_field(&self) -> String {
        format!("ref{}", self.hash)
    }

    fn allocs_field(&self) -> String {
        format!("allocs{}", self.hash)
    }
}

/// Fails for references to records, enums or callbacks nobody declared, and
/// for records that have no binding.
pub(crate) fn ensure_known(ctx: &GenContext, ty: &CType) -> GenResult<()> {
    let known = match &ty.base {
        CBase::Struct(tag) | CBase::Union(tag) => {
            let union = matches!(ty.base, CBase::Union(_));
            if ctx.decls.record(tag, union).is_some() && ctx.is_skipped(tag, union) {
                return Err(GenError::unsupported(format!("{} has no binding", ty.base)));
            }
            ctx.decls.record(tag, union).is_some()
        }
        CBase::Enum(tag) => ctx.decls.enum_spec(tag).is_some(),
        CBase::Function(name) => ctx.decls.callback(name).is_some(),
        CBase::Void | CBase::Builtin { .. } => true,
    };
    if known {
        Ok(())
    } else {
        Err(GenError::UnknownType(ty.base.to_string()))
    }
}

fn layout_hash(spec: &RecordSpec, union: bool) -> String {
    let mut hasher = FxHasher::default();
    spec.tag.hash(&mut hasher);
    union.hash(&mut hasher);
    for field in &spec.fields {
        field.name.hash(&mut hasher);
        field.ty.to_string().hash(&mut hasher);
    }
    format!("{:x}", hasher.finish() as u32)
}

fn field_ptr(binding: &StructBinding, field: &FieldBinding, base: &str) -> String {
    format!(
        "unsafe.Pointer(uintptr(unsafe.Pointer({})) + {})",
        base,
        binding.offset_const(field)
    )
}

pub fn emit_struct(engine: &mut HelperEngine<'_>, binding: &StructBinding) -> GenResult<GeneratedBlock> {
    let own = engine.alloc(&binding.native())?;
    let mut w = CodeWriter::new();
    emit_layout_consts(&mut w, engine.context(), binding);
    if binding.raw {
        emit_raw(&mut w, engine, binding, &own.name)?;
    } else {
        engine.provide(prelude::alloc_map())?;
        emit_managed(&mut w, engine, binding, &own.name)?;
    }
    let kind = if binding.union { "union" } else { "struct" };
    Ok(GeneratedBlock::new(binding.type_name.clone(), kind, w.finish()))
}

fn emit_layout_consts(w: &mut CodeWriter, ctx: &GenContext, binding: &StructBinding) {
    let prefix = binding.const_prefix();
    w.line(format!(
        "// {} layout of {} on {}.",
        prefix,
        binding.cgo_type(),
        ctx.config.arch
    ));
    w.open("const (");
    w.line(format!("{}Size  = {}", prefix, binding.size));
    w.line(format!("{}Align = {}", prefix, binding.align));
    for field in &binding.fields {
        w.line(format!("{} = {}", binding.offset_const(field), field.offset));
        for (level, stride) in field.strides.iter().enumerate() {
            w.line(format!("{} = {}", binding.stride_const(field, level), stride));
        }
    }
    w.close(")");
    w.blank();
}

fn emit_managed(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &StructBinding,
    alloc: &str,
) -> GenResult<()> {
    let ty = &binding.type_name;
    let cgo = binding.cgo_type();
    let reff = binding.ref_field();
    let allocs = binding.allocs_field();

    w.line(format!(
        "// {} as declared in {}",
        ty, binding.position
    ));
    w.open(format!("type {} struct {{", ty));
    for field in &binding.fields {
        w.line(format!("{} {}", field.name, field.host_type()));
    }
    w.line(format!("{} *{}", reff, cgo));
    w.line(format!("{} *cgoAllocMap", allocs));
    w.close("}");
    w.blank();

    w.line(format!("func free{}(x *{}) {{\n\tx.FreeRef()\n}}", ty, ty));
    w.blank();

    w.line("// allocMap returns the allocation map of x, creating it together with the finalizer.");
    w.open(format!("func (x *{}) allocMap{}() *cgoAllocMap {{", ty, binding.hash));
    w.open(format!("if x.{} == nil {{", allocs));
    w.line(format!("x.{} = new(cgoAllocMap)", allocs));
    w.line(format!("runtime.SetFinalizer(x, free{})", ty));
    w.close("}");
    w.line(format!("return x.{}", allocs));
    w.close("}");
    w.blank();

    w.line("// Ref returns the underlying reference to C object or nil if struct is nil.");
    w.open(format!("func (x *{}) Ref() *{} {{", ty, cgo));
    w.open("if x == nil {");
    w.line("return nil");
    w.close("}");
    w.line(format!("return x.{}", reff));
    w.close("}");
    w.blank();

    w.line("// FreeRef releases the C memory owned by x. Memory shared with other wrappers");
    w.line("// is freed when the last of them lets go of it.");
    w.open(format!("func (x *{}) FreeRef() {{", ty));
    w.open("if x == nil {");
    w.line("return");
    w.close("}");
    w.open(format!("if x.{} != nil {{", allocs));
    w.line(format!("x.{}.Free()", allocs));
    w.close("}");
    w.line(format!("x.{} = nil", reff));
    w.close("}");
    w.blank();

    w.line("// ResetRef drops the reference to C memory without freeing it.");
    w.open(format!("func (x *{}) ResetRef() {{", ty));
    w.open("if x == nil {");
    w.line("return");
    w.close("}");
    w.open(format!("if x.{} != nil {{", allocs));
    w.line(format!("x.{}.Disown()", allocs));
    w.close("}");
    w.line(format!("x.{} = nil", reff));
    w.close("}");
    w.blank();

    w.line(format!(
        "// New{}Ref creates a new wrapper struct with underlying reference set to the original C object.",
        ty
    ));
    w.line("// Memory counted by the reference registry gains a reference the wrapper releases.");
    w.open(format!("func New{}Ref(ref unsafe.Pointer) *{} {{", ty, ty));
    w.open("if ref == nil {");
    w.line("return nil");
    w.close("}");
    w.line(format!("obj := &{}{{{}: (*{})(ref)}}", ty, reff, cgo));
    w.open("if cgoRefs.Retain(ref) {");
    w.line(format!("obj.allocMap{}().Add(ref)", binding.hash));
    w.close("}");
    w.line("return obj");
    w.close("}");
    w.blank();

    let params: Vec<String> = binding
        .fields
        .iter()
        .map(|f| format!("{} {}", f.param, f.host_type()))
        .collect();
    let inits: Vec<String> = binding
        .fields
        .iter()
        .map(|f| format!("{}: {}", f.name, f.param))
        .collect();
    w.line(format!("// New{} creates a detached wrapper from host values.", ty));
    w.open(format!("func New{}({}) *{} {{", ty, params.join(", "), ty));
    w.line(format!("return &{}{{{}}}", ty, inits.join(", ")));
    w.close("}");
    w.blank();

    w.line("// PassRef returns the underlying C object, otherwise it will allocate one and set its values");
    w.line("// from this wrapping struct. The returned allocation map belongs to x.");
    w.open(format!("func (x *{}) PassRef() (*{}, *cgoAllocMap) {{", ty, cgo));
    w.open("if x == nil {");
    w.line("return nil, nil");
    w.reopen(format!("}} else if x.{} != nil {{", reff));
    w.line(format!("return x.{}, x.{}", reff, allocs));
    w.close("}");
    w.line(format!("mem := {}(1)", alloc));
    w.line(format!("ref := (*{})(mem)", cgo));
    w.line("cgoRefs.Register(mem)");
    w.line(format!("allocs := x.allocMap{}()", binding.hash));
    w.line("allocs.Add(mem)");
    w.line(format!("x.{} = ref", reff));
    w.blank();
    for field in &binding.fields {
        w.line(format!("x.pass{}(ref)", field.name));
    }
    w.line("return ref, allocs");
    w.close("}");
    w.blank();

    w.line("// PassValue does the same as PassRef except that it will try to dereference the returned pointer.");
    w.line("// The returned allocation map belongs to the caller.");
    w.open(format!("func (x {}) PassValue() ({}, *cgoAllocMap) {{", ty, cgo));
    w.open(format!("if x.{} != nil {{", reff));
    w.line(format!("return *x.{}, nil", reff));
    w.close("}");
    w.line(format!("x.{} = nil", allocs));
    w.line("ref, allocs := x.PassRef()");
    w.line("// The copy dies here; its finalizer must not free what the caller now owns.");
    w.line("runtime.SetFinalizer(&x, nil)");
    w.line("return *ref, allocs");
    w.close("}");
    w.blank();

    w.line("// Convert reads the C object into the host fields of x and returns x.");
    w.line("// Referenced structs are wrapped but not converted.");
    w.open(format!("func (x *{}) Convert() *{} {{", ty, ty));
    w.open(format!("if x == nil || x.{} == nil {{", reff));
    w.line("return x");
    w.close("}");
    w.line(format!("ref := x.{}", reff));
    for field in &binding.fields {
        if field.access != FieldAccess::View {
            w.line(format!("x.{f} = x.load{f}(ref)", f = field.name));
        }
    }
    w.line("return x");
    w.close("}");
    w.blank();

    let accessors = engine.context().config.options.struct_accessors;
    for field in &binding.fields {
        emit_pass_field(w, engine, binding, field)?;
        if field.access != FieldAccess::View {
            emit_load_field(w, engine, binding, field)?;
        }
        if accessors && field.access != FieldAccess::Callback {
            emit_accessors(w, engine, binding, field)?;
        }
    }
    Ok(())
}

/// Writes the field from the host value into native memory at `ref`.
fn emit_pass_field(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &StructBinding,
    field: &FieldBinding,
) -> GenResult<()> {
    let ty = &binding.type_name;
    let native = field.native_type();
    let src = format!("x.{}", field.name);
    w.open(format!("func (x *{}) pass{}(ref *{}) {{", ty, field.name, binding.cgo_type()));
    w.line(format!("p := {}", field_ptr(binding, field, "ref")));
    match field.access {
        FieldAccess::Scalar | FieldAccess::PlainArray => {
            w.line(format!("*(*{n})(p) = *(*{n})(unsafe.Pointer(&{s}))", n = native, s = src));
        }
        FieldAccess::Pointer | FieldAccess::Callback => {
            w.line(format!("*(*unsafe.Pointer)(p) = unsafe.Pointer({})", src));
        }
        FieldAccess::String => {
            engine.provide(prelude::unpack_string_copy())?;
            w.line(format!("cs, csAllocs := unpackMemoryPCharString({})", src));
            w.line("*(*unsafe.Pointer)(p) = unsafe.Pointer(cs)");
            w.line(format!("x.allocMap{}().Borrow(csAllocs)", binding.hash));
        }
        FieldAccess::StructValue => {
            w.line(format!("cv, cvAllocs := {}.PassValue()", src));
            w.line(format!("*(*{})(p) = cv", native));
            w.line(format!("x.allocMap{}().Borrow(cvAllocs)", binding.hash));
        }
        FieldAccess::StructRef { host_value } => {
            if host_value {
                w.line(format!("cw := {}", src));
                w.line("cv, _ := cw.PassRef()");
            } else {
                w.line(format!("cv, _ := {}.PassRef()", src));
            }
            w.line("*(*unsafe.Pointer)(p) = unsafe.Pointer(cv)");
            emit_retain(w, &format!("x.allocMap{}()", binding.hash));
        }
        FieldAccess::Array | FieldAccess::View => {
            let unpack = engine.get_conversion(&field.plan.host, &field.plan.native, Direction::Unpack, false)?;
            w.line(format!("cv, cvAllocs := {}({})", unpack.name, src));
            w.line(format!("*(*{})(p) = cv", native));
            w.line(format!("x.allocMap{}().Borrow(cvAllocs)", binding.hash));
        }
    }
    w.close("}");
    w.blank();
    Ok(())
}

/// Retains `cv` for `allocs` unless the map already owns it.
fn emit_retain(w: &mut CodeWriter, allocs: &str) {
    w.open(format!(
        "if cv != nil && !{a}.Has(unsafe.Pointer(cv)) && cgoRefs.Retain(unsafe.Pointer(cv)) {{",
        a = allocs
    ));
    w.line(format!("{}.Add(unsafe.Pointer(cv))", allocs));
    w.close("}");
}

/// Reads the field out of native memory at `ref`.
fn emit_load_field(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &StructBinding,
    field: &FieldBinding,
) -> GenResult<()> {
    let host = field.host_type();
    let element = field.plan.host_element();
    w.open(format!(
        "func (x *{}) load{}(ref *{}) {} {{",
        binding.type_name,
        field.name,
        binding.cgo_type(),
        host
    ));
    w.line(format!("p := {}", field_ptr(binding, field, "ref")));
    match field.access {
        FieldAccess::Scalar | FieldAccess::PlainArray | FieldAccess::Callback => {
            w.line(format!("return *(*{})(p)", host));
        }
        FieldAccess::Pointer => {
            w.line(format!("return ({})(*(*unsafe.Pointer)(p))", host));
        }
        FieldAccess::String => {
            let pack = engine.pack_string()?;
            w.line(format!("return {}((*C.char)(*(*unsafe.Pointer)(p)))", pack.name));
        }
        FieldAccess::StructValue => {
            w.line(format!("return *New{}Ref(p).Convert()", element.base_name));
        }
        FieldAccess::StructRef { host_value: false } => {
            w.line(format!("return New{}Ref(*(*unsafe.Pointer)(p))", element.base_name));
        }
        FieldAccess::StructRef { host_value: true } => {
            w.open(format!(
                "if obj := New{}Ref(*(*unsafe.Pointer)(p)); obj != nil {{",
                element.base_name
            ));
            w.line("return *obj.Convert()");
            w.close("}");
            w.line(format!("return {}{{}}", element.base_name));
        }
        FieldAccess::Array => {
            let pack = engine.get_conversion(&field.plan.host, &field.plan.native, Direction::Pack, false)?;
            w.line(format!("var v {}", host));
            w.line(format!("{}(&v, (*{})(p))", pack.name, field.native_type()));
            w.line("return v");
        }
        FieldAccess::View => {
            return Err(GenError::unsupported(format!(
                "member `{}` has no length to read it back with",
                field.c_name
            )));
        }
    }
    w.close("}");
    w.blank();
    Ok(())
}

fn emit_accessors(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &StructBinding,
    field: &FieldBinding,
) -> GenResult<()> {
    let ty = &binding.type_name;
    let reff = binding.ref_field();
    let host = field.host_type();
    let name = &field.name;

    if field.access == FieldAccess::View {
        if field.is_sized_view() {
            let pack = engine.get_conversion(&field.plan.host, &field.plan.native, Direction::Pack, false)?;
            w.line(format!("// Get{} returns the first n elements of {}.", name, name));
            w.open(format!("func (x *{}) Get{}(n int) {} {{", ty, name, host));
            w.open(format!("if x.{} == nil {{", reff));
            w.line(format!("return x.{}", name));
            w.close("}");
            w.line(format!("p := {}", field_ptr(binding, field, &format!("x.{}", reff))));
            w.line(format!("v := make({}, n)", host));
            w.line(format!("{}(v, *(*{})(p))", pack.name, field.native_type()));
            w.line(format!("x.{} = v", name));
            w.line("return v");
            w.close("}");
            w.blank();
        }
    } else {
        w.line(format!("// Get{} returns {}, reading it from C memory when x is backed by it.", name, name));
        w.open(format!("func (x *{}) Get{}() {} {{", ty, name, host));
        w.open(format!("if ref := x.{}; ref != nil {{", reff));
        if matches!(field.access, FieldAccess::StructRef { host_value: false }) {
            w.line(format!("x.{n} = x.load{n}(ref).Convert()", n = name));
        } else {
            w.line(format!("x.{n} = x.load{n}(ref)", n = name));
        }
        w.close("}");
        w.line(format!("return x.{}", name));
        w.close("}");
        w.blank();
    }

    w.line(format!("// Set{} updates {} and the C object behind x, if any.", name, name));
    w.open(format!("func (x *{}) Set{}(v {}) *{} {{", ty, name, host, ty));
    w.line(format!("x.{} = v", name));
    w.open(format!("if ref := x.{}; ref != nil {{", reff));
    w.line(format!("x.pass{}(ref)", name));
    w.close("}");
    w.line("return x");
    w.close("}");
    w.blank();

    if field.plan.is_leveled() {
        emit_at_accessors(w, engine, binding, field)?;
    }
    Ok(())
}

fn emit_at_accessors(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &StructBinding,
    field: &FieldBinding,
) -> GenResult<()> {
    let ty = &binding.type_name;
    let reff = binding.ref_field();
    let name = &field.name;
    let depth = field.plan.depth();
    let indices: Vec<String> = (0..depth).map(|k| format!("i{}", k)).collect();
    let index_expr: String = indices.iter().map(|i| format!("[{}]", i)).collect();
    let host_element = field.plan.host_element();
    let native_element = field.plan.native_element();

    let locate = |w: &mut CodeWriter| {
        w.line(format!("p := {}", field_ptr(binding, field, "ref")));
        for (k, level) in field.plan.levels.iter().enumerate() {
            if *level == Level::View {
                w.line("p = *(*unsafe.Pointer)(p)");
            }
            w.line(format!(
                "p = unsafe.Pointer(uintptr(p) + uintptr(i{})*{})",
                k,
                binding.stride_const(field, k)
            ));
        }
    };

    w.line(format!("// Get{}At returns one element of {}.", name, name));
    w.open(format!(
        "func (x *{}) Get{}At({} int) {} {{",
        ty,
        name,
        indices.join(", "),
        host_element
    ));
    w.line(format!("ref := x.{}", reff));
    w.open("if ref == nil {");
    w.line(format!("return x.{}{}", name, index_expr));
    w.close("}");
    locate(w);
    match field.plan.base {
        BaseStep::Plain => w.line(format!("return *(*{})(p)", host_element)),
        BaseStep::PlainPointer => w.line(format!("return ({})(*(*unsafe.Pointer)(p))", host_element)),
        BaseStep::StringBorrow | BaseStep::StringCopy => {
            let pack = engine.pack_string()?;
            w.line(format!("return {}((*C.char)(*(*unsafe.Pointer)(p)))", pack.name));
        }
        BaseStep::StructValue => {
            w.line(format!("return *New{}Ref(p).Convert()", host_element.base_name));
        }
        BaseStep::StructRef { host_value: false } => {
            w.line(format!(
                "return New{}Ref(*(*unsafe.Pointer)(p)).Convert()",
                host_element.base_name
            ));
        }
        BaseStep::StructRef { host_value: true } => {
            w.open(format!(
                "if obj := New{}Ref(*(*unsafe.Pointer)(p)); obj != nil {{",
                host_element.base_name
            ));
            w.line("return *obj.Convert()");
            w.close("}");
            w.line(format!("return {}{{}}", host_element.base_name));
        }
        BaseStep::Callback => {
            return Err(GenError::unsupported("callbacks cannot be stored in a container"));
        }
    }
    w.close("}");
    w.blank();

    w.line(format!("// Set{}At updates one element of {}.", name, name));
    w.open(format!(
        "func (x *{}) Set{}At({} int, v {}) *{} {{",
        ty,
        name,
        indices.join(", "),
        host_element,
        ty
    ));
    w.line(format!("ref := x.{}", reff));
    w.open("if ref == nil {");
    w.line(format!("x.{}{} = v", name, index_expr));
    w.line("return x");
    w.close("}");
    locate(w);
    let allocs = format!("x.allocMap{}()", binding.hash);
    match field.plan.base {
        BaseStep::Plain => {
            w.line(format!(
                "*(*{n})(p) = *(*{n})(unsafe.Pointer(&v))",
                n = native_element
            ));
        }
        BaseStep::PlainPointer => w.line("*(*unsafe.Pointer)(p) = unsafe.Pointer(v)"),
        BaseStep::StringBorrow | BaseStep::StringCopy => {
            engine.provide(prelude::unpack_string_copy())?;
            w.line("cs, csAllocs := unpackMemoryPCharString(v)");
            w.line("*(*unsafe.Pointer)(p) = unsafe.Pointer(cs)");
            w.line(format!("{}.Borrow(csAllocs)", allocs));
        }
        BaseStep::StructValue => {
            w.line("cv, cvAllocs := v.PassValue()");
            w.line(format!("*(*{})(p) = cv", native_element));
            w.line(format!("{}.Borrow(cvAllocs)", allocs));
        }
        BaseStep::StructRef { .. } => {
            w.line("cv, _ := v.PassRef()");
            w.line("*(*unsafe.Pointer)(p) = unsafe.Pointer(cv)");
            emit_retain(w, &allocs);
        }
        BaseStep::Callback => {
            return Err(GenError::unsupported("callbacks cannot be stored in a container"));
        }
    }
    w.line("return x");
    w.close("}");
    w.blank();
    Ok(())
}

fn emit_raw(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &StructBinding,
    alloc: &str,
) -> GenResult<()> {
    let ty = &binding.type_name;
    let cgo = binding.cgo_type();

    w.line(format!("// {} is a memory-shaped alias of {}, declared in {}", ty, cgo, binding.position));
    w.line(format!("type {} {}", ty, cgo));
    w.blank();

    w.line("// Ref returns a reference to C object as it is.");
    w.open(format!("func (x *{}) Ref() *{} {{", ty, cgo));
    w.open("if x == nil {");
    w.line("return nil");
    w.close("}");
    w.line(format!("return (*{})(unsafe.Pointer(x))", cgo));
    w.close("}");
    w.blank();

    w.line("// Free cleanups the referenced memory using C free.");
    w.open(format!("func (x *{}) Free() {{", ty));
    w.open("if x != nil {");
    w.line("C.free(unsafe.Pointer(x))");
    w.close("}");
    w.close("}");
    w.blank();

    w.line(format!(
        "// New{}Ref converts the C object reference into a raw struct reference without wrapping.",
        ty
    ));
    w.open(format!("func New{}Ref(ref unsafe.Pointer) *{} {{", ty, ty));
    w.line(format!("return (*{})(ref)", ty));
    w.close("}");
    w.blank();

    w.line(format!("// New{} allocates a new C object of this type. Release it with Free.", ty));
    w.open(format!("func New{}() *{} {{", ty, ty));
    w.line(format!("return (*{})({}(1))", ty, alloc));
    w.close("}");
    w.blank();

    w.line("// PassRef returns a reference to C object as it is or allocates a new C object of this type.");
    w.open(format!("func (x *{}) PassRef() *{} {{", ty, cgo));
    w.open("if x == nil {");
    w.line(format!("x = (*{})({}(1))", ty, alloc));
    w.close("}");
    w.line(format!("return (*{})(unsafe.Pointer(x))", cgo));
    w.close("}");
    w.blank();

    for field in &binding.fields {
        let host = field.host_type();
        let read = match field.access {
            FieldAccess::Scalar | FieldAccess::PlainArray => format!("*(*{})(p)", host),
            FieldAccess::Pointer => format!("({})(*(*unsafe.Pointer)(p))", host),
            FieldAccess::String => {
                let pack = engine.pack_string()?;
                format!("{}((*C.char)(*(*unsafe.Pointer)(p)))", pack.name)
            }
            _ => continue,
        };
        w.line(format!("// Get{} returns the {} member.", field.name, field.c_name));
        w.open(format!("func (x *{}) Get{}() {} {{", ty, field.name, host));
        w.line(format!("p := {}", field_ptr(binding, field, "x")));
        w.line(format!("return {}", read));
        w.close("}");
        w.blank();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::HelperAggregator;
    use crate::config::GeneratorConfig;
    use tether_shape::{CBaseKind, DeclKind, Declaration, Field};

    fn vec2_decl() -> Declaration {
        Declaration::new(DeclKind::Struct(RecordSpec {
            tag: "vec2".to_string(),
            fields: vec![
                Field {
                    name: "x".to_string(),
                    ty: CType::builtin(CBaseKind::Int),
                },
                Field {
                    name: "next".to_string(),
                    ty: CType::new(CBase::Struct("vec2".to_string())).pointer(1),
                },
                Field {
                    name: "label".to_string(),
                    ty: CType::builtin(CBaseKind::Char).pointer(1),
                },
            ],
        }))
    }

    fn spec_of(decl: &Declaration) -> &RecordSpec {
        match &decl.kind {
            DeclKind::Struct(spec) => spec,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_field_access_classes() {
        let decl = vec2_decl();
        let ctx = GenContext::new(GeneratorConfig::default(), std::slice::from_ref(&decl)).unwrap();
        let binding = StructBinding::new(&ctx, spec_of(&decl), false, &decl.position).unwrap();
        let access: Vec<FieldAccess> = binding.fields.iter().map(|f| f.access).collect();
        assert_eq!(
            access,
            vec![
                FieldAccess::Scalar,
                FieldAccess::StructRef { host_value: false },
                FieldAccess::String
            ]
        );
        assert_eq!(binding.size, 24);
        assert_eq!(binding.fields[1].offset, 8);
        assert_eq!(binding.type_name, "Vec2");
    }

    #[test]
    fn test_self_reference_is_retained_once() {
        let decl = vec2_decl();
        let ctx = GenContext::new(GeneratorConfig::default(), std::slice::from_ref(&decl)).unwrap();
        let binding = StructBinding::new(&ctx, spec_of(&decl), false, &decl.position).unwrap();
        let aggregator = HelperAggregator::spawn(8).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let block = emit_struct(&mut engine, &binding).unwrap();
        drop(engine);
        let registry = aggregator.finish().unwrap();

        let source = &block.source;
        assert!(source.contains("type Vec2 struct {"));
        assert!(source.contains("vec2NextOffset = 8"));
        assert!(source.contains("cv, _ := x.Next.PassRef()"));
        assert!(source.contains(&format!(
            "if cv != nil && !x.allocMap{h}().Has(unsafe.Pointer(cv)) && cgoRefs.Retain(unsafe.Pointer(cv)) {{",
            h = binding.hash
        )));
        // The reference is set before any field is marshalled.
        let set_ref = source.find(&format!("x.ref{} = ref", binding.hash)).unwrap();
        let first_pass = source.find("x.passX(ref)").unwrap();
        assert!(set_ref < first_pass);
        assert!(registry.get("allocStructVec2Memory").is_some());
        assert!(registry.get("unpackMemoryPCharString").is_some());
    }

    #[test]
    fn test_pass_value_hands_allocations_to_the_caller() {
        let decl = vec2_decl();
        let ctx = GenContext::new(GeneratorConfig::default(), std::slice::from_ref(&decl)).unwrap();
        let binding = StructBinding::new(&ctx, spec_of(&decl), false, &decl.position).unwrap();
        let aggregator = HelperAggregator::spawn(8).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let block = emit_struct(&mut engine, &binding).unwrap();
        drop(engine);
        aggregator.finish().unwrap();

        let source = &block.source;
        let start = source.find("func (x Vec2) PassValue() (C.struct_vec2, *cgoAllocMap) {").unwrap();
        let body = &source[start..start + source[start..].find("\n}\n").unwrap()];
        let pass = body.find("ref, allocs := x.PassRef()").unwrap();
        let clear = body.find("runtime.SetFinalizer(&x, nil)").unwrap();
        let ret = body.find("return *ref, allocs").unwrap();
        assert!(pass < clear && clear < ret);
        assert!(block.imports.contains("runtime"));
    }

    #[test]
    fn test_raw_struct_alias() {
        let decl = vec2_decl();
        let config = GeneratorConfig::from_toml_str(
            "package = \"geo\"\n[hints.types.vec2]\nself_memory = \"raw\"\n",
        )
        .unwrap();
        let ctx = GenContext::new(config, std::slice::from_ref(&decl)).unwrap();
        let binding = StructBinding::new(&ctx, spec_of(&decl), false, &decl.position).unwrap();
        assert!(binding.raw);
        let aggregator = HelperAggregator::spawn(8).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let block = emit_struct(&mut engine, &binding).unwrap();
        drop(engine);
        aggregator.finish().unwrap();
        assert!(block.source.contains("type Vec2 C.struct_vec2"));
        assert!(block.source.contains("func (x *Vec2) GetX() int32 {"));
        assert!(block.source.contains("func (x *Vec2) GetNext() *Vec2 {"));
        assert!(!block.imports.contains("runtime"));
    }

    #[test]
    fn test_unknown_member_type() {
        let decl = Declaration::new(DeclKind::Struct(RecordSpec {
            tag: "holder".to_string(),
            fields: vec![Field {
                name: "inner".to_string(),
                ty: CType::new(CBase::Struct("missing".to_string())).pointer(1),
            }],
        }));
        let ctx = GenContext::new(GeneratorConfig::default(), std::slice::from_ref(&decl)).unwrap();
        let err = StructBinding::new(&ctx, spec_of(&decl), false, &decl.position).unwrap_err();
        assert!(matches!(err, GenError::UnknownType(_)));
    }
}
