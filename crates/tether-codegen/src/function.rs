//! Function proxies.
//!
//! A proxy converts every parameter, calls the C function, then runs the
//! post-call work (keep-alives and read-backs) in reverse parameter order and
//! converts the return value.

use tether_shape::{CType, FunctionSpec, Position};

use crate::context::GenContext;
use crate::emit::{CodeWriter, EmissionStack};
use crate::engine::HelperEngine;
use crate::error::{GenError, GenResult};
use crate::names::Direction;
use crate::plan::{BaseStep, ConversionPlan, Level};
use crate::prelude;
use crate::structs::ensure_known;
use crate::unit::GeneratedBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    InOut,
}

impl ParamDirection {
    fn of(ty: &CType) -> Self {
        if (ty.pointers == 0 && ty.outer.is_empty()) || ty.is_const {
            ParamDirection::In
        } else {
            ParamDirection::InOut
        }
    }
}

/// How one parameter crosses into C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMarshal {
    Scalar,
    PlainPointer,
    /// A slice of plain values handed over through its data pointer.
    ZeroCopyView,
    /// A fixed array of plain values handed over through its address.
    ZeroCopyArray,
    String,
    Helper,
    StructRef { host_value: bool },
    StructValue,
    Callback,
}

impl ParamMarshal {
    fn classify(plan: &ConversionPlan) -> Self {
        if plan.is_leveled() {
            return if plan.is_plain() && plan.arrays_only() {
                ParamMarshal::ZeroCopyArray
            } else if plan.is_plain() && plan.levels == [Level::View] {
                ParamMarshal::ZeroCopyView
            } else {
                ParamMarshal::Helper
            };
        }
        match plan.base {
            BaseStep::Plain => ParamMarshal::Scalar,
            BaseStep::PlainPointer => ParamMarshal::PlainPointer,
            BaseStep::StringBorrow | BaseStep::StringCopy => ParamMarshal::String,
            BaseStep::StructValue => ParamMarshal::StructValue,
            BaseStep::StructRef { host_value } => ParamMarshal::StructRef { host_value },
            BaseStep::Callback => ParamMarshal::Callback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub c_name: String,
    /// Go parameter name.
    pub name: String,
    pub plan: ConversionPlan,
    pub direction: ParamDirection,
    pub marshal: ParamMarshal,
}

impl ParamBinding {
    fn native_var(&self) -> String {
        format!("c{}", self.name)
    }

    fn allocs_var(&self) -> String {
        format!("c{}AllocMap", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionBinding {
    pub c_name: String,
    pub name: String,
    pub params: Vec<ParamBinding>,
    pub ret: Option<ConversionPlan>,
    /// Parameter sizing a view return, by C name.
    pub length: Option<String>,
    pub position: Position,
}

impl FunctionBinding {
    pub fn new(ctx: &GenContext, spec: &FunctionSpec, position: &Position) -> GenResult<Self> {
        let hints = ctx.config.function_hints(&spec.name);
        let names = ctx.names();

        let mut params = Vec::with_capacity(spec.params.len());
        for (i, param) in spec.params.iter().enumerate() {
            ensure_known(ctx, &param.ty)?;
            let (host, native) = ctx.member_shapes(hints, &param.name, &param.ty);
            let plan = ConversionPlan::new(&host, &native).map_err(|err| match err {
                GenError::UnsupportedShape { reason, .. } => {
                    GenError::unsupported(format!("parameter `{}`: {}", param.name, reason))
                }
                other => other,
            })?;
            let name = if param.name.is_empty() {
                format!("p{}", i)
            } else {
                names.param_name(&param.name)
            };
            params.push(ParamBinding {
                c_name: param.name.clone(),
                name,
                marshal: ParamMarshal::classify(&plan),
                direction: ParamDirection::of(&param.ty),
                plan,
            });
        }

        let ret = match &spec.ret {
            Some(ty) if !ty.is_void() => {
                ensure_known(ctx, ty)?;
                let (host, native) = ctx.return_shapes(hints, ty);
                Some(ConversionPlan::new(&host, &native)?)
            }
            _ => None,
        };

        let length = hints.and_then(|h| h.length.clone());
        if let Some(length) = &length {
            if !params.iter().any(|p| &p.c_name == length) {
                return Err(GenError::unsupported(format!(
                    "length parameter `{}` does not exist",
                    length
                )));
            }
        }

        Ok(FunctionBinding {
            c_name: spec.name.clone(),
            name: names.func_name(&spec.name),
            params,
            ret,
            length,
            position: position.clone(),
        })
    }
}

pub fn emit_function(engine: &mut HelperEngine<'_>, binding: &FunctionBinding) -> GenResult<GeneratedBlock> {
    let mut w = CodeWriter::new();

    let params: Vec<String> = binding
        .params
        .iter()
        .map(|p| format!("{} {}", p.name, p.plan.host.arg_type()))
        .collect();
    let ret_type = binding
        .ret
        .as_ref()
        .map(|ret| format!(" {}", ret.host))
        .unwrap_or_default();

    w.line(format!(
        "// {} function as declared in {}",
        binding.name, binding.position
    ));
    w.open(format!("func {}({}){} {{", binding.name, params.join(", "), ret_type));

    let mut post = EmissionStack::new();
    let mut args = Vec::with_capacity(binding.params.len());
    for param in &binding.params {
        args.push(emit_param(&mut w, &mut post, engine, param)?);
    }

    let call = format!("C.{}({})", binding.c_name, args.join(", "));
    if binding.ret.is_some() {
        w.line(format!("__ret := {}", call));
    } else {
        w.line(call);
    }
    post.flush_into(&mut w);
    w.set_indent(1);

    if let Some(ret) = &binding.ret {
        emit_return(&mut w, engine, binding, ret)?;
        w.line("return __v");
    }
    w.close("}");

    Ok(GeneratedBlock::new(binding.name.clone(), "function", w.finish()))
}

/// Writes the pre-call conversion and returns the call argument.
fn emit_param(
    w: &mut CodeWriter,
    post: &mut EmissionStack,
    engine: &mut HelperEngine<'_>,
    param: &ParamBinding,
) -> GenResult<String> {
    let name = &param.name;
    let cvar = param.native_var();
    let allocs = param.allocs_var();
    let native = param.plan.native.arg_type();

    match param.marshal {
        ParamMarshal::Scalar | ParamMarshal::Callback => {
            w.line(format!("{} := ({})({})", cvar, native, name));
        }
        ParamMarshal::PlainPointer | ParamMarshal::ZeroCopyArray => {
            w.line(format!("{} := ({})(unsafe.Pointer({}))", cvar, native, name));
        }
        ParamMarshal::ZeroCopyView => {
            engine.provide(prelude::slice_header())?;
            w.line(format!(
                "{} := ({})((*sliceHeader)(unsafe.Pointer(&{})).Data)",
                cvar, native, name
            ));
            post.push(1, format!("runtime.KeepAlive({})", name));
        }
        ParamMarshal::String => {
            let unpack = engine.unpack_string()?;
            w.line(format!("{}, {} := {}({})", cvar, allocs, unpack.name, name));
            post.push(1, format!("runtime.KeepAlive({})", allocs));
            post.push(1, format!("runtime.KeepAlive({})", name));
        }
        ParamMarshal::Helper => {
            let unpack = engine.get_conversion(&param.plan.host, &param.plan.native, Direction::Unpack, true)?;
            w.line(format!("{}, {} := {}({})", cvar, allocs, unpack.name, name));
            post.push(1, format!("runtime.KeepAlive({})", allocs));
            if param.direction == ParamDirection::InOut {
                let pack = engine.get_conversion(&param.plan.host, &param.plan.native, Direction::Pack, false)?;
                let native_root = if param.plan.native.outer.is_empty() {
                    cvar.clone()
                } else {
                    format!("(*{})(unsafe.Pointer({}))", param.plan.native, cvar)
                };
                post.push(1, format!("{}({}, {})", pack.name, name, native_root));
            }
        }
        ParamMarshal::StructRef { host_value } => {
            w.line(format!("{}, _ := {}.PassRef()", cvar, name));
            if host_value {
                post.push(1, format!("runtime.KeepAlive(&{})", name));
            } else {
                post.push(1, format!("runtime.KeepAlive({})", name));
                if param.direction == ParamDirection::InOut {
                    post.push(1, format!("{}.Convert()", name));
                }
            }
        }
        ParamMarshal::StructValue => {
            w.line(format!("{}, {} := {}.PassValue()", cvar, allocs, name));
            post.push(1, format!("runtime.KeepAlive({})", allocs));
        }
    }
    Ok(cvar)
}

fn emit_return(
    w: &mut CodeWriter,
    engine: &mut HelperEngine<'_>,
    binding: &FunctionBinding,
    ret: &ConversionPlan,
) -> GenResult<()> {
    let host = ret.host.to_string();
    if ret.is_leveled() {
        if ret.levels != [Level::View] {
            return Err(GenError::unsupported(format!(
                "returning {} needs more than one length",
                host
            )));
        }
        let pack = engine.get_conversion(&ret.host, &ret.native, Direction::Pack, false)?;
        w.line(format!("__v := make({}, {})", host, length_expr(binding)));
        w.line(format!("{}(__v, __ret)", pack.name));
        return Ok(());
    }

    match ret.base {
        BaseStep::Plain | BaseStep::Callback => {
            w.line(format!("__v := ({})(__ret)", host));
        }
        BaseStep::PlainPointer => {
            w.line(format!("__v := ({})(unsafe.Pointer(__ret))", host));
        }
        BaseStep::StringBorrow | BaseStep::StringCopy => {
            let pack = engine.pack_string()?;
            w.line(format!("__v := {}((*C.char)(unsafe.Pointer(__ret)))", pack.name));
        }
        BaseStep::StructRef { host_value: false } => {
            w.line(format!(
                "__v := New{}Ref(unsafe.Pointer(__ret)).Convert()",
                ret.host.base_name
            ));
        }
        BaseStep::StructRef { host_value: true } => {
            w.line(format!("var __v {}", host));
            w.open(format!(
                "if obj := New{}Ref(unsafe.Pointer(__ret)); obj != nil {{",
                ret.host.base_name
            ));
            w.line("__v = *obj.Convert()");
            w.close("}");
        }
        BaseStep::StructValue => {
            w.line(format!(
                "__v := *New{}Ref(unsafe.Pointer(&__ret)).Convert()",
                ret.host.base_name
            ));
        }
    }
    Ok(())
}

/// The element count of a view return.
fn length_expr(binding: &FunctionBinding) -> String {
    let sibling = binding
        .length
        .as_ref()
        .and_then(|length| binding.params.iter().find(|p| &p.c_name == length));
    match sibling {
        Some(param) if param.plan.host.views > 0 => format!("int({}[0])", param.name),
        Some(param) if param.plan.host.pointers > 0 => format!("int(*{})", param.name),
        Some(param) => format!("int({})", param.name),
        None => {
            let args: Vec<&str> = binding.params.iter().map(|p| p.name.as_str()).collect();
            format!(
                "{}Length({})",
                tether_shape::naming::unexported(&binding.name),
                args.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::HelperAggregator;
    use crate::config::GeneratorConfig;
    use tether_shape::{CBase, CBaseKind, DeclKind, Declaration, Param};

    fn generate(config: GeneratorConfig, spec: FunctionSpec) -> GenResult<GeneratedBlock> {
        let decl = Declaration::new(DeclKind::Function(spec.clone()));
        let ctx = GenContext::new(config, std::slice::from_ref(&decl))?;
        let binding = FunctionBinding::new(&ctx, &spec, &decl.position)?;
        let aggregator = HelperAggregator::spawn(16)?;
        let block = {
            let mut engine = HelperEngine::new(&ctx, aggregator.sink());
            emit_function(&mut engine, &binding)
        };
        aggregator.finish()?;
        block
    }

    fn param(name: &str, ty: CType) -> Param {
        Param {
            name: name.to_string(),
            ty,
        }
    }

    #[test]
    fn test_view_return_sized_by_sibling() {
        let config = GeneratorConfig::from_toml_str(
            "[hints.functions.read_bytes]\nlength = \"count\"\nret_pointer = \"view\"\npointer = { count = \"by_reference\" }\n",
        )
        .unwrap();
        let spec = FunctionSpec {
            name: "read_bytes".to_string(),
            params: vec![param("count", CType::builtin(CBaseKind::Int).pointer(1))],
            ret: Some(CType::builtin(CBaseKind::UChar).pointer(1)),
        };
        let block = generate(config, spec).unwrap();
        assert!(block.source.contains("func ReadBytes(count *int32) []byte {"));
        assert!(block.source.contains("ccount := (*C.int)(unsafe.Pointer(count))"));
        assert!(block.source.contains("__ret := C.read_bytes(ccount)"));
        assert!(block.source.contains("__v := make([]byte, int(*count))"));
        assert!(block.source.contains("packSUByte_PUchar(__v, __ret)"));
    }

    #[test]
    fn test_view_return_by_convention() {
        let spec = FunctionSpec {
            name: "list_ids".to_string(),
            params: vec![param("db", CType::new(CBase::Void).pointer(1))],
            ret: Some(CType::builtin(CBaseKind::Int).pointer(1)),
        };
        let config = GeneratorConfig::from_toml_str(
            "[hints.functions.list_ids]\nret_pointer = \"view\"\n",
        )
        .unwrap();
        let block = generate(config, spec).unwrap();
        assert!(block.source.contains("cdb := (unsafe.Pointer)(db)"));
        assert!(block.source.contains("__v := make([]int32, listIdsLength(db))"));
    }

    #[test]
    fn test_string_params_are_kept_alive() {
        let spec = FunctionSpec {
            name: "open_file".to_string(),
            params: vec![
                param("path", CType::builtin(CBaseKind::Char).pointer(1).constant()),
                param("mode", CType::builtin(CBaseKind::Int)),
            ],
            ret: Some(CType::builtin(CBaseKind::Int)),
        };
        let block = generate(GeneratorConfig::default(), spec).unwrap();
        let expected = "\
// OpenFile function as declared in <unknown>
func OpenFile(path string, mode int32) int32 {
	cpath, cpathAllocMap := unpackPCharString(path)
	cmode := (C.int)(mode)
	__ret := C.open_file(cpath, cmode)
	runtime.KeepAlive(path)
	runtime.KeepAlive(cpathAllocMap)
	__v := (int32)(__ret)
	return __v
}
";
        assert_eq!(block.source, expected);
        assert!(block.imports.contains("runtime"));
    }

    #[test]
    fn test_in_out_views_are_read_back() {
        let spec = FunctionSpec {
            name: "fill_names".to_string(),
            params: vec![param("names", CType::builtin(CBaseKind::Char).pointer(2))],
            ret: None,
        };
        let block = generate(GeneratorConfig::default(), spec).unwrap();
        let source = &block.source;
        assert!(source.contains("cnames, cnamesAllocMap := unpackArgSString_PPChar(names)"));
        let call = source.find("C.fill_names(cnames)").unwrap();
        let read_back = source.find("packSString_PPChar(names, cnames)").unwrap();
        let keep_alive = source.find("runtime.KeepAlive(cnamesAllocMap)").unwrap();
        assert!(call < read_back && read_back < keep_alive);
    }

    #[test]
    fn test_plain_slices_are_not_copied() {
        let spec = FunctionSpec {
            name: "sum".to_string(),
            params: vec![
                param("values", CType::builtin(CBaseKind::Double).pointer(1).constant()),
                param("n", CType::builtin(CBaseKind::ULong)),
            ],
            ret: Some(CType::builtin(CBaseKind::Double)),
        };
        let block = generate(GeneratorConfig::default(), spec).unwrap();
        assert!(block
            .source
            .contains("cvalues := (*C.double)((*sliceHeader)(unsafe.Pointer(&values)).Data)"));
        assert!(!block.source.contains("unpack"));
    }

    #[test]
    fn test_missing_length_parameter() {
        let spec = FunctionSpec {
            name: "read".to_string(),
            params: Vec::new(),
            ret: Some(CType::builtin(CBaseKind::Int)),
        };
        let config = GeneratorConfig::from_toml_str("[hints.functions.read]\nlength = \"size\"\n").unwrap();
        let err = generate(config, spec).unwrap_err();
        assert!(matches!(err, GenError::UnsupportedShape { .. }));
    }
}
