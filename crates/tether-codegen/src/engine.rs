//! Helper synthesis.
//!
//! Each worker task owns one [`HelperEngine`]. The engine memoises helpers
//! by name; names are claimed at the aggregation point before a body is
//! built, so a helper another worker already produced is reused, not
//! rebuilt.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tether_shape::{HostShape, NativeShape};

use crate::aggregate::HelperSink;
use crate::context::GenContext;
use crate::emit::{CodeWriter, EmissionStack};
use crate::error::{GenError, GenResult};
use crate::helper::Helper;
use crate::names::{alloc_name, conversion_name, size_of_name, Direction};
use crate::plan::{BaseStep, ConversionPlan, Level};
use crate::prelude;

pub struct HelperEngine<'c> {
    ctx: &'c GenContext,
    sink: HelperSink,
    memo: FxHashMap<String, Arc<Helper>>,
}

impl<'c> HelperEngine<'c> {
    pub fn new(ctx: &'c GenContext, sink: HelperSink) -> Self {
        HelperEngine {
            ctx,
            sink,
            memo: FxHashMap::default(),
        }
    }

    pub fn context(&self) -> &'c GenContext {
        self.ctx
    }

    /// Hands `helper` to the aggregation point unless some engine already did.
    pub fn provide(&mut self, helper: Arc<Helper>) -> GenResult<Arc<Helper>> {
        if let Some(known) = self.memo.get(&helper.name) {
            if !known.same_body(&helper) {
                return Err(GenError::HelperCollision {
                    name: helper.name.clone(),
                });
            }
            return Ok(known.clone());
        }
        let kept = self.sink.offer(helper)?;
        self.memo.insert(kept.name.clone(), kept.clone());
        Ok(kept)
    }

    fn memoised(&mut self, name: &str) -> Option<Arc<Helper>> {
        if let Some(known) = self.memo.get(name) {
            return Some(known.clone());
        }
        let known = self.sink.lookup(name)?;
        self.memo.insert(name.to_string(), known.clone());
        Some(known)
    }

    pub fn size_of(&mut self, element: &NativeShape) -> GenResult<Arc<Helper>> {
        let name = size_of_name(element);
        if let Some(known) = self.memoised(&name) {
            return Ok(known);
        }
        let helper = Helper::go(
            name.clone(),
            format!("const {} = unsafe.Sizeof([1]{}{{}})\n", name, element),
        )
        .describe(format!("{} is the size of {} on the target.", name, element))
        .import("unsafe");
        self.provide(Arc::new(helper))
    }

    pub fn alloc(&mut self, element: &NativeShape) -> GenResult<Arc<Helper>> {
        let name = alloc_name(element);
        if let Some(known) = self.memoised(&name) {
            return Ok(known);
        }
        let size_of = self.size_of(element)?;
        let failed = self.provide(prelude::alloc_failed())?;
        let source = format!(
            r#"func {name}(n int) unsafe.Pointer {{
	if n == 0 {{
		n = 1
	}}
	mem := C.calloc(C.size_t(n), (C.size_t)({size}))
	if mem == nil {{
		cgoAllocFailed(n * int({size}))
	}}
	return mem
}}
"#,
            name = name,
            size = size_of.name
        );
        let helper = Helper::go(name.clone(), source)
            .describe(format!(
                "{} allocates memory for type {} in C.\nThe caller is responsible for freeing the this memory via C.free.",
                name, element
            ))
            .require(size_of)
            .require(failed)
            .import("unsafe");
        self.provide(Arc::new(helper))
    }

    pub fn unpack_string(&mut self) -> GenResult<Arc<Helper>> {
        self.provide(prelude::unpack_string(self.ctx.safe_strings()))
    }

    pub fn pack_string(&mut self) -> GenResult<Arc<Helper>> {
        self.provide(prelude::pack_string(self.ctx.safe_strings()))
    }

    /// Returns the helper converting between a leveled host shape and its
    /// native shape, synthesising it on first use.
    pub fn get_conversion(
        &mut self,
        host: &HostShape,
        native: &NativeShape,
        direction: Direction,
        is_arg: bool,
    ) -> GenResult<Arc<Helper>> {
        let name = conversion_name(direction, is_arg, host, native);
        if let Some(known) = self.memoised(&name) {
            return Ok(known);
        }
        let plan = ConversionPlan::new(host, native)?;
        if !plan.is_leveled() {
            return Err(GenError::unsupported(format!(
                "{} has no container levels to convert",
                host
            )));
        }
        let helper = match direction {
            Direction::Unpack => self.build_unpack(&name, &plan, is_arg)?,
            Direction::Pack => self.build_pack(&name, &plan)?,
        };
        log::trace!("synthesised {}", name);
        self.provide(Arc::new(helper))
    }

    fn build_unpack(&mut self, name: &str, plan: &ConversionPlan, is_arg: bool) -> GenResult<Helper> {
        let (host_ty, result_ty) = if is_arg {
            (plan.host.arg_type(), plan.native.arg_type())
        } else {
            (plan.host.to_string(), plan.native.to_string())
        };
        let mut helper = Helper::go(name, String::new())
            .describe(format!(
                "{} transforms a sliced Go data structure into plain C format.",
                name
            ))
            .require(prelude::alloc_map())
            .import("runtime")
            .import("unsafe");
        // A nil slice, or a nil pointer to a fixed array, unpacks to nil.
        if is_arg || plan.levels[0] == Level::View {
            helper = helper.nillable();
        }

        let mut w = CodeWriter::new();
        let mut stack = EmissionStack::new();
        w.open(format!(
            "func {}(x {}) (unpacked {}, allocs *cgoAllocMap) {{",
            name, host_ty, result_ty
        ));
        stack.push(0, "}");
        if helper.nillable {
            w.open("if x == nil {");
            w.line("return");
            w.close("}");
        }
        w.line("allocs = new(cgoAllocMap)");
        w.open("defer runtime.SetFinalizer(allocs, func(a *cgoAllocMap) {");
        w.line("go a.Free()");
        w.close("})");
        w.blank();
        let result = stack.reserve(1);

        let mut host_expr = "x".to_string();
        for (k, level) in plan.levels.iter().enumerate() {
            let element = plan.native_at(k + 1);
            match level {
                Level::Array(dim) if k == 0 => {
                    let alloc = self.alloc(&element)?;
                    helper = helper.require(alloc.clone());
                    w.line(format!("mem0 := {}({})", alloc.name, dim.extent()));
                    w.line("allocs.Add(mem0)");
                    w.line(format!("v0 := (*[{}]{})(mem0)", dim.extent(), element));
                    let materialize = if is_arg {
                        format!("unpacked = ({})(mem0)", result_ty)
                    } else {
                        format!("unpacked = *(*{})(mem0)", result_ty)
                    };
                    stack.rewrite(result, [materialize, "return".to_string()]);
                }
                Level::Array(_) => {
                    w.line(format!("v{k} := &v{p}[i{p}]", k = k, p = k - 1));
                }
                Level::View => {
                    let alloc = self.alloc(&element)?;
                    helper = helper
                        .require(alloc.clone())
                        .require(self.provide(prelude::slice_header())?);
                    if k > 0 {
                        w.open(format!("if {} != nil {{", host_expr));
                        stack.push(w.indent() - 1, "}");
                    }
                    w.line(format!("len{k} := len({x})", k = k, x = host_expr));
                    w.line(format!("mem{k} := {alloc}(len{k})", k = k, alloc = alloc.name));
                    w.line(format!("allocs.Add(mem{})", k));
                    w.open(format!("h{} := &sliceHeader{{", k));
                    w.line(format!("Data: mem{},", k));
                    w.line(format!("Cap:  {},", self.ctx.max_mem()));
                    w.line(format!("Len:  len{},", k));
                    w.close("}");
                    w.line(format!("v{k} := *(*[]{ty})(unsafe.Pointer(h{k}))", k = k, ty = element));
                    if k == 0 {
                        stack.rewrite(
                            result,
                            [format!("unpacked = ({})(mem0)", result_ty), "return".to_string()],
                        );
                    } else {
                        w.line(format!(
                            "v{p}[i{p}] = ({ty})(mem{k})",
                            p = k - 1,
                            ty = plan.native_at(k),
                            k = k
                        ));
                    }
                }
            }
            w.open(format!("for i{k} := range {x} {{", k = k, x = host_expr));
            stack.push(w.indent() - 1, "}");
            host_expr = format!("{}[i{}]", host_expr, k);
        }

        let last = plan.depth() - 1;
        let dst = format!("v{l}[i{l}]", l = last);
        let element = plan.native_element();
        match plan.base {
            BaseStep::Plain => {
                w.line(format!("{} = *(*{})(unsafe.Pointer(&{}))", dst, element, host_expr));
            }
            BaseStep::PlainPointer => {
                w.line(format!("{} = ({})(unsafe.Pointer({}))", dst, element, host_expr));
            }
            BaseStep::StringBorrow | BaseStep::StringCopy => {
                helper = helper.require(self.provide(prelude::unpack_string_copy())?);
                w.line(format!("ps, psAllocs := unpackMemoryPCharString({})", host_expr));
                w.line(format!("{} = ({})(unsafe.Pointer(ps))", dst, element));
                w.line("allocs.Borrow(psAllocs)");
            }
            BaseStep::StructValue => {
                w.line(format!("cv, cvAllocs := {}.PassValue()", host_expr));
                w.line(format!("{} = cv", dst));
                w.line("allocs.Borrow(cvAllocs)");
            }
            BaseStep::StructRef { .. } => {
                w.line(format!("cv, _ := {}.PassRef()", host_expr));
                w.line(format!("{} = cv", dst));
                w.open("if cv != nil && !allocs.Has(unsafe.Pointer(cv)) && cgoRefs.Retain(unsafe.Pointer(cv)) {");
                w.line("allocs.Add(unsafe.Pointer(cv))");
                w.close("}");
            }
            BaseStep::Callback => {
                return Err(GenError::unsupported("callbacks cannot be stored in a container"));
            }
        }
        stack.flush_into(&mut w);
        helper.source = w.finish();
        Ok(helper)
    }

    fn build_pack(&mut self, name: &str, plan: &ConversionPlan) -> GenResult<Helper> {
        let host_ty = plan.host.arg_type();
        let native_ty = if plan.native.outer.is_empty() {
            plan.native.to_string()
        } else {
            format!("*{}", plan.native)
        };
        let mut helper = Helper::go(name, String::new())
            .describe(format!(
                "{} reads sliced Go data structure out from plain C format.",
                name
            ))
            .import("unsafe");

        let mut w = CodeWriter::new();
        let mut stack = EmissionStack::new();
        w.open(format!("func {}(v {}, ptr0 {}) {{", name, host_ty, native_ty));
        stack.push(0, "}");
        if plan.levels.contains(&Level::View) {
            w.line(format!("const m = {}", self.ctx.max_mem()));
        }
        w.open("if ptr0 == nil {");
        w.line("return");
        w.close("}");

        let mut host_expr = "v".to_string();
        let mut native_expr = String::new();
        for (k, level) in plan.levels.iter().enumerate() {
            if k > 0 {
                let step = match level {
                    Level::Array(_) => format!("ptr{} := &{}", k, native_expr),
                    Level::View => format!("ptr{} := {}", k, native_expr),
                };
                w.line(step);
                if *level == Level::View {
                    w.open(format!("if ptr{} == nil {{", k));
                    w.line("continue");
                    w.close("}");
                }
            }
            w.open(format!("for i{k} := range {x} {{", k = k, x = host_expr));
            stack.push(w.indent() - 1, "}");
            let element = plan.native_at(k + 1);
            native_expr = match level {
                Level::Array(_) => format!("ptr{k}[i{k}]", k = k),
                Level::View => {
                    let size_of = self.size_of(&element)?;
                    helper = helper.require(size_of.clone());
                    format!(
                        "(*(*[m / {size}]{ty})(unsafe.Pointer(ptr{k})))[i{k}]",
                        size = size_of.name,
                        ty = element,
                        k = k
                    )
                }
            };
            host_expr = format!("{}[i{}]", host_expr, k);
        }

        let host_element = plan.host_element();
        match plan.base {
            BaseStep::Plain => {
                w.line(format!(
                    "{} = *(*{})(unsafe.Pointer(&{}))",
                    host_expr, host_element, native_expr
                ));
            }
            BaseStep::PlainPointer => {
                w.line(format!(
                    "{} = ({})(unsafe.Pointer({}))",
                    host_expr, host_element, native_expr
                ));
            }
            BaseStep::StringBorrow | BaseStep::StringCopy => {
                let pack = self.pack_string()?;
                helper = helper.require(pack.clone());
                w.line(format!(
                    "{} = {}((*C.char)(unsafe.Pointer({})))",
                    host_expr, pack.name, native_expr
                ));
            }
            BaseStep::StructValue => {
                w.line(format!(
                    "{} = *New{}Ref(unsafe.Pointer(&{})).Convert()",
                    host_expr, host_element.base_name, native_expr
                ));
            }
            BaseStep::StructRef { host_value: false } => {
                w.line(format!(
                    "{} = New{}Ref(unsafe.Pointer({})).Convert()",
                    host_expr, host_element.base_name, native_expr
                ));
            }
            BaseStep::StructRef { host_value: true } => {
                w.open(format!(
                    "if ref := New{}Ref(unsafe.Pointer({})); ref != nil {{",
                    host_element.base_name, native_expr
                ));
                w.line(format!("{} = *ref.Convert()", host_expr));
                w.close("}");
            }
            BaseStep::Callback => {
                return Err(GenError::unsupported("callbacks cannot be stored in a container"));
            }
        }
        stack.flush_into(&mut w);
        helper.source = w.finish();
        Ok(helper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::HelperAggregator;
    use crate::config::GeneratorConfig;
    use tether_shape::{CBaseKind, Dim, NativeBase};

    fn context() -> GenContext {
        GenContext::new(GeneratorConfig::default(), &[]).unwrap()
    }

    fn c_char(pointers: u8) -> NativeShape {
        let mut shape = NativeShape::new(NativeBase::Builtin {
            kind: CBaseKind::Char,
            cgo: "C.char".to_string(),
        });
        shape.pointers = pointers;
        shape
    }

    fn strings() -> HostShape {
        let mut host = HostShape::plain("string");
        host.views = 1;
        host
    }

    #[test]
    fn test_string_view_unpack_body() {
        let ctx = context();
        let aggregator = HelperAggregator::spawn(16).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let helper = engine
            .get_conversion(&strings(), &c_char(2), Direction::Unpack, true)
            .unwrap();
        assert_eq!(helper.name, "unpackArgSString_PPChar");
        let expected = "\
func unpackArgSString_PPChar(x []string) (unpacked **C.char, allocs *cgoAllocMap) {
	if x == nil {
		return
	}
	allocs = new(cgoAllocMap)
	defer runtime.SetFinalizer(allocs, func(a *cgoAllocMap) {
		go a.Free()
	})

	len0 := len(x)
	mem0 := allocPCharMemory(len0)
	allocs.Add(mem0)
	h0 := &sliceHeader{
		Data: mem0,
		Cap:  0x7fffffff,
		Len:  len0,
	}
	v0 := *(*[]*C.char)(unsafe.Pointer(h0))
	for i0 := range x {
		ps, psAllocs := unpackMemoryPCharString(x[i0])
		v0[i0] = (*C.char)(unsafe.Pointer(ps))
		allocs.Borrow(psAllocs)
	}
	unpacked = (**C.char)(mem0)
	return
}
";
        assert_eq!(helper.source, expected);
        assert!(helper.nillable);
        drop(engine);
        aggregator.finish().unwrap();
    }

    #[test]
    fn test_nested_arrays_are_written_in_place() {
        let ctx = context();
        let aggregator = HelperAggregator::spawn(16).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let mut host = HostShape::plain("int32");
        host.outer = vec![Dim::Fixed(2), Dim::Fixed(2)];
        let mut native = NativeShape::new(NativeBase::Builtin {
            kind: CBaseKind::Int,
            cgo: "C.int".to_string(),
        });
        native.outer = host.outer.clone();
        let helper = engine
            .get_conversion(&host, &native, Direction::Unpack, false)
            .unwrap();
        assert_eq!(helper.source.matches(":= alloc").count(), 1);
        assert!(helper.source.contains("v1 := &v0[i0]"));
        assert!(helper.source.contains("unpacked = *(*[2][2]C.int)(mem0)"));
        assert!(!helper.nillable);
        assert!(!helper.source.contains("if x == nil"));
        drop(engine);
        aggregator.finish().unwrap();
    }

    #[test]
    fn test_pack_reads_views_through_element_size() {
        let ctx = context();
        let aggregator = HelperAggregator::spawn(16).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let helper = engine
            .get_conversion(&strings(), &c_char(2), Direction::Pack, false)
            .unwrap();
        assert_eq!(helper.name, "packSString_PPChar");
        assert!(helper
            .source
            .contains("v[i0] = packPCharString((*C.char)(unsafe.Pointer((*(*[m / sizeOfPCharValue]*C.char)(unsafe.Pointer(ptr0)))[i0])))"));
        assert!(!helper.source.contains("alloc"));
        drop(engine);
        aggregator.finish().unwrap();
    }

    #[test]
    fn test_helper_is_submitted_once() {
        let ctx = context();
        let aggregator = HelperAggregator::spawn(16).unwrap();
        let mut engine = HelperEngine::new(&ctx, aggregator.sink());
        let first = engine
            .get_conversion(&strings(), &c_char(2), Direction::Unpack, false)
            .unwrap();
        let second = engine
            .get_conversion(&strings(), &c_char(2), Direction::Unpack, false)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        drop(engine);
        let registry = aggregator.finish().unwrap();
        assert_eq!(registry.submissions("unpackSString_PPChar"), 1);
        assert_eq!(registry.submissions("allocPCharMemory"), 1);
        assert!(registry.get("cgoRefRegistry").is_some());
    }
}
