//! Reference executor for conversion plans.
//!
//! Runs the same level-by-level walk the generated helpers perform, against
//! real native memory from a [`NativeHeap`]. Fixed arrays are written in
//! place, every view and every string gets its own allocation, and packing
//! only reads.

use std::sync::Arc;

use miette::Diagnostic;
use tether_layout::LayoutError;
use tether_rt::{AllocationSet, NativeAddr, NativeHeap};
use tether_shape::{CBaseKind, NativeBase, NativeShape, Position};
use thiserror::Error;

use crate::context::GenContext;
use crate::error::GenError;
use crate::plan::{BaseStep, ConversionPlan, Level};
use crate::structs::StructBinding;

#[derive(Error, Debug, Diagnostic)]
pub enum ExecError {
    #[error("Expected {expected}, found {found}")]
    #[diagnostic(code("EXEC-VALUE-001"))]
    Mismatch { expected: &'static str, found: String },

    #[error("Array of {expected} elements given {found}")]
    #[diagnostic(code("EXEC-VALUE-002"))]
    Length { expected: u64, found: usize },

    #[error("String at {addr} is not valid UTF-8")]
    #[diagnostic(code("EXEC-VALUE-003"))]
    InvalidUtf8 {
        addr: NativeAddr,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("The executor cannot run {0}")]
    #[diagnostic(code("EXEC-PLAN-001"))]
    Unsupported(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gen(#[from] GenError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Layout(#[from] LayoutError),
}

pub type ExecResult<T> = Result<T, ExecError>;

/// A host-side value, loosely typed.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<HostValue>),
    /// Struct fields by C member name.
    Record(Vec<(String, HostValue)>),
    Null,
}

impl HostValue {
    fn describe(&self) -> String {
        match self {
            HostValue::Int(v) => format!("int {}", v),
            HostValue::UInt(v) => format!("uint {}", v),
            HostValue::Float(v) => format!("float {}", v),
            HostValue::Bool(v) => format!("bool {}", v),
            HostValue::Str(s) => format!("string {:?}", s),
            HostValue::List(items) => format!("list of {}", items.len()),
            HostValue::Record(fields) => format!("record of {} fields", fields.len()),
            HostValue::Null => "null".to_string(),
        }
    }

    fn field(&self, name: &str) -> &HostValue {
        match self {
            HostValue::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value)
                .unwrap_or(&HostValue::Null),
            _ => &HostValue::Null,
        }
    }

    fn item(&self, i: usize) -> &HostValue {
        match self {
            HostValue::List(items) => items.get(i).unwrap_or(&HostValue::Null),
            _ => &HostValue::Null,
        }
    }

    fn len(&self) -> usize {
        match self {
            HostValue::List(items) => items.len(),
            _ => 0,
        }
    }
}

/// Result of an unpack: the root buffer and everything allocated for it.
#[derive(Debug)]
pub struct Unpacked {
    pub addr: NativeAddr,
    pub allocs: AllocationSet,
}

pub struct Executor<'c> {
    ctx: &'c GenContext,
    heap: Arc<NativeHeap>,
}

impl<'c> Executor<'c> {
    pub fn new(ctx: &'c GenContext, heap: Arc<NativeHeap>) -> ExecResult<Self> {
        let pointer = ctx.layouts.model().pointer_size();
        if pointer as usize != std::mem::size_of::<usize>() {
            return Err(ExecError::Unsupported(format!(
                "{}-byte pointers on this machine",
                pointer
            )));
        }
        Ok(Executor { ctx, heap })
    }

    /// Host to native. The root level gets one buffer; nested fixed arrays
    /// live inside their parent.
    pub fn unpack(&self, plan: &ConversionPlan, value: &HostValue) -> ExecResult<Unpacked> {
        let allocs = AllocationSet::new(self.heap.clone());
        let addr = match plan.levels.first() {
            None => {
                let size = self.size(&plan.native)?;
                let addr = self.alloc(&allocs, 1, size);
                self.write(plan, 0, addr, value, &allocs)?;
                addr
            }
            Some(level) => self.write_elements(plan, 0, level, value, &allocs)?,
        };
        Ok(Unpacked { addr, allocs })
    }

    /// Native to host. Views are read up to the lengths found in `template`,
    /// the way generated pack helpers fill a pre-sized host value.
    pub fn pack(&self, plan: &ConversionPlan, addr: NativeAddr, template: &HostValue) -> ExecResult<HostValue> {
        if plan.levels.is_empty() {
            return self.read(plan, 0, addr, template);
        }
        let count = self.extent(&plan.levels[0], template);
        self.read_elements(plan, 0, addr, count, template)
    }

    fn alloc(&self, allocs: &AllocationSet, count: usize, size: usize) -> NativeAddr {
        let addr = self.heap.calloc(count, size);
        allocs.add(addr);
        addr
    }

    fn size(&self, shape: &NativeShape) -> ExecResult<usize> {
        Ok(self.ctx.layouts.size_of(shape)? as usize)
    }

    fn stride(&self, plan: &ConversionPlan, level: usize) -> ExecResult<usize> {
        Ok(self.ctx.layouts.element_size(&plan.native, level + 1)? as usize)
    }

    fn extent(&self, level: &Level, template: &HostValue) -> usize {
        match level {
            Level::Array(dim) => dim.extent() as usize,
            Level::View => template.len(),
        }
    }

    /// Allocates the buffer for the elements of `level` and fills it.
    fn write_elements(
        &self,
        plan: &ConversionPlan,
        level: usize,
        kind: &Level,
        value: &HostValue,
        allocs: &AllocationSet,
    ) -> ExecResult<NativeAddr> {
        let items = as_list(value)?;
        if let Level::Array(dim) = kind {
            if items.len() as u64 != dim.extent() {
                return Err(ExecError::Length {
                    expected: dim.extent(),
                    found: items.len(),
                });
            }
        }
        let stride = self.stride(plan, level)?;
        let buf = self.alloc(allocs, items.len(), stride);
        for (i, item) in items.iter().enumerate() {
            self.write(plan, level + 1, buf.offset(i * stride), item, allocs)?;
        }
        Ok(buf)
    }

    fn write(
        &self,
        plan: &ConversionPlan,
        level: usize,
        slot: NativeAddr,
        value: &HostValue,
        allocs: &AllocationSet,
    ) -> ExecResult<()> {
        match plan.levels.get(level) {
            None => self.write_base(plan, slot, value, allocs),
            Some(Level::Array(dim)) => {
                let items = as_list(value)?;
                if items.len() as u64 != dim.extent() {
                    return Err(ExecError::Length {
                        expected: dim.extent(),
                        found: items.len(),
                    });
                }
                let stride = self.stride(plan, level)?;
                for (i, item) in items.iter().enumerate() {
                    self.write(plan, level + 1, slot.offset(i * stride), item, allocs)?;
                }
                Ok(())
            }
            Some(Level::View) => {
                let addr = match value {
                    HostValue::Null => NativeAddr::NULL,
                    _ => self.write_elements(plan, level, &Level::View, value, allocs)?,
                };
                store_addr(slot, addr);
                Ok(())
            }
        }
    }

    fn write_base(
        &self,
        plan: &ConversionPlan,
        slot: NativeAddr,
        value: &HostValue,
        allocs: &AllocationSet,
    ) -> ExecResult<()> {
        let element = plan.native_element();
        match plan.base {
            BaseStep::Plain => self.write_scalar(&element, slot, value),
            BaseStep::StringBorrow | BaseStep::StringCopy => {
                let s = match value {
                    HostValue::Str(s) => s,
                    other => return Err(mismatch("string", other)),
                };
                let buf = self.alloc(allocs, s.len() + 1, 1);
                unsafe { std::ptr::copy_nonoverlapping(s.as_ptr(), buf.as_ptr(), s.len()) };
                store_addr(slot, buf);
                Ok(())
            }
            BaseStep::StructValue => self.write_record(&element, slot, value, allocs),
            BaseStep::StructRef { .. } => {
                if *value == HostValue::Null {
                    store_addr(slot, NativeAddr::NULL);
                    return Ok(());
                }
                let mut record = element.clone();
                record.pointers = 0;
                let buf = self.alloc(allocs, 1, self.size(&record)?);
                self.write_record(&record, buf, value, allocs)?;
                store_addr(slot, buf);
                Ok(())
            }
            BaseStep::PlainPointer | BaseStep::Callback => {
                Err(ExecError::Unsupported(format!("{}", plan.host)))
            }
        }
    }

    fn binding(&self, record: &NativeShape) -> ExecResult<StructBinding> {
        let NativeBase::Record { tag, union } = &record.base else {
            return Err(ExecError::Unsupported(record.to_string()));
        };
        let spec = self
            .ctx
            .decls
            .record(tag, *union)
            .ok_or_else(|| GenError::UnknownType(record.to_string()))?;
        Ok(StructBinding::new(self.ctx, spec, *union, &Position::default())?)
    }

    fn write_record(
        &self,
        record: &NativeShape,
        slot: NativeAddr,
        value: &HostValue,
        allocs: &AllocationSet,
    ) -> ExecResult<()> {
        if !matches!(value, HostValue::Record(_)) {
            return Err(mismatch("record", value));
        }
        let binding = self.binding(record)?;
        for field in &binding.fields {
            let field_value = value.field(&field.c_name);
            if *field_value == HostValue::Null && field.plan.levels.first() != Some(&Level::View) {
                continue;
            }
            self.write(&field.plan, 0, slot.offset(field.offset as usize), field_value, allocs)?;
        }
        Ok(())
    }

    fn write_scalar(&self, element: &NativeShape, slot: NativeAddr, value: &HostValue) -> ExecResult<()> {
        let size = self.size(element)?;
        if scalar_kind(element) == ScalarKind::Float {
            let v = match value {
                HostValue::Float(v) => *v,
                HostValue::Int(v) => *v as f64,
                other => return Err(mismatch("float", other)),
            };
            return unsafe {
                match size {
                    4 => (slot.as_ptr() as *mut f32).write_unaligned(v as f32),
                    8 => (slot.as_ptr() as *mut f64).write_unaligned(v),
                    _ => return Err(ExecError::Unsupported(element.to_string())),
                }
                Ok(())
            };
        }
        let raw = match value {
            HostValue::Int(v) => *v as u64,
            HostValue::UInt(v) => *v,
            HostValue::Bool(v) => *v as u64,
            other => return Err(mismatch("integer", other)),
        };
        unsafe {
            match size {
                1 => slot.as_ptr().write(raw as u8),
                2 => (slot.as_ptr() as *mut u16).write_unaligned(raw as u16),
                4 => (slot.as_ptr() as *mut u32).write_unaligned(raw as u32),
                8 => (slot.as_ptr() as *mut u64).write_unaligned(raw),
                _ => return Err(ExecError::Unsupported(element.to_string())),
            }
        }
        Ok(())
    }

    fn read_elements(
        &self,
        plan: &ConversionPlan,
        level: usize,
        buf: NativeAddr,
        count: usize,
        template: &HostValue,
    ) -> ExecResult<HostValue> {
        let stride = self.stride(plan, level)?;
        let items = (0..count)
            .map(|i| self.read(plan, level + 1, buf.offset(i * stride), template.item(i)))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(HostValue::List(items))
    }

    fn read(&self, plan: &ConversionPlan, level: usize, slot: NativeAddr, template: &HostValue) -> ExecResult<HostValue> {
        match plan.levels.get(level) {
            None => self.read_base(plan, slot, template),
            Some(Level::Array(dim)) => self.read_elements(plan, level, slot, dim.extent() as usize, template),
            Some(Level::View) => {
                let buf = load_addr(slot);
                if buf.is_null() {
                    return Ok(template.clone());
                }
                self.read_elements(plan, level, buf, template.len(), template)
            }
        }
    }

    fn read_base(&self, plan: &ConversionPlan, slot: NativeAddr, template: &HostValue) -> ExecResult<HostValue> {
        let element = plan.native_element();
        match plan.base {
            BaseStep::Plain => self.read_scalar(&element, slot),
            BaseStep::StringBorrow | BaseStep::StringCopy => {
                let p = load_addr(slot);
                if p.is_null() {
                    return Ok(HostValue::Str(String::new()));
                }
                let s = unsafe { std::ffi::CStr::from_ptr(p.as_ptr() as *const std::ffi::c_char) };
                let s = s.to_str().map_err(|source| ExecError::InvalidUtf8 { addr: p, source })?;
                Ok(HostValue::Str(s.to_string()))
            }
            BaseStep::StructValue => self.read_record(&element, slot, template),
            BaseStep::StructRef { .. } => {
                let p = load_addr(slot);
                if p.is_null() {
                    return Ok(HostValue::Null);
                }
                let mut record = element.clone();
                record.pointers = 0;
                self.read_record(&record, p, template)
            }
            BaseStep::PlainPointer | BaseStep::Callback => {
                Err(ExecError::Unsupported(format!("{}", plan.host)))
            }
        }
    }

    fn read_record(&self, record: &NativeShape, slot: NativeAddr, template: &HostValue) -> ExecResult<HostValue> {
        let binding = self.binding(record)?;
        let mut fields = Vec::with_capacity(binding.fields.len());
        for field in &binding.fields {
            let at = slot.offset(field.offset as usize);
            let value = self.read(&field.plan, 0, at, template.field(&field.c_name))?;
            fields.push((field.c_name.clone(), value));
        }
        Ok(HostValue::Record(fields))
    }

    fn read_scalar(&self, element: &NativeShape, slot: NativeAddr) -> ExecResult<HostValue> {
        let size = self.size(element)?;
        let p = slot.as_ptr();
        let value = unsafe {
            match (scalar_kind(element), size) {
                (ScalarKind::Float, 4) => HostValue::Float((p as *const f32).read_unaligned() as f64),
                (ScalarKind::Float, 8) => HostValue::Float((p as *const f64).read_unaligned()),
                (ScalarKind::Bool, 1) => HostValue::Bool(p.read() != 0),
                (ScalarKind::Signed, 1) => HostValue::Int(p.read() as i8 as i64),
                (ScalarKind::Signed, 2) => HostValue::Int((p as *const i16).read_unaligned() as i64),
                (ScalarKind::Signed, 4) => HostValue::Int((p as *const i32).read_unaligned() as i64),
                (ScalarKind::Signed, 8) => HostValue::Int((p as *const i64).read_unaligned()),
                (ScalarKind::Unsigned, 1) => HostValue::UInt(p.read() as u64),
                (ScalarKind::Unsigned, 2) => HostValue::UInt((p as *const u16).read_unaligned() as u64),
                (ScalarKind::Unsigned, 4) => HostValue::UInt((p as *const u32).read_unaligned() as u64),
                (ScalarKind::Unsigned, 8) => HostValue::UInt((p as *const u64).read_unaligned()),
                _ => return Err(ExecError::Unsupported(element.to_string())),
            }
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Signed,
    Unsigned,
    Float,
    Bool,
}

fn scalar_kind(element: &NativeShape) -> ScalarKind {
    match &element.base {
        NativeBase::Builtin { kind, .. } if kind.is_float() => ScalarKind::Float,
        NativeBase::Builtin { kind: CBaseKind::Bool, .. } => ScalarKind::Bool,
        NativeBase::Builtin { kind, .. } if kind.is_unsigned() => ScalarKind::Unsigned,
        NativeBase::Builtin { .. } | NativeBase::Enum(_) => ScalarKind::Signed,
        // void* and anything else pointer-sized is an address.
        _ => ScalarKind::Unsigned,
    }
}

fn as_list(value: &HostValue) -> ExecResult<&[HostValue]> {
    match value {
        HostValue::List(items) => Ok(items),
        other => Err(mismatch("list", other)),
    }
}

fn mismatch(expected: &'static str, found: &HostValue) -> ExecError {
    ExecError::Mismatch {
        expected,
        found: found.describe(),
    }
}

fn store_addr(slot: NativeAddr, addr: NativeAddr) {
    unsafe { (slot.as_ptr() as *mut usize).write_unaligned(addr.value()) }
}

fn load_addr(slot: NativeAddr) -> NativeAddr {
    let value = unsafe { (slot.as_ptr() as *const usize).read_unaligned() };
    NativeAddr::from_ptr(value as *mut u8)
}
