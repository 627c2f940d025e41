//! Shape model for the tether binding generator.
//!
//! Native declarations come in as [`CType`]s; the [`ShapeTranslator`] turns
//! each one into a [`HostShape`] (its Go representation) and a
//! [`NativeShape`] (its cgo layout). Conversion planning and code emission
//! live in `tether-codegen`.

pub mod decl;
mod error;
pub mod hints;
pub mod naming;
pub mod shape;
pub mod translate;

pub use decl::{
    CBase, CBaseKind, CType, CTypeKind, DeclKind, Declaration, Dim, EnumSpec, EnumValue, Field,
    FunctionSpec, Param, Position, RecordSpec,
};
pub use error::{ShapeError, ShapeResult};
pub use hints::{MemoryHint, PointerHint};
pub use naming::{is_go_keyword, GoNames, NameTransformer};
pub use shape::{BaseKind, HostShape, NativeBase, NativeShape};
pub use translate::{cgo_builtin_name, native_shape, HostBaseNames, ShapeTranslator};
