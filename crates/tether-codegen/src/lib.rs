//! Go/cgo binding generation.
//!
//! [`generate`] takes a declaration set and a [`GeneratorConfig`] and produces
//! a [`GeneratedUnit`]: one Go block per declaration plus the shared helper
//! files. Conversions are described by [`ConversionPlan`]s, turned into
//! helper functions by the [`HelperEngine`] and deduplicated by a single
//! [`HelperAggregator`] thread fed by all binding workers.
//!
//! The [`exec`] module runs the same plans against native memory so their
//! behaviour can be checked without a Go toolchain.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod emit;
pub mod engine;
mod error;
pub mod exec;
pub mod function;
mod generator;
pub mod helper;
pub mod names;
pub mod plan;
pub mod prelude;
pub mod structs;
pub mod types;
mod unit;

pub use aggregate::{HelperAggregator, HelperRegistry, HelperSink, HelperUnits};
pub use config::{DeclHints, GeneratorConfig, HintConfig, Options};
pub use context::GenContext;
pub use engine::HelperEngine;
pub use error::{GenError, GenResult};
pub use generator::generate;
pub use helper::{Helper, HelperSide};
pub use plan::{BaseStep, ConversionPlan, Level};
pub use unit::{GeneratedBlock, GeneratedUnit, OutputFile};
