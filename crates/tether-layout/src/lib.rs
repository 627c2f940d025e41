//! Architecture layout provider.
//!
//! Supplies builtin sizes, alignments and Go spellings per target
//! architecture ([`DataModel`]) and C record layouts computed from them
//! ([`LayoutTable`]). For the build host the numbers come from `repc`.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

mod model;
mod record;

pub use model::{DataModel, ModelItem};
pub use record::{FieldLayout, LayoutTable, RecordKey, RecordLayout};

/// Errors that can occur during layout computation.
#[derive(Debug, Error, Diagnostic)]
pub enum LayoutError {
    #[error("Type recursion detected for {0}")]
    #[diagnostic(code("LAYOUT-001"), help("A record cannot contain itself by value; use a pointer"))]
    TypeRecursion(String),

    #[error("Layout computation failed: {0}")]
    #[diagnostic(code("LAYOUT-002"))]
    RepcError(#[from] repc::Error),

    #[error("Unknown record {0}")]
    #[diagnostic(code("LAYOUT-003"), help("Declare the struct or union before using it by value"))]
    UnknownRecord(String),

    #[error("Unknown target architecture `{0}`")]
    #[diagnostic(
        code("LAYOUT-004"),
        help("Use one of i386, x86_48, x86_64, arm, aarch64, host, or a GOARCH name")
    )]
    UnknownArch(String),

    #[error("repc has no description of the build host")]
    #[diagnostic(code("LAYOUT-005"), help("Pick an explicit architecture instead of `host`"))]
    NoHostTarget,

    #[error("Size of {0} does not fit in 64 bits")]
    #[diagnostic(code("LAYOUT-007"), help("Check the array dimensions declared for this type"))]
    Overflow(String),

    #[error("Other layout error: {0}")]
    #[diagnostic(code("LAYOUT-006"))]
    Other(String),
}

/// Result type for layout operations.
pub type LayoutResult<T> = Result<T, LayoutError>;

/// Target architecture identifiers understood by the data models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TargetArch {
    I386,
    X86_48,
    #[default]
    X86_64,
    Arm,
    Aarch64,
    /// Whatever `repc` reports for the machine running the generator.
    Host,
}

impl TargetArch {
    pub fn name(self) -> &'static str {
        match self {
            TargetArch::I386 => "i386",
            TargetArch::X86_48 => "x86_48",
            TargetArch::X86_64 => "x86_64",
            TargetArch::Arm => "arm",
            TargetArch::Aarch64 => "aarch64",
            TargetArch::Host => "host",
        }
    }

    /// Maps a Go `GOARCH` value onto a data model.
    pub fn from_go_arch(goarch: &str) -> Option<Self> {
        let arch = match goarch {
            "386" | "mips" | "mipsle" | "sparc" => TargetArch::I386,
            "arm" | "armv7a" | "armeabi-v7a" | "armbe" | "amd64p32" => TargetArch::Arm,
            "aarch64" | "armv8a" | "armeabi-v8a" | "arm64" | "arm64be" => TargetArch::Aarch64,
            "amd64" | "ppc64" | "ppc64le" | "mips64" | "mips64le" | "sparc64" => TargetArch::X86_64,
            "mips64p32" | "mips64p32le" => TargetArch::X86_48,
            _ => return None,
        };
        Some(arch)
    }
}

impl FromStr for TargetArch {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i386" => Ok(TargetArch::I386),
            "x86_48" => Ok(TargetArch::X86_48),
            "x86_64" => Ok(TargetArch::X86_64),
            "arm" => Ok(TargetArch::Arm),
            "aarch64" => Ok(TargetArch::Aarch64),
            "host" => Ok(TargetArch::Host),
            other => TargetArch::from_go_arch(other).ok_or_else(|| LayoutError::UnknownArch(other.to_string())),
        }
    }
}

impl TryFrom<String> for TargetArch {
    type Error = LayoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
