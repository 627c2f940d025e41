use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while reading native declarations into shapes.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Unknown C base type: `{0}`")]
    #[diagnostic(
        code("SHAPE-BASE-001"),
        help("Use a builtin spelling (`int`, `unsigned char`, `int32_t`), `void`, or `struct|union|enum|fn <name>`")
    )]
    UnknownBase(String),
}

/// Result type for shape operations.
pub type ShapeResult<T> = Result<T, ShapeError>;
