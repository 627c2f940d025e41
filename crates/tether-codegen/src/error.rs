use miette::Diagnostic;
use tether_layout::LayoutError;
use tether_shape::ShapeError;
use thiserror::Error;

/// Errors raised while generating bindings.
///
/// `UnsupportedShape` and declaration-local layout failures skip one
/// declaration; the helper errors abort the whole run.
#[derive(Error, Debug, Diagnostic)]
pub enum GenError {
    #[error("Cannot bind `{decl}`: {reason}")]
    #[diagnostic(
        code("GEN-SHAPE-001"),
        help("Adjust the pointer or memory hints for this declaration, or bind it by hand.")
    )]
    UnsupportedShape { decl: String, reason: String },

    #[error("Helper `{name}` was produced with two different bodies")]
    #[diagnostic(
        code("GEN-HELPER-001"),
        help("Two conversions collapsed onto one helper name; the generated code would not compile.")
    )]
    HelperCollision { name: String },

    #[error("Helper aggregation stopped before generation finished")]
    #[diagnostic(code("GEN-HELPER-002"))]
    AggregatorClosed,

    #[error("Worker `{0}` panicked")]
    #[diagnostic(code("GEN-WORKER-001"))]
    WorkerPanicked(String),

    #[error("Could not start worker `{name}`: {reason}")]
    #[diagnostic(code("GEN-WORKER-002"))]
    Spawn { name: String, reason: String },

    #[error("Unknown type `{0}` referenced")]
    #[diagnostic(code("GEN-DECL-001"), help("Declare the type in the manifest before using it."))]
    UnknownType(String),

    #[error("`{0}` is declared more than once")]
    #[diagnostic(code("GEN-DECL-002"))]
    DuplicateDeclaration(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code("GEN-CONFIG-001"))]
    Config(String),

    #[error("Cannot lay out `{record}`: {source}")]
    #[diagnostic(code("GEN-LAYOUT-001"))]
    RecordLayout {
        record: String,
        #[source]
        #[diagnostic_source]
        source: LayoutError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Shape(#[from] ShapeError),
}

impl GenError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        GenError::UnsupportedShape {
            decl: String::new(),
            reason: reason.into(),
        }
    }

    /// Attaches the declaration name to an error raised below it.
    pub fn in_decl(self, name: &str) -> Self {
        match self {
            GenError::UnsupportedShape { decl, reason } if decl.is_empty() => {
                GenError::UnsupportedShape {
                    decl: name.to_string(),
                    reason,
                }
            }
            other => other,
        }
    }

    /// Whether the error invalidates the whole run rather than one declaration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GenError::HelperCollision { .. }
                | GenError::AggregatorClosed
                | GenError::WorkerPanicked(_)
                | GenError::Spawn { .. }
                | GenError::DuplicateDeclaration(_)
                | GenError::Config(_)
        )
    }
}

pub type GenResult<T> = Result<T, GenError>;
