use std::path::PathBuf;

use miette::{Diagnostic, NamedSource, SourceSpan};
use tether_codegen::GenError;
use thiserror::Error;

/// Problems with the manifest file itself.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("Failed to parse manifest {path}")]
    #[diagnostic(code(tether::manifest::parse))]
    Parse {
        path: PathBuf,
        #[source_code]
        src: NamedSource<String>,
        #[label("{message}")]
        span: Option<SourceSpan>,
        message: String,
    },

    #[error("Manifest {path} has no declarations")]
    #[diagnostic(
        code(tether::manifest::empty),
        help("Add `[[declarations]]` tables describing the C API to bind.")
    )]
    Empty { path: PathBuf },

    #[error("Invalid configuration in {path}")]
    #[diagnostic(code(tether::manifest::config))]
    Config {
        path: PathBuf,
        #[source]
        #[diagnostic_source]
        source: GenError,
    },
}

/// CLI-specific error type that provides rich diagnostics
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed {operation} {path}")]
    #[diagnostic(code(tether::cli::io_error))]
    IoError {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Generate(#[from] GenError),

    #[error("{count} declarations cannot be bound")]
    #[diagnostic(
        code(tether::cli::skipped),
        help("Run `tether generate` to emit the remaining declarations anyway.")
    )]
    Skipped { count: usize },
}

/// Convert IO errors with context
pub fn convert_io_error(error: std::io::Error, path: PathBuf, operation: &str) -> CliError {
    CliError::IoError {
        path,
        operation: operation.to_string(),
        source: error,
    }
}
