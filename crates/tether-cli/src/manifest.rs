//! The TOML manifest: generator configuration plus the declarations to bind.
//!
//! ```toml
//! [config]
//! package = "geo"
//! includes = ["geo.h"]
//!
//! [[declarations]]
//! kind = "function"
//! name = "geo_version"
//! ret = { base = "int" }
//! ```

use std::path::{Path, PathBuf};

use miette::{NamedSource, SourceSpan};
use serde::Deserialize;
use tether_codegen::GeneratorConfig;
use tether_shape::Declaration;

use crate::error::{convert_io_error, CliError, ManifestError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub config: GeneratorConfig,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| convert_io_error(e, path.to_path_buf(), "to read manifest"))?;
        Ok(Self::parse(path, source)?)
    }

    pub fn parse(path: &Path, source: String) -> Result<Self, ManifestError> {
        let manifest: Manifest = match toml::from_str(&source) {
            Ok(manifest) => manifest,
            Err(err) => {
                let span = err.span().map(|range| SourceSpan::from(range.start..range.end));
                return Err(ManifestError::Parse {
                    path: path.to_path_buf(),
                    message: err.message().to_string(),
                    src: NamedSource::new(path.display().to_string(), source),
                    span,
                });
            }
        };
        if manifest.declarations.is_empty() {
            return Err(ManifestError::Empty {
                path: path.to_path_buf(),
            });
        }
        manifest
            .config
            .validate()
            .map_err(|source| ManifestError::Config {
                path: path.to_path_buf(),
                source,
            })?;
        log::debug!(
            "manifest {} declares {} items for package {}",
            path.display(),
            manifest.declarations.len(),
            manifest.config.package
        );
        Ok(manifest)
    }

    /// Where output goes when no directory is given: next to the manifest.
    pub fn default_output(path: &Path) -> PathBuf {
        path.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}
