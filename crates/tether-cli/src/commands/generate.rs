use std::path::PathBuf;

use tether_codegen::{generate, GeneratedUnit};
use tether_layout::TargetArch;

use crate::error::CliError;
use crate::io::write_outputs;
use crate::manifest::Manifest;

/// Command line overrides for one generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub manifest: PathBuf,
    pub output: Option<PathBuf>,
    pub package: Option<String>,
    pub arch: Option<TargetArch>,
    pub workers: Option<usize>,
}

/// Loads the manifest, applies overrides and runs generation.
pub(crate) fn run(args: &GenerateArgs) -> Result<GeneratedUnit, CliError> {
    let mut manifest = Manifest::load(&args.manifest)?;
    if let Some(package) = &args.package {
        manifest.config.package = package.clone();
    }
    if let Some(arch) = args.arch {
        manifest.config.arch = arch;
    }
    if let Some(workers) = args.workers {
        manifest.config.options.workers = Some(workers);
    }
    log::info!(
        "generating package {} for {}",
        manifest.config.package,
        manifest.config.arch
    );
    Ok(generate(manifest.config, &manifest.declarations)?)
}

pub fn handle_generate(args: GenerateArgs) -> Result<Vec<PathBuf>, CliError> {
    let unit = run(&args)?;
    let dir = args
        .output
        .clone()
        .unwrap_or_else(|| Manifest::default_output(&args.manifest));
    let written = write_outputs(&dir, &unit.render())?;

    println!(
        "Generated {} declarations and {} helpers into {}",
        unit.blocks.len(),
        unit.helpers.len(),
        dir.display()
    );
    if !unit.diagnostics.is_empty() {
        println!("Skipped {} declarations:", unit.diagnostics.len());
        for diagnostic in &unit.diagnostics {
            println!("  {}", diagnostic);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        [config]
        package = "geo"
        includes = ["geo.h"]

        [[declarations]]
        kind = "struct"
        tag = "point"
        fields = [
            { name = "x", type = { base = "int" } },
            { name = "y", type = { base = "int" } },
        ]

        [[declarations]]
        kind = "function"
        name = "point_norm"
        params = [{ name = "p", type = { base = "struct point", pointers = 1, const = true } }]
        ret = { base = "double" }

        [[declarations]]
        kind = "function"
        name = "broken"
        params = [{ name = "p", type = { base = "struct nowhere", pointers = 1 } }]
    "#;

    fn manifest_in(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("geo.toml");
        std::fs::write(&path, MANIFEST).unwrap();
        path
    }

    #[test]
    fn test_generate_writes_four_files() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = manifest_in(tmp.path());
        let out = tmp.path().join("out");
        let written = handle_generate(GenerateArgs {
            manifest,
            output: Some(out.clone()),
            workers: Some(2),
            ..GenerateArgs::default()
        })
        .unwrap();

        let names: Vec<String> = written
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["geo.go", "cgo_helpers.go", "cgo_helpers.h", "cgo_helpers.c"]);

        let bindings = std::fs::read_to_string(out.join("geo.go")).unwrap();
        assert!(bindings.contains("type Point struct {"));
        assert!(bindings.contains("func PointNorm(p *Point) float64 {"));
        assert!(!bindings.contains("Broken"));
    }

    #[test]
    fn test_overrides_win_over_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let unit = run(&GenerateArgs {
            manifest: manifest_in(tmp.path()),
            package: Some("shapes".to_string()),
            arch: Some(TargetArch::I386),
            ..GenerateArgs::default()
        })
        .unwrap();
        assert_eq!(unit.package, "shapes");
        assert_eq!(unit.arch, TargetArch::I386);
        assert_eq!(unit.diagnostics.len(), 1);
    }

    #[test]
    fn test_missing_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run(&GenerateArgs {
            manifest: tmp.path().join("absent.toml"),
            ..GenerateArgs::default()
        })
        .unwrap_err();
        assert!(matches!(err, CliError::IoError { .. }));
    }
}
