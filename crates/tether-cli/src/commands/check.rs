use std::path::PathBuf;

use miette::Report;

use crate::commands::generate::{run, GenerateArgs};
use crate::error::CliError;

/// Runs generation without writing anything and reports every declaration
/// that would be skipped.
pub fn handle_check(manifest: PathBuf) -> Result<(), CliError> {
    let unit = run(&GenerateArgs {
        manifest: manifest.clone(),
        ..GenerateArgs::default()
    })?;
    let count = unit.diagnostics.len();
    for diagnostic in unit.diagnostics {
        eprintln!("{:?}", Report::new(diagnostic));
    }
    if count > 0 {
        return Err(CliError::Skipped { count });
    }
    println!(
        "{}: all {} declarations can be bound",
        manifest.display(),
        unit.blocks.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_counts_skipped_declarations() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("api.toml");
        std::fs::write(
            &path,
            r#"
            [[declarations]]
            kind = "function"
            name = "uses_unknown"
            params = [{ name = "e", type = { base = "enum missing" } }]

            [[declarations]]
            kind = "function"
            name = "fine"
            "#,
        )
        .unwrap();
        let err = handle_check(path).unwrap_err();
        assert!(matches!(err, CliError::Skipped { count: 1 }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}
