use std::path::{Path, PathBuf};

use tether_codegen::OutputFile;

use crate::error::{convert_io_error, CliError};

/// Writes every rendered file into `dir`, creating it when needed.
pub fn write_outputs(dir: &Path, files: &[OutputFile]) -> Result<Vec<PathBuf>, CliError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| convert_io_error(e, dir.to_path_buf(), "to create output directory"))?;
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = dir.join(&file.name);
        std::fs::write(&path, &file.contents)
            .map_err(|e| convert_io_error(e, path.clone(), "to write"))?;
        log::debug!("wrote {} ({} bytes)", path.display(), file.contents.len());
        written.push(path);
    }
    Ok(written)
}
