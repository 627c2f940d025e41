//! Generation results and the files they are written to.

use std::collections::BTreeSet;
use std::fmt::Write;

use tether_layout::TargetArch;

use crate::aggregate::HelperUnits;
use crate::error::GenError;
use crate::helper::{Helper, HelperSide};

const GENERATED_NOTICE: &str = "// Code generated by tether. DO NOT EDIT.";

/// Go packages a block may reference.
const KNOWN_IMPORTS: [&str; 3] = ["fmt", "runtime", "unsafe"];

/// Bindings of one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBlock {
    pub name: String,
    pub kind: &'static str,
    pub source: String,
    pub imports: BTreeSet<&'static str>,
}

impl GeneratedBlock {
    pub fn new(name: impl Into<String>, kind: &'static str, source: String) -> Self {
        let imports = KNOWN_IMPORTS
            .iter()
            .copied()
            .filter(|package| source.contains(&format!("{}.", package)))
            .collect();
        GeneratedBlock {
            name: name.into(),
            kind,
            source,
            imports,
        }
    }
}

/// Everything one run produced.
#[derive(Debug)]
pub struct GeneratedUnit {
    pub package: String,
    pub arch: TargetArch,
    pub includes: Vec<String>,
    /// In declaration order; skipped declarations have no block.
    pub blocks: Vec<GeneratedBlock>,
    pub helpers: HelperUnits,
    /// Declarations that were skipped and why.
    pub diagnostics: Vec<GenError>,
}

/// A rendered output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub name: String,
    pub contents: String,
}

impl GeneratedUnit {
    pub fn block(&self, name: &str) -> Option<&GeneratedBlock> {
        self.blocks.iter().find(|block| block.name == name)
    }

    /// `<package>.go`, `cgo_helpers.go`, `cgo_helpers.h` and `cgo_helpers.c`.
    pub fn render(&self) -> Vec<OutputFile> {
        vec![
            OutputFile {
                name: format!("{}.go", self.package),
                contents: self.render_bindings(),
            },
            OutputFile {
                name: HelperSide::Go.to_string(),
                contents: self.render_go_helpers(),
            },
            OutputFile {
                name: HelperSide::CHeader.to_string(),
                contents: self.render_header(),
            },
            OutputFile {
                name: HelperSide::CSource.to_string(),
                contents: self.render_c_source(),
            },
        ]
    }

    fn render_bindings(&self) -> String {
        let imports = self
            .blocks
            .iter()
            .flat_map(|block| block.imports.iter().copied())
            .collect();
        let mut out = self.go_preamble(&imports);
        for block in &self.blocks {
            out.push('\n');
            out.push_str(&block.source);
        }
        out
    }

    fn render_go_helpers(&self) -> String {
        let mut out = self.go_preamble(&self.helpers.go_imports());
        push_helpers(&mut out, &self.helpers.go);
        out
    }

    fn render_header(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", GENERATED_NOTICE);
        out.push('\n');
        push_helpers(&mut out, &self.helpers.c_header);
        if !self.includes.is_empty() {
            out.push('\n');
            for include in &self.includes {
                let _ = writeln!(out, "#include {}", include_spelling(include));
            }
        }
        out
    }

    fn render_c_source(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", GENERATED_NOTICE);
        out.push('\n');
        push_helpers(&mut out, &self.helpers.c_source);
        out
    }

    fn go_preamble(&self, imports: &BTreeSet<&'static str>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", GENERATED_NOTICE);
        let _ = writeln!(out, "// Target architecture: {}.", self.arch.name());
        out.push('\n');
        let _ = writeln!(out, "package {}", self.package);
        out.push('\n');
        out.push_str("/*\n");
        for include in &self.includes {
            let _ = writeln!(out, "#include {}", include_spelling(include));
        }
        out.push_str("#include <stdlib.h>\n");
        out.push_str("#include \"cgo_helpers.h\"\n");
        out.push_str("*/\n");
        out.push_str("import \"C\"\n");
        match imports.len() {
            0 => {}
            1 => {
                let _ = writeln!(out, "import {:?}", imports.iter().next().copied().unwrap_or_default());
            }
            _ => {
                out.push_str("import (\n");
                for import in imports {
                    let _ = writeln!(out, "\t{:?}", import);
                }
                out.push_str(")\n");
            }
        }
        out
    }
}

fn push_helpers(out: &mut String, helpers: &[std::sync::Arc<Helper>]) {
    for (i, helper) in helpers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&helper.render());
    }
}

/// `<stdio.h>` stays as written, anything else is quoted.
fn include_spelling(include: &str) -> String {
    if include.starts_with('<') || include.starts_with('"') {
        include.to_string()
    } else {
        format!("\"{}\"", include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn test_block_imports_follow_source() {
        let block = GeneratedBlock::new(
            "Touch",
            "function",
            "func Touch(p unsafe.Pointer) {\n\truntime.KeepAlive(p)\n}\n".to_string(),
        );
        assert_eq!(block.imports.into_iter().collect::<Vec<_>>(), vec!["runtime", "unsafe"]);
    }

    #[test]
    fn test_bindings_preamble() {
        let unit = GeneratedUnit {
            package: "geo".to_string(),
            arch: TargetArch::X86_64,
            includes: vec!["geo.h".to_string(), "<stdint.h>".to_string()],
            blocks: vec![GeneratedBlock::new(
                "Mode",
                "enum",
                "type Mode int32\n".to_string(),
            )],
            helpers: HelperUnits::default(),
            diagnostics: Vec::new(),
        };
        let files = unit.render();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["geo.go", "cgo_helpers.go", "cgo_helpers.h", "cgo_helpers.c"]);
        expect![[r#"
            // Code generated by tether. DO NOT EDIT.
            // Target architecture: x86_64.

            package geo

            /*
            #include "geo.h"
            #include <stdint.h>
            #include <stdlib.h>
            #include "cgo_helpers.h"
            */
            import "C"

            type Mode int32
        "#]]
        .assert_eq(&files[0].contents);
    }
}
