use std::path::Path;
use std::process::{Command, Output};

const MANIFEST: &str = r#"
[config]
package = "blob"
includes = ["blob.h"]
trim_prefixes = ["blob_"]

[config.hints.functions.blob_read]
length = "count"
ret_pointer = "view"
pointer = { count = "by_reference" }

[[declarations]]
kind = "function"
name = "blob_read"
params = [{ name = "count", type = { base = "int", pointers = 1 } }]
ret = { base = "unsigned char", pointers = 1 }

[[declarations]]
kind = "function"
name = "blob_names"
params = [{ name = "names", type = { base = "char", pointers = 2, const = true } }]
"#;

fn tether(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tether"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("tether should start")
}

#[test]
fn test_generate_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("blob.toml"), MANIFEST).unwrap();

    let output = tether(&["generate", "blob.toml", "-o", "gen"], tmp.path());
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let gen = tmp.path().join("gen");
    let bindings = std::fs::read_to_string(gen.join("blob.go")).unwrap();
    assert!(bindings.contains("func Read(count *int32) []byte {"));
    assert!(bindings.contains("func Names(names []string) {"));
    let helpers = std::fs::read_to_string(gen.join("cgo_helpers.go")).unwrap();
    assert!(helpers.starts_with("// Code generated by tether. DO NOT EDIT."));
    assert!(gen.join("cgo_helpers.h").is_file());
    assert!(gen.join("cgo_helpers.c").is_file());
}

#[test]
fn test_check_fails_on_unbindable_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = r#"
        [[declarations]]
        kind = "function"
        name = "take"
        params = [{ name = "s", type = { base = "struct opaque", pointers = 1 } }]
    "#;
    std::fs::write(tmp.path().join("api.toml"), manifest).unwrap();

    let output = tether(&["check", "api.toml"], tmp.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("struct opaque"), "{}", stderr);
}

#[test]
fn test_unknown_arch_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("blob.toml"), MANIFEST).unwrap();
    let output = tether(&["generate", "blob.toml", "--arch", "z80"], tmp.path());
    assert!(!output.status.success());
    assert!(!tmp.path().join("blob.go").exists());
}
