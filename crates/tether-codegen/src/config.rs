use rustc_hash::FxHashMap;
use serde::Deserialize;
use tether_layout::TargetArch;
use tether_shape::{CBase, CType, MemoryHint, PointerHint};

use crate::error::{GenError, GenResult};

/// Everything that shapes one generation run apart from the declarations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Go package name of the generated files.
    pub package: String,
    pub arch: TargetArch,
    /// Headers included by the cgo preamble.
    pub includes: Vec<String>,
    /// Prefixes stripped from C names before they become Go names.
    pub trim_prefixes: Vec<String>,
    pub options: Options,
    pub hints: HintConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            package: "bindings".to_string(),
            arch: TargetArch::default(),
            includes: Vec::new(),
            trim_prefixes: Vec::new(),
            options: Options::default(),
            hints: HintConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// NUL-terminate strings handed to C and copy strings coming back.
    pub safe_strings: bool,
    /// Emit exported `Get`/`Set` accessors on struct wrappers.
    pub struct_accessors: bool,
    /// Capacity used for slice headers over native memory.
    pub max_mem: String,
    /// Bound of the helper aggregation queue.
    pub queue_capacity: usize,
    /// Worker tasks; defaults to the number of CPUs.
    pub workers: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            safe_strings: true,
            struct_accessors: true,
            max_mem: "0x7fffffff".to_string(),
            queue_capacity: 256,
            workers: None,
        }
    }
}

impl Options {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HintConfig {
    pub functions: FxHashMap<String, DeclHints>,
    pub types: FxHashMap<String, DeclHints>,
}

/// Hints for one declaration. Member hints are keyed by parameter or
/// field name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeclHints {
    pub pointer: FxHashMap<String, PointerHint>,
    pub memory: FxHashMap<String, MemoryHint>,
    /// Memory policy of the type itself, applied wherever it is referenced.
    pub self_memory: Option<MemoryHint>,
    pub ret_pointer: Option<PointerHint>,
    pub ret_memory: Option<MemoryHint>,
    /// Parameter that holds the element count of a view return.
    pub length: Option<String>,
}

impl GeneratorConfig {
    pub fn from_toml_str(source: &str) -> GenResult<Self> {
        let config: GeneratorConfig =
            toml::from_str(source).map_err(|err| GenError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GenResult<()> {
        if self.package.is_empty() {
            return Err(GenError::Config("package name is empty".to_string()));
        }
        if self.options.queue_capacity == 0 {
            return Err(GenError::Config("queue_capacity must be positive".to_string()));
        }
        let max_mem = self.options.max_mem.trim_start_matches("0x");
        if max_mem.is_empty() || u64::from_str_radix(max_mem, 16).is_err() {
            return Err(GenError::Config(format!(
                "max_mem `{}` is not a hexadecimal constant",
                self.options.max_mem
            )));
        }
        Ok(())
    }

    pub fn function_hints(&self, name: &str) -> Option<&DeclHints> {
        self.hints.functions.get(name)
    }

    pub fn type_hints(&self, tag: &str) -> Option<&DeclHints> {
        self.hints.types.get(tag)
    }

    /// Whether the named struct or union is bound as raw memory.
    pub fn is_raw_type(&self, tag: &str) -> bool {
        self.type_hints(tag).and_then(|hints| hints.self_memory) == Some(MemoryHint::Raw)
    }

    /// The memory hint for a member: an explicit member hint, unless the
    /// member refers to a record, whose own policy always applies.
    pub fn member_memory(&self, hints: Option<&DeclHints>, member: &str, ty: &CType) -> MemoryHint {
        let explicit = hints.and_then(|hints| hints.memory.get(member)).copied();
        self.settle_memory(explicit, member, ty)
    }

    /// Settles an explicit memory hint against the type's own policy. A
    /// record is raw or wrapped everywhere it appears, so for records the
    /// type policy wins.
    pub fn settle_memory(&self, explicit: Option<MemoryHint>, what: &str, ty: &CType) -> MemoryHint {
        let own = self.base_memory(ty);
        match explicit {
            Some(hint) if matches!(ty.base, CBase::Struct(_) | CBase::Union(_)) => {
                if hint != own {
                    log::warn!(
                        "memory hint `{}` on `{}` ignored: {} is bound as {} memory",
                        hint,
                        what,
                        ty.base,
                        own
                    );
                }
                own
            }
            Some(hint) => hint,
            None => own,
        }
    }

    pub fn member_pointer(&self, hints: Option<&DeclHints>, member: &str) -> Option<PointerHint> {
        hints.and_then(|hints| hints.pointer.get(member)).copied()
    }

    /// The memory policy a type carries by itself.
    pub fn base_memory(&self, ty: &CType) -> MemoryHint {
        match &ty.base {
            CBase::Struct(tag) | CBase::Union(tag) if self.is_raw_type(tag) => MemoryHint::Raw,
            _ => MemoryHint::Managed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_shape::CBaseKind;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::from_toml_str("package = \"blob\"").unwrap();
        assert_eq!(config.package, "blob");
        assert_eq!(config.arch, TargetArch::X86_64);
        assert!(config.options.safe_strings);
        assert!(config.options.struct_accessors);
        assert_eq!(config.options.max_mem, "0x7fffffff");
        assert_eq!(config.options.queue_capacity, 256);
        assert!(config.options.worker_count() >= 1);
    }

    #[test]
    fn test_hints_by_name() {
        let config = GeneratorConfig::from_toml_str(
            r#"
            package = "blob"
            arch = "i386"

            [hints.functions.read_blob]
            pointer = { count = "by_reference" }
            ret_pointer = "view"
            length = "count"

            [hints.types.vec2]
            self_memory = "raw"
            "#,
        )
        .unwrap();
        let hints = config.function_hints("read_blob");
        assert_eq!(config.member_pointer(hints, "count"), Some(PointerHint::ByReference));
        assert_eq!(config.member_pointer(hints, "path"), None);
        assert_eq!(hints.and_then(|h| h.length.as_deref()), Some("count"));
        assert!(config.is_raw_type("vec2"));

        let vec2 = CType::new(CBase::Struct("vec2".to_string())).pointer(1);
        assert_eq!(config.member_memory(None, "p", &vec2), MemoryHint::Raw);
        let int = CType::builtin(CBaseKind::Int);
        assert_eq!(config.member_memory(hints, "count", &int), MemoryHint::Managed);
    }

    #[test]
    fn test_record_policy_outranks_member_hints() {
        let config = GeneratorConfig::from_toml_str(
            r#"
            [hints.functions.use_raw]
            memory = { v = "raw", grid = "raw" }

            [hints.functions.use_alias]
            memory = { a = "managed" }

            [hints.types.alias]
            self_memory = "raw"
            "#,
        )
        .unwrap();
        let raw_hints = config.function_hints("use_raw");
        let vec2 = CType::new(CBase::Struct("vec2".to_string())).pointer(2);
        assert_eq!(config.member_memory(raw_hints, "v", &vec2), MemoryHint::Managed);
        let grid = CType::builtin(CBaseKind::Int).pointer(1).with_inner([tether_shape::Dim::Fixed(4)]);
        assert_eq!(config.member_memory(raw_hints, "grid", &grid), MemoryHint::Raw);

        let alias = CType::new(CBase::Struct("alias".to_string())).pointer(1);
        let alias_hints = config.function_hints("use_alias");
        assert_eq!(config.member_memory(alias_hints, "a", &alias), MemoryHint::Raw);
        assert_eq!(config.settle_memory(Some(MemoryHint::Managed), "return value", &alias), MemoryHint::Raw);
    }

    #[test]
    fn test_rejects_bad_max_mem() {
        let err = GeneratorConfig::from_toml_str(
            "package = \"x\"\n[options]\nmax_mem = \"lots\"",
        )
        .unwrap_err();
        assert!(matches!(err, GenError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(GeneratorConfig::from_toml_str("pakage = \"x\"").is_err());
    }
}
