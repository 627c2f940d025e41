//! Host-side naming policy.

/// Turns native identifiers into host identifiers.
///
/// Implementations must be deterministic: the same input always produces the
/// same output, since helper and accessor names are derived from these.
pub trait NameTransformer: Send + Sync {
    /// Exported type name for a struct, union, enum or callback tag.
    fn type_name(&self, native: &str) -> String;
    /// Exported name of a struct member.
    fn field_name(&self, native: &str) -> String;
    /// Exported name of a function proxy.
    fn func_name(&self, native: &str) -> String;
    /// Unexported local name for a parameter.
    fn param_name(&self, native: &str) -> String;
}

const GO_KEYWORDS: &[&str] = &[
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough", "for",
    "func", "go", "goto", "if", "import", "interface", "map", "package", "range", "return",
    "select", "struct", "switch", "type", "var",
];

pub fn is_go_keyword(name: &str) -> bool {
    GO_KEYWORDS.contains(&name)
}

/// Go casing: `vec2_t` becomes `Vec2T`, parameters keep lower camel case.
#[derive(Debug, Clone, Default)]
pub struct GoNames {
    trim_prefixes: Vec<String>,
}

impl GoNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strips a library prefix (`png_`, `SDL_`) before casing.
    pub fn with_trim_prefixes(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.trim_prefixes = prefixes.into_iter().collect();
        self
    }

    fn trimmed<'a>(&self, native: &'a str) -> &'a str {
        for prefix in &self.trim_prefixes {
            if let Some(rest) = native.strip_prefix(prefix.as_str()) {
                if !rest.is_empty() {
                    return rest;
                }
            }
        }
        native
    }
}

impl NameTransformer for GoNames {
    fn type_name(&self, native: &str) -> String {
        exported(&camel(self.trimmed(native)))
    }

    fn field_name(&self, native: &str) -> String {
        exported(&camel(native))
    }

    fn func_name(&self, native: &str) -> String {
        exported(&camel(self.trimmed(native)))
    }

    fn param_name(&self, native: &str) -> String {
        let name = unexported(&camel(native));
        if is_go_keyword(&name) {
            format!("_{}", name)
        } else {
            name
        }
    }
}

/// Joins `_`, space and `.` separated words, capitalising each one.
pub fn camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split(|c: char| c == '_' || c == ' ' || c == '.').filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() {
        out.push('X');
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'X');
    }
    out
}

pub fn exported(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn unexported(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_and_field_names() {
        let names = GoNames::new();
        assert_eq!(names.type_name("vec2"), "Vec2");
        assert_eq!(names.type_name("list_node_t"), "ListNodeT");
        assert_eq!(names.field_name("next"), "Next");
        assert_eq!(names.func_name("read_blob"), "ReadBlob");
    }

    #[test]
    fn test_param_names_avoid_keywords() {
        let names = GoNames::new();
        assert_eq!(names.param_name("type"), "_type");
        assert_eq!(names.param_name("item_count"), "itemCount");
    }

    #[test]
    fn test_trim_prefixes() {
        let names = GoNames::new().with_trim_prefixes(["png_".to_string()]);
        assert_eq!(names.func_name("png_read_info"), "ReadInfo");
        assert_eq!(names.type_name("png_"), "Png");
    }

    #[test]
    fn test_camel_handles_digits_and_dots() {
        assert_eq!(camel("unsafe.Pointer"), "UnsafePointer");
        assert_eq!(camel("2d_point"), "X2dPoint");
    }
}
