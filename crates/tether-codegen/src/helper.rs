use std::fmt;
use std::sync::Arc;

/// Output unit a helper belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HelperSide {
    Go,
    CHeader,
    CSource,
}

impl fmt::Display for HelperSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelperSide::Go => write!(f, "cgo_helpers.go"),
            HelperSide::CHeader => write!(f, "cgo_helpers.h"),
            HelperSide::CSource => write!(f, "cgo_helpers.c"),
        }
    }
}

/// A named piece of generated support code.
///
/// Identity is the name: two helpers with the same name must carry the same
/// side and source, otherwise generation is aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helper {
    pub name: String,
    pub side: HelperSide,
    pub description: String,
    pub source: String,
    pub requires: Vec<Arc<Helper>>,
    /// Whether the helper's result may be nil and callers must check.
    pub nillable: bool,
    /// Go packages the source needs.
    pub imports: Vec<&'static str>,
}

impl Helper {
    pub fn new(name: impl Into<String>, side: HelperSide, source: impl Into<String>) -> Self {
        Helper {
            name: name.into(),
            side,
            description: String::new(),
            source: source.into(),
            requires: Vec::new(),
            nillable: false,
            imports: Vec::new(),
        }
    }

    pub fn go(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, HelperSide::Go, source)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn require(mut self, helper: Arc<Helper>) -> Self {
        if !self.requires.iter().any(|known| known.name == helper.name) {
            self.requires.push(helper);
        }
        self
    }

    pub fn import(mut self, package: &'static str) -> Self {
        if !self.imports.contains(&package) {
            self.imports.push(package);
        }
        self
    }

    pub fn nillable(mut self) -> Self {
        self.nillable = true;
        self
    }

    /// Whether `other` can share this helper's name.
    pub fn same_body(&self, other: &Helper) -> bool {
        self.side == other.side && self.source == other.source
    }

    /// Description as comment lines followed by the source.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.description.lines() {
            out.push_str("// ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(self.source.trim_end());
        out.push('\n');
        out
    }
}
