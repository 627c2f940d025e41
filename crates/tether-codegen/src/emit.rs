//! Go source buffers.
//!
//! Nested conversions open scopes from the outermost level inwards but must
//! close them in the opposite order, sometimes with statements that are only
//! known once the innermost level has been written. [`EmissionStack`] keeps
//! those closing fragments until the body is complete.

/// An indented line buffer.
#[derive(Debug, Default)]
pub struct CodeWriter {
    out: String,
    indent: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indent(&self) -> usize {
        self.indent
    }

    pub fn line(&mut self, line: impl AsRef<str>) {
        self.line_at(self.indent, line);
    }

    pub fn line_at(&mut self, indent: usize, line: impl AsRef<str>) {
        let line = line.as_ref();
        if line.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..indent {
            self.out.push('\t');
        }
        self.out.push_str(line);
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Writes `line` and indents what follows.
    pub fn open(&mut self, line: impl AsRef<str>) {
        self.line(line);
        self.indent += 1;
    }

    /// Dedents and writes `line`.
    pub fn close(&mut self, line: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(line);
    }

    /// Dedents, writes `line` and indents again, as for `} else {`.
    pub fn reopen(&mut self, line: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(line);
        self.indent += 1;
    }

    pub fn set_indent(&mut self, indent: usize) {
        self.indent = indent;
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Handle to a pushed fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

#[derive(Debug)]
struct Fragment {
    indent: usize,
    lines: Vec<String>,
}

/// Closing fragments waiting for the body they close.
#[derive(Debug, Default)]
pub struct EmissionStack {
    fragments: Vec<Fragment>,
}

impl EmissionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a fragment written at `indent` when the stack is flushed.
    pub fn push(&mut self, indent: usize, line: impl Into<String>) -> Slot {
        self.fragments.push(Fragment {
            indent,
            lines: vec![line.into()],
        });
        Slot(self.fragments.len() - 1)
    }

    /// Reserves a fragment to be filled in later.
    pub fn reserve(&mut self, indent: usize) -> Slot {
        self.fragments.push(Fragment {
            indent,
            lines: Vec::new(),
        });
        Slot(self.fragments.len() - 1)
    }

    /// Replaces the contents of a pushed fragment.
    pub fn rewrite(&mut self, slot: Slot, lines: impl IntoIterator<Item = String>) {
        if let Some(fragment) = self.fragments.get_mut(slot.0) {
            fragment.lines = lines.into_iter().collect();
        }
    }

    /// Adds a line to the end of a pushed fragment.
    pub fn append(&mut self, slot: Slot, line: impl Into<String>) {
        if let Some(fragment) = self.fragments.get_mut(slot.0) {
            fragment.lines.push(line.into());
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Writes every fragment, most recent first, and leaves the writer at
    /// the indentation of the oldest one.
    pub fn flush_into(&mut self, writer: &mut CodeWriter) {
        let mut base = writer.indent();
        while let Some(fragment) = self.fragments.pop() {
            for line in &fragment.lines {
                writer.line_at(fragment.indent, line);
            }
            base = fragment.indent;
        }
        writer.set_indent(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_close_in_reverse() {
        let mut writer = CodeWriter::new();
        let mut stack = EmissionStack::new();
        writer.open("func f() {");
        stack.push(0, "}");
        let result = stack.reserve(1);
        writer.open("for i := range x {");
        stack.push(1, "}");
        writer.line("x[i]++");
        stack.rewrite(result, vec!["return x".to_string()]);
        stack.flush_into(&mut writer);

        assert_eq!(
            writer.finish(),
            "func f() {\n\tfor i := range x {\n\t\tx[i]++\n\t}\n\treturn x\n}\n"
        );
    }

    #[test]
    fn test_append_extends_a_fragment() {
        let mut writer = CodeWriter::new();
        let mut stack = EmissionStack::new();
        let slot = stack.push(0, "a");
        stack.append(slot, "b");
        stack.push(0, "c");
        assert_eq!(stack.len(), 2);
        stack.flush_into(&mut writer);
        assert!(stack.is_empty());
        assert_eq!(writer.finish(), "c\na\nb\n");
    }
}
