//! Lint-driven backend: a plain substring search over file bytes, not even
//! word-bounded. Very fast first-pass filtering only; low recall; used by
//! the tiered strategy purely to prune before slower backends run.

use std::path::PathBuf;

use super::{FindReferences, line_col, read_lossy};
use crate::model::{Construct, Reference};

#[derive(Debug, Clone, Copy)]
pub struct LintDrivenBackend;

impl FindReferences for LintDrivenBackend {
    fn name(&self) -> &'static str {
        "lint_driven"
    }

    fn find_references(&self, construct: &Construct, search_files: &[PathBuf]) -> Vec<Reference> {
        if construct.name.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for file in search_files {
            let Some(text) = read_lossy(file) else {
                continue;
            };
            let mut start = 0usize;
            while let Some(pos) = text[start..].find(construct.name.as_str()) {
                let abs = start + pos;
                let (line, column) = line_col(&text, abs);
                out.push(Reference {
                    file: file.clone(),
                    line,
                    column: Some(column),
                    context_line: None,
                });
                start = abs + construct.name.len().max(1);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstructKind;
    use tempfile::tempdir;

    #[test]
    fn matches_substrings_without_word_boundaries() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("b.py");
        std::fs::write(&file, "prefix_f()\n").unwrap();

        let construct = Construct {
            name: "f".to_string(),
            kind: ConstructKind::Function,
            file: PathBuf::from("a.py"),
            line: 1,
            fully_qualified_name: "f".to_string(),
            existing_docstring: None,
            span: (0, 0),
        };
        let backend = LintDrivenBackend;
        let refs = backend.find_references(&construct, &[file]);
        assert!(!refs.is_empty());
    }
}
