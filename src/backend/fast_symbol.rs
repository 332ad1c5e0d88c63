//! Fast symbol backend: low-latency word-boundary search for the
//! construct's bare name. Covers most static imports and calls; not
//! scope-aware. Meant as the primary backend for large corpora.

use std::path::PathBuf;

use regex::Regex;

use super::{FindReferences, line_col, read_lossy};
use crate::model::{Construct, Reference};

#[derive(Debug, Clone, Copy)]
pub struct FastSymbolBackend;

impl FindReferences for FastSymbolBackend {
    fn name(&self) -> &'static str {
        "fast_symbol"
    }

    fn find_references(&self, construct: &Construct, search_files: &[PathBuf]) -> Vec<Reference> {
        let Some(pattern) = word_boundary_pattern(&construct.name) else {
            return Vec::new();
        };
        let Ok(re) = Regex::new(&pattern) else {
            tracing::warn!(name = %construct.name, "fast_symbol: could not compile search regex");
            return Vec::new();
        };

        let mut out = Vec::new();
        for file in search_files {
            let Some(text) = read_lossy(file) else {
                continue;
            };
            for m in re.find_iter(&text) {
                let (line, column) = line_col(&text, m.start());
                out.push(Reference {
                    file: file.clone(),
                    line,
                    column: Some(column),
                    context_line: None,
                });
            }
        }
        out
    }
}

fn word_boundary_pattern(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    Some(format!(r"\b{}\b", regex::escape(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstructKind;
    use tempfile::tempdir;

    fn construct(name: &str) -> Construct {
        Construct {
            name: name.to_string(),
            kind: ConstructKind::Function,
            file: PathBuf::from("a.py"),
            line: 1,
            fully_qualified_name: name.to_string(),
            existing_docstring: None,
            span: (0, 0),
        }
    }

    #[test]
    fn finds_bare_name_with_word_boundaries() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("b.py");
        std::fs::write(&file, "from a import f\nprefix_f()\nf()\n").unwrap();

        let backend = FastSymbolBackend;
        let refs = backend.find_references(&construct("f"), &[file.clone()]);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].line, 1);
        assert_eq!(refs[1].line, 3);
    }
}
