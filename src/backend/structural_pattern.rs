//! Structural pattern backend: a narrower tree-sitter query matching only
//! direct call and import syntactic shapes — `call` nodes whose function is
//! the bare identifier, and `import_from_statement` nodes naming it —
//! without deep-semantic's import resolution. Complements semantic
//! analysis with a cheaper, purely syntactic pass.

use std::path::PathBuf;

use tree_sitter::{Parser as TsParser, Query, QueryCursor, StreamingIterator};

use super::{FindReferences, read_lossy};
use crate::model::{Construct, Reference};

#[derive(Debug, Clone, Copy)]
pub struct StructuralPatternBackend;

const QUERY_SRC: &str = r#"
(call function: (identifier) @hit)
(import_from_statement name: (dotted_name (identifier) @hit))
(import_from_statement name: (identifier) @hit)
"#;

impl FindReferences for StructuralPatternBackend {
    fn name(&self) -> &'static str {
        "structural_pattern"
    }

    fn find_references(&self, construct: &Construct, search_files: &[PathBuf]) -> Vec<Reference> {
        if construct.name.is_empty() {
            return Vec::new();
        }

        let mut ts_parser = TsParser::new();
        if ts_parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .is_err()
        {
            tracing::warn!("structural_pattern: failed to load grammar");
            return Vec::new();
        }
        let Ok(query) = Query::new(&tree_sitter_python::LANGUAGE.into(), QUERY_SRC) else {
            tracing::warn!("structural_pattern: failed to compile query");
            return Vec::new();
        };

        let mut out = Vec::new();
        for file in search_files {
            let Some(text) = read_lossy(file) else {
                continue;
            };
            let Some(tree) = ts_parser.parse(&text, None) else {
                continue;
            };
            let mut cursor = QueryCursor::new();
            let mut matches = cursor.matches(&query, tree.root_node(), text.as_bytes());
            while let Some(m) = matches.next() {
                for cap in m.captures {
                    let Ok(t) = cap.node.utf8_text(text.as_bytes()) else {
                        continue;
                    };
                    if t != construct.name {
                        continue;
                    }
                    out.push(Reference {
                        file: file.clone(),
                        line: cap.node.start_position().row + 1,
                        column: Some(cap.node.start_position().column),
                        context_line: None,
                    });
                }
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
    fn finds_direct_call_without_import_resolution() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("b.py");
        std::fs::write(&file, "f()\n").unwrap();
        let refs = StructuralPatternBackend.find_references(&construct("f"), &[file]);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn finds_import_from_statement() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("b.py");
        std::fs::write(&file, "from pkg import f\n").unwrap();
        let refs = StructuralPatternBackend.find_references(&construct("f"), &[file]);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].line, 1);
    }
}
