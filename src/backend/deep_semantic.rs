//! Deep semantic backend: a tree-sitter query over each reference file's
//! parse tree that resolves attribute access (`module.name`), bare calls
//! after a matching `from module import name`, and subclassing
//! (`class X(name):`). Higher cost than the fast-symbol backend; accurate
//! across dynamic patterns and inheritance.

use std::collections::HashSet;
use std::path::PathBuf;

use tree_sitter::{Parser as TsParser, Query, QueryCursor, StreamingIterator};

use super::{FindReferences, read_lossy};
use crate::model::{Construct, Reference};

#[derive(Debug, Clone, Copy)]
pub struct DeepSemanticBackend;

const QUERY_SRC: &str = r#"
(attribute attribute: (identifier) @attr)
(call function: (identifier) @call_name)
(class_definition superclasses: (argument_list (identifier) @base))
(import_from_statement name: (dotted_name (identifier) @imported))
(import_from_statement name: (identifier) @imported)
(import_from_statement name: (aliased_import name: (dotted_name (identifier) @imported)))
(import_from_statement name: (aliased_import name: (identifier) @imported))
"#;

impl FindReferences for DeepSemanticBackend {
    fn name(&self) -> &'static str {
        "deep_semantic"
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
            tracing::warn!("deep_semantic: failed to load grammar");
            return Vec::new();
        }
        let Ok(query) = Query::new(&tree_sitter_python::LANGUAGE.into(), QUERY_SRC) else {
            tracing::warn!("deep_semantic: failed to compile query");
            return Vec::new();
        };

        let mut out = Vec::new();
        for file in search_files {
            let Some(text) = read_lossy(file) else {
                continue;
            };
            let Some(tree) = ts_parser.parse(&text, None) else {
                tracing::warn!(path = %file.display(), "deep_semantic: failed to parse reference file");
                continue;
            };

            let imported_here = {
                let mut cursor = QueryCursor::new();
                let mut names = HashSet::new();
                let imported_idx = query
                    .capture_index_for_name("imported")
                    .expect("query defines @imported");
                let mut matches = cursor.matches(&query, tree.root_node(), text.as_bytes());
                while let Some(m) = matches.next() {
                    for cap in m.captures {
                        if cap.index == imported_idx {
                            if let Ok(t) = cap.node.utf8_text(text.as_bytes()) {
                                names.insert(t.to_string());
                            }
                        }
                    }
                }
                names
            };
            let is_imported = imported_here.contains(&construct.name);

            let mut seen_lines: HashSet<usize> = HashSet::new();
            let mut cursor = QueryCursor::new();
            let attr_idx = query.capture_index_for_name("attr").unwrap();
            let call_idx = query.capture_index_for_name("call_name").unwrap();
            let base_idx = query.capture_index_for_name("base").unwrap();
            let mut matches = cursor.matches(&query, tree.root_node(), text.as_bytes());
            while let Some(m) = matches.next() {
                for cap in m.captures {
                    let is_relevant = cap.index == attr_idx
                        || cap.index == base_idx
                        || (cap.index == call_idx && is_imported);
                    if !is_relevant {
                        continue;
                    }
                    let Ok(t) = cap.node.utf8_text(text.as_bytes()) else {
                        continue;
                    };
                    if t != construct.name {
                        continue;
                    }
                    let line = cap.node.start_position().row + 1;
                    if seen_lines.insert(line) {
                        out.push(Reference {
                            file: file.clone(),
                            line,
                            column: Some(cap.node.start_position().column),
                            context_line: None,
                        });
                    }
                }
            }
        }
        out
    }
}
