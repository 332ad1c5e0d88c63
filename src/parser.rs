//! Parser (C2): extract constructs — modules, classes, functions, methods —
//! with their locations and existing docstrings from one source file.
//!
//! Built on `tree_sitter::Parser` + `tree_sitter_python::LANGUAGE`, the
//! ecosystem's error-recovering grammar with in-tree error nodes that
//! a design that tolerates malformed source without raising.

use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser as TsParser};

use crate::error::{PipelineError, Result};
use crate::model::{Construct, ConstructKind, DocstringLiteral, QuoteKind};

/// Parse `bytes` (the contents of `file`) and return every construct found,
/// in source order. Always includes a leading `Module` construct. Never
/// raises on malformed input — worst case it returns only the `Module`
/// construct for a file the grammar could not anchor at all.
pub fn parse_file(file: &Path, bytes: &[u8]) -> Result<Vec<Construct>> {
    let mut parser = TsParser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .expect("tree-sitter-python grammar failed to load");

    let tree = parser.parse(bytes, None).ok_or_else(|| PipelineError::ParseHard {
        path: file.to_path_buf(),
        reason: "tree-sitter returned no tree".to_string(),
    })?;

    let root = tree.root_node();

    let mut constructs = vec![module_construct(file, bytes, root)];

    if root.has_error() && root.named_child_count() == 0 && !bytes.is_empty() {
        tracing::warn!(path = %file.display(), "file could not be parsed beyond a bare module");
        return Ok(constructs);
    }

    let mut scope_names: Vec<(String, bool)> = Vec::new();
    walk(file, bytes, root, &mut scope_names, &mut constructs);
    Ok(constructs)
}

/// `true` for a scope introduced by `class_definition`, `false` for
/// `function_definition`. Used to classify `Method` vs `Function`.
fn walk(
    file: &Path,
    bytes: &[u8],
    node: Node,
    scope_names: &mut Vec<(String, bool)>,
    out: &mut Vec<Construct>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "ERROR" {
            // Partial parse errors: skip this subtree as a candidate
            // construct but keep walking its children for anything
            // the grammar did manage to recover.
            walk(file, bytes, child, scope_names, out);
            continue;
        }

        match child.kind() {
            "function_definition" => {
                if let Some(c) = construct_from_def(file, bytes, child, scope_names, false) {
                    out.push(c);
                }
                let name = identifier_text(child, bytes).unwrap_or_default();
                scope_names.push((name, false));
                if let Some(body) = child.child_by_field_name("body") {
                    walk(file, bytes, body, scope_names, out);
                }
                scope_names.pop();
            }
            "class_definition" => {
                if let Some(c) = construct_from_def(file, bytes, child, scope_names, true) {
                    out.push(c);
                }
                let name = identifier_text(child, bytes).unwrap_or_default();
                scope_names.push((name, true));
                if let Some(body) = child.child_by_field_name("body") {
                    walk(file, bytes, body, scope_names, out);
                }
                scope_names.pop();
            }
            _ => {
                walk(file, bytes, child, scope_names, out);
            }
        }
    }
}

fn identifier_text<'a>(def_node: Node, bytes: &'a [u8]) -> Option<&'a str> {
    let name_node = def_node.child_by_field_name("name")?;
    name_node.utf8_text(bytes).ok()
}

/// `Method` iff the innermost enclosing named scope is a class; nested
/// functions inside a function inside a class are still `Function`.
fn classify(is_class: bool, scope_names: &[(String, bool)]) -> ConstructKind {
    if is_class {
        return ConstructKind::Class;
    }
    match scope_names.last() {
        Some((_, true)) => ConstructKind::Method,
        _ => ConstructKind::Function,
    }
}

fn construct_from_def(
    file: &Path,
    bytes: &[u8],
    def_node: Node,
    scope_names: &[(String, bool)],
    is_class: bool,
) -> Option<Construct> {
    let name = identifier_text(def_node, bytes)?.to_string();
    let line = def_node.start_position().row + 1;
    let kind = classify(is_class, scope_names);

    let mut fqn_parts: Vec<&str> = scope_names.iter().map(|(n, _)| n.as_str()).collect();
    fqn_parts.push(&name);
    let fully_qualified_name = fqn_parts.join(".");

    let body = def_node.child_by_field_name("body");
    let existing_docstring = body.and_then(|b| extract_docstring(b, bytes));

    Some(Construct {
        name,
        kind,
        file: file.to_path_buf(),
        line,
        fully_qualified_name,
        existing_docstring,
        span: (def_node.start_byte(), def_node.end_byte()),
    })
}

fn module_construct(file: &Path, bytes: &[u8], root: Node) -> Construct {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let existing_docstring = extract_docstring(root, bytes);
    Construct {
        name: stem.clone(),
        kind: ConstructKind::Module,
        file: file.to_path_buf(),
        line: 1,
        fully_qualified_name: stem,
        existing_docstring,
        span: (root.start_byte(), root.end_byte()),
    }
}

/// The first direct child of `body` that is an expression-statement whose
/// sole expression is a string literal, normalized on extraction.
fn extract_docstring(body: Node, bytes: &[u8]) -> Option<DocstringLiteral> {
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        if child.kind() == "comment" {
            // Comments (e.g. a coding-line above a module docstring, or a
            // note above a function's) don't count as the first statement;
            // keep scanning past them for the real expression-statement.
            continue;
        }
        if child.kind() != "expression_statement" {
            return None;
        }
        let expr = child.named_child(0)?;
        if expr.kind() != "string" {
            return None;
        }
        return docstring_literal_from_node(expr, bytes);
    }
    None
}

fn docstring_literal_from_node(string_node: Node, bytes: &[u8]) -> Option<DocstringLiteral> {
    let raw = string_node.utf8_text(bytes).ok()?;
    let literal_range = (string_node.start_byte(), string_node.end_byte());
    let indent = {
        // Column of the string node's start, measured in bytes from the
        // start of its line — good enough since Python source indents
        // with ASCII spaces/tabs.
        let line_start = bytes[..string_node.start_byte()]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        string_node.start_byte() - line_start
    };

    let (prefix, quote, inner) = split_string_literal(raw)?;
    let content_start = literal_range.0 + prefix.len() + quote.delimiter().len();
    let content_end = literal_range.1 - quote.delimiter().len();

    Some(DocstringLiteral {
        text: normalize_docstring_text(inner),
        quote,
        raw_prefix: if prefix.is_empty() {
            None
        } else {
            Some(prefix.to_string())
        },
        literal_range,
        content_range: (content_start, content_end),
        indent,
    })
}

/// Split a raw Python string literal into `(prefix, quote_kind, inner_text)`.
fn split_string_literal(raw: &str) -> Option<(&str, QuoteKind, &str)> {
    let prefix_len = raw
        .find(|c| c == '"' || c == '\'')
        .unwrap_or(0);
    let (prefix, rest) = raw.split_at(prefix_len);

    for (kind, delim) in [
        (QuoteKind::TripleDouble, "\"\"\""),
        (QuoteKind::TripleSingle, "'''"),
    ] {
        if rest.starts_with(delim) && rest.ends_with(delim) && rest.len() >= delim.len() * 2 {
            let inner = &rest[delim.len()..rest.len() - delim.len()];
            return Some((prefix, kind, inner));
        }
    }
    for (kind, delim) in [(QuoteKind::Double, "\""), (QuoteKind::Single, "'")] {
        if rest.starts_with(delim) && rest.ends_with(delim) && rest.len() >= delim.len() * 2 {
            let inner = &rest[delim.len()..rest.len() - delim.len()];
            return Some((prefix, kind, inner));
        }
    }
    None
}

/// Dequote, dedent, and trim a docstring's inner content.
pub fn normalize_docstring_text(inner: &str) -> String {
    let mut lines: Vec<&str> = inner.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let min_indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let first = lines.remove(0).trim_end().to_string();
    let mut out = vec![first];
    for line in lines {
        let dedented = if line.len() >= min_indent {
            &line[min_indent..]
        } else {
            line.trim_start()
        };
        out.push(dedented.trim_end().to_string());
    }

    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }

    out.join("\n")
}
