//! Docstring rewriter (C8): lossless, byte-span-splicing edits that insert
//! or merge a "Used in:" block into a construct's docstring. Never
//! reparses-then-reprints the whole file — only the spliced ranges change,
//! so everything else round-trips byte-for-byte. Byte-for-byte preservation
//! outside the touched docstring is a hard invariant here, not a
//! nice-to-have.

use std::collections::BTreeSet;
use std::path::Path;

use tree_sitter::{Node, Parser as TsParser};

use crate::model::{Construct, ConstructKind, QuoteKind, ReferenceSet};
use crate::parser::normalize_docstring_text;

/// Outcome of attempting to rewrite one file.
pub enum RewriteOutcome {
    /// No construct in this file needed an update; caller must not write.
    Unchanged,
    /// The rewrite succeeded and passed the safety gate.
    Modified(Vec<u8>),
    /// The edited bytes failed to re-parse (or targeting failed); the
    /// caller must keep the original bytes and record a non-zero exit.
    RolledBack { reason: String },
}

const USED_IN_HEADER: &str = "Used in:";

/// Apply the "Used in:" merge for every `(construct, references)` pair
/// defined in `original_bytes`, in source order — one pass per file.
/// `project_root` is used only to defend the self-exclusion property
/// against a pre-existing `Used in:` block that already (incorrectly)
/// names the construct's own defining file — fresh references are already
/// self-filtered by the pipeline before reaching here.
pub fn rewrite(
    file: &Path,
    original_bytes: &[u8],
    mut edits: Vec<(Construct, ReferenceSet, Vec<String>)>,
    update_module_docstrings: bool,
    include_line_numbers: bool,
    project_root: &Path,
) -> RewriteOutcome {
    edits.sort_by_key(|(c, _, _)| c.line);
    let self_rel_path = relative_posix_path(project_root, file);

    let mut parser = TsParser::new();
    if parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return RewriteOutcome::RolledBack {
            reason: "grammar failed to load".to_string(),
        };
    }
    let Some(tree) = parser.parse(original_bytes, None) else {
        return RewriteOutcome::RolledBack {
            reason: "original file failed to parse".to_string(),
        };
    };

    let line_ending = detect_line_ending(original_bytes);
    let mut splices: Vec<(usize, usize, Vec<u8>)> = Vec::new();
    let mut any_change = false;

    for (construct, _refs, rel_paths) in &edits {
        if construct.kind == ConstructKind::Module && !update_module_docstrings {
            continue;
        }
        if rel_paths.is_empty() && construct.existing_docstring.is_none() {
            continue;
        }

        let Some(target) = locate_node(tree.root_node(), original_bytes, construct) else {
            return RewriteOutcome::RolledBack {
                reason: format!(
                    "could not locate {:?} {} at line {}",
                    construct.kind, construct.fully_qualified_name, construct.line
                ),
            };
        };

        match plan_edit(
            original_bytes,
            construct,
            target,
            rel_paths,
            include_line_numbers,
            line_ending,
            &self_rel_path,
        ) {
            Some(EditPlan::ReplaceLiteral { range, bytes }) => {
                if original_bytes[range.0..range.1] != bytes[..] {
                    any_change = true;
                }
                splices.push((range.0, range.1, bytes));
            }
            Some(EditPlan::InsertDocstring { at, bytes }) => {
                any_change = true;
                splices.push((at, at, bytes));
            }
            None => {}
        }
    }

    if !any_change {
        return RewriteOutcome::Unchanged;
    }

    splices.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = original_bytes.to_vec();
    for (start, end, replacement) in splices {
        out.splice(start..end, replacement);
    }

    let mut verify_parser = TsParser::new();
    if verify_parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return RewriteOutcome::RolledBack {
            reason: "grammar failed to load during safety gate".to_string(),
        };
    }
    match verify_parser.parse(&out, None) {
        Some(new_tree) if !new_tree.root_node().has_error() => RewriteOutcome::Modified(out),
        Some(_) => RewriteOutcome::RolledBack {
            reason: "rewritten source contains syntax errors".to_string(),
        },
        None => RewriteOutcome::RolledBack {
            reason: "rewritten source failed to parse at all".to_string(),
        },
    }
}

enum EditPlan {
    ReplaceLiteral {
        range: (usize, usize),
        bytes: Vec<u8>,
    },
    InsertDocstring {
        at: usize,
        bytes: Vec<u8>,
    },
}

fn plan_edit(
    src: &[u8],
    construct: &Construct,
    node: Node,
    rel_paths: &[String],
    include_line_numbers: bool,
    line_ending: &str,
    self_rel_path: &str,
) -> Option<EditPlan> {
    match &construct.existing_docstring {
        Some(doc) => {
            let raw_inner =
                std::str::from_utf8(&src[doc.content_range.0..doc.content_range.1]).ok()?;
            let indent = " ".repeat(doc.indent);
            let multiline_style = src[doc.literal_range.0..doc.literal_range.1].contains(&b'\n');

            let (new_inner, changed) = merge_used_in_block(
                raw_inner,
                rel_paths,
                &indent,
                line_ending,
                multiline_style,
                include_line_numbers,
                self_rel_path,
            );
            if !changed {
                return None;
            }

            let (quote, inner_for_emission, raw_prefix) =
                select_quote_style(&new_inner, doc.quote, doc.raw_prefix.as_deref());
            let mut literal = Vec::new();
            if let Some(p) = raw_prefix {
                literal.extend_from_slice(p.as_bytes());
            }
            literal.extend_from_slice(quote.delimiter().as_bytes());
            literal.extend_from_slice(inner_for_emission.as_bytes());
            literal.extend_from_slice(quote.delimiter().as_bytes());

            Some(EditPlan::ReplaceLiteral {
                range: doc.literal_range,
                bytes: literal,
            })
        }
        None => {
            let rel_paths: Vec<String> = rel_paths
                .iter()
                .filter(|p| normalize_path(p) != self_rel_path)
                .cloned()
                .collect();
            if rel_paths.is_empty() {
                return None;
            }
            let body = node.child_by_field_name("body")?;
            let insert_at = body.start_byte();
            let indent_col = body.start_position().column;
            let indent = " ".repeat(indent_col);

            let block = render_block(&rel_paths, &indent, line_ending, include_line_numbers);
            let mut inner = String::new();
            inner.push_str(line_ending);
            inner.push_str(&block);
            inner.push_str(&indent);

            let mut literal = Vec::new();
            literal.extend_from_slice(b"\"\"\"");
            literal.extend_from_slice(inner.as_bytes());
            literal.extend_from_slice(b"\"\"\"");
            literal.extend_from_slice(line_ending.as_bytes());
            literal.extend_from_slice(indent.as_bytes());

            Some(EditPlan::InsertDocstring {
                at: insert_at,
                bytes: literal,
            })
        }
    }
}

/// Locate `construct`'s definition node by `(kind, name, line)`. If
/// multiple candidates share a line, the one whose byte span most tightly
/// contains it wins.
fn locate_node<'a>(root: Node<'a>, src: &[u8], construct: &Construct) -> Option<Node<'a>> {
    let mut best: Option<Node<'a>> = None;
    locate_recurse(root, src, construct, &mut best);
    best
}

fn locate_recurse<'a>(
    node: Node<'a>,
    src: &[u8],
    construct: &Construct,
    best: &mut Option<Node<'a>>,
) {
    if construct.kind == ConstructKind::Module && node.kind() == "module" {
        *best = Some(node);
    }

    let matches_kind = matches!(
        (construct.kind, node.kind()),
        (ConstructKind::Class, "class_definition")
            | (ConstructKind::Function, "function_definition")
            | (ConstructKind::Method, "function_definition")
    );
    if matches_kind {
        let line = node.start_position().row + 1;
        let name_matches = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(src).ok())
            == Some(construct.name.as_str());
        if line == construct.line && name_matches {
            let span = node.end_byte() - node.start_byte();
            let better = match best {
                Some(b) => span < (b.end_byte() - b.start_byte()),
                None => true,
            };
            if better {
                *best = Some(node);
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        locate_recurse(child, src, construct, best);
    }
}

/// Merge an existing `"Used in:"` block (if any) with `rel_paths`, returning
/// `(new_inner_text, changed)`. `changed` is false when the existing block
/// already matches the canonical form for `rel_paths` (round-trip
/// stability).
fn merge_used_in_block(
    raw_inner: &str,
    rel_paths: &[String],
    indent: &str,
    line_ending: &str,
    multiline_style: bool,
    include_line_numbers: bool,
    self_rel_path: &str,
) -> (String, bool) {
    let lines: Vec<&str> = split_keep_ends(raw_inner);

    let used_in_idx = lines
        .iter()
        .position(|l| l.trim_end_matches(['\n', '\r']).trim() == USED_IN_HEADER);

    let (prefix_end, bullets_end, old_paths) = match used_in_idx {
        Some(idx) => {
            let mut end = idx + 1;
            let mut paths = Vec::new();
            while end < lines.len() {
                if let Some(p) = parse_bullet(lines[end]) {
                    paths.push(p);
                    end += 1;
                } else {
                    break;
                }
            }
            let removal_start = if idx > 0 && lines[idx - 1].trim().is_empty() {
                idx - 1
            } else {
                idx
            };
            (removal_start, end, paths)
        }
        None => (lines.len(), lines.len(), Vec::new()),
    };

    let mut merged: BTreeSet<String> = old_paths
        .into_iter()
        .map(|p| normalize_path(&p))
        .filter(|p| p != self_rel_path)
        .collect();
    for p in rel_paths {
        let normalized = normalize_path(p);
        if normalized != self_rel_path {
            merged.insert(normalized);
        }
    }
    let merged_sorted: Vec<String> = merged.into_iter().collect();

    if merged_sorted.is_empty() {
        // Nothing to show; leave any existing block untouched rather than
        // emitting an empty block.
        return (raw_inner.to_string(), false);
    }

    let prefix: String = lines[..prefix_end].concat();
    let suffix: String = lines[bullets_end..].concat();

    let prefix_trimmed = prefix.trim_end_matches(|c: char| c.is_whitespace());
    let has_prior_content = !prefix_trimmed.is_empty();

    let block = render_block(&merged_sorted, indent, line_ending, include_line_numbers);

    let mut new_inner = String::new();
    new_inner.push_str(prefix_trimmed);
    if has_prior_content {
        new_inner.push_str(line_ending);
        new_inner.push_str(line_ending);
    } else {
        new_inner.push_str(line_ending);
    }
    new_inner.push_str(&block);

    if multiline_style || used_in_idx.is_some() {
        new_inner.push_str(indent);
    }
    new_inner.push_str(suffix.trim_start_matches(|c: char| c == ' ' || c == '\t'));

    let changed = new_inner != raw_inner;
    (new_inner, changed)
}

/// Render the canonical `Used in:` block, each line indented by
/// `indent` and terminated with `line_ending`.
fn render_block(paths: &[String], indent: &str, line_ending: &str, include_line_numbers: bool) -> String {
    let _ = include_line_numbers; // default format omits line numbers
    let mut out = String::new();
    out.push_str(indent);
    out.push_str(USED_IN_HEADER);
    out.push_str(line_ending);
    for p in paths {
        out.push_str(indent);
        out.push_str("- ");
        out.push_str(p);
        out.push_str(line_ending);
    }
    out
}

fn parse_bullet(line: &str) -> Option<String> {
    let trimmed_end = line.trim_end_matches(['\n', '\r']);
    let trimmed = trimmed_end.trim_start();
    let rest = trimmed.strip_prefix('-')?;
    let rest = rest.strip_prefix(' ')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.trim_end().to_string())
}

fn split_keep_ends(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = s.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] == b'\n' {
            out.push(&s[start..=i]);
            start = i + 1;
        }
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

/// Forward-slash normalized path, used both for display and for
/// deduplication.
fn normalize_path(p: &str) -> String {
    p.trim().replace('\\', "/")
}

pub fn relative_posix_path(project_root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(project_root).unwrap_or(file);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Choose the safest quote style for `content`: default to the
/// original style, upgraded to a triple-quote if the original was a
/// single-line literal; switch to the alternate triple-quote on collision;
/// fall back to escaping inside the original style if both collide. Drops
/// a raw-string prefix if escaping introduced a meaningful backslash.
fn select_quote_style(
    content: &str,
    original: QuoteKind,
    raw_prefix: Option<&str>,
) -> (QuoteKind, String, Option<String>) {
    let base = if original.is_triple() {
        original
    } else {
        QuoteKind::TripleDouble
    };

    if !content.contains(base.delimiter()) {
        return (base, content.to_string(), raw_prefix.map(str::to_string));
    }

    let alt = base.alternate_triple();
    if !content.contains(alt.delimiter()) {
        return (alt, content.to_string(), raw_prefix.map(str::to_string));
    }

    let escaped = content.replace(base.delimiter(), &format!("\\{}", base.delimiter()));
    let kept_prefix = raw_prefix.filter(|_| !escaped.contains('\\'));
    (base, escaped, kept_prefix.map(str::to_string))
}

fn detect_line_ending(bytes: &[u8]) -> &'static str {
    let crlf = bytes.windows(2).filter(|w| *w == b"\r\n").count();
    let total_newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    if total_newlines > 0 && crlf * 2 > total_newlines {
        "\r\n"
    } else {
        "\n"
    }
}

/// Excise an existing `"Used in:"` block (clean mode). Returns
/// `None` if there is nothing to clean.
pub fn clean(
    file: &Path,
    original_bytes: &[u8],
    constructs: &[Construct],
) -> RewriteOutcome {
    let mut parser = TsParser::new();
    if parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return RewriteOutcome::RolledBack {
            reason: "grammar failed to load".to_string(),
        };
    }
    let Some(tree) = parser.parse(original_bytes, None) else {
        return RewriteOutcome::RolledBack {
            reason: "original file failed to parse".to_string(),
        };
    };

    let mut splices: Vec<(usize, usize, Vec<u8>)> = Vec::new();
    let mut any_change = false;

    for construct in constructs {
        let Some(doc) = &construct.existing_docstring else {
            continue;
        };
        let Some(target) = locate_node(tree.root_node(), original_bytes, construct) else {
            continue;
        };
        let _ = target;

        let raw_inner =
            match std::str::from_utf8(&original_bytes[doc.content_range.0..doc.content_range.1]) {
                Ok(s) => s,
                Err(_) => continue,
            };
        let lines = split_keep_ends(raw_inner);
        let Some(idx) = lines
            .iter()
            .position(|l| l.trim_end_matches(['\n', '\r']).trim() == USED_IN_HEADER)
        else {
            continue;
        };
        let mut end = idx + 1;
        while end < lines.len() && parse_bullet(lines[end]).is_some() {
            end += 1;
        }
        let removal_start = if idx > 0 && lines[idx - 1].trim().is_empty() {
            idx - 1
        } else {
            idx
        };
        let prefix: String = lines[..removal_start].concat();
        let suffix: String = lines[end..].concat();
        let prefix_trimmed = prefix.trim_end_matches(|c: char| c.is_whitespace());

        let entirely_generated = prefix_trimmed.is_empty();

        if entirely_generated {
            // The docstring was only ever the generated block: drop the
            // whole literal, including its surrounding whitespace up to
            // the construct's indentation.
            any_change = true;
            splices.push((doc.literal_range.0, doc.literal_range.1, Vec::new()));
            continue;
        }

        let indent = " ".repeat(doc.indent);
        let mut new_inner = String::new();
        new_inner.push_str(prefix_trimmed);
        new_inner.push_str(&indent);
        new_inner.push_str(suffix.trim_start_matches(|c: char| c == ' ' || c == '\t'));

        if new_inner == raw_inner {
            continue;
        }
        any_change = true;
        let mut literal = Vec::new();
        if let Some(p) = &doc.raw_prefix {
            literal.extend_from_slice(p.as_bytes());
        }
        literal.extend_from_slice(doc.quote.delimiter().as_bytes());
        literal.extend_from_slice(new_inner.as_bytes());
        literal.extend_from_slice(doc.quote.delimiter().as_bytes());
        splices.push((doc.literal_range.0, doc.literal_range.1, literal));
    }

    if !any_change {
        return RewriteOutcome::Unchanged;
    }

    splices.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = original_bytes.to_vec();
    for (start, end, replacement) in splices {
        out.splice(start..end, replacement);
    }

    let mut verify_parser = TsParser::new();
    if verify_parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return RewriteOutcome::RolledBack {
            reason: "grammar failed to load during safety gate".to_string(),
        };
    }
    match verify_parser.parse(&out, None) {
        Some(new_tree) if !new_tree.root_node().has_error() => RewriteOutcome::Modified(out),
        _ => RewriteOutcome::RolledBack {
            reason: "cleaned source failed the safety gate".to_string(),
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructKind, Reference};
    use crate::parser::parse_file;
    use pretty_assertions::assert_eq;

    fn edits_for(constructs: &[Construct], refs_by_name: &[(&str, Vec<&str>)]) -> Vec<(Construct, ReferenceSet, Vec<String>)> {
        constructs
            .iter()
            .filter_map(|c| {
                refs_by_name
                    .iter()
                    .find(|(n, _)| *n == c.fully_qualified_name)
                    .map(|(_, paths)| {
                        let mut rs = ReferenceSet::new();
                        for p in paths {
                            rs.push(Reference {
                                file: std::path::PathBuf::from(p),
                                line: 1,
                                column: None,
                                context_line: None,
                            });
                        }
                        (c.clone(), rs, paths.iter().map(|s| s.to_string()).collect())
                    })
            })
            .collect()
    }

    #[test]
    fn inserts_new_docstring_with_used_in_block() {
        let src = b"def f():\n    return 1\n";
        let constructs = parse_file(Path::new("a.py"), src).unwrap();
        let edits = edits_for(&constructs, &[("f", vec!["b.py"])]);
        match rewrite(Path::new("a.py"), src, edits, true, false, Path::new(".")) {
            RewriteOutcome::Modified(out) => {
                let text = String::from_utf8(out).unwrap();
                assert_eq!(
                    text,
                    "def f():\n    \"\"\"\n    Used in:\n    - b.py\n    \"\"\"\n    return 1\n"
                );
            }
            _ => panic!("expected modification"),
        }
    }

    #[test]
    fn round_trips_when_nothing_needs_updating() {
        let src = b"def f():\n    \"\"\"Hi.\"\"\"\n    return 1\n";
        let constructs = parse_file(Path::new("a.py"), src).unwrap();
        let edits = edits_for(&constructs, &[]);
        match rewrite(Path::new("a.py"), src, edits, true, false, Path::new(".")) {
            RewriteOutcome::Unchanged => {}
            _ => panic!("expected no-op"),
        }
    }

    #[test]
    fn merges_with_existing_used_in_block() {
        let src = b"class C:\n    \"\"\"Greeter.\n\n    Used in:\n    - old/x.py\n    \"\"\"\n    pass\n";
        let constructs = parse_file(Path::new("m.py"), src).unwrap();
        let edits = edits_for(&constructs, &[("C", vec!["new/y.py"])]);
        match rewrite(Path::new("m.py"), src, edits, true, false, Path::new(".")) {
            RewriteOutcome::Modified(out) => {
                let text = String::from_utf8(out).unwrap();
                assert!(text.contains("- new/y.py"));
                assert!(text.contains("- old/x.py"));
                assert!(text.contains("Greeter."));
                let new_pos = text.find("new/y.py").unwrap();
                let old_pos = text.find("old/x.py").unwrap();
                assert!(new_pos < old_pos, "paths must be sorted lexicographically");
            }
            _ => panic!("expected modification"),
        }
    }

    #[test]
    fn clean_removes_generated_only_docstring() {
        let src = b"def g():\n    \"\"\"Used in:\n    - a.py\n    \"\"\"\n    pass\n";
        let constructs = parse_file(Path::new("m.py"), src).unwrap();
        match clean(Path::new("m.py"), src, &constructs) {
            RewriteOutcome::Modified(out) => {
                let text = String::from_utf8(out).unwrap();
                assert!(!text.contains("Used in:"));
            }
            _ => panic!("expected modification"),
        }
    }

    #[test]
    fn clean_keeps_summary_when_present() {
        let src = b"class C:\n    \"\"\"Greeter.\n\n    Used in:\n    - old/x.py\n    \"\"\"\n    pass\n";
        let constructs = parse_file(Path::new("m.py"), src).unwrap();
        match clean(Path::new("m.py"), src, &constructs) {
            RewriteOutcome::Modified(out) => {
                let text = String::from_utf8(out).unwrap();
                assert!(text.contains("Greeter."));
                assert!(!text.contains("Used in:"));
            }
            _ => panic!("expected modification"),
        }
    }
}
