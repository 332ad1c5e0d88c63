//! Core data model: constructs, references, and the logical reference corpus.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A named definition discovered by the parser.
///
/// A `Method` is any function whose innermost enclosing named scope is a
/// class; all other defs are `Function`. Nested functions inside a function
/// inside a class are still `Function`, never `Method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructKind {
    Module,
    Class,
    Function,
    Method,
}

/// The raw quote style of a docstring literal, retained so the rewriter can
/// re-emit content using the same delimiter the author chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteKind {
    TripleDouble,
    TripleSingle,
    Double,
    Single,
}

impl QuoteKind {
    pub fn delimiter(self) -> &'static str {
        match self {
            QuoteKind::TripleDouble => "\"\"\"",
            QuoteKind::TripleSingle => "'''",
            QuoteKind::Double => "\"",
            QuoteKind::Single => "'",
        }
    }

    pub fn is_triple(self) -> bool {
        matches!(self, QuoteKind::TripleDouble | QuoteKind::TripleSingle)
    }

    pub fn alternate_triple(self) -> QuoteKind {
        match self {
            QuoteKind::TripleDouble | QuoteKind::Double => QuoteKind::TripleSingle,
            QuoteKind::TripleSingle | QuoteKind::Single => QuoteKind::TripleDouble,
        }
    }
}

/// The existing docstring of a construct, with enough raw information to
/// reconstruct its literal losslessly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocstringLiteral {
    /// Dequoted, dedented, trimmed text.
    pub text: String,
    pub quote: QuoteKind,
    /// `Some(prefix)` for a raw-string literal (`r"""..."""`).
    pub raw_prefix: Option<String>,
    /// Byte range of the entire literal expression, including quotes.
    pub literal_range: (usize, usize),
    /// Byte range of the literal's inner content, excluding quotes.
    pub content_range: (usize, usize),
    /// Indentation (in spaces) of the line the literal starts on.
    pub indent: usize,
}

/// The unit of analysis: a module, class, function, or method with a known
/// location and (possibly absent) existing docstring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Construct {
    pub name: String,
    pub kind: ConstructKind,
    pub file: PathBuf,
    /// 1-based line of the `def`/`class` keyword, or 1 for a module.
    pub line: usize,
    pub fully_qualified_name: String,
    pub existing_docstring: Option<DocstringLiteral>,
    /// Byte range of the construct's header + body.
    pub span: (usize, usize),
}

impl PartialEq for Construct {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.fully_qualified_name == other.fully_qualified_name
            && self.line == other.line
    }
}

impl Eq for Construct {}

impl Hash for Construct {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.fully_qualified_name.hash(state);
        self.line.hash(state);
    }
}

/// Identity key for `Construct` across file boundaries: the bare `Construct`
/// equality/hash deliberately drops `file` (two constructs at the same kind,
/// name, and line within one file are the same definition), which makes it
/// unsafe as a key in any map that aggregates results across multiple files
/// — two files can each define, say, a `setup` function on the same line
/// number and collide. `ConstructKey` carries `file` for exactly those maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstructKey {
    pub file: PathBuf,
    pub kind: ConstructKind,
    pub fully_qualified_name: String,
    pub line: usize,
}

impl Construct {
    pub fn key(&self) -> ConstructKey {
        ConstructKey {
            file: self.file.clone(),
            kind: self.kind,
            fully_qualified_name: self.fully_qualified_name.clone(),
            line: self.line,
        }
    }
}

/// A usage site in the reference corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub file: PathBuf,
    pub line: usize,
    pub column: Option<usize>,
    pub context_line: Option<String>,
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file && self.line == other.line
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file.hash(state);
        self.line.hash(state);
    }
}

/// An ordered, duplicate-free sequence of references. Order is insertion
/// order from the merge policy; alphabetization happens only at
/// presentation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceSet {
    items: Vec<Reference>,
    seen: HashSet<(PathBuf, usize)>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter_dedup(refs: impl IntoIterator<Item = Reference>) -> Self {
        let mut set = Self::new();
        for r in refs {
            set.push(r);
        }
        set
    }

    /// Insert `r`, keeping insertion order. No-op if `(file, line)` already present.
    pub fn push(&mut self, r: Reference) -> bool {
        let key = (r.file.clone(), r.line);
        if self.seen.insert(key) {
            self.items.push(r);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Reference> {
        self.items
    }

    pub fn contains_key(&self, file: &Path, line: usize) -> bool {
        self.seen.contains(&(file.to_path_buf(), line))
    }

    /// Remove every reference whose file equals `defining_file` (self-reference removal).
    pub fn retain_excluding_file(&mut self, defining_file: &Path) {
        self.items.retain(|r| r.file != defining_file);
        self.seen.retain(|(f, _)| f != defining_file);
    }
}

/// Intersection / union helpers used by the consensus hybrid strategy.
pub fn reference_keys(set: &ReferenceSet) -> HashSet<(PathBuf, usize)> {
    set.iter().map(|r| (r.file.clone(), r.line)).collect()
}

/// Logical set of reference files. Its fingerprint is the unordered multiset
/// hash of `(path, content_hash, mtime)` over all members.
#[derive(Debug, Clone)]
pub struct SourceCorpus {
    pub files: Vec<PathBuf>,
}

impl SourceCorpus {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}
