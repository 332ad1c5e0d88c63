//! Backend analyzer (C4): four concrete reference-finding strategies behind
//! one closed, `enum_dispatch`-ed capability rather than trait objects with
//! runtime type checks.

mod deep_semantic;
mod fast_symbol;
mod lint_driven;
mod structural_pattern;

use std::path::{Path, PathBuf};

use enum_dispatch::enum_dispatch;

use crate::model::{Construct, Reference};

pub use deep_semantic::DeepSemanticBackend;
pub use fast_symbol::FastSymbolBackend;
pub use lint_driven::LintDrivenBackend;
pub use structural_pattern::StructuralPatternBackend;

/// One concrete reference-finding strategy. Implementations must never
/// mutate files, must never panic across the boundary, and must return an
/// empty list (logging a warning) rather than propagate an internal
/// failure — backend errors are values, not panics.
#[enum_dispatch]
pub trait FindReferences {
    /// A short, stable name used in logs and in tiered-strategy bookkeeping.
    fn name(&self) -> &'static str;

    /// Return every candidate reference to `construct` across
    /// `search_files`. Self-references (the construct's own defining file)
    /// are returned here; filtering them out is the pipeline's job.
    fn find_references(&self, construct: &Construct, search_files: &[PathBuf]) -> Vec<Reference>;
}

/// The closed set of backends the hybrid analyzer can dispatch to.
#[enum_dispatch(FindReferences)]
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    FastSymbol(FastSymbolBackend),
    DeepSemantic(DeepSemanticBackend),
    StructuralPattern(StructuralPatternBackend),
    LintDriven(LintDrivenBackend),
}

/// Read `path`, logging and returning `None` on I/O failure — backends
/// never raise; a file that cannot be read is simply skipped.
pub(crate) fn read_lossy(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "backend could not read reference file");
            None
        }
    }
}

/// 1-based line and 0-based column of `byte_offset` within `text`.
pub(crate) fn line_col(text: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1usize;
    let mut col = 0usize;
    for (i, b) in text.as_bytes().iter().enumerate() {
        if i == byte_offset {
            break;
        }
        if *b == b'\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    (line, col)
}
