//! Pipeline (C9): composes C1–C8, owns lifecycle, cancellation and error
//! aggregation. This is the crate's single public entry point — everything
//! upstream of it (file discovery, config-file loading, CLI flags) is an
//! external collaborator rather than something this crate owns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, DeepSemanticBackend, FastSymbolBackend, LintDrivenBackend, StructuralPatternBackend};
use crate::cache::{self, AnalysisCache, ParseCache};
use crate::config::PipelineConfig;
use crate::hybrid::{HybridAnalyzer, HybridStrategy};
use crate::model::{Construct, ConstructKey, ReferenceSet};
use crate::parser::parse_file;
use crate::rewriter::{self, RewriteOutcome};
use crate::store::{self, ContentHash};

/// The outcome of rewriting (or attempting to rewrite) one edit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file's bytes on disk are unchanged (either nothing to add, or
    /// `dry_run` suppressed the write).
    Unchanged,
    /// The file was rewritten and passed the safety gate.
    Modified,
    /// The rewrite failed the safety gate; original bytes are preserved.
    RolledBack { reason: String },
    /// The file could not even be read/parsed; no constructs were produced
    /// and no write was attempted.
    Skipped { reason: String },
}

/// Per-run summary returned by [`Pipeline::run`]: one outcome per edit
/// file (sorted by path for deterministic enumeration) plus the full
/// `construct -> ReferenceSet` mapping for
/// inspection, plus whether cancellation truncated the run.
pub struct RunSummary {
    pub file_outcomes: Vec<(PathBuf, FileOutcome)>,
    pub references: HashMap<ConstructKey, ReferenceSet>,
    pub truncated: bool,
}

impl RunSummary {
    /// Nonzero iff any file rolled back, or the run was cancelled before
    /// completion.
    pub fn exit_is_nonzero(&self) -> bool {
        self.truncated
            || self
                .file_outcomes
                .iter()
                .any(|(_, o)| matches!(o, FileOutcome::RolledBack { .. }))
    }
}

/// The pipeline glue (C9): given edit files, reference files and a project
/// root, runs the full parse -> analyze -> rewrite flow.
pub struct Pipeline {
    config: PipelineConfig,
    parse_cache: Arc<ParseCache>,
    analysis_cache: Arc<AnalysisCache>,
    analyzer: Arc<HybridAnalyzer>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let parse_cache = Arc::new(ParseCache::open(&config.cache_dir));
        let analysis_cache = Arc::new(AnalysisCache::open(&config.cache_dir));
        let backends = default_backends();
        let strategy = HybridStrategy::from(&config.analyzer_strategy);
        let analyzer = Arc::new(HybridAnalyzer::new(backends, strategy));
        Self {
            config,
            parse_cache,
            analysis_cache,
            analyzer,
        }
    }

    /// Run the full pipeline against `edit_files` and `reference_files`
    /// under `project_root`.
    pub async fn run(
        &self,
        edit_files: &[PathBuf],
        reference_files: &[PathBuf],
        project_root: &Path,
        cancel: CancellationToken,
    ) -> RunSummary {
        // Step 2: compute the corpus fingerprint once for this run.
        let corpus_entries: Vec<(PathBuf, ContentHash, u128)> = reference_files
            .par_iter()
            .filter_map(|f| {
                let read = store::read(f).ok()?;
                Some((f.clone(), read.content_hash, read.mtime_ns))
            })
            .collect();
        let corpus_fingerprint = Arc::new(cache::corpus_fingerprint(&corpus_entries));
        let reference_files = Arc::new(reference_files.to_vec());

        // Step 3: parse every edit file, in parallel, through the parse
        // cache (C2/C3). A file that cannot be read/parsed at all is
        // skipped; a file tree-sitter can still anchor on yields a bare
        // Module construct even when nothing else parses.
        struct ParsedFile {
            path: PathBuf,
            content_hash: ContentHash,
            constructs: Vec<Construct>,
            read_error: Option<String>,
        }

        let parsed: Vec<ParsedFile> = edit_files
            .par_iter()
            .map(|path| {
                let read = match store::read(path) {
                    Ok(r) => r,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "could not read edit file");
                        return ParsedFile {
                            path: path.clone(),
                            content_hash: ContentHash::of(b""),
                            constructs: Vec::new(),
                            read_error: Some(err.to_string()),
                        };
                    }
                };
                if let Some(cached) = self.parse_cache.get(read.content_hash, read.mtime_ns) {
                    return ParsedFile {
                        path: path.clone(),
                        content_hash: read.content_hash,
                        constructs: cached,
                        read_error: None,
                    };
                }
                let constructs = match parse_file(path, &read.bytes) {
                    Ok(c) => c,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "parse failed");
                        Vec::new()
                    }
                };
                self.parse_cache
                    .put(read.content_hash, read.mtime_ns, constructs.clone());
                ParsedFile {
                    path: path.clone(),
                    content_hash: read.content_hash,
                    constructs,
                    read_error: None,
                }
            })
            .collect();

        // Step 4/5: dispatch every construct to the executor -> analysis
        // cache -> hybrid analyzer -> backends, then filter self-references.
        let mut constructs_for_executor = Vec::new();
        for p in &parsed {
            for c in &p.constructs {
                constructs_for_executor.push((c.clone(), p.content_hash));
            }
        }

        let executor = crate::executor::ParallelExecutor::new(
            self.analyzer.clone(),
            self.analysis_cache.clone(),
            self.config.worker_count,
            Duration::from_millis(self.config.per_task_timeout_ms),
        );
        let outcome = executor
            .run(
                constructs_for_executor,
                reference_files,
                corpus_fingerprint,
                cancel.clone(),
            )
            .await;

        let mut references = outcome.results;
        for (key, refs) in references.iter_mut() {
            refs.retain_excluding_file(&key.file);
        }

        if cancel.is_cancelled() {
            return RunSummary {
                file_outcomes: sorted_outcomes(
                    edit_files
                        .iter()
                        .map(|f| (f.clone(), FileOutcome::Skipped { reason: "cancelled".into() }))
                        .collect(),
                ),
                references,
                truncated: true,
            };
        }

        // Step 6/7: group by defining file, rewrite, write.
        let mut file_outcomes = Vec::new();
        for p in &parsed {
            if let Some(reason) = &p.read_error {
                file_outcomes.push((p.path.clone(), FileOutcome::Skipped { reason: reason.clone() }));
                continue;
            }

            let edits: Vec<(Construct, ReferenceSet, Vec<String>)> = p
                .constructs
                .iter()
                .map(|c| {
                    let refs = references.get(&c.key()).cloned().unwrap_or_default();
                    let rel_paths = relative_paths(project_root, &refs);
                    (c.clone(), refs, rel_paths)
                })
                .collect();

            let original = match store::read(&p.path) {
                Ok(r) => r,
                Err(err) => {
                    file_outcomes.push((
                        p.path.clone(),
                        FileOutcome::Skipped { reason: err.to_string() },
                    ));
                    continue;
                }
            };

            let outcome = rewriter::rewrite(
                &p.path,
                &original.bytes,
                edits,
                self.config.update_module_docstrings,
                self.config.include_line_numbers,
                project_root,
            );

            let file_outcome = match outcome {
                RewriteOutcome::Unchanged => FileOutcome::Unchanged,
                RewriteOutcome::Modified(bytes) => {
                    if !self.config.dry_run {
                        if self.config.safe_mode {
                            let backup = backup_path(&p.path);
                            if let Err(err) = store::write_atomic(&backup, &original.bytes) {
                                tracing::warn!(path = %backup.display(), error = %err, "could not write safety backup");
                            }
                        }
                        if let Err(err) = store::write_atomic(&p.path, &bytes) {
                            tracing::error!(path = %p.path.display(), error = %err, "failed to write rewritten file");
                            file_outcomes.push((
                                p.path.clone(),
                                FileOutcome::Skipped { reason: err.to_string() },
                            ));
                            continue;
                        }
                    }
                    FileOutcome::Modified
                }
                RewriteOutcome::RolledBack { reason } => {
                    tracing::error!(path = %p.path.display(), reason = %reason, "rewrite rolled back");
                    FileOutcome::RolledBack { reason }
                }
            };
            file_outcomes.push((p.path.clone(), file_outcome));
        }

        RunSummary {
            file_outcomes: sorted_outcomes(file_outcomes),
            references,
            truncated: outcome.truncated,
        }
    }

    /// Clean mode: remove generated `Used in:` blocks from every construct
    /// in `edit_files` without running any analysis.
    pub async fn clean(&self, edit_files: &[PathBuf]) -> RunSummary {
        let mut file_outcomes = Vec::new();
        for path in edit_files {
            let original = match store::read(path) {
                Ok(r) => r,
                Err(err) => {
                    file_outcomes.push((path.clone(), FileOutcome::Skipped { reason: err.to_string() }));
                    continue;
                }
            };
            let constructs = match parse_file(path, &original.bytes) {
                Ok(c) => c,
                Err(err) => {
                    file_outcomes.push((path.clone(), FileOutcome::Skipped { reason: err.to_string() }));
                    continue;
                }
            };
            let outcome = rewriter::clean(path, &original.bytes, &constructs);
            let file_outcome = match outcome {
                RewriteOutcome::Unchanged => FileOutcome::Unchanged,
                RewriteOutcome::Modified(bytes) => {
                    if !self.config.dry_run {
                        if self.config.safe_mode {
                            let backup = backup_path(path);
                            let _ = store::write_atomic(&backup, &original.bytes);
                        }
                        if let Err(err) = store::write_atomic(path, &bytes) {
                            file_outcomes.push((path.clone(), FileOutcome::Skipped { reason: err.to_string() }));
                            continue;
                        }
                    }
                    FileOutcome::Modified
                }
                RewriteOutcome::RolledBack { reason } => FileOutcome::RolledBack { reason },
            };
            file_outcomes.push((path.clone(), file_outcome));
        }
        RunSummary {
            file_outcomes: sorted_outcomes(file_outcomes),
            references: HashMap::new(),
            truncated: false,
        }
    }
}

fn default_backends() -> Vec<Backend> {
    vec![
        Backend::FastSymbol(FastSymbolBackend),
        Backend::DeepSemantic(DeepSemanticBackend),
        Backend::StructuralPattern(StructuralPatternBackend),
        Backend::LintDriven(LintDrivenBackend),
    ]
}

fn sorted_outcomes(mut outcomes: Vec<(PathBuf, FileOutcome)>) -> Vec<(PathBuf, FileOutcome)> {
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}

fn backup_path(file: &Path) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".orig");
    file.with_file_name(name)
}

/// Compute, sort, and deduplicate the project-root-relative POSIX paths
/// for a reference set.
fn relative_paths(project_root: &Path, refs: &ReferenceSet) -> Vec<String> {
    let mut paths: Vec<String> = refs
        .iter()
        .map(|r| rewriter::relative_posix_path(project_root, &r.file))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.cache_dir = dir.join(".cache");
        cfg.worker_count = 2;
        cfg
    }

    #[tokio::test]
    async fn adds_used_in_block_across_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        fs::write(&a, "def f():\n    return 1\n").unwrap();
        fs::write(&b, "from a import f\nf()\n").unwrap();

        let pipeline = Pipeline::new(config_in(dir.path()));
        let summary = pipeline
            .run(&[a.clone()], &[b.clone()], dir.path(), CancellationToken::new())
            .await;

        assert!(!summary.exit_is_nonzero());
        let outcome = summary
            .file_outcomes
            .iter()
            .find(|(p, _)| p == &a)
            .unwrap();
        assert_eq!(outcome.1, FileOutcome::Modified);
        let rewritten = fs::read_to_string(&a).unwrap();
        assert!(rewritten.contains("Used in:"));
        assert!(rewritten.contains("- b.py"));
    }

    #[tokio::test]
    async fn self_reference_only_leaves_file_unchanged() {
        let dir = tempdir().unwrap();
        let s = dir.path().join("s.py");
        fs::write(&s, "def g():\n    return 1\n\ng()\n").unwrap();

        let pipeline = Pipeline::new(config_in(dir.path()));
        let summary = pipeline
            .run(&[s.clone()], &[s.clone()], dir.path(), CancellationToken::new())
            .await;

        let outcome = summary.file_outcomes.iter().find(|(p, _)| p == &s).unwrap();
        assert_eq!(outcome.1, FileOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&s).unwrap(), "def g():\n    return 1\n\ng()\n");
    }

    #[tokio::test]
    async fn dry_run_leaves_disk_untouched() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        fs::write(&a, "def f():\n    return 1\n").unwrap();
        fs::write(&b, "f()\n").unwrap();

        let mut cfg = config_in(dir.path());
        cfg.dry_run = true;
        let pipeline = Pipeline::new(cfg);
        let summary = pipeline
            .run(&[a.clone()], &[b.clone()], dir.path(), CancellationToken::new())
            .await;

        let outcome = summary.file_outcomes.iter().find(|(p, _)| p == &a).unwrap();
        assert_eq!(outcome.1, FileOutcome::Modified);
        assert_eq!(fs::read_to_string(&a).unwrap(), "def f():\n    return 1\n");
    }

    #[tokio::test]
    async fn clean_mode_removes_generated_blocks() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.py");
        fs::write(&a, "def f():\n    \"\"\"Used in:\n    - b.py\n    \"\"\"\n    return 1\n").unwrap();

        let pipeline = Pipeline::new(config_in(dir.path()));
        let summary = pipeline.clean(&[a.clone()]).await;
        let outcome = summary.file_outcomes.iter().find(|(p, _)| p == &a).unwrap();
        assert_eq!(outcome.1, FileOutcome::Modified);
        assert!(!fs::read_to_string(&a).unwrap().contains("Used in:"));
    }
}
