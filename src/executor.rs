//! Parallel executor (C7): applies the hybrid analyzer (via the analysis
//! cache) to each construct concurrently, bounded by `worker_count`, with a
//! per-construct timeout and a cancellation token that aborts pending work
//! while letting in-flight work reach its next checkpoint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::cache::AnalysisCache;
use crate::hybrid::HybridAnalyzer;
use crate::model::{Construct, ConstructKey, ReferenceSet};
use crate::store::ContentHash;

/// Result of one executor run: the per-construct mapping plus whether
/// cancellation cut the run short before every construct was analyzed.
///
/// Keyed by `ConstructKey` rather than the bare `Construct`: `Construct`'s
/// own identity is file-less (within-file distinctness only), which would
/// collide across the multiple files a single run analyzes.
pub struct ExecutorOutcome {
    pub results: HashMap<ConstructKey, ReferenceSet>,
    pub truncated: bool,
}

pub struct ParallelExecutor {
    analyzer: Arc<HybridAnalyzer>,
    cache: Arc<AnalysisCache>,
    worker_count: usize,
    per_task_timeout: Duration,
}

impl ParallelExecutor {
    pub fn new(
        analyzer: Arc<HybridAnalyzer>,
        cache: Arc<AnalysisCache>,
        worker_count: usize,
        per_task_timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            cache,
            worker_count,
            per_task_timeout,
        }
    }

    /// Run the hybrid analyzer for every `(construct, defining_file_hash)`
    /// pair against `search_files`, fanning out up to `worker_count`
    /// concurrent tasks. `cancel` aborts pending tasks; in-flight tasks are
    /// allowed to finish their current checkpoint. A per-task timeout
    /// yields an empty `ReferenceSet` for that construct only.
    pub async fn run(
        &self,
        constructs: Vec<(Construct, ContentHash)>,
        search_files: Arc<Vec<PathBuf>>,
        corpus_fingerprint: Arc<String>,
        cancel: CancellationToken,
    ) -> ExecutorOutcome {
        let semaphore = Arc::new(Semaphore::new(self.worker_count.max(1)));
        let mut handles = Vec::with_capacity(constructs.len());

        for (construct, file_hash) in constructs {
            let semaphore = semaphore.clone();
            let analyzer = self.analyzer.clone();
            let cache = self.cache.clone();
            let search_files = search_files.clone();
            let corpus_fingerprint = corpus_fingerprint.clone();
            let cancel = cancel.clone();
            let timeout = self.per_task_timeout;

            let handle = tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                if cancel.is_cancelled() {
                    return None;
                }

                if let Some(cached) = cache.get(file_hash, &construct, &corpus_fingerprint) {
                    return Some((construct, cached));
                }

                let construct_for_task = construct.clone();
                let refs = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = tokio::time::timeout(timeout, run_analysis(analyzer, construct_for_task, search_files)) => {
                        match result {
                            Ok(refs) => Some(refs),
                            Err(_) => {
                                tracing::warn!(
                                    construct = %construct.fully_qualified_name,
                                    "analysis timed out; using empty reference set"
                                );
                                Some(ReferenceSet::new())
                            }
                        }
                    }
                };

                let refs = refs?;
                cache.put(file_hash, &construct, &corpus_fingerprint, &refs);
                Some((construct, refs))
            });
            handles.push(handle);
        }

        let mut results = HashMap::new();
        let mut truncated = false;
        for handle in handles {
            match handle.await {
                Ok(Some((construct, refs))) => {
                    results.insert(construct.key(), refs);
                }
                Ok(None) => {
                    truncated = true;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "a construct analysis task panicked; isolated from the rest of the executor");
                    truncated = true;
                }
            }
        }

        ExecutorOutcome { results, truncated }
    }
}

async fn run_analysis(
    analyzer: Arc<HybridAnalyzer>,
    construct: Construct,
    search_files: Arc<Vec<PathBuf>>,
) -> ReferenceSet {
    // The hybrid analyzer and its backends are synchronous/CPU-and-IO bound;
    // run them on a blocking thread so they don't starve the async runtime
    // while still honoring the timeout/cancellation wrapped around this call.
    let result = tokio::task::spawn_blocking(move || analyzer.find_references(&construct, &search_files)).await;
    result.unwrap_or_else(|err| {
        tracing::warn!(error = %err, "analysis task panicked; using empty reference set");
        ReferenceSet::new()
    })
}
