//! Hybrid analyzer (C5): orchestrates backends (C4) behind one
//! `find_references`, merging results with predictable semantics — either
//! the tiered strategy (ordered backends, per-backend thresholds,
//! short-circuit) or the consensus strategy (two backends, Jaccard-style
//! overlap decides intersection vs union). Backend failures are non-fatal:
//! a panicking/erroring backend call is caught and treated as an empty
//! result, governed by the remaining backends.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use crate::backend::{Backend, FindReferences};
use crate::config::AnalyzerStrategyConfig;
use crate::model::{Construct, Reference, ReferenceSet, reference_keys};

/// The two supported backend-merge strategies.
#[derive(Debug, Clone)]
pub enum HybridStrategy {
    /// Ordered backends with per-backend sufficient-result thresholds.
    Tiered { thresholds: Vec<usize> },
    /// Two backends, consensus by overlap ratio.
    Consensus { overlap_ratio: f64 },
}

impl From<&AnalyzerStrategyConfig> for HybridStrategy {
    fn from(cfg: &AnalyzerStrategyConfig) -> Self {
        match cfg {
            AnalyzerStrategyConfig::Tiered { thresholds } => HybridStrategy::Tiered {
                thresholds: thresholds.clone(),
            },
            AnalyzerStrategyConfig::Consensus { overlap_ratio } => HybridStrategy::Consensus {
                overlap_ratio: *overlap_ratio,
            },
        }
    }
}

/// Combines `backends` into one `find_references` according to `strategy`.
pub struct HybridAnalyzer {
    backends: Vec<Backend>,
    strategy: HybridStrategy,
}

impl HybridAnalyzer {
    pub fn new(backends: Vec<Backend>, strategy: HybridStrategy) -> Self {
        Self { backends, strategy }
    }

    /// Invoke `backend`, catching panics and treating them (and backend
    /// errors, which this design expresses as empty `Vec`s) as an empty
    /// result — a single misbehaving backend never poisons the merge.
    fn invoke(backend: &Backend, construct: &Construct, files: &[PathBuf]) -> Vec<Reference> {
        let result = catch_unwind(AssertUnwindSafe(|| backend.find_references(construct, files)));
        match result {
            Ok(refs) => refs,
            Err(_) => {
                tracing::warn!(backend = backend.name(), "backend panicked; treating as empty result");
                Vec::new()
            }
        }
    }

    pub fn find_references(&self, construct: &Construct, search_files: &[PathBuf]) -> ReferenceSet {
        match &self.strategy {
            HybridStrategy::Tiered { thresholds } => self.tiered(construct, search_files, thresholds),
            HybridStrategy::Consensus { overlap_ratio } => {
                self.consensus(construct, search_files, *overlap_ratio)
            }
        }
    }

    fn tiered(
        &self,
        construct: &Construct,
        search_files: &[PathBuf],
        thresholds: &[usize],
    ) -> ReferenceSet {
        let mut union = ReferenceSet::new();
        for (backend, threshold) in self.backends.iter().zip(thresholds.iter().chain(std::iter::repeat(&usize::MAX))) {
            let refs = Self::invoke(backend, construct, search_files);
            if refs.len() >= *threshold {
                return ReferenceSet::from_iter_dedup(refs);
            }
            for r in refs {
                union.push(r);
            }
        }
        union
    }

    fn consensus(&self, construct: &Construct, search_files: &[PathBuf], overlap_ratio: f64) -> ReferenceSet {
        let Some(backend_a) = self.backends.first() else {
            return ReferenceSet::new();
        };
        let Some(backend_b) = self.backends.get(1) else {
            return ReferenceSet::from_iter_dedup(Self::invoke(backend_a, construct, search_files));
        };

        let a = Self::invoke(backend_a, construct, search_files);
        let b = Self::invoke(backend_b, construct, search_files);

        let a_set = ReferenceSet::from_iter_dedup(a.iter().cloned());
        let b_set = ReferenceSet::from_iter_dedup(b.iter().cloned());
        let a_keys = reference_keys(&a_set);
        let b_keys = reference_keys(&b_set);

        let union_len = a_keys.union(&b_keys).count();
        let intersection_len = a_keys.intersection(&b_keys).count();

        if union_len == 0 {
            return ReferenceSet::new();
        }

        if intersection_len as f64 >= overlap_ratio * union_len as f64 {
            // High confidence: intersection only, preserving A's order.
            let mut out = ReferenceSet::new();
            for r in a_set.iter() {
                if b_keys.contains(&(r.file.clone(), r.line)) {
                    out.push(r.clone());
                }
            }
            out
        } else {
            // Comprehensive coverage: union, order of first appearance.
            let mut out = ReferenceSet::new();
            for r in a_set.into_vec().into_iter().chain(b_set.into_vec()) {
                out.push(r);
            }
            out
        }
    }
}
