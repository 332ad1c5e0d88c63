//! Pipeline configuration: every knob the pipeline exposes, serde-
//! (de)serializable and validated with contextful errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Which hybrid merge strategy the analyzer (C5) uses, and its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AnalyzerStrategyConfig {
    /// Ordered backends, each with a "sufficient-result" threshold. The
    /// first backend whose result count reaches its threshold wins;
    /// otherwise the deduplicated union of all backends is returned.
    Tiered { thresholds: Vec<usize> },
    /// Two backends run eagerly; overlap above the Jaccard-style ratio
    /// yields the intersection, otherwise the union.
    Consensus {
        #[serde(default = "default_consensus_ratio")]
        overlap_ratio: f64,
    },
}

fn default_consensus_ratio() -> f64 {
    0.7
}

impl Default for AnalyzerStrategyConfig {
    fn default() -> Self {
        AnalyzerStrategyConfig::Tiered {
            thresholds: vec![3, 1, 1, usize::MAX],
        }
    }
}

/// Every knob the pipeline's configuration bag exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default)]
    pub analyzer_strategy: AnalyzerStrategyConfig,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_task_timeout_ms")]
    pub per_task_timeout_ms: u64,

    #[serde(default)]
    pub dry_run: bool,

    /// When set, a backup of each edited file's original bytes is written
    /// to a sibling `<file>.orig` path before the rewrite is applied.
    #[serde(default = "default_true")]
    pub safe_mode: bool,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Whether to append `(Line: N)` after each path. Defaults off.
    #[serde(default)]
    pub include_line_numbers: bool,

    /// Whether module-level docstrings participate at all. Default on.
    #[serde(default = "default_true")]
    pub update_module_docstrings: bool,
}

fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn default_task_timeout_ms() -> u64 {
    5_000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".docxref-cache")
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analyzer_strategy: AnalyzerStrategyConfig::default(),
            worker_count: default_worker_count(),
            per_task_timeout_ms: default_task_timeout_ms(),
            dry_run: false,
            safe_mode: true,
            cache_dir: default_cache_dir(),
            include_line_numbers: false,
            update_module_docstrings: true,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration values, surfacing context-rich errors the way
    /// with a specific reason rather than a generic failure.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(PipelineError::Serialization(
                "worker_count must be at least 1".to_string(),
            ));
        }
        match &self.analyzer_strategy {
            AnalyzerStrategyConfig::Tiered { thresholds } => {
                if thresholds.is_empty() {
                    return Err(PipelineError::Serialization(
                        "tiered strategy requires at least one backend threshold".to_string(),
                    ));
                }
            }
            AnalyzerStrategyConfig::Consensus { overlap_ratio } => {
                if !(0.0..=1.0).contains(overlap_ratio) {
                    return Err(PipelineError::Serialization(format!(
                        "consensus overlap_ratio {overlap_ratio} must be within [0.0, 1.0]"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.worker_count = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_overlap_ratio_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.analyzer_strategy = AnalyzerStrategyConfig::Consensus { overlap_ratio: 1.5 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_count, cfg.worker_count);
    }
}
