//! Error taxonomy for the pipeline.
//!
//! Every variant corresponds to one of the error *kinds* the pipeline
//! recognizes; most are recovered locally by the component that produced
//! them and never reach a caller. Only [`PipelineError::RewriteUnsafe`] and
//! [`PipelineError::Cancelled`] affect the overall exit status.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not read or write {path}: {source}")]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} could not be parsed at all: {reason}")]
    ParseHard { path: PathBuf, reason: String },

    #[error("{path} has recoverable syntax errors: {reason}")]
    ParseSoft { path: PathBuf, reason: String },

    #[error("backend {backend} failed for a construct: {reason}")]
    BackendFailure { backend: String, reason: String },

    #[error("analysis of a construct in {path} exceeded its timeout")]
    AnalysisTimeout { path: PathBuf },

    #[error("rewrite of {path} failed the safety gate: {reason}")]
    RewriteUnsafe { path: PathBuf, reason: String },

    #[error("cache entry at {key} is corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("pipeline run was cancelled")]
    Cancelled,

    #[error("(de)serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Whether this kind of error affects the pipeline's overall exit status.
    pub fn affects_exit_status(&self) -> bool {
        matches!(
            self,
            PipelineError::RewriteUnsafe { .. } | PipelineError::Cancelled
        )
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            PipelineError::SourceIo { path, .. }
            | PipelineError::ParseHard { path, .. }
            | PipelineError::ParseSoft { path, .. }
            | PipelineError::AnalysisTimeout { path }
            | PipelineError::RewriteUnsafe { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(src: serde_json::Error) -> Self {
        PipelineError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
