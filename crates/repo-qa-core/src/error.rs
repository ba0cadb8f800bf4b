//! Error taxonomy for the indexing and query pipeline.
//!
//! Every variant is absorbed by the component that owns the failing stage
//! and converted into a degraded but structurally complete result. Only
//! [`PipelineError::IndexingInProgress`] is surfaced to callers, so the
//! service layer can report an already-running pass.

/// Failures raised inside the pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// Scope classifier unavailable. The workflow treats the query as in scope.
    #[error("scope classification failed: {0}")]
    Classification(String),

    /// Index or search unavailable. The workflow proceeds with empty context.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Answer generation unavailable. The workflow returns an apology.
    #[error("answer synthesis failed: {0}")]
    Synthesis(String),

    /// Persistence layer unavailable during a write.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// A single file failed during a bulk indexing pass.
    #[error("failed to index {path}: {reason}")]
    PartialIndex { path: String, reason: String },

    /// The embedding provider rejected or failed a request.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Content that cannot be treated as text.
    #[error("invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    /// A second indexing pass was requested while one is running.
    #[error("an indexing pass is already in progress")]
    IndexingInProgress,
}

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
