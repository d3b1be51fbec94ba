//! Error type for pipeline operations.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Unified error for the pipeline crates' operations. Per-item problems are
/// logged and skipped; what reaches this type is the class of failure that
/// must stop the run (lost persistence, bad configuration).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// File I/O failure on pipeline-owned state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Master-graph persistence failure.
    #[error(transparent)]
    GraphIo(#[from] graph::GraphIoError),

    /// Wiki cache persistence failure.
    #[error(transparent)]
    Wiki(#[from] wiki::WikiError),

    /// LLM service construction failure.
    #[error(transparent)]
    Llm(#[from] llm::LlmError),
}
