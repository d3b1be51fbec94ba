//! Error types for the wiki client.

use thiserror::Error;

/// Result type for wiki operations.
pub type Result<T> = std::result::Result<T, WikiError>;

/// Errors surfaced by the wiki client. Transient fetch problems are not
/// errors at this level: lookups return `None`/`ERROR` statuses and the
/// pipeline continues. Only cache persistence failures — which would lose
/// state — are hard errors.
#[derive(Debug, Error)]
pub enum WikiError {
    /// Failed to write a cache file to disk.
    #[error("failed to persist cache '{name}': {source}")]
    CachePersist {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize a cache before writing.
    #[error("failed to serialize cache '{name}': {source}")]
    CacheSerialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}
