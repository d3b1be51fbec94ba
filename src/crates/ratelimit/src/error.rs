//! Error types for rate limiting.

use thiserror::Error;

/// Result type for rate-limiter operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors that can occur while pacing requests.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The daily request budget for this endpoint is exhausted.
    #[error("daily quota of {limit} requests exhausted for '{name}'")]
    DailyQuotaExceeded { name: String, limit: u32 },
}
