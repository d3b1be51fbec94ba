//! Request pacing primitives shared by every outbound client.
//!
//! Two complementary mechanisms:
//!
//! - [`ApiRateLimiter`] combines a sliding-window requests-per-minute check
//!   with an optional persistent requests-per-day counter. LLM endpoints get
//!   one limiter per model; when the daily budget is gone the limiter refuses
//!   with [`RateLimitError::DailyQuotaExceeded`] and the caller substitutes a
//!   safe default.
//! - [`LeakyBucket`] enforces a minimum gap between successive acquisitions
//!   and paces every wiki request from a shared IP.

pub mod error;
pub mod leaky;
pub mod limiter;

pub use error::{RateLimitError, Result};
pub use leaky::LeakyBucket;
pub use limiter::ApiRateLimiter;
