//! Leaky bucket enforcing a minimum gap between acquisitions.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Paces callers so that successive acquisitions are at least `1/rate`
/// apart. All wiki traffic funnels through one of these.
#[derive(Debug)]
pub struct LeakyBucket {
    min_gap: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl LeakyBucket {
    /// Bucket releasing at most `rate` acquisitions per `period`.
    pub fn new(rate: u32, period: Duration) -> Self {
        let rate = rate.max(1);
        Self {
            min_gap: period / rate,
            last_release: Mutex::new(None),
        }
    }

    /// Convenience constructor for per-minute rates.
    pub fn per_minute(rate: u32) -> Self {
        Self::new(rate, Duration::from_secs(60))
    }

    /// Block until the minimum gap since the previous acquisition has
    /// elapsed.
    pub async fn acquire(&self) {
        let mut last = self.last_release.lock().await;
        if let Some(prev) = *last {
            let release_at = prev + self.min_gap;
            if release_at > Instant::now() {
                tokio::time::sleep_until(release_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
