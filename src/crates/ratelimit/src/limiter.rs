//! Per-endpoint limiter: sliding-window RPM plus persistent daily RPD counter.

use crate::error::{RateLimitError, Result};
use chrono::{Local, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// On-disk shape of the daily counter file.
#[derive(Debug, Serialize, Deserialize)]
struct CounterFile {
    date: NaiveDate,
    count: u32,
}

/// Daily request counter persisted as `{date, count}` JSON.
///
/// The count resets whenever the stored date is not today.
#[derive(Debug)]
struct DailyCounter {
    path: PathBuf,
    date: NaiveDate,
    count: u32,
}

impl DailyCounter {
    fn load(path: PathBuf) -> Self {
        let today = Local::now().date_naive();
        let count = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<CounterFile>(&raw).ok())
            .filter(|file| file.date == today)
            .map(|file| file.count)
            .unwrap_or(0);
        let counter = Self {
            path,
            date: today,
            count,
        };
        counter.save();
        counter
    }

    /// Reset the count if the calendar day has rolled over since the last use.
    fn roll_over(&mut self) {
        let today = Local::now().date_naive();
        if self.date != today {
            self.date = today;
            self.count = 0;
            self.save();
        }
    }

    fn increment(&mut self) {
        self.roll_over();
        self.count += 1;
        self.save();
    }

    fn save(&self) {
        let file = CounterFile {
            date: self.date,
            count: self.count,
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string(&file) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.path, raw) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist daily counter");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize daily counter"),
        }
    }
}

/// Sliding-window RPM limiter with an optional persistent RPD budget.
///
/// `acquire` blocks until a request slot is free within the window, or fails
/// fast with [`RateLimitError::DailyQuotaExceeded`] once the daily budget is
/// spent. After the guarded call completes, report the outcome with
/// [`ApiRateLimiter::record_result`]: successes always count against the
/// daily budget, and null results count with a small probability as a hedge
/// against silent failures that still consumed upstream quota.
#[derive(Debug)]
pub struct ApiRateLimiter {
    name: String,
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
    rpd_limit: Option<u32>,
    daily: Option<Mutex<DailyCounter>>,
    null_accounting_probability: f64,
}

impl ApiRateLimiter {
    /// Limiter with only a sliding RPM window.
    pub fn new(name: impl Into<String>, max_requests: usize, window: Duration) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window,
            requests: Mutex::new(VecDeque::new()),
            rpd_limit: None,
            daily: None,
            null_accounting_probability: 0.25,
        }
    }

    /// Attach a persistent daily budget backed by a counter file.
    pub fn with_daily_quota(mut self, rpd_limit: u32, counter_path: impl AsRef<Path>) -> Self {
        self.rpd_limit = Some(rpd_limit);
        self.daily = Some(Mutex::new(DailyCounter::load(
            counter_path.as_ref().to_path_buf(),
        )));
        self
    }

    /// Override the probability that a null result still increments the
    /// daily counter.
    pub fn with_null_accounting_probability(mut self, probability: f64) -> Self {
        self.null_accounting_probability = probability;
        self
    }

    /// Wait for a free slot in the sliding window, checking the daily budget
    /// first.
    pub async fn acquire(&self) -> Result<()> {
        if let (Some(limit), Some(daily)) = (self.rpd_limit, &self.daily) {
            let mut counter = daily.lock().await;
            counter.roll_over();
            if counter.count >= limit {
                return Err(RateLimitError::DailyQuotaExceeded {
                    name: self.name.clone(),
                    limit,
                });
            }
        }

        // Holding the lock across the sleep serializes concurrent callers
        // through the window.
        let mut requests = self.requests.lock().await;
        let now = Instant::now();
        while let Some(&front) = requests.front() {
            if now.duration_since(front) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }
        if requests.len() >= self.max_requests {
            let oldest = *requests.front().expect("window is non-empty");
            let wake_at = oldest + self.window;
            tokio::time::sleep_until(wake_at).await;
        }
        requests.push_back(Instant::now());
        Ok(())
    }

    /// Account for the outcome of a guarded call.
    pub async fn record_result(&self, succeeded: bool) {
        let Some(daily) = &self.daily else {
            return;
        };
        let charge = succeeded || rand::thread_rng().gen_bool(self.null_accounting_probability);
        if charge {
            if !succeeded {
                info!(
                    limiter = %self.name,
                    "null result charged against daily budget"
                );
            }
            daily.lock().await.increment();
        }
    }

    /// Name this limiter was created with, used in quota log lines.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_allows_up_to_max_requests() {
        let limiter = ApiRateLimiter::new("test", 3, Duration::from_secs(60));
        for _ in 0..3 {
            let start = std::time::Instant::now();
            limiter.acquire().await.unwrap();
            assert!(start.elapsed() < Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn acquire_blocks_when_window_is_full() {
        let limiter = ApiRateLimiter::new("test", 2, Duration::from_millis(200));
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let start = std::time::Instant::now();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn daily_quota_refuses_when_spent() {
        let dir = tempfile::tempdir().unwrap();
        let counter_path = dir.path().join("test_rpd_counter.json");
        let limiter = ApiRateLimiter::new("quota", 100, Duration::from_secs(60))
            .with_daily_quota(2, &counter_path)
            .with_null_accounting_probability(0.0);

        for _ in 0..2 {
            limiter.acquire().await.unwrap();
            limiter.record_result(true).await;
        }
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::DailyQuotaExceeded { limit: 2, .. }
        ));
    }

    #[tokio::test]
    async fn daily_counter_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let counter_path = dir.path().join("persist_rpd_counter.json");

        {
            let limiter = ApiRateLimiter::new("persist", 100, Duration::from_secs(60))
                .with_daily_quota(10, &counter_path);
            limiter.acquire().await.unwrap();
            limiter.record_result(true).await;
        }

        let limiter = ApiRateLimiter::new("persist", 100, Duration::from_secs(60))
            .with_daily_quota(1, &counter_path);
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, RateLimitError::DailyQuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn stale_counter_file_resets_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter_path = dir.path().join("stale_rpd_counter.json");
        std::fs::write(&counter_path, r#"{"date":"2001-01-01","count":999}"#).unwrap();

        let limiter = ApiRateLimiter::new("stale", 100, Duration::from_secs(60))
            .with_daily_quota(5, &counter_path);
        limiter.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn null_results_never_charge_at_probability_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter_path = dir.path().join("null_rpd_counter.json");
        let limiter = ApiRateLimiter::new("null", 100, Duration::from_secs(60))
            .with_daily_quota(1, &counter_path)
            .with_null_accounting_probability(0.0);

        for _ in 0..5 {
            limiter.acquire().await.unwrap();
            limiter.record_result(false).await;
        }
        limiter.acquire().await.unwrap();
    }
}
