//! Pageviews statistics collection.
//!
//! Fills the pageviews cache the list processor's weighted sampling reads.
//! Daily view counts come from the Wikimedia REST `per-article` endpoint
//! over at most the last 365 days, never before the page was created and
//! never before the API's data horizon (2015-07-01).

use crate::client::WikiClient;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use graph::text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

const MAX_RETRIES: u32 = 3;

/// Earliest day with pageviews data.
fn data_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 7, 1).expect("static date")
}

/// One entry in the pageviews cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageViewStats {
    pub total_views: u64,
    pub avg_daily_views: f64,
    pub check_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WikiClient {
    /// Fetch view statistics for a title, falling back to the
    /// traditional/simplified variants and finally to the cached value.
    pub async fn get_pageviews_stats(&self, title: &str, lang: &str) -> Option<PageViewStats> {
        if let Some(stats) = self.fetch_stats_for_title(title, lang).await {
            self.pageviews_cache.lock().await.insert(title, stats.clone());
            return Some(stats);
        }

        if lang == "zh" {
            for candidate in [text::to_traditional(title), text::to_simplified(title)] {
                if candidate == title {
                    continue;
                }
                info!(title, fallback = %candidate, "pageviews lookup failed, trying variant");
                if let Some(stats) = self.fetch_stats_for_title(&candidate, lang).await {
                    // Cache under the original title so later lookups hit.
                    self.pageviews_cache.lock().await.insert(title, stats.clone());
                    return Some(stats);
                }
            }
        }

        let cached = self.pageviews_cache.lock().await.get(title).cloned();
        if cached.is_some() {
            info!(title, "pageviews API unreachable, using cached value");
        }
        cached
    }

    async fn fetch_stats_for_title(&self, title: &str, lang: &str) -> Option<PageViewStats> {
        let created = self.get_creation_time(title, lang).await?;
        let effective_start = created.date_naive().max(data_start());
        let end = Utc::now().date_naive() - Duration::days(1);
        let days_available = (end - effective_start).num_days();

        if days_available <= 0 {
            // Too new for a single full day of data.
            return Some(PageViewStats {
                total_views: 0,
                avg_daily_views: 0.0,
                check_timestamp: Utc::now(),
                error: None,
            });
        }

        let (start, duration_days) = if days_available < 365 {
            (effective_start, days_available)
        } else {
            (end - Duration::days(365), 365)
        };

        let url = format!(
            "{}/{}.wikipedia.org/all-access/user/{}/daily/{}/{}",
            self.pageviews_api_base(),
            lang,
            urlencoding::encode(title),
            compact_day(start),
            compact_day(end),
        );

        let data = self.fetch_json_with_retry(&url).await?;
        let total_views: u64 = data
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.get("views").and_then(Value::as_u64))
                    .sum()
            })
            .unwrap_or(0);

        Some(PageViewStats {
            total_views,
            avg_daily_views: total_views as f64 / duration_days as f64,
            check_timestamp: Utc::now(),
            error: None,
        })
    }

    async fn fetch_json_with_retry(&self, url: &str) -> Option<Value> {
        for attempt in 1..=MAX_RETRIES {
            if let Some(resp) = self.paced_get(url, &[]).await {
                let status = resp.status();
                if status.as_u16() == 404 {
                    return None;
                }
                if status.is_success() {
                    match resp.json::<Value>().await {
                        Ok(data) => return Some(data),
                        Err(e) => warn!(url, error = %e, "pageviews response unreadable"),
                    }
                }
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(std::time::Duration::from_secs(attempt as u64)).await;
            }
        }
        None
    }

    fn pageviews_api_base(&self) -> &str {
        &self.config().pageviews_api
    }
}

/// `YYYYMMDD00` format used by the pageviews REST API.
fn compact_day(day: NaiveDate) -> String {
    format!("{:04}{:02}{:02}00", day.year(), day.month(), day.day())
}
