//! Trait seams between the pipeline and the network.

use crate::status::{LinkStatus, TitleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A resolved Q-code lookup: the Wikidata identifier plus the final
/// (post-redirect) article title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcodeHit {
    pub qcode: String,
    pub title: String,
}

/// Everything the pipeline asks of Wikipedia/Wikidata. [`crate::WikiClient`]
/// is the production implementation; tests use scripted ones.
#[async_trait]
pub trait WikiSource: Send + Sync {
    /// Resolve a title to its Q-code and final title. `None` when the page
    /// is missing, a disambiguation page, or the lookup failed.
    async fn get_qcode(&self, title: &str, lang: &str) -> Option<QcodeHit>;

    /// Fetch wikitext, following redirects; zh content is returned in
    /// simplified form. Returns `(wikitext, final_title)`.
    async fn get_wikitext(&self, title: &str, lang: &str) -> Option<(String, String)>;

    /// Classify a title's link status, consulting fallback sources for zh.
    async fn check_link_status(&self, title: &str, lang: &str) -> (LinkStatus, Option<String>);

    /// Timestamp of the page's latest revision.
    async fn get_latest_revision_time(&self, title: &str, lang: &str) -> Option<DateTime<Utc>>;

    /// Final title and disambiguation flag in one API call.
    async fn get_authoritative_title_and_status(&self, title: &str, lang: &str) -> TitleStatus;

    /// Sitelink title for a Q-code on `{lang}.wikipedia.org`, verified
    /// against the target page.
    async fn get_authoritative_title_by_qcode(&self, qcode: &str, lang: &str) -> TitleStatus;

    /// Drop link-status cache entries older than `max_age_days`, returning
    /// how many were removed. Implementations without a cache keep the
    /// default no-op.
    async fn prune_link_cache(&self, _max_age_days: i64) -> usize {
        0
    }
}

/// Receiver for redirect discoveries. When a Q-code lookup resolves a title
/// to a different final title, the client reports it here so the watch list
/// can rename its entry.
#[async_trait]
pub trait TitleSink: Send + Sync {
    async fn update_title(&self, old: &str, new: &str);
}
