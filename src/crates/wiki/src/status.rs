//! Link and title status classifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of probing a title against Wikipedia and the fallback sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Page exists and is neither a redirect nor a disambiguation page.
    #[serde(rename = "OK")]
    Ok,
    /// zh redirect whose target equals the source under simplified-Chinese
    /// normalization; treated as valid.
    #[serde(rename = "SIMP_TRAD_REDIRECT")]
    SimpTradRedirect,
    /// Redirect to a genuinely different page.
    #[serde(rename = "REDIRECT")]
    Redirect,
    /// Disambiguation page.
    #[serde(rename = "DISAMBIG")]
    Disambig,
    /// 404 or empty content.
    #[serde(rename = "NO_PAGE")]
    NoPage,
    /// Network or parse failure.
    #[serde(rename = "ERROR")]
    Error,
    /// Not on Wikipedia, but Baidu Baike has the entry.
    #[serde(rename = "BAIDU")]
    Baidu,
    /// Not on Wikipedia, but China Digital Times Space has the entry.
    #[serde(rename = "CDT")]
    Cdt,
}

impl LinkStatus {
    /// Terminal misses are never cached, so a later run probes again.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, LinkStatus::NoPage | LinkStatus::Error)
    }
}

/// One entry in the persistent link-status cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatusEntry {
    pub status: LinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of an authoritative-title lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "DISAMBIG")]
    Disambig,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "ERROR")]
    Error,
}

/// Authoritative title plus how the lookup resolved.
#[derive(Debug, Clone)]
pub struct TitleStatus {
    pub title: Option<String>,
    pub status: AuthStatus,
}

impl TitleStatus {
    pub fn not_found() -> Self {
        Self {
            title: None,
            status: AuthStatus::NotFound,
        }
    }

    pub fn error() -> Self {
        Self {
            title: None,
            status: AuthStatus::Error,
        }
    }
}
