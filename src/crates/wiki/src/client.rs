//! The production Wikipedia/Wikidata client.

use crate::cache::JsonCache;
use crate::error::Result;
use crate::pageviews::PageViewStats;
use crate::source::{QcodeHit, TitleSink, WikiSource};
use crate::status::{AuthStatus, LinkStatus, LinkStatusEntry, TitleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use graph::text;
use rand::Rng;
use ratelimit::LeakyBucket;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// Connection and cache settings for [`WikiClient`].
#[derive(Debug, Clone)]
pub struct WikiConfig {
    /// User agent sent with every regular request.
    pub user_agent: String,
    /// Wikipedia host template; `{lang}` is replaced per request.
    pub site_template: String,
    /// Wikidata API endpoint for `wbgetentities`.
    pub wikidata_api: String,
    /// Wikimedia REST pageviews endpoint.
    pub pageviews_api: String,
    /// Baidu Baike item base URL (fallback probe).
    pub baidu_base: String,
    /// China Digital Times Space base URL (fallback probe).
    pub cdt_base: String,
    /// Directory holding the persistent caches.
    pub cache_dir: PathBuf,
    /// Leaky-bucket rate for all wiki calls.
    pub requests_per_minute: u32,
    /// Concurrent in-flight request cap.
    pub max_inflight: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Post-request delay range (seconds) after each Baidu probe.
    pub baidu_delay_secs: (f64, f64),
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            user_agent: "GuanxiGraph/0.1 (https://github.com/guanxi-graph/guanxi)".to_string(),
            site_template: "https://{lang}.wikipedia.org".to_string(),
            wikidata_api: "https://www.wikidata.org/w/api.php".to_string(),
            pageviews_api: "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article"
                .to_string(),
            baidu_base: "https://baike.baidu.com/item/".to_string(),
            cdt_base: "https://chinadigitaltimes.net/space/".to_string(),
            cache_dir: PathBuf::from(".cache"),
            requests_per_minute: 180,
            max_inflight: 32,
            request_timeout: Duration::from_secs(20),
            baidu_delay_secs: (1.0, 2.5),
        }
    }
}

/// Q-code cache plus the in-memory reverse map that makes `title -> Q`
/// lookups free.
struct QcodeCache {
    titles_by_qcode: JsonCache<Vec<String>>,
    qcode_by_title: HashMap<String, String>,
}

impl QcodeCache {
    fn load(path: PathBuf) -> Self {
        let titles_by_qcode: JsonCache<Vec<String>> = JsonCache::load("qcode", path);
        let mut qcode_by_title = HashMap::new();
        for (qcode, titles) in titles_by_qcode.iter() {
            for title in titles {
                qcode_by_title.insert(title.clone(), qcode.clone());
            }
        }
        Self {
            titles_by_qcode,
            qcode_by_title,
        }
    }

    fn qcode_for(&self, title: &str) -> Option<&String> {
        self.qcode_by_title.get(title)
    }

    /// Record titles for a Q-code, keeping the persisted list sorted.
    fn record(&mut self, qcode: &str, titles: impl IntoIterator<Item = String>) {
        let mut list = self.titles_by_qcode.get(qcode).cloned().unwrap_or_default();
        let mut changed = false;
        for title in titles {
            if title.is_empty() {
                continue;
            }
            if !list.contains(&title) {
                list.push(title.clone());
                changed = true;
            }
            self.qcode_by_title
                .entry(title)
                .or_insert_with(|| qcode.to_string());
        }
        if changed {
            list.sort();
            self.titles_by_qcode.insert(qcode, list);
        }
    }
}

/// Outcome of one MediaWiki page lookup.
enum PageLookup {
    Found(PageInfo),
    Missing,
    Failed,
}

struct PageInfo {
    qcode: Option<String>,
    final_title: String,
    disambig: bool,
}

/// Client for Wikipedia, Wikidata and the secondary fallback sources.
///
/// Every call is paced by the shared leaky bucket and capped by the
/// in-flight semaphore. 429 responses are abandoned rather than retried so
/// a throttled shared IP is not inflamed further.
pub struct WikiClient {
    config: WikiConfig,
    http: reqwest::Client,
    browser: reqwest::Client,
    bucket: LeakyBucket,
    inflight: Semaphore,
    qcode_cache: Mutex<QcodeCache>,
    link_cache: Mutex<JsonCache<LinkStatusEntry>>,
    pub(crate) pageviews_cache: Mutex<JsonCache<PageViewStats>>,
    pub(crate) creation_cache: Mutex<JsonCache<DateTime<Utc>>>,
    title_sink: Option<Arc<dyn TitleSink>>,
}

impl WikiClient {
    pub fn new(config: WikiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;

        // Baidu rejects obvious bot traffic; this client sends a browser
        // header set instead of the project user agent.
        let mut browser_headers = HeaderMap::new();
        browser_headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36",
            ),
        );
        browser_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        browser_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        let browser = reqwest::Client::builder()
            .default_headers(browser_headers)
            .timeout(config.request_timeout)
            .build()?;

        let qcode_cache = QcodeCache::load(config.cache_dir.join("qcode_cache.json"));
        let link_cache = JsonCache::load(
            "link status",
            config.cache_dir.join("wiki_link_status_cache.json"),
        );
        let pageviews_cache = JsonCache::load(
            "pageviews",
            config.cache_dir.join("pageviews_cache.json"),
        );
        let creation_cache = JsonCache::load(
            "creation date",
            config.cache_dir.join("creation_date_cache.json"),
        );

        Ok(Self {
            bucket: LeakyBucket::per_minute(config.requests_per_minute),
            inflight: Semaphore::new(config.max_inflight),
            http,
            browser,
            qcode_cache: Mutex::new(qcode_cache),
            link_cache: Mutex::new(link_cache),
            pageviews_cache: Mutex::new(pageviews_cache),
            creation_cache: Mutex::new(creation_cache),
            title_sink: None,
            config,
        })
    }

    /// Attach a receiver for redirect discoveries (the watch list).
    pub fn with_title_sink(mut self, sink: Arc<dyn TitleSink>) -> Self {
        self.title_sink = Some(sink);
        self
    }

    pub(crate) fn config(&self) -> &WikiConfig {
        &self.config
    }

    fn api_url(&self, lang: &str) -> String {
        format!("{}/w/api.php", self.site_template(lang))
    }

    fn raw_url(&self, lang: &str) -> String {
        format!("{}/w/index.php", self.site_template(lang))
    }

    fn site_template(&self, lang: &str) -> String {
        self.config.site_template.replace("{lang}", lang)
    }

    /// Paced GET through the leaky bucket and in-flight semaphore. 429 and
    /// transport failures both yield `None`.
    pub(crate) async fn paced_get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Option<reqwest::Response> {
        let _permit = self.inflight.acquire().await.ok()?;
        self.bucket.acquire().await;
        match self.http.get(url).query(query).send().await {
            Ok(resp) if resp.status().as_u16() == 429 => {
                warn!(url, "wiki returned 429, abandoning request");
                None
            }
            Ok(resp) => Some(resp),
            Err(e) => {
                warn!(url, error = %e, "wiki request failed");
                None
            }
        }
    }

    /// One `action=query` lookup with redirect resolution, returning the
    /// Q-code, final title and disambiguation flag.
    async fn lookup_page(&self, title: &str, lang: &str) -> PageLookup {
        let url = self.api_url(lang);
        let Some(resp) = self
            .paced_get(
                &url,
                &[
                    ("action", "query"),
                    ("prop", "pageprops"),
                    ("ppprop", "wikibase_item|disambiguation"),
                    ("titles", title),
                    ("redirects", "1"),
                    ("format", "json"),
                    ("formatversion", "2"),
                ],
            )
            .await
        else {
            return PageLookup::Failed;
        };
        if !resp.status().is_success() {
            return PageLookup::Failed;
        }
        let Ok(data) = resp.json::<Value>().await else {
            return PageLookup::Failed;
        };
        let Some(page) = data
            .get("query")
            .and_then(|q| q.get("pages"))
            .and_then(|p| p.get(0))
        else {
            return PageLookup::Missing;
        };
        if page.get("missing").is_some_and(|m| m.as_bool().unwrap_or(true)) {
            return PageLookup::Missing;
        }
        let pageprops = page.get("pageprops");
        PageLookup::Found(PageInfo {
            qcode: pageprops
                .and_then(|p| p.get("wikibase_item"))
                .and_then(Value::as_str)
                .map(str::to_string),
            final_title: page
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(title)
                .to_string(),
            disambig: pageprops.is_some_and(|p| p.get("disambiguation").is_some()),
        })
    }

    async fn fetch_raw_page(&self, title: &str, lang: &str) -> Option<(u16, String)> {
        let url = self.raw_url(lang);
        let resp = self
            .paced_get(&url, &[("title", title), ("action", "raw")])
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.ok()?;
        Some((status, body))
    }

    async fn classify_wiki_page(&self, title: &str, lang: &str) -> (LinkStatus, Option<String>) {
        match self.fetch_raw_page(title, lang).await {
            Some((404, _)) => (LinkStatus::NoPage, None),
            Some((status, _)) if status >= 400 => {
                (LinkStatus::Error, Some(format!("HTTP {status}")))
            }
            Some((_, body)) => classify_content(title, &body, lang),
            None => (LinkStatus::Error, None),
        }
    }

    /// HEAD-style existence probe against a secondary source. Baidu probes
    /// use the browser-profile client and sleep 1.0–2.5 s afterwards to
    /// stay under shared-IP throttling.
    async fn probe_secondary(&self, base: &str, title: &str, impersonate: bool) -> bool {
        let url = format!(
            "{base}{}",
            urlencoding::encode(&title.replace(' ', "_"))
        );
        let exists = {
            let _permit = match self.inflight.acquire().await {
                Ok(p) => p,
                Err(_) => return false,
            };
            self.bucket.acquire().await;
            let client = if impersonate { &self.browser } else { &self.http };
            match client.get(&url).send().await {
                Ok(resp) => resp.status().as_u16() < 400,
                Err(_) => false,
            }
        };
        if impersonate {
            let (lo, hi) = self.config.baidu_delay_secs;
            let delay = rand::thread_rng().gen_range(lo..hi);
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
        exists
    }

    /// Earliest revision timestamp (page creation), cached on disk.
    pub async fn get_creation_time(&self, title: &str, lang: &str) -> Option<DateTime<Utc>> {
        if let Some(cached) = self.creation_cache.lock().await.get(title) {
            return Some(*cached);
        }
        let created = self.fetch_revision_time(title, lang, "newer").await?;
        self.creation_cache.lock().await.insert(title, created);
        Some(created)
    }

    async fn fetch_revision_time(
        &self,
        title: &str,
        lang: &str,
        direction: &str,
    ) -> Option<DateTime<Utc>> {
        let url = self.api_url(lang);
        let resp = self
            .paced_get(
                &url,
                &[
                    ("action", "query"),
                    ("prop", "revisions"),
                    ("titles", title),
                    ("rvlimit", "1"),
                    ("rvprop", "timestamp"),
                    ("rvdir", direction),
                    ("format", "json"),
                    ("formatversion", "2"),
                ],
            )
            .await?;
        if !resp.status().is_success() {
            return None;
        }
        let data = resp.json::<Value>().await.ok()?;
        let page = data.get("query")?.get("pages")?.get(0)?;
        if page.get("missing").is_some_and(|m| m.as_bool().unwrap_or(true)) {
            return None;
        }
        let stamp = page
            .get("revisions")?
            .get(0)?
            .get("timestamp")?
            .as_str()?;
        DateTime::parse_from_rfc3339(stamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Persist every dirty cache.
    pub async fn save_caches(&self) -> Result<()> {
        self.qcode_cache.lock().await.titles_by_qcode.save()?;
        self.link_cache.lock().await.save()?;
        self.pageviews_cache.lock().await.save()?;
        self.creation_cache.lock().await.save()?;
        Ok(())
    }

    async fn prune_stale_link_entries(&self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let removed = self
            .link_cache
            .lock()
            .await
            .retain(|_, entry| entry.timestamp > cutoff);
        if removed > 0 {
            info!(removed, "pruned stale link-status cache entries");
        }
        removed
    }
}

#[async_trait]
impl WikiSource for WikiClient {
    async fn get_qcode(&self, title: &str, lang: &str) -> Option<QcodeHit> {
        if let Some(qcode) = self.qcode_cache.lock().await.qcode_for(title) {
            return Some(QcodeHit {
                qcode: qcode.clone(),
                title: title.to_string(),
            });
        }

        let mut lookup = self.lookup_page(title, lang).await;
        let mut traditional = None;

        // zh titles often only resolve in their traditional spelling.
        let needs_fallback = !matches!(
            &lookup,
            PageLookup::Found(info) if info.qcode.is_some()
        );
        if needs_fallback && lang == "zh" {
            let trad = text::to_traditional(title);
            if trad != title {
                info!(title, fallback = %trad, "retrying Q-code lookup in traditional form");
                lookup = self.lookup_page(&trad, lang).await;
                traditional = Some(trad);
            }
        }

        let PageLookup::Found(info) = lookup else {
            return None;
        };
        if info.disambig {
            info!(title, "page is a disambiguation page, no Q-code");
            return None;
        }
        let qcode = info.qcode?;

        let mut titles = vec![title.to_string(), info.final_title.clone()];
        if let Some(trad) = traditional {
            titles.push(trad);
        }
        self.qcode_cache.lock().await.record(&qcode, titles);

        if info.final_title != title {
            if let Some(sink) = &self.title_sink {
                sink.update_title(title, &info.final_title).await;
            }
        }

        Some(QcodeHit {
            qcode,
            title: info.final_title,
        })
    }

    async fn get_wikitext(&self, title: &str, lang: &str) -> Option<(String, String)> {
        // The Q-code lookup resolves redirects (and reports them to the
        // watch list); fetch the final title's raw content.
        let mut final_title = match self.get_qcode(title, lang).await {
            Some(hit) => hit.title,
            None => title.to_string(),
        };
        let (status, mut body) = self.fetch_raw_page(&final_title, lang).await?;
        if status >= 400 {
            warn!(title = %final_title, status, "wikitext fetch failed");
            return None;
        }

        // A raw fetch can still land on a redirect page (no Q-code to
        // resolve through); follow it once.
        if let (LinkStatus::Redirect | LinkStatus::SimpTradRedirect, Some(target)) =
            classify_content(&final_title, &body, lang)
        {
            info!(title = %final_title, target = %target, "following raw redirect");
            let (status, target_body) = self.fetch_raw_page(&target, lang).await?;
            if status >= 400 {
                return None;
            }
            final_title = target;
            body = target_body;
        }

        let body = if lang == "zh" {
            text::to_simplified(&body)
        } else {
            body
        };
        Some((body, final_title))
    }

    async fn check_link_status(&self, title: &str, lang: &str) -> (LinkStatus, Option<String>) {
        if let Some(entry) = self.link_cache.lock().await.get(title) {
            return (entry.status, entry.detail.clone());
        }

        let (mut status, detail) = self.classify_wiki_page(title, lang).await;

        if matches!(status, LinkStatus::NoPage | LinkStatus::Error) && lang == "zh" {
            if self
                .probe_secondary(&self.config.baidu_base, title, true)
                .await
            {
                status = LinkStatus::Baidu;
            } else if self
                .probe_secondary(&self.config.cdt_base, title, false)
                .await
            {
                status = LinkStatus::Cdt;
            }
        }

        if status.is_cacheable() {
            self.link_cache.lock().await.insert(
                title,
                LinkStatusEntry {
                    status,
                    detail: detail.clone(),
                    timestamp: Utc::now(),
                },
            );
        }
        (status, detail)
    }

    async fn get_latest_revision_time(&self, title: &str, lang: &str) -> Option<DateTime<Utc>> {
        self.fetch_revision_time(title, lang, "older").await
    }

    async fn get_authoritative_title_and_status(&self, title: &str, lang: &str) -> TitleStatus {
        match self.lookup_page(title, lang).await {
            PageLookup::Found(info) => TitleStatus {
                status: if info.disambig {
                    AuthStatus::Disambig
                } else {
                    AuthStatus::Ok
                },
                title: Some(info.final_title),
            },
            PageLookup::Missing => TitleStatus::not_found(),
            PageLookup::Failed => TitleStatus::error(),
        }
    }

    async fn get_authoritative_title_by_qcode(&self, qcode: &str, lang: &str) -> TitleStatus {
        let site = format!("{lang}wiki");
        let Some(resp) = self
            .paced_get(
                &self.config.wikidata_api,
                &[
                    ("action", "wbgetentities"),
                    ("ids", qcode),
                    ("props", "sitelinks"),
                    ("sitefilter", site.as_str()),
                    ("format", "json"),
                ],
            )
            .await
        else {
            return TitleStatus::error();
        };
        if !resp.status().is_success() {
            return TitleStatus::error();
        }
        let Ok(data) = resp.json::<Value>().await else {
            return TitleStatus::error();
        };
        let Some(entity) = data.get("entities").and_then(|e| e.get(qcode)) else {
            return TitleStatus::not_found();
        };
        if entity.get("missing").is_some() {
            return TitleStatus::not_found();
        }
        let Some(title) = entity
            .get("sitelinks")
            .and_then(|s| s.get(&site))
            .and_then(|l| l.get("title"))
            .and_then(Value::as_str)
        else {
            return TitleStatus::not_found();
        };

        // The sitelink can point at a page that was since renamed or turned
        // into a disambiguation page; verify against the live wiki.
        self.get_authoritative_title_and_status(title, lang).await
    }

    async fn prune_link_cache(&self, max_age_days: i64) -> usize {
        self.prune_stale_link_entries(max_age_days).await
    }
}

/// Classify raw wikitext into a link status. Pure so tests can drive it
/// without a server.
pub(crate) fn classify_content(
    title: &str,
    content: &str,
    lang: &str,
) -> (LinkStatus, Option<String>) {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return (LinkStatus::NoPage, None);
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("#redirect") || trimmed.starts_with("#重定向") {
        return match redirect_target(trimmed) {
            Some(target) if lang == "zh" => {
                if text::simplified_key(&target) == text::simplified_key(title) {
                    (LinkStatus::SimpTradRedirect, Some(target))
                } else {
                    (LinkStatus::Redirect, Some(target))
                }
            }
            Some(target) => (LinkStatus::Redirect, Some(target)),
            None => (LinkStatus::Error, Some("malformed redirect".to_string())),
        };
    }
    if lower.contains("{{disambig") || lower.contains("{{hndis") {
        return (LinkStatus::Disambig, None);
    }
    (LinkStatus::Ok, None)
}

/// Extract the `[[target]]` of a redirect, dropping any `#section` suffix.
fn redirect_target(content: &str) -> Option<String> {
    static LINK: OnceLock<Regex> = OnceLock::new();
    let link = LINK.get_or_init(|| Regex::new(r"\[\[(.*?)\]\]").expect("valid regex"));
    let captured = link.captures(content)?.get(1)?.as_str();
    let target = captured.split('#').next().unwrap_or(captured).trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_empty_page() {
        assert_eq!(
            classify_content("X", "   ", "zh"),
            (LinkStatus::NoPage, None)
        );
    }

    #[test]
    fn classify_plain_article() {
        assert_eq!(
            classify_content("X", "'''邓小平'''，政治家。", "zh"),
            (LinkStatus::Ok, None)
        );
    }

    #[test]
    fn classify_simp_trad_redirect() {
        let (status, detail) = classify_content("邓小平", "#重定向 [[鄧小平]]", "zh");
        assert_eq!(status, LinkStatus::SimpTradRedirect);
        assert_eq!(detail.as_deref(), Some("鄧小平"));
    }

    #[test]
    fn classify_real_redirect() {
        let (status, detail) = classify_content("改革开放", "#REDIRECT [[邓小平]]", "zh");
        assert_eq!(status, LinkStatus::Redirect);
        assert_eq!(detail.as_deref(), Some("邓小平"));
    }

    #[test]
    fn classify_redirect_with_section() {
        let (_, detail) = classify_content("X", "#REDIRECT [[邓小平#生平]]", "zh");
        assert_eq!(detail.as_deref(), Some("邓小平"));
    }

    #[test]
    fn classify_disambiguation() {
        assert_eq!(
            classify_content("X", "词条 {{disambig}} 内容", "zh").0,
            LinkStatus::Disambig
        );
        assert_eq!(
            classify_content("X", "{{hndis|name=Li}}", "en").0,
            LinkStatus::Disambig
        );
    }

    #[test]
    fn classify_malformed_redirect() {
        assert_eq!(
            classify_content("X", "#REDIRECT nothing here", "zh").0,
            LinkStatus::Error
        );
    }

    #[test]
    fn non_zh_redirect_is_never_simp_trad() {
        let (status, _) = classify_content("Foo", "#REDIRECT [[Foo]]", "en");
        assert_eq!(status, LinkStatus::Redirect);
    }
}
