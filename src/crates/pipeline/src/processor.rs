//! The list processor: choose a bounded subset of the watch list, fetch
//! and parse each selected entry, and write one fragment JSON per entity.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::sampling;
use crate::watchlist::{ListEntry, WatchList};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use graph::{text, Fragment, NodeType};
use llm::LlmService;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};
use wiki::{JsonCache, PageViewStats, WikiSource};

const FRAGMENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// One candidate drawn from the watch list.
#[derive(Debug, Clone)]
struct Candidate {
    category: NodeType,
    entry: ListEntry,
    avg_daily_views: f64,
}

/// Screens, samples and extracts watch-list entries.
pub struct ListProcessor {
    wiki: Arc<dyn WikiSource>,
    llm: Arc<LlmService>,
    watchlist: Arc<WatchList>,
    config: PipelineConfig,
}

impl ListProcessor {
    pub fn new(
        wiki: Arc<dyn WikiSource>,
        llm: Arc<LlmService>,
        watchlist: Arc<WatchList>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            wiki,
            llm,
            watchlist,
            config,
        }
    }

    /// Run one extraction pass.
    pub async fn run(&self) -> Result<()> {
        let candidates = self.collect_candidates().await;
        if candidates.is_empty() {
            info!("watch list is empty, nothing to process");
            return Ok(());
        }
        info!(total = candidates.len(), "watch list parsed");

        // Pass 1: narrow the universe before spending network calls on
        // freshness checks.
        let universe = self.draw(
            candidates,
            self.config.sampling.max_items_to_check,
            &self.config.sampling.screen_weights,
        );

        // Concurrent freshness pre-screen; each worker makes at most one
        // revision-time call.
        let eligible: Vec<Candidate> = stream::iter(universe)
            .map(|candidate| async move {
                let fresh = self
                    .should_process(&candidate.entry, candidate.category)
                    .await;
                fresh.then_some(candidate)
            })
            .buffer_unordered(self.config.sampling.screen_concurrency.max(1))
            .filter_map(|c| async move { c })
            .collect()
            .await;
        info!(eligible = eligible.len(), "freshness screen complete");

        // Pass 2: order the eligible subset and truncate to the run size.
        let selected = self.draw(
            eligible,
            self.config.sampling.max_items_per_run,
            &self.config.sampling.order_weights,
        );

        let total = selected.len();
        for (index, candidate) in selected.into_iter().enumerate() {
            info!(
                item = %candidate.entry.display_name,
                progress = format!("{}/{}", index + 1, total),
                "processing entry"
            );
            if let Err(e) = self.process_item(&candidate).await {
                // A bad entry never fails the run.
                error!(item = %candidate.entry.display_name, error = %e, "entry failed");
            }
        }
        Ok(())
    }

    async fn collect_candidates(&self) -> Vec<Candidate> {
        let views = self.load_pageviews();
        let mut candidates = Vec::new();
        for section in self.watchlist.parse().await {
            // `## new` entries have no category yet and cannot be routed to
            // a fragment directory.
            let Some(category) = NodeType::from_category(&section.category) else {
                continue;
            };
            for entry in section.entries {
                let avg = views
                    .get(&entry.display_name)
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                candidates.push(Candidate {
                    category,
                    entry,
                    avg_daily_views: avg,
                });
            }
        }
        candidates
    }

    fn load_pageviews(&self) -> HashMap<String, f64> {
        let cache: JsonCache<PageViewStats> = JsonCache::load(
            "pageviews",
            self.config.paths.cache_dir.join("pageviews_cache.json"),
        );
        cache
            .iter()
            .map(|(title, stats)| (title.clone(), stats.avg_daily_views))
            .collect()
    }

    /// Rank by views and draw `k` candidates with the weighted reservoir;
    /// without any pageviews data, fall back to a uniform draw.
    fn draw(&self, mut pool: Vec<Candidate>, k: usize, curve: &crate::config::SampleWeights) -> Vec<Candidate> {
        if pool.len() <= k {
            return pool;
        }
        let mut rng = rand::thread_rng();
        let has_views = pool.iter().any(|c| c.avg_daily_views.is_finite());
        if !has_views {
            return sampling::uniform_sample(pool, k, &mut rng);
        }
        pool.sort_by(|a, b| {
            b.avg_daily_views
                .partial_cmp(&a.avg_daily_views)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let total = pool.len();
        let weighted: Vec<(Candidate, f64)> = pool
            .into_iter()
            .enumerate()
            .map(|(rank, c)| {
                let w = sampling::rank_weight(rank, total, curve);
                (c, w)
            })
            .collect();
        sampling::weighted_sample(weighted, k, &mut rng)
    }

    /// The freshness policy. Never-processed entries always qualify; recent
    /// ones are skipped without touching the network; in between, the wiki
    /// revision time and a linear probability ramp decide.
    async fn should_process(&self, entry: &ListEntry, category: NodeType) -> bool {
        let policy = &self.config.freshness;
        let Some(last_local) =
            last_fragment_time(&self.config.paths.data_dir, category, &entry.display_name)
        else {
            info!(item = %entry.display_name, "no local fragment, first extraction");
            return true;
        };

        let age_days = (Local::now() - last_local).num_days();
        if age_days <= policy.prob_start_day {
            info!(
                item = %entry.display_name,
                age_days,
                "inside the cool-down window, skipping"
            );
            return false;
        }

        let wiki_time = self
            .wiki
            .get_latest_revision_time(&entry.display_name, &entry.lang)
            .await;
        if let Some(wiki_time) = wiki_time {
            if wiki_time <= last_local.with_timezone(&Utc) {
                info!(item = %entry.display_name, "wiki unchanged since local fragment, skipping");
                return false;
            }
        }

        if age_days <= policy.prob_end_day {
            let span = (policy.prob_end_day - policy.prob_start_day).max(1) as f64;
            let ratio = (age_days - policy.prob_start_day) as f64 / span;
            let probability = policy.prob_start_value
                + (policy.prob_end_value - policy.prob_start_value) * ratio;
            let process = rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0));
            info!(
                item = %entry.display_name,
                age_days,
                probability = format!("{probability:.2}"),
                process,
                "probabilistic revalidation"
            );
            return process;
        }

        info!(item = %entry.display_name, age_days, "past the revalidation window, re-extracting");
        true
    }

    async fn process_item(&self, candidate: &Candidate) -> Result<()> {
        let entry = &candidate.entry;
        let Some((wikitext, _final_title)) = self
            .wiki
            .get_wikitext(&entry.display_name, &entry.lang)
            .await
        else {
            warn!(item = %entry.display_name, "wikitext unavailable, skipping");
            return Ok(());
        };

        let Some(fragment) = self.llm.parse_wikitext(&wikitext).await else {
            warn!(item = %entry.display_name, "parser produced nothing, skipping");
            return Ok(());
        };

        self.write_fragment(candidate, &fragment)
    }

    fn write_fragment(&self, candidate: &Candidate, fragment: &Fragment) -> Result<()> {
        let safe_name = text::sanitize_filename(&candidate.entry.display_name);
        let dir = self
            .config
            .paths
            .data_dir
            .join(candidate.category.category())
            .join(&safe_name);
        std::fs::create_dir_all(&dir)?;

        let stamp = Local::now().format(FRAGMENT_TIMESTAMP_FORMAT);
        let file_name = format!("{safe_name}_{stamp}.json");
        let path = dir.join(&file_name);
        std::fs::write(&path, serde_json::to_string_pretty(fragment)?)?;
        info!(path = %path.display(), "fragment written");

        // The newest fragment replaces its predecessors.
        for old in std::fs::read_dir(&dir)? {
            let old = old?;
            if old.file_name().to_string_lossy().ends_with(".json")
                && old.file_name().to_string_lossy() != file_name.as_str()
            {
                if let Err(e) = std::fs::remove_file(old.path()) {
                    warn!(path = %old.path().display(), error = %e, "stale fragment not removed");
                }
            }
        }
        Ok(())
    }
}

/// Newest fragment timestamp for an entry, parsed from file names like
/// `<name>_2024-05-01-12-00-00.json`.
pub(crate) fn last_fragment_time(
    data_dir: &Path,
    category: NodeType,
    item_name: &str,
) -> Option<DateTime<Local>> {
    static STAMP: OnceLock<Regex> = OnceLock::new();
    let stamp = STAMP.get_or_init(|| {
        Regex::new(r"_(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})\.json$").expect("valid regex")
    });

    let dir: PathBuf = data_dir
        .join(category.category())
        .join(text::sanitize_filename(item_name));
    let entries = std::fs::read_dir(dir).ok()?;

    let mut latest: Option<DateTime<Local>> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let Some(captures) = stamp.captures(&name_str) else {
            continue;
        };
        let Ok(naive) =
            NaiveDateTime::parse_from_str(&captures[1], FRAGMENT_TIMESTAMP_FORMAT)
        else {
            continue;
        };
        if let Some(local) = Local.from_local_datetime(&naive).earliest() {
            latest = Some(latest.map_or(local, |best| best.max(local)));
        }
    }
    latest
}
