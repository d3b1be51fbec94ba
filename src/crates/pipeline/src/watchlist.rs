//! The watch-list file store.
//!
//! `data/LIST.md` is a hand-editable markdown-ish file:
//!
//! ```text
//! ## person
//! 邓小平
//! (en) Henry Kissinger
//! // a comment
//! ## new
//! 待分类条目
//! ```
//!
//! `##` lines open a category (case-insensitive), `//` lines are comments,
//! and an optional `(xx)` prefix declares an entry's language (default zh).
//! All mutations run under one async mutex and deduplicate by simplified
//! form, so concurrent writers from the merger and the wiki client cannot
//! corrupt the file or double-insert a variant spelling.

use crate::error::Result;
use async_trait::async_trait;
use graph::text;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};
use wiki::TitleSink;

/// One parsed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// The raw line as it appears in the file.
    pub raw: String,
    /// Language code (`zh` unless a `(xx)` prefix says otherwise).
    pub lang: String,
    /// Entry text with any language prefix stripped.
    pub display_name: String,
}

/// One `##` section with its entries in file order.
#[derive(Debug, Clone)]
pub struct ListSection {
    pub category: String,
    pub entries: Vec<ListEntry>,
}

/// Concurrency-safe store over the watch-list file.
pub struct WatchList {
    path: PathBuf,
    lock: Mutex<()>,
}

impl WatchList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_lines(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Parse the file into ordered sections.
    pub async fn parse(&self) -> Vec<ListSection> {
        let _guard = self.lock.lock().await;
        parse_lines(&self.read_lines())
    }

    /// Read-modify-write the raw lines under the lock.
    pub async fn modify<F>(&self, transform: F) -> Result<()>
    where
        F: FnOnce(Vec<String>) -> Vec<String>,
    {
        let _guard = self.lock.lock().await;
        let lines = transform(self.read_lines());
        self.write_lines(&lines)
    }

    /// Append a title under `## new` unless a simplified-form duplicate
    /// already exists anywhere in the file. Returns whether it was added.
    pub async fn add_title(&self, title: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut lines = self.read_lines();
        let mut keys = existing_keys(&lines);
        let added = insert_title(&mut lines, title, &mut keys);
        if added {
            info!(title, "added watch-list entry under '## new'");
            self.write_lines(&lines)?;
        }
        Ok(added)
    }

    /// Batch variant of [`WatchList::add_title`]; the in-memory key set
    /// also deduplicates within the batch. Returns how many were added.
    pub async fn add_titles(&self, titles: &[String]) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut lines = self.read_lines();
        let mut keys = existing_keys(&lines);
        let mut added = 0;
        for title in titles {
            if insert_title(&mut lines, title, &mut keys) {
                added += 1;
            }
        }
        if added > 0 {
            info!(added, "added watch-list entries under '## new'");
            self.write_lines(&lines)?;
        }
        Ok(added)
    }

    /// Rename an entry after a redirect resolution. If the new title
    /// already exists (simplified comparison) the old line is deleted;
    /// otherwise the old line's content is replaced, preserving any
    /// language prefix.
    pub async fn rename_title(&self, old: &str, new: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut lines = self.read_lines();
        let old_key = text::simplified_key(old);
        let new_key = text::simplified_key(new);

        let new_exists = lines.iter().any(|line| {
            entry_of(line).is_some_and(|e| text::simplified_key(&e.display_name) == new_key)
        });

        let mut changed = false;
        lines.retain_mut(|line| {
            let Some(entry) = entry_of(line) else {
                return true;
            };
            if text::simplified_key(&entry.display_name) != old_key {
                return true;
            }
            changed = true;
            if new_exists {
                false
            } else {
                *line = text::format_list_entry(&entry.lang, new);
                true
            }
        });

        if changed {
            info!(old, new, "updated watch-list entry after redirect");
            self.write_lines(&lines)?;
        }
        Ok(())
    }
}

#[async_trait]
impl TitleSink for WatchList {
    async fn update_title(&self, old: &str, new: &str) {
        if let Err(e) = self.rename_title(old, new).await {
            warn!(old, new, error = %e, "failed to update watch-list entry");
        }
    }
}

/// Parse a line into an entry, or `None` for headers/comments/blanks.
fn entry_of(line: &str) -> Option<ListEntry> {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with("##") || stripped.starts_with("//") {
        return None;
    }
    let (lang, display_name) = text::split_lang_prefix(stripped);
    Some(ListEntry {
        raw: stripped.to_string(),
        lang: lang.to_string(),
        display_name: display_name.to_string(),
    })
}

fn parse_lines(lines: &[String]) -> Vec<ListSection> {
    let mut sections: Vec<ListSection> = Vec::new();
    for line in lines {
        let stripped = line.trim();
        if let Some(header) = stripped.strip_prefix("##") {
            sections.push(ListSection {
                category: header.trim().to_lowercase(),
                entries: Vec::new(),
            });
            continue;
        }
        let Some(entry) = entry_of(line) else {
            continue;
        };
        if let Some(section) = sections.last_mut() {
            section.entries.push(entry);
        }
    }
    sections
}

fn existing_keys(lines: &[String]) -> std::collections::HashSet<String> {
    lines
        .iter()
        .filter_map(|line| entry_of(line))
        .map(|e| text::simplified_key(&e.raw))
        .collect()
}

/// Insert a normalized title at the end of the `## new` section, creating
/// the section at EOF when missing. Returns false on a duplicate.
fn insert_title(
    lines: &mut Vec<String>,
    title: &str,
    keys: &mut std::collections::HashSet<String>,
) -> bool {
    let title = text::normalize_title(title);
    if title.is_empty() {
        return false;
    }
    if !keys.insert(text::simplified_key(&title)) {
        return false;
    }

    let new_header = lines
        .iter()
        .position(|line| line.trim().eq_ignore_ascii_case("## new"));
    match new_header {
        Some(header_idx) => {
            let insert_at = lines
                .iter()
                .enumerate()
                .skip(header_idx + 1)
                .find(|(_, line)| line.trim().starts_with("## "))
                .map(|(i, _)| i)
                .unwrap_or(lines.len());
            lines.insert(insert_at, title);
        }
        None => {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push("## new".to_string());
            lines.push(title);
        }
    }
    true
}
