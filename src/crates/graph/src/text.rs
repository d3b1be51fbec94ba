//! Chinese text normalization and naming helpers.
//!
//! Titles arrive in a mix of simplified and traditional forms, with
//! underscores from URLs and optional `(xx)` language prefixes from the
//! watch list. Everything that compares two titles goes through
//! [`simplified_key`] so that variant spellings collapse.

use regex::Regex;
use std::sync::OnceLock;

/// Convert traditional Chinese to simplified.
pub fn to_simplified(text: &str) -> String {
    chinese_converter::to_simplified(text).to_string()
}

/// Convert simplified Chinese to traditional.
pub fn to_traditional(text: &str) -> String {
    chinese_converter::to_traditional(text).to_string()
}

/// Replace URL underscores with spaces and trim.
pub fn normalize_title(title: &str) -> String {
    title.replace('_', " ").trim().to_string()
}

/// Comparison key: simplified form, underscore/whitespace normalized,
/// lowercased. Two titles with the same key refer to the same page.
pub fn simplified_key(title: &str) -> String {
    to_simplified(&normalize_title(title)).to_lowercase()
}

/// Strip characters that are unsafe in fragment directory and file names.
pub fn sanitize_filename(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("valid regex"));
    unsafe_chars.replace_all(name, "_").into_owned()
}

/// Split an optional `(xx)` language prefix off a watch-list entry.
/// Returns `(lang, display_name)`; entries without a prefix default to zh.
pub fn split_lang_prefix(entry: &str) -> (&str, &str) {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let prefix = PREFIX.get_or_init(|| Regex::new(r"^\(([a-z]{2})\)\s*").expect("valid regex"));
    match prefix.captures(entry) {
        Some(caps) => {
            let lang = caps.get(1).expect("group 1 always present").as_str();
            let rest = &entry[caps.get(0).expect("whole match").end()..];
            (lang, rest.trim())
        }
        None => ("zh", entry.trim()),
    }
}

/// Format a title as a watch-list entry: zh entries are bare, other
/// languages carry the `(xx)` prefix.
pub fn format_list_entry(lang: &str, title: &str) -> String {
    if lang == "zh" || lang == "zh-cn" {
        title.to_string()
    } else {
        format!("({lang}) {title}")
    }
}
