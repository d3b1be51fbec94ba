//! Generic JSON-file-backed cache with a dirty flag.

use crate::error::{Result, WikiError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A string-keyed map persisted as one JSON file. Loaded once, mutated in
/// memory, and written back only when dirty.
#[derive(Debug)]
pub struct JsonCache<T> {
    name: String,
    path: PathBuf,
    entries: BTreeMap<String, T>,
    dirty: bool,
}

impl<T: Serialize + DeserializeOwned> JsonCache<T> {
    /// Load the cache, tolerating a missing or corrupt file.
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => {
                    info!(cache = %name, path = %path.display(), "loaded cache");
                    entries
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "cache unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            name,
            path,
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Keep only entries satisfying the predicate; marks dirty when
    /// anything was dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &T) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, v| keep(k, v));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the cache back if dirty. Persistence failure is a hard error:
    /// losing a cache silently would re-spend the network budget it exists
    /// to protect.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WikiError::CachePersist {
                name: self.name.clone(),
                source,
            })?;
        }
        let raw = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            WikiError::CacheSerialize {
                name: self.name.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, raw).map_err(|source| WikiError::CachePersist {
            name: self.name.clone(),
            source,
        })?;
        info!(cache = %self.name, entries = self.entries.len(), "cache written");
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache: JsonCache<u32> = JsonCache::load("test", &path);
        assert!(cache.is_empty());
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.save().unwrap();

        let reloaded: JsonCache<u32> = JsonCache::load("test", &path);
        assert_eq!(reloaded.get("a"), Some(&1));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn save_is_a_noop_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache: JsonCache<u32> = JsonCache::load("test", &path);
        cache.save().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{{{{").unwrap();
        let cache: JsonCache<u32> = JsonCache::load("test", &path);
        assert!(cache.is_empty());
    }

    #[test]
    fn retain_marks_dirty_only_on_removal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache: JsonCache<u32> = JsonCache::load("test", dir.path().join("c.json"));
        cache.insert("a", 1);
        cache.save().unwrap();
        assert_eq!(cache.retain(|_, v| *v == 1), 0);
        assert!(!cache.is_dirty());
        assert_eq!(cache.retain(|_, _| false), 1);
        assert!(cache.is_dirty());
    }
}
