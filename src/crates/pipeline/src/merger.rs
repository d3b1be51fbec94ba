//! Merges parser fragments into the master graph.
//!
//! Every fragment node is identity-resolved to a canonical ID — a Wikidata
//! Q-code when one exists, an existing node via the global name map
//! otherwise, or a `BAIDU:`/`CDT:` temporary ID when only a fallback source
//! knows the entity. Property conflicts are adjudicated by the LLM; identity
//! fields never cross that boundary. Relationships deduplicate on the
//! canonical key, with undirected types collapsing both orientations.

use crate::error::Result;
use crate::watchlist::WatchList;
use graph::{
    canonical_key, load_master_graph, save_master_graph, text, Fragment, FragmentNode,
    FragmentRel, Graph, NameMap, Node, RelKey, Relationship,
};
use llm::LlmService;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use wiki::{LinkStatus, WikiSource};

/// Merges fragment files into the master graph.
pub struct GraphMerger {
    master_graph_path: PathBuf,
    processed_log_path: PathBuf,
    data_dir: PathBuf,
    wiki: Arc<dyn WikiSource>,
    llm: Arc<LlmService>,
    watchlist: Arc<WatchList>,
}

/// Mutable merge state shared across fragments within one run.
struct MergeState {
    nodes: BTreeMap<String, Node>,
    relationships: BTreeMap<RelKey, Relationship>,
    name_to_id: HashMap<String, String>,
}

impl MergeState {
    fn from_graph(graph: Graph) -> Self {
        let mut name_to_id = HashMap::new();
        for node in &graph.nodes {
            for names in node.name.values() {
                for name in names {
                    name_to_id
                        .entry(name.clone())
                        .or_insert_with(|| node.id.clone());
                }
            }
        }
        let relationships = graph
            .relationships
            .into_iter()
            .map(|rel| (RelKey::from(&rel), rel))
            .collect();
        Self {
            nodes: graph.nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            relationships,
            name_to_id,
        }
    }

    fn into_graph(self) -> Graph {
        Graph {
            nodes: self.nodes.into_values().collect(),
            relationships: self.relationships.into_values().collect(),
        }
    }

    /// Register every name in `names` as belonging to `id`, without
    /// clobbering earlier claims.
    fn index_names(&mut self, names: &NameMap, id: &str) {
        for list in names.values() {
            for name in list {
                self.name_to_id
                    .entry(name.clone())
                    .or_insert_with(|| id.to_string());
            }
        }
    }
}

impl GraphMerger {
    pub fn new(
        master_graph_path: impl Into<PathBuf>,
        processed_log_path: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        wiki: Arc<dyn WikiSource>,
        llm: Arc<LlmService>,
        watchlist: Arc<WatchList>,
    ) -> Self {
        Self {
            master_graph_path: master_graph_path.into(),
            processed_log_path: processed_log_path.into(),
            data_dir: data_dir.into(),
            wiki,
            llm,
            watchlist,
        }
    }

    /// Merge every unprocessed fragment file, then persist the graph and
    /// append the processed filenames to the log.
    pub async fn run(&self) -> Result<()> {
        let processed = self.load_processed_log();
        let pending = collect_fragment_files(&self.data_dir, &processed);
        let mut state = MergeState::from_graph(load_master_graph(&self.master_graph_path));

        if pending.is_empty() {
            info!("no new fragment files to merge");
        } else {
            info!(files = pending.len(), "merging new fragment files");
        }

        let mut merged_files = Vec::new();
        for path in pending {
            info!(file = %path.display(), "merging fragment");
            match self.merge_file(&path, &mut state).await {
                Ok(()) => {
                    if let Some(name) = path.file_name() {
                        merged_files.push(name.to_string_lossy().into_owned());
                    }
                }
                Err(e) => error!(file = %path.display(), error = %e, "fragment skipped"),
            }
        }

        save_master_graph(&self.master_graph_path, &state.into_graph())?;
        self.append_processed_log(&merged_files)?;
        Ok(())
    }

    async fn merge_file(&self, path: &Path, state: &mut MergeState) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let fragment: Fragment = serde_json::from_str(&raw)?;

        // Nodes first, so relationship endpoints can resolve through the
        // fragment-local name map.
        let mut local_ids: HashMap<String, String> = HashMap::new();
        for node in &fragment.nodes {
            if let Some((name, id)) = self.merge_node(node, state).await {
                local_ids.insert(name, id);
            }
        }
        for rel in &fragment.relationships {
            self.merge_relationship(rel, &local_ids, state).await;
        }
        Ok(())
    }

    /// Identity-resolve and merge one fragment node. Returns the
    /// `(primary name, final id)` pair for the fragment-local map.
    async fn merge_node(
        &self,
        new_node: &FragmentNode,
        state: &mut MergeState,
    ) -> Option<(String, String)> {
        let primary_lang = new_node.primary_lang()?.to_string();
        let primary_name = new_node.primary_name()?.to_string();
        let api_lang = if primary_lang.contains("zh") {
            "zh".to_string()
        } else {
            primary_lang.clone()
        };

        if let Some(hit) = self.wiki.get_qcode(&primary_name, &api_lang).await {
            let canonical = if api_lang == "zh" {
                text::to_simplified(&hit.title)
            } else {
                hit.title.clone()
            };

            if state.nodes.contains_key(&hit.qcode) {
                // Q-code already known: fold the fragment in.
                info!(name = %primary_name, qcode = %hit.qcode, "merging into existing node");
                let override_name = self.simp_trad_override(&primary_name, &api_lang).await;
                self.merge_into_existing(
                    &hit.qcode,
                    new_node,
                    &primary_lang,
                    override_name.as_deref(),
                    state,
                )
                .await;
            } else {
                let node_type = match new_node.node_type {
                    Some(t) => t,
                    None => {
                        warn!(name = %primary_name, "fragment node has no valid type, dropped");
                        return None;
                    }
                };
                info!(name = %primary_name, qcode = %hit.qcode, "adding new node");
                let name = merge_names(
                    None,
                    &new_node.name,
                    &primary_lang,
                    Some(&canonical),
                );
                let node = Node {
                    id: hit.qcode.clone(),
                    node_type,
                    name,
                    properties: new_node.properties.clone(),
                };
                state.index_names(&node.name, &hit.qcode);
                state.nodes.insert(hit.qcode.clone(), node);

                let entry = text::format_list_entry(&api_lang, &primary_name);
                if let Err(e) = self.watchlist.add_title(&entry).await {
                    warn!(entry, error = %e, "could not add new node to watch list");
                }
            }
            return Some((primary_name, hit.qcode));
        }

        // No Q-code: fall back to the global name map.
        if let Some(known_id) = state.name_to_id.get(&primary_name).cloned() {
            info!(name = %primary_name, id = %known_id, "merging via name map");
            self.merge_into_existing(&known_id, new_node, &primary_lang, None, state)
                .await;
            return Some((primary_name, known_id));
        }

        // Last resort: link-status probing for a temporary identity.
        let (status, _) = self.wiki.check_link_status(&primary_name, &api_lang).await;
        match status {
            LinkStatus::Redirect | LinkStatus::Disambig => {
                warn!(name = %primary_name, ?status, "dropping redirect/disambiguation node");
                None
            }
            LinkStatus::Baidu | LinkStatus::Cdt => {
                let node_type = match new_node.node_type {
                    Some(t) => t,
                    None => {
                        warn!(name = %primary_name, "fragment node has no valid type, dropped");
                        return None;
                    }
                };
                let prefix = if status == LinkStatus::Baidu {
                    "BAIDU"
                } else {
                    "CDT"
                };
                let temp_id = format!("{prefix}:{primary_name}");
                warn!(name = %primary_name, id = %temp_id, "using temporary id");
                let name = merge_names(None, &new_node.name, &primary_lang, None);
                let node = Node {
                    id: temp_id.clone(),
                    node_type,
                    name,
                    properties: new_node.properties.clone(),
                };
                state.index_names(&node.name, &temp_id);
                state.nodes.insert(temp_id.clone(), node);
                Some((primary_name, temp_id))
            }
            _ => {
                error!(name = %primary_name, ?status, "entity not found in any source, dropped");
                None
            }
        }
    }

    /// If the fragment name is a simplified/traditional redirect of the
    /// canonical page, its target becomes the canonical-name override.
    async fn simp_trad_override(&self, name: &str, api_lang: &str) -> Option<String> {
        let (status, detail) = self.wiki.check_link_status(name, api_lang).await;
        match (status, detail) {
            (LinkStatus::SimpTradRedirect, Some(target)) => Some(if api_lang == "zh" {
                text::to_simplified(&target)
            } else {
                target
            }),
            _ => None,
        }
    }

    async fn merge_into_existing(
        &self,
        id: &str,
        new_node: &FragmentNode,
        primary_lang: &str,
        canonical_override: Option<&str>,
        state: &mut MergeState,
    ) {
        let Some(existing) = state.nodes.get(id).cloned() else {
            return;
        };

        let merged_names = merge_names(
            Some(&existing.name),
            &new_node.name,
            primary_lang,
            canonical_override,
        );

        let existing_value = match serde_json::to_value(&existing) {
            Ok(v) => v,
            Err(_) => return,
        };
        let new_value = serde_json::to_value(new_node).unwrap_or_default();

        let mut updated = existing.clone();
        if self.llm.should_merge(&existing_value, &new_value).await {
            let merged = self.llm.merge_items(&existing_value, &new_value, "node").await;
            match serde_json::from_value::<Node>(merged) {
                Ok(node) => updated = node,
                Err(e) => warn!(id, error = %e, "merged node unparseable, keeping existing"),
            }
        }
        updated.id = existing.id;
        updated.name = merged_names;
        state.index_names(&updated.name, id);
        state.nodes.insert(id.to_string(), updated);
    }

    async fn merge_relationship(
        &self,
        rel: &FragmentRel,
        local_ids: &HashMap<String, String>,
        state: &mut MergeState,
    ) {
        let Some(rel_type) = rel.rel_type else {
            warn!(source = %rel.source, target = %rel.target, "unknown relationship type, skipped");
            return;
        };
        let resolve = |name: &str| {
            local_ids
                .get(name)
                .or_else(|| state.name_to_id.get(name))
                .cloned()
        };
        let (Some(source), Some(target)) = (resolve(&rel.source), resolve(&rel.target)) else {
            warn!(
                source = %rel.source,
                target = %rel.target,
                "relationship endpoint unresolved, skipped"
            );
            return;
        };

        let resolved = Relationship {
            source,
            target,
            rel_type,
            properties: rel.properties.clone(),
        };
        let key = canonical_key(&resolved.source, &resolved.target, rel_type);

        match state.relationships.get(&key) {
            None => {
                state.relationships.insert(key, resolved);
            }
            Some(existing) => {
                let existing_value = serde_json::to_value(existing).unwrap_or_default();
                let new_value = serde_json::to_value(&resolved).unwrap_or_default();
                if self.llm.should_merge(&existing_value, &new_value).await {
                    let merged = self
                        .llm
                        .merge_items(&existing_value, &new_value, "relationship")
                        .await;
                    match serde_json::from_value::<Relationship>(merged) {
                        Ok(rel) => {
                            state.relationships.insert(key, rel);
                        }
                        Err(e) => warn!(error = %e, "merged relationship unparseable, kept existing"),
                    }
                }
            }
        }
    }

    fn load_processed_log(&self) -> HashSet<String> {
        match std::fs::read_to_string(&self.processed_log_path) {
            Ok(raw) => raw.lines().map(str::to_string).collect(),
            Err(_) => HashSet::new(),
        }
    }

    fn append_processed_log(&self, merged: &[String]) -> Result<()> {
        if merged.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.processed_log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.processed_log_path)?;
        for name in merged {
            writeln!(file, "{name}")?;
        }
        info!(count = merged.len(), "processed-files log updated");
        Ok(())
    }
}

/// Merge per-language name lists. The canonical name comes from, in
/// priority order: the explicit override (primary language only), the
/// existing canonical, the fragment's primary. Aliases sort after it.
fn merge_names(
    existing: Option<&NameMap>,
    new: &NameMap,
    primary_lang: &str,
    canonical_override: Option<&str>,
) -> NameMap {
    let mut merged: NameMap = existing.cloned().unwrap_or_default();
    let langs: HashSet<String> = merged.keys().chain(new.keys()).cloned().collect();

    for lang in langs {
        let existing_names = merged.get(&lang).cloned().unwrap_or_default();
        let new_names = new.get(&lang).cloned().unwrap_or_default();

        let canonical = if lang == primary_lang && canonical_override.is_some() {
            canonical_override.map(str::to_string)
        } else {
            existing_names
                .first()
                .or_else(|| new_names.first())
                .cloned()
        };

        let mut all: HashSet<String> = existing_names
            .iter()
            .chain(new_names.iter())
            .filter(|n| !n.is_empty())
            .cloned()
            .collect();

        match canonical {
            Some(canonical) => {
                all.remove(&canonical);
                let mut list = vec![canonical];
                let mut aliases: Vec<String> = all.into_iter().collect();
                aliases.sort();
                list.extend(aliases);
                merged.insert(lang, list);
            }
            None if !all.is_empty() => {
                let mut list: Vec<String> = all.into_iter().collect();
                list.sort();
                merged.insert(lang, list);
            }
            None => {}
        }
    }
    merged
}

/// All fragment JSON files under `data_dir` whose basename is not in the
/// processed log, in deterministic path order.
fn collect_fragment_files(data_dir: &Path, processed: &HashSet<String>) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![data_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                let basename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !processed.contains(&basename) {
                    found.push(path);
                }
            }
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_names_keeps_existing_canonical_and_sorts_aliases() {
        let existing: NameMap = [("zh-cn".to_string(), vec!["A".to_string(), "a".to_string()])]
            .into_iter()
            .collect();
        let new: NameMap = [(
            "zh-cn".to_string(),
            vec!["b".to_string(), "a".to_string()],
        )]
        .into_iter()
        .collect();

        let merged = merge_names(Some(&existing), &new, "zh-cn", None);
        assert_eq!(merged["zh-cn"], vec!["A", "a", "b"]);
    }

    #[test]
    fn merge_names_override_wins_on_primary_lang_only() {
        let existing: NameMap = [
            ("zh-cn".to_string(), vec!["旧".to_string()]),
            ("en".to_string(), vec!["Old".to_string()]),
        ]
        .into_iter()
        .collect();
        let new = NameMap::new();

        let merged = merge_names(Some(&existing), &new, "zh-cn", Some("新"));
        assert_eq!(merged["zh-cn"], vec!["新", "旧"]);
        assert_eq!(merged["en"], vec!["Old"]);
    }

    #[test]
    fn merge_names_uses_new_primary_when_nothing_exists() {
        let new: NameMap = [(
            "zh-cn".to_string(),
            vec!["甲".to_string(), "乙".to_string()],
        )]
        .into_iter()
        .collect();
        let merged = merge_names(None, &new, "zh-cn", None);
        assert_eq!(merged["zh-cn"], vec!["甲", "乙"]);
    }

    #[test]
    fn fragment_discovery_skips_processed_basenames() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("person").join("甲");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("a.json"), "{}").unwrap();
        std::fs::write(nested.join("b.json"), "{}").unwrap();
        std::fs::write(nested.join("notes.txt"), "").unwrap();

        let processed: HashSet<String> = ["a.json".to_string()].into_iter().collect();
        let files = collect_fragment_files(dir.path(), &processed);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("b.json"));
    }
}
