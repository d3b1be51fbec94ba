//! Deep maintenance over the master graph.
//!
//! Eight idempotent steps, run in order: authoritative-name refresh,
//! watch-list refresh, type correction from the list, descriptionless-
//! relation pruning, schema validation, the single-relation LLM audit,
//! stale link-cache GC, and temporary-ID upgrading.

use crate::config::{AuditConfig, MaintenanceConfig};
use crate::error::Result;
use crate::watchlist::{ListEntry, WatchList};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use graph::{
    canonical_key, load_master_graph, save_master_graph, text, validate_and_clean, Graph, Node,
    NodeType, RelKey,
};
use llm::{AuditVerdict, LlmService};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use wiki::{AuthStatus, JsonCache, WikiSource};

/// One entry in the false-relations cache: when the audit last confirmed
/// the relation as sound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalseRelationEntry {
    pub timestamp: DateTime<Utc>,
}

/// Runs the eight-step maintenance pass.
pub struct GraphCleaner {
    master_graph_path: PathBuf,
    wiki: Arc<dyn WikiSource>,
    llm: Arc<LlmService>,
    watchlist: Arc<WatchList>,
    false_relations: Mutex<JsonCache<FalseRelationEntry>>,
    audit: AuditConfig,
    maintenance: MaintenanceConfig,
}

impl GraphCleaner {
    pub fn new(
        master_graph_path: impl Into<PathBuf>,
        false_relations_cache: impl Into<PathBuf>,
        wiki: Arc<dyn WikiSource>,
        llm: Arc<LlmService>,
        watchlist: Arc<WatchList>,
        audit: AuditConfig,
        maintenance: MaintenanceConfig,
    ) -> Self {
        Self {
            master_graph_path: master_graph_path.into(),
            wiki,
            llm,
            watchlist,
            false_relations: Mutex::new(JsonCache::load(
                "false relations",
                false_relations_cache.into(),
            )),
            audit,
            maintenance,
        }
    }

    /// Execute the full maintenance pass and persist everything.
    pub async fn run(&self) -> Result<()> {
        let mut graph = load_master_graph(&self.master_graph_path);

        info!("step 1/8: refresh node names from Wikidata");
        self.refresh_node_names(&mut graph).await;

        info!("step 2/8: refresh watch-list entries");
        if let Err(e) = self.refresh_watchlist().await {
            error!(error = %e, "watch-list refresh failed");
        }

        info!("step 3/8: correct node types from the watch list");
        self.correct_node_types(&mut graph).await;

        info!("step 4/8: prune relationships without descriptions");
        prune_descriptionless(&mut graph);

        info!("step 5/8: schema validation");
        validate_and_clean(&mut graph);

        info!("step 6/8: single-relation audit");
        self.audit_relationships(&mut graph).await;

        info!("step 7/8: stale link-cache GC");
        self.wiki
            .prune_link_cache(self.maintenance.link_cache_max_age_days)
            .await;

        info!("step 8/8: upgrade temporary IDs");
        self.upgrade_temporary_nodes(&mut graph).await;

        save_master_graph(&self.master_graph_path, &graph)?;
        self.false_relations.lock().await.save()?;
        Ok(())
    }

    /// Step 1: for a bounded sample of Q-code nodes, fan out authoritative
    /// title lookups per language. Nodes no language can validate are
    /// removed with their relationships; validated titles become canonical
    /// names and are appended to the watch list.
    async fn refresh_node_names(&self, graph: &mut Graph) {
        let all_qcodes: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| n.has_qcode())
            .map(|n| n.id.clone())
            .collect();
        if all_qcodes.is_empty() {
            info!("no Q-code nodes to refresh");
            return;
        }

        let mut rng = rand::thread_rng();
        let sampled: Vec<String> = if all_qcodes.len() > self.maintenance.master_graph_update_limit
        {
            warn!(
                total = all_qcodes.len(),
                limit = self.maintenance.master_graph_update_limit,
                "too many Q-codes, sampling"
            );
            all_qcodes
                .choose_multiple(&mut rng, self.maintenance.master_graph_update_limit)
                .cloned()
                .collect()
        } else {
            all_qcodes
        };

        let node_langs: HashMap<&str, Vec<String>> = graph
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.name.keys().cloned().collect()))
            .collect();
        let mut tasks: HashSet<(String, String)> = HashSet::new();
        for qcode in &sampled {
            tasks.insert((qcode.clone(), "zh".to_string()));
            tasks.insert((qcode.clone(), "en".to_string()));
            if let Some(langs) = node_langs.get(qcode.as_str()) {
                for lang in langs {
                    let lang = if lang == "zh-cn" { "zh" } else { lang };
                    tasks.insert((qcode.clone(), lang.to_string()));
                }
            }
        }

        info!(lookups = tasks.len(), "querying authoritative titles");
        let results: Vec<(String, String, AuthStatus, Option<String>)> = stream::iter(tasks)
            .map(|(qcode, lang)| async move {
                let result = self
                    .wiki
                    .get_authoritative_title_by_qcode(&qcode, &lang)
                    .await;
                (qcode, lang, result.status, result.title)
            })
            .buffer_unordered(self.maintenance.max_workers.max(1))
            .collect()
            .await;

        let mut statuses: HashMap<String, Vec<AuthStatus>> = HashMap::new();
        let mut auth_titles: HashMap<(String, String), String> = HashMap::new();
        for (qcode, lang, status, title) in results {
            statuses.entry(qcode.clone()).or_default().push(status);
            if status == AuthStatus::Ok {
                if let Some(title) = title {
                    auth_titles.insert((qcode, lang), title);
                }
            }
        }

        // A node is removed only when every language came back definitively
        // invalid (no OK and no transient ERROR).
        let bad: HashSet<String> = sampled
            .iter()
            .filter(|qcode| {
                let list = statuses.get(*qcode).cloned().unwrap_or_default();
                !list.contains(&AuthStatus::Ok) && !list.contains(&AuthStatus::Error)
            })
            .cloned()
            .collect();
        if !bad.is_empty() {
            let nodes_before = graph.nodes.len();
            let rels_before = graph.relationships.len();
            graph.nodes.retain(|n| !bad.contains(&n.id));
            let valid: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
            graph
                .relationships
                .retain(|r| valid.contains(r.source.as_str()) && valid.contains(r.target.as_str()));
            info!(
                nodes = nodes_before - graph.nodes.len(),
                relationships = rels_before - graph.relationships.len(),
                "removed nodes no language could validate"
            );
        }

        let mut updated = 0usize;
        for node in &mut graph.nodes {
            let mut changed = false;
            for ((qcode, lang), title) in &auth_titles {
                if *qcode != node.id {
                    continue;
                }
                let lang_key = if lang == "zh" { "zh-cn" } else { lang.as_str() };
                let current = node.name.get(lang_key).cloned().unwrap_or_default();

                let mut canonical = title.clone();
                let mut set: HashSet<String> = current.iter().cloned().collect();
                set.insert(canonical.clone());
                if lang_key == "zh-cn" {
                    set = set.iter().map(|n| text::to_simplified(n)).collect();
                    canonical = text::to_simplified(&canonical);
                }
                set.remove(&canonical);
                let mut list = vec![canonical];
                let mut aliases: Vec<String> = set.into_iter().collect();
                aliases.sort();
                list.extend(aliases);

                if list != current {
                    node.name.insert(lang_key.to_string(), list);
                    changed = true;
                }
            }
            if changed {
                updated += 1;
            }
        }
        info!(updated, "node name lists refreshed");

        let titles_to_add: Vec<String> = auth_titles
            .iter()
            .map(|((_, lang), title)| text::format_list_entry(lang, title))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if let Err(e) = self.watchlist.add_titles(&titles_to_add).await {
            warn!(error = %e, "could not sync refreshed titles to the watch list");
        }
    }

    /// Step 2: refresh a bounded sample of watch-list entries to their
    /// authoritative titles, dropping disambiguation/404 entries and
    /// resolving redirect chains transitively.
    async fn refresh_watchlist(&self) -> Result<()> {
        let entries: Vec<ListEntry> = self
            .watchlist
            .parse()
            .await
            .into_iter()
            .flat_map(|s| s.entries)
            .collect();
        if entries.is_empty() {
            info!("watch list empty, skipping refresh");
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        let sampled: Vec<ListEntry> = if entries.len() > self.maintenance.list_update_limit {
            warn!(
                total = entries.len(),
                limit = self.maintenance.list_update_limit,
                "too many entries, sampling"
            );
            entries
                .choose_multiple(&mut rng, self.maintenance.list_update_limit)
                .cloned()
                .collect()
        } else {
            entries
        };
        let sampled_raw: HashSet<String> = sampled.iter().map(|e| e.raw.clone()).collect();

        info!(lookups = sampled.len(), "querying authoritative list titles");
        let results: Vec<(ListEntry, Option<String>, AuthStatus)> = stream::iter(sampled)
            .map(|entry| async move {
                let (final_entry, status) = self.resolve_entry(&entry).await;
                (entry, final_entry, status)
            })
            .buffer_unordered(self.maintenance.max_workers.max(1))
            .collect()
            .await;

        let mut redirects: HashMap<String, String> = HashMap::new();
        let mut bad: HashSet<String> = HashSet::new();
        for (entry, final_entry, status) in results {
            match status {
                AuthStatus::Ok => {
                    if let Some(final_entry) = final_entry {
                        if final_entry != entry.raw {
                            redirects.insert(entry.raw.clone(), final_entry);
                        }
                    }
                }
                AuthStatus::Disambig | AuthStatus::NotFound => {
                    bad.insert(entry.raw.clone());
                    if let Some(final_entry) = final_entry {
                        bad.insert(final_entry);
                    }
                }
                AuthStatus::Error => {}
            }
        }

        // Resolve redirect chains with cycle protection.
        let mut authoritative: HashMap<String, String> = HashMap::new();
        for raw in &sampled_raw {
            if bad.contains(raw) {
                continue;
            }
            let mut destination = raw.clone();
            let mut visited: HashSet<String> = [destination.clone()].into_iter().collect();
            while let Some(next) = redirects.get(&destination) {
                if !visited.insert(next.clone()) {
                    break;
                }
                destination = next.clone();
            }
            authoritative.insert(raw.clone(), destination);
        }

        let mut updates = 0usize;
        let mut removals = 0usize;
        let mut duplicates = 0usize;
        self.watchlist
            .modify(|lines| {
                let mut kept: Vec<String> = Vec::new();
                let mut seen: HashSet<String> = HashSet::new();
                for line in lines {
                    let stripped = line.trim().to_string();
                    if stripped.is_empty()
                        || stripped.starts_with("##")
                        || stripped.starts_with("//")
                    {
                        kept.push(line);
                        continue;
                    }
                    if !sampled_raw.contains(&stripped) {
                        let (_, display) = text::split_lang_prefix(&stripped);
                        seen.insert(text::simplified_key(display));
                        kept.push(line);
                        continue;
                    }
                    if bad.contains(&stripped) {
                        removals += 1;
                        continue;
                    }
                    let final_raw = authoritative
                        .get(&stripped)
                        .cloned()
                        .unwrap_or_else(|| stripped.clone());
                    if final_raw != stripped {
                        updates += 1;
                    }
                    let (_, display) = text::split_lang_prefix(&final_raw);
                    if !seen.insert(text::simplified_key(display)) {
                        duplicates += 1;
                        continue;
                    }
                    kept.push(final_raw);
                }
                kept
            })
            .await?;
        info!(updates, removals, duplicates, "watch list refreshed");
        Ok(())
    }

    /// Resolve a single list entry to `(formatted final entry, status)`.
    /// For zh entries both spellings are probed and a form that is stable
    /// to itself is preferred over whatever the API normalizes to.
    async fn resolve_entry(&self, entry: &ListEntry) -> (Option<String>, AuthStatus) {
        if entry.lang != "zh" {
            let result = self
                .wiki
                .get_authoritative_title_and_status(&entry.display_name, &entry.lang)
                .await;
            let formatted = result
                .title
                .map(|t| text::format_list_entry(&entry.lang, &t));
            return (formatted, result.status);
        }

        let simplified = text::to_simplified(&entry.display_name);
        let traditional = text::to_traditional(&entry.display_name);
        let simp_res = self
            .wiki
            .get_authoritative_title_and_status(&simplified, "zh")
            .await;
        let trad_res = self
            .wiki
            .get_authoritative_title_and_status(&traditional, "zh")
            .await;

        let simp_stable = simp_res.status == AuthStatus::Ok
            && simp_res.title.as_deref() == Some(simplified.as_str());
        let trad_stable = trad_res.status == AuthStatus::Ok
            && trad_res.title.as_deref() == Some(traditional.as_str());

        // Prefer the original spelling when it is already stable, then any
        // stable form, then the API's simplified resolution.
        let (title, status) = if entry.display_name == traditional && trad_stable {
            (trad_res.title, trad_res.status)
        } else if entry.display_name == simplified && simp_stable {
            (simp_res.title, simp_res.status)
        } else if trad_stable {
            (trad_res.title, trad_res.status)
        } else {
            // Neither form is stable (both redirect): accept the API's
            // resolution of the simplified form.
            (simp_res.title, simp_res.status)
        };
        (title, status)
    }

    /// Step 3: the watch list's categories are authoritative for node
    /// types; fix any node whose primary name is listed under a different
    /// category.
    async fn correct_node_types(&self, graph: &mut Graph) {
        let mut listed_types: HashMap<String, NodeType> = HashMap::new();
        for section in self.watchlist.parse().await {
            let Some(node_type) = NodeType::from_category(&section.category) else {
                continue;
            };
            for entry in section.entries {
                listed_types.insert(text::simplified_key(&entry.display_name), node_type);
            }
        }
        if listed_types.is_empty() {
            return;
        }

        let mut corrected = 0usize;
        for node in &mut graph.nodes {
            let canonical = node
                .name
                .get("zh-cn")
                .and_then(|names| names.first())
                .or_else(|| node.name.get("en").and_then(|names| names.first()));
            let Some(canonical) = canonical else {
                continue;
            };
            let Some(&correct) = listed_types.get(&text::simplified_key(canonical)) else {
                continue;
            };
            if node.node_type != correct {
                info!(
                    node = %canonical,
                    id = %node.id,
                    from = %node.node_type,
                    to = %correct,
                    "type corrected from the watch list"
                );
                node.node_type = correct;
                corrected += 1;
            }
        }
        info!(corrected, "node types checked against the watch list");
    }

    /// Step 6: sample relationships and let the audit model judge each one.
    /// Transient failures are retried across rounds with a cooldown; after
    /// the last round whatever is still unjudged stays untouched.
    async fn audit_relationships(&self, graph: &mut Graph) {
        let now = Utc::now();
        let mut candidates: Vec<usize> = Vec::new();
        {
            let cache = self.false_relations.lock().await;
            let mut rng = rand::thread_rng();
            for (index, rel) in graph.relationships.iter().enumerate() {
                let key = RelKey::from(rel).cache_key();
                match cache.get(&key) {
                    None => candidates.push(index),
                    Some(entry) => {
                        let age_days = (now - entry.timestamp).num_days();
                        if age_days <= self.audit.skip_days {
                            continue;
                        }
                        if age_days <= self.audit.prob_end_days {
                            let span =
                                (self.audit.prob_end_days - self.audit.prob_start_days).max(1);
                            let ratio =
                                (age_days - self.audit.prob_start_days) as f64 / span as f64;
                            let probability = self.audit.prob_start_value
                                + (self.audit.prob_end_value - self.audit.prob_start_value)
                                    * ratio;
                            if rng.gen_bool(probability.clamp(0.0, 1.0)) {
                                candidates.push(index);
                            }
                        } else {
                            candidates.push(index);
                        }
                    }
                }
            }
        }
        if candidates.is_empty() {
            info!("no relationships need auditing");
            return;
        }

        let mut rng = rand::thread_rng();
        let sample_size = self.audit.sample_size.min(candidates.len());
        let mut queue: Vec<usize> = candidates
            .choose_multiple(&mut rng, sample_size)
            .copied()
            .collect();
        queue.shuffle(&mut rng);
        info!(
            candidates = candidates.len(),
            sampled = queue.len(),
            "auditing sampled relationships"
        );

        let node_map: HashMap<String, &Node> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let relationships = &graph.relationships;
        let mut to_delete: HashSet<usize> = HashSet::new();

        for round in 1..=self.audit.max_rounds {
            if queue.is_empty() {
                break;
            }
            info!(round, pending = queue.len(), "audit round");
            let mut failed: Vec<usize> = Vec::new();

            for batch in queue.chunks(self.audit.batch_size.max(1)) {
                let verdicts: Vec<(usize, AuditVerdict)> = stream::iter(batch.iter().copied())
                    .map(|index| {
                        let node_map = &node_map;
                        async move {
                            let verdict = self
                                .llm
                                .audit_relation(&relationships[index], node_map)
                                .await;
                            (index, verdict)
                        }
                    })
                    .buffer_unordered(self.audit.batch_size.max(1))
                    .collect()
                    .await;

                for (index, verdict) in verdicts {
                    match verdict {
                        AuditVerdict::Delete => {
                            to_delete.insert(index);
                        }
                        AuditVerdict::Keep => {
                            let key = RelKey::from(&relationships[index]).cache_key();
                            self.false_relations
                                .lock()
                                .await
                                .insert(key, FalseRelationEntry { timestamp: now });
                        }
                        AuditVerdict::Unavailable => failed.push(index),
                        AuditVerdict::QuotaExhausted => {}
                    }
                }
            }

            queue = failed;
            if !queue.is_empty() && round < self.audit.max_rounds {
                warn!(
                    round,
                    pending = queue.len(),
                    cooldown_secs = self.audit.cooldown_secs,
                    "audit failures, cooling down before retry"
                );
                tokio::time::sleep(std::time::Duration::from_secs(self.audit.cooldown_secs))
                    .await;
            }
        }
        if !queue.is_empty() {
            error!(
                pending = queue.len(),
                rounds = self.audit.max_rounds,
                "relationships left unjudged after all rounds"
            );
        }

        let removed = to_delete.len();
        let mut index = 0usize;
        graph.relationships.retain(|_| {
            let keep = !to_delete.contains(&index);
            index += 1;
            keep
        });
        info!(removed, "audited relationships removed");
    }

    /// Step 8: retry Q-code resolution for `BAIDU:`/`CDT:` nodes. On
    /// success the temporary node either renames to the Q-code or folds its
    /// properties into the already-present Q-code node; relationships are
    /// remapped and re-deduplicated.
    async fn upgrade_temporary_nodes(&self, graph: &mut Graph) {
        let temp_ids: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| n.has_temp_id())
            .map(|n| n.id.clone())
            .collect();
        info!(count = temp_ids.len(), "temporary-ID nodes to check");

        let mut remap: HashMap<String, String> = HashMap::new();
        for old_id in temp_ids {
            let original_name = old_id.split_once(':').map(|(_, n)| n).unwrap_or(&old_id);
            if let Some(hit) = self.wiki.get_qcode(original_name, "zh").await {
                info!(name = %original_name, qcode = %hit.qcode, "temporary node upgraded");
                remap.insert(old_id.clone(), hit.qcode);
            }
        }
        if remap.is_empty() {
            return;
        }

        let mut claimed: HashSet<String> = graph.nodes.iter().map(|n| n.id.clone()).collect();
        let mut absorbed: Vec<Node> = Vec::new();
        graph.nodes.retain_mut(|node| {
            let Some(qcode) = remap.get(&node.id) else {
                return true;
            };
            if claimed.contains(qcode) {
                // The Q-code node already exists; remember this one so its
                // properties can be folded in below.
                absorbed.push(node.clone());
                false
            } else {
                claimed.insert(qcode.clone());
                node.id = qcode.clone();
                true
            }
        });
        for temp in absorbed {
            let Some(qcode) = remap.get(&temp.id) else {
                continue;
            };
            if let Some(target) = graph.nodes.iter_mut().find(|n| &n.id == qcode) {
                merge_properties(&mut target.properties, temp.properties);
            }
        }

        for rel in &mut graph.relationships {
            if let Some(qcode) = remap.get(&rel.source) {
                rel.source = qcode.clone();
            }
            if let Some(qcode) = remap.get(&rel.target) {
                rel.target = qcode.clone();
            }
        }
        // Remapping can collide two relationships onto one canonical key.
        let mut seen: HashSet<RelKey> = HashSet::new();
        graph
            .relationships
            .retain(|rel| seen.insert(canonical_key(&rel.source, &rel.target, rel.rel_type)));
        info!(upgraded = remap.len(), "temporary nodes upgraded");
    }
}

/// Step 4: a relationship without a usable description carries no evidence
/// and is dropped.
fn prune_descriptionless(graph: &mut Graph) {
    let before = graph.relationships.len();
    graph.relationships.retain(|rel| {
        rel.properties
            .get("description")
            .and_then(Value::as_object)
            .is_some_and(|map| {
                !map.is_empty()
                    && map
                        .values()
                        .any(|v| v.as_str().is_some_and(|s| !s.trim().is_empty()))
            })
    });
    let removed = before - graph.relationships.len();
    if removed > 0 {
        info!(removed, "descriptionless relationships pruned");
    }
}

/// Shallow property overlay with a deep merge for map-valued entries such
/// as multilingual descriptions.
fn merge_properties(
    target: &mut serde_json::Map<String, Value>,
    source: serde_json::Map<String, Value>,
) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{RelType, Relationship};
    use serde_json::json;

    fn rel_with_props(props: Value) -> Relationship {
        Relationship {
            source: "Q1".into(),
            target: "Q2".into(),
            rel_type: RelType::Influenced,
            properties: props.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn prune_keeps_only_described_relationships() {
        let mut graph = Graph {
            nodes: vec![],
            relationships: vec![
                rel_with_props(json!({"description": {"zh-cn": "有据可查"}})),
                rel_with_props(json!({"description": {"zh-cn": "   "}})),
                rel_with_props(json!({"description": {}})),
                rel_with_props(json!({})),
            ],
        };
        prune_descriptionless(&mut graph);
        assert_eq!(graph.relationships.len(), 1);
    }

    #[test]
    fn merge_properties_deep_merges_maps() {
        let mut target = json!({"description": {"zh-cn": "甲"}, "period": "1990s"})
            .as_object()
            .cloned()
            .unwrap();
        let source = json!({"description": {"en": "x"}, "location": {"zh-cn": "北京"}})
            .as_object()
            .cloned()
            .unwrap();
        merge_properties(&mut target, source);
        assert_eq!(target["description"]["zh-cn"], "甲");
        assert_eq!(target["description"]["en"], "x");
        assert_eq!(target["period"], "1990s");
        assert_eq!(target["location"]["zh-cn"], "北京");
    }
}
