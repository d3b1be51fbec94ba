//! Schema validation and cleaning for the master graph.
//!
//! One sweep enforces the structural invariants: every relationship
//! references existing nodes and satisfies its type rule, no node carries
//! properties outside its type's vocabulary, names are deduplicated, and
//! empty descriptions disappear instead of lingering as `""` or `{}`.

use crate::model::{Graph, Node, NodeType, Properties, Relationship};
use crate::rules::satisfies_rule;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

/// Counts of what the sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanStats {
    pub nodes_removed: usize,
    pub relationships_removed: usize,
}

const PERSON_PROP_KEYS: &[&str] = &[
    "lifetime",
    "gender",
    "birth_place",
    "death_place",
    "description",
];
const GENERAL_PROP_KEYS: &[&str] = &["period", "location", "description"];
const REL_PROP_KEYS: &[&str] = &["start_date", "end_date", "position", "degree", "description"];

/// Validate and clean the graph in place.
pub fn validate_and_clean(graph: &mut Graph) -> CleanStats {
    let mut stats = CleanStats::default();

    let nodes_before = graph.nodes.len();
    graph.nodes.retain_mut(|node| {
        if node.id.is_empty() {
            warn!("dropping node with empty id");
            return false;
        }
        clean_node(node);
        if node.name.is_empty() {
            warn!(id = %node.id, "dropping node with no names in any language");
            return false;
        }
        true
    });
    stats.nodes_removed = nodes_before - graph.nodes.len();

    let node_types: HashMap<String, NodeType> = graph
        .nodes
        .iter()
        .map(|n| (n.id.clone(), n.node_type))
        .collect();

    let rels_before = graph.relationships.len();
    graph.relationships.retain_mut(|rel| {
        if !relationship_is_valid(rel, &node_types) {
            return false;
        }
        clean_relationship_properties(&mut rel.properties);
        true
    });
    stats.relationships_removed = rels_before - graph.relationships.len();

    if stats.nodes_removed > 0 || stats.relationships_removed > 0 {
        info!(
            nodes_removed = stats.nodes_removed,
            relationships_removed = stats.relationships_removed,
            "schema sweep removed invalid entries"
        );
    }
    stats
}

fn clean_node(node: &mut Node) {
    // Canonical name appears exactly once; aliases keep their first
    // occurrence's position.
    for names in node.name.values_mut() {
        let mut seen = std::collections::HashSet::new();
        names.retain(|n| !n.trim().is_empty() && seen.insert(n.clone()));
    }
    node.name.retain(|_, names| !names.is_empty());

    let allowed: &[&str] = match node.node_type {
        NodeType::Person => PERSON_PROP_KEYS,
        _ => GENERAL_PROP_KEYS,
    };
    let keys: Vec<String> = node.properties.keys().cloned().collect();
    for key in keys {
        if !allowed.contains(&key.as_str()) {
            node.properties.remove(&key);
            continue;
        }
        let keep = match key.as_str() {
            "lifetime" => node.properties[&key].is_string(),
            "gender" => matches!(
                node.properties[&key].as_str(),
                Some("Male") | Some("Female")
            ),
            "period" => is_string_or_string_list(&node.properties[&key]),
            // birth_place, death_place, location, description
            _ => clean_lang_map(node.properties.get_mut(&key).expect("key present")),
        };
        if !keep {
            node.properties.remove(&key);
        }
    }
}

fn relationship_is_valid(rel: &Relationship, node_types: &HashMap<String, NodeType>) -> bool {
    if rel.source.is_empty() || rel.target.is_empty() {
        warn!("dropping relationship with empty endpoint");
        return false;
    }
    let (Some(&source_type), Some(&target_type)) =
        (node_types.get(&rel.source), node_types.get(&rel.target))
    else {
        warn!(
            source = %rel.source,
            target = %rel.target,
            "dropping relationship referencing a missing node"
        );
        return false;
    };
    if !satisfies_rule(rel.rel_type, source_type, target_type) {
        warn!(
            source = %rel.source,
            target = %rel.target,
            rel_type = %rel.rel_type,
            "dropping relationship violating its type rule"
        );
        return false;
    }
    true
}

fn clean_relationship_properties(properties: &mut Properties) {
    let keys: Vec<String> = properties.keys().cloned().collect();
    for key in keys {
        if !REL_PROP_KEYS.contains(&key.as_str()) {
            properties.remove(&key);
            continue;
        }
        let keep = match key.as_str() {
            "start_date" | "end_date" => is_string_or_string_list(&properties[&key]),
            // position, degree, description
            _ => clean_lang_map(properties.get_mut(&key).expect("key present")),
        };
        if !keep {
            properties.remove(&key);
        }
    }
}

/// Clean a `lang -> string` map in place; returns false when nothing
/// useful remains.
fn clean_lang_map(value: &mut Value) -> bool {
    let Some(map) = value.as_object_mut() else {
        return false;
    };
    map.retain(|_, v| v.as_str().is_some_and(|s| !s.trim().is_empty()));
    !map.is_empty()
}

fn is_string_or_string_list(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Array(items) => items.iter().all(Value::is_string),
        _ => false,
    }
}
