//! Few-shot example construction for the wikitext parser.
//!
//! Samples nodes and relationships from the master graph and rewrites their
//! internal IDs to human-readable primary names, so the parser sees output
//! shaped exactly like what it is asked to produce.

use graph::{Graph, Node};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Keys never shown to the model.
const INTERNAL_PROP_KEYS: &[&str] = &["verified_node"];

/// Build the few-shot preamble, or `None` when the graph has nothing to
/// sample.
pub fn build_examples(
    graph: &Graph,
    node_samples: usize,
    rel_samples: usize,
    rng: &mut impl Rng,
) -> Option<String> {
    if graph.nodes.is_empty() || graph.relationships.is_empty() {
        return None;
    }

    let names: HashMap<&str, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.primary_name()))
        .collect();

    let sampled_nodes: Vec<Value> = graph
        .nodes
        .choose_multiple(rng, node_samples.min(graph.nodes.len()))
        .map(|node| readable_node(node, &names))
        .collect();

    let sampled_rels: Vec<Value> = graph
        .relationships
        .choose_multiple(rng, rel_samples.min(graph.relationships.len()))
        .map(|rel| {
            let mut value = serde_json::to_value(rel).unwrap_or_default();
            if let Some(obj) = value.as_object_mut() {
                for side in ["source", "target"] {
                    if let Some(id) = obj.get(side).and_then(Value::as_str) {
                        let display = names.get(id).copied().unwrap_or(id).to_string();
                        obj.insert(side.to_string(), Value::String(display));
                    }
                }
            }
            value
        })
        .collect();

    if sampled_nodes.is_empty() && sampled_rels.is_empty() {
        return None;
    }

    let examples = json!({
        "nodes": sampled_nodes,
        "relationships": sampled_rels,
    });
    let rendered = serde_json::to_string_pretty(&examples).ok()?;
    Some(format!(
        "Use the following JSON samples as the exact output format.\n\
         --- FORMAT SAMPLES START ---\n{rendered}\n--- FORMAT SAMPLES END ---\n"
    ))
}

fn readable_node(node: &Node, names: &HashMap<&str, &str>) -> Value {
    let mut value = serde_json::to_value(node).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        let display = names
            .get(node.id.as_str())
            .copied()
            .unwrap_or(node.id.as_str())
            .to_string();
        obj.insert("id".to_string(), Value::String(display));
        if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
            for key in INTERNAL_PROP_KEYS {
                props.remove(*key);
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{RelType, Relationship};
    use rand::SeedableRng;

    fn sample_graph() -> Graph {
        let node: Node = serde_json::from_value(serde_json::json!({
            "id": "Q1",
            "type": "Person",
            "name": {"zh-cn": ["邓小平"]},
            "properties": {"verified_node": true, "lifetime": "1904 - 1997"}
        }))
        .unwrap();
        let other: Node = serde_json::from_value(serde_json::json!({
            "id": "Q2",
            "type": "Location",
            "name": {"zh-cn": ["四川"]}
        }))
        .unwrap();
        Graph {
            nodes: vec![node, other],
            relationships: vec![Relationship {
                source: "Q1".into(),
                target: "Q2".into(),
                rel_type: RelType::BornIn,
                properties: Default::default(),
            }],
        }
    }

    #[test]
    fn examples_use_names_not_ids() {
        let graph = sample_graph();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let preamble = build_examples(&graph, 5, 5, &mut rng).unwrap();
        assert!(preamble.contains("邓小平"));
        assert!(preamble.contains("四川"));
        assert!(!preamble.contains("Q1"));
        assert!(!preamble.contains("Q2"));
    }

    #[test]
    fn internal_flags_are_stripped() {
        let graph = sample_graph();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let preamble = build_examples(&graph, 5, 5, &mut rng).unwrap();
        assert!(!preamble.contains("verified_node"));
        assert!(preamble.contains("lifetime"));
    }

    #[test]
    fn empty_graph_yields_none() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert!(build_examples(&Graph::default(), 5, 5, &mut rng).is_none());
    }
}
