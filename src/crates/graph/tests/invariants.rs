//! Property tests: the schema sweep always leaves the graph satisfying the
//! structural invariants, regardless of input.

use graph::{
    canonical_key, satisfies_rule, validate_and_clean, Graph, Node, NodeType, RelType, Relationship,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn arb_node_type() -> impl Strategy<Value = NodeType> {
    prop_oneof![
        Just(NodeType::Person),
        Just(NodeType::Organization),
        Just(NodeType::Movement),
        Just(NodeType::Event),
        Just(NodeType::Location),
        Just(NodeType::Document),
    ]
}

fn arb_rel_type() -> impl Strategy<Value = RelType> {
    prop_oneof![
        Just(RelType::SpouseOf),
        Just(RelType::ChildOf),
        Just(RelType::SiblingOf),
        Just(RelType::LoverOf),
        Just(RelType::RelativeOf),
        Just(RelType::MetWith),
        Just(RelType::BornIn),
        Just(RelType::AlumnusOf),
        Just(RelType::MemberOf),
        Just(RelType::SubordinateOf),
        Just(RelType::FriendOf),
        Just(RelType::EnemyOf),
        Just(RelType::Founded),
        Just(RelType::Pushed),
        Just(RelType::Blocked),
        Just(RelType::Influenced),
    ]
}

fn arb_properties() -> impl Strategy<Value = serde_json::Map<String, serde_json::Value>> {
    let value = prop_oneof![
        "[a-z]{0,6}".prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        prop::collection::btree_map("[a-z-]{2,5}", "[a-z]{0,4}", 0..3).prop_map(|m| {
            serde_json::Value::Object(
                m.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            )
        }),
    ];
    prop::collection::btree_map(
        prop_oneof![
            Just("lifetime".to_string()),
            Just("gender".to_string()),
            Just("period".to_string()),
            Just("location".to_string()),
            Just("description".to_string()),
            Just("birth_place".to_string()),
            "[a-z_]{1,10}",
        ],
        value,
        0..5,
    )
    .prop_map(|m| m.into_iter().collect())
}

fn arb_node(id: String) -> impl Strategy<Value = Node> {
    (
        arb_node_type(),
        prop::collection::vec("[a-z ]{0,4}", 0..3),
        arb_properties(),
    )
        .prop_map(move |(node_type, names, properties)| Node {
            id: id.clone(),
            node_type,
            name: if names.is_empty() {
                Default::default()
            } else {
                [("zh-cn".to_string(), names)].into_iter().collect()
            },
            properties,
        })
}

fn arb_graph() -> impl Strategy<Value = Graph> {
    (1usize..8).prop_flat_map(|node_count| {
        let nodes: Vec<_> = (0..node_count)
            .map(|i| arb_node(format!("Q{i}")))
            .collect();
        // Endpoint indices deliberately range past the node list so the
        // sweep has dangling references to drop.
        let rels = prop::collection::vec(
            (0usize..16, 0usize..16, arb_rel_type(), arb_properties()),
            0..12,
        )
        .prop_map(|rels| {
            rels.into_iter()
                .map(|(s, t, rel_type, properties)| Relationship {
                    source: format!("Q{s}"),
                    target: format!("Q{t}"),
                    rel_type,
                    properties,
                })
                .collect::<Vec<_>>()
        });
        (nodes, rels).prop_map(|(nodes, relationships)| Graph {
            nodes,
            relationships,
        })
    })
}

proptest! {
    #[test]
    fn sweep_enforces_referential_and_type_rules(mut g in arb_graph()) {
        validate_and_clean(&mut g);

        let types: HashMap<&str, NodeType> = g
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.node_type))
            .collect();

        for rel in &g.relationships {
            let source = types.get(rel.source.as_str()).copied();
            let target = types.get(rel.target.as_str()).copied();
            prop_assert!(source.is_some() && target.is_some());
            prop_assert!(satisfies_rule(
                rel.rel_type,
                source.unwrap(),
                target.unwrap()
            ));
        }
    }

    #[test]
    fn sweep_leaves_every_node_named_and_deduped(mut g in arb_graph()) {
        validate_and_clean(&mut g);
        for node in &g.nodes {
            prop_assert!(!node.name.is_empty());
            for names in node.name.values() {
                prop_assert!(!names.is_empty());
                let unique: HashSet<_> = names.iter().collect();
                prop_assert_eq!(unique.len(), names.len());
            }
        }
    }

    #[test]
    fn sweep_is_idempotent(mut g in arb_graph()) {
        validate_and_clean(&mut g);
        let once = serde_json::to_string(&g).unwrap();
        validate_and_clean(&mut g);
        let twice = serde_json::to_string(&g).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn canonical_key_is_symmetric_for_undirected(a in "Q[0-9]{1,4}", b in "Q[0-9]{1,4}", rel_type in arb_rel_type()) {
        let ab = canonical_key(&a, &b, rel_type);
        let ba = canonical_key(&b, &a, rel_type);
        if rel_type.is_undirected() {
            prop_assert_eq!(ab, ba);
        } else if a != b {
            prop_assert_ne!(ab, ba);
        }
    }
}
