//! Serde types for the master graph and parser fragments.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Per-language name lists: canonical name first, aliases sorted after it.
pub type NameMap = BTreeMap<String, Vec<String>>;

/// Free-form properties. `serde_json::Map` keeps keys ordered, so repeated
/// saves of an unchanged graph are byte-identical.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Entity categories carried by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Person,
    Organization,
    Movement,
    Event,
    Location,
    Document,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Person,
        NodeType::Organization,
        NodeType::Movement,
        NodeType::Event,
        NodeType::Location,
        NodeType::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Person => "Person",
            NodeType::Organization => "Organization",
            NodeType::Movement => "Movement",
            NodeType::Event => "Event",
            NodeType::Location => "Location",
            NodeType::Document => "Document",
        }
    }

    /// Lowercase form used as a watch-list section header and fragment
    /// directory name.
    pub fn category(&self) -> &'static str {
        match self {
            NodeType::Person => "person",
            NodeType::Organization => "organization",
            NodeType::Movement => "movement",
            NodeType::Event => "event",
            NodeType::Location => "location",
            NodeType::Document => "document",
        }
    }

    /// Parse a watch-list category header (case-insensitive).
    pub fn from_category(category: &str) -> Option<NodeType> {
        match category.to_ascii_lowercase().as_str() {
            "person" => Some(NodeType::Person),
            "organization" => Some(NodeType::Organization),
            "movement" => Some(NodeType::Movement),
            "event" => Some(NodeType::Event),
            "location" => Some(NodeType::Location),
            "document" => Some(NodeType::Document),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed relationship vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    SpouseOf,
    ChildOf,
    SiblingOf,
    LoverOf,
    RelativeOf,
    MetWith,
    BornIn,
    AlumnusOf,
    MemberOf,
    SubordinateOf,
    FriendOf,
    EnemyOf,
    Founded,
    Pushed,
    Blocked,
    Influenced,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::SpouseOf => "SPOUSE_OF",
            RelType::ChildOf => "CHILD_OF",
            RelType::SiblingOf => "SIBLING_OF",
            RelType::LoverOf => "LOVER_OF",
            RelType::RelativeOf => "RELATIVE_OF",
            RelType::MetWith => "MET_WITH",
            RelType::BornIn => "BORN_IN",
            RelType::AlumnusOf => "ALUMNUS_OF",
            RelType::MemberOf => "MEMBER_OF",
            RelType::SubordinateOf => "SUBORDINATE_OF",
            RelType::FriendOf => "FRIEND_OF",
            RelType::EnemyOf => "ENEMY_OF",
            RelType::Founded => "FOUNDED",
            RelType::Pushed => "PUSHED",
            RelType::Blocked => "BLOCKED",
            RelType::Influenced => "INFLUENCED",
        }
    }

    /// Undirected types collapse `(a,b)` and `(b,a)` to one canonical key.
    pub fn is_undirected(&self) -> bool {
        matches!(
            self,
            RelType::SpouseOf
                | RelType::SiblingOf
                | RelType::LoverOf
                | RelType::RelativeOf
                | RelType::FriendOf
                | RelType::EnemyOf
                | RelType::MetWith
        )
    }
}

impl std::fmt::Display for RelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the master graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: NameMap,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl Node {
    /// Whether the node carries a `BAIDU:`/`CDT:` temporary ID.
    pub fn has_temp_id(&self) -> bool {
        self.id.starts_with("BAIDU:") || self.id.starts_with("CDT:")
    }

    /// Whether the node is keyed by a Wikidata Q-code.
    pub fn has_qcode(&self) -> bool {
        is_qcode(&self.id)
    }

    /// Primary human-readable name: `zh-cn` first, then `en`, then any
    /// language, then the ID.
    pub fn primary_name(&self) -> &str {
        for lang in ["zh-cn", "en"] {
            if let Some(first) = self.name.get(lang).and_then(|names| names.first()) {
                return first;
            }
        }
        self.name
            .values()
            .find_map(|names| names.first())
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

/// Check an ID against the Q-code grammar (`Q` followed by digits).
pub fn is_qcode(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next() == Some('Q') && {
        let rest = chars.as_str();
        !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
    }
}

/// A relationship between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: RelType,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

/// The master graph blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Parser output for one entity: nodes keyed by name (no IDs yet) and
/// relationships referencing those names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default)]
    pub nodes: Vec<FragmentNode>,
    #[serde(default)]
    pub relationships: Vec<FragmentRel>,
}

/// A node as extracted by the parser. The type is deserialized leniently:
/// anything outside the vocabulary becomes `None` and the merger drops it
/// instead of failing the whole fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentNode {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub name: NameMap,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl FragmentNode {
    /// The first language key in the fragment node's name map.
    pub fn primary_lang(&self) -> Option<&str> {
        self.name.keys().next().map(String::as_str)
    }

    /// First name under the primary language.
    pub fn primary_name(&self) -> Option<&str> {
        let lang = self.primary_lang()?;
        self.name.get(lang)?.first().map(String::as_str)
    }
}

/// A relationship as extracted by the parser; `source`/`target` are entity
/// names, resolved to IDs during merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRel {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub rel_type: Option<RelType>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

/// Deserialize a value, mapping failures to `None` instead of an error.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_type_round_trips_through_serde() {
        let json = serde_json::to_string(&RelType::SpouseOf).unwrap();
        assert_eq!(json, "\"SPOUSE_OF\"");
        let back: RelType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RelType::SpouseOf);
    }

    #[test]
    fn undirected_subset_is_exactly_seven() {
        let count = [
            RelType::SpouseOf,
            RelType::ChildOf,
            RelType::SiblingOf,
            RelType::LoverOf,
            RelType::RelativeOf,
            RelType::MetWith,
            RelType::BornIn,
            RelType::AlumnusOf,
            RelType::MemberOf,
            RelType::SubordinateOf,
            RelType::FriendOf,
            RelType::EnemyOf,
            RelType::Founded,
            RelType::Pushed,
            RelType::Blocked,
            RelType::Influenced,
        ]
        .iter()
        .filter(|t| t.is_undirected())
        .count();
        assert_eq!(count, 7);
        assert!(!RelType::ChildOf.is_undirected());
    }

    #[test]
    fn qcode_grammar() {
        assert!(is_qcode("Q7195"));
        assert!(!is_qcode("Q"));
        assert!(!is_qcode("BAIDU:Foo"));
        assert!(!is_qcode("Q12a"));
    }

    #[test]
    fn fragment_with_unknown_type_still_parses() {
        let raw = r#"{
            "nodes": [{"type": "Alien", "name": {"zh-cn": ["某人"]}}],
            "relationships": [{"source": "a", "target": "b", "type": "NOT_A_TYPE"}]
        }"#;
        let fragment: Fragment = serde_json::from_str(raw).unwrap();
        assert!(fragment.nodes[0].node_type.is_none());
        assert!(fragment.relationships[0].rel_type.is_none());
    }

    #[test]
    fn primary_name_prefers_zh_cn() {
        let node: Node = serde_json::from_str(
            r#"{"id":"Q1","type":"Person","name":{"en":["Deng Xiaoping"],"zh-cn":["邓小平"]}}"#,
        )
        .unwrap();
        assert_eq!(node.primary_name(), "邓小平");
    }
}
