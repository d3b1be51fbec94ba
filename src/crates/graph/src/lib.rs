//! Data model for the consolidated knowledge graph.
//!
//! The graph holds people, organizations, movements, events, locations and
//! documents keyed by Wikidata Q-codes (or `BAIDU:`/`CDT:` temporary IDs when
//! no Q-code exists yet), connected by a fixed vocabulary of relationship
//! types. This crate owns:
//!
//! - the serde types for the master graph and for parser-produced fragments,
//! - the relationship vocabulary and its source/target type rules,
//! - canonical relationship keys (undirected types collapse `(a,b)`/`(b,a)`),
//! - master-graph JSON load/save,
//! - the schema validation sweep that drops malformed nodes/relationships and
//!   strips unrecognized properties,
//! - Chinese text normalization helpers used for dedup and title matching.

pub mod io;
pub mod key;
pub mod model;
pub mod rules;
pub mod schema;
pub mod text;

pub use io::{load_master_graph, save_master_graph, GraphIoError};
pub use key::{canonical_key, RelKey};
pub use model::{
    Fragment, FragmentNode, FragmentRel, Graph, NameMap, Node, NodeType, Properties, RelType,
    Relationship,
};
pub use rules::satisfies_rule;
pub use schema::{validate_and_clean, CleanStats};
