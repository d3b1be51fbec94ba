//! Canonical relationship keys.

use crate::model::{RelType, Relationship};

/// Dedup key for a relationship. Directed types keep `(source, target)`;
/// undirected types store the endpoints in sorted order so `(a,b)` and
/// `(b,a)` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelKey {
    pub a: String,
    pub b: String,
    pub rel_type: RelType,
}

impl RelKey {
    /// String form used as the false-relations cache key.
    pub fn cache_key(&self) -> String {
        format!("{}-{}-{}", self.a, self.b, self.rel_type)
    }
}

/// Build the canonical key for `(source, target, rel_type)`.
pub fn canonical_key(source: &str, target: &str, rel_type: RelType) -> RelKey {
    if rel_type.is_undirected() && source > target {
        RelKey {
            a: target.to_string(),
            b: source.to_string(),
            rel_type,
        }
    } else {
        RelKey {
            a: source.to_string(),
            b: target.to_string(),
            rel_type,
        }
    }
}

impl From<&Relationship> for RelKey {
    fn from(rel: &Relationship) -> Self {
        canonical_key(&rel.source, &rel.target, rel.rel_type)
    }
}
