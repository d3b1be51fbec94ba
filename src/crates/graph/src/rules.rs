//! Source/target type rules for the relationship vocabulary.

use crate::model::{NodeType, RelType};

/// Allowed source and target node types for one relationship type.
#[derive(Debug, Clone, Copy)]
pub struct RelRule {
    pub source: &'static [NodeType],
    pub target: &'static [NodeType],
}

const PERSON: &[NodeType] = &[NodeType::Person];
const LOCATION: &[NodeType] = &[NodeType::Location];
const ORGANIZATION: &[NodeType] = &[NodeType::Organization];
const PERSON_OR_ORG: &[NodeType] = &[NodeType::Person, NodeType::Organization];
const ORG_OR_MOVEMENT: &[NodeType] = &[NodeType::Organization, NodeType::Movement];
const CAUSE: &[NodeType] = &[NodeType::Movement, NodeType::Event, NodeType::Document];
const ANY: &[NodeType] = &NodeType::ALL;

/// Rule table for the fixed vocabulary.
pub fn rule_for(rel_type: RelType) -> RelRule {
    match rel_type {
        RelType::SpouseOf
        | RelType::ChildOf
        | RelType::SiblingOf
        | RelType::LoverOf
        | RelType::RelativeOf
        | RelType::MetWith
        | RelType::FriendOf => RelRule {
            source: PERSON,
            target: PERSON,
        },
        RelType::EnemyOf | RelType::SubordinateOf => RelRule {
            source: PERSON_OR_ORG,
            target: PERSON_OR_ORG,
        },
        RelType::BornIn => RelRule {
            source: PERSON,
            target: LOCATION,
        },
        RelType::AlumnusOf => RelRule {
            source: PERSON,
            target: ORGANIZATION,
        },
        RelType::MemberOf => RelRule {
            source: PERSON,
            target: ORG_OR_MOVEMENT,
        },
        RelType::Founded => RelRule {
            source: PERSON_OR_ORG,
            target: ORG_OR_MOVEMENT,
        },
        RelType::Pushed | RelType::Blocked => RelRule {
            source: PERSON_OR_ORG,
            target: CAUSE,
        },
        RelType::Influenced => RelRule {
            source: ANY,
            target: ANY,
        },
    }
}

/// Whether `(source_type, target_type)` is legal for `rel_type`.
pub fn satisfies_rule(rel_type: RelType, source_type: NodeType, target_type: NodeType) -> bool {
    let rule = rule_for(rel_type);
    rule.source.contains(&source_type) && rule.target.contains(&target_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_to_person_rules() {
        assert!(satisfies_rule(
            RelType::SpouseOf,
            NodeType::Person,
            NodeType::Person
        ));
        assert!(!satisfies_rule(
            RelType::SpouseOf,
            NodeType::Person,
            NodeType::Organization
        ));
    }

    #[test]
    fn born_in_requires_a_location_target() {
        assert!(satisfies_rule(
            RelType::BornIn,
            NodeType::Person,
            NodeType::Location
        ));
        assert!(!satisfies_rule(
            RelType::BornIn,
            NodeType::Person,
            NodeType::Event
        ));
    }

    #[test]
    fn influenced_accepts_anything() {
        for source in NodeType::ALL {
            for target in NodeType::ALL {
                assert!(satisfies_rule(RelType::Influenced, source, target));
            }
        }
    }
}
