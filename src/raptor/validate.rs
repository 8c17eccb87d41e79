//! Structural checks over a finished tree snapshot.

use super::tree::{NodeRole, TreeSnapshot};
use std::collections::BTreeSet;
use thiserror::Error;

/// A broken tree invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("Node at position {position} has index {index}")]
    NonDenseIndex { position: usize, index: usize },

    #[error("Leaf {0} is not in round 0")]
    LeafOutsideRoundZero(usize),

    #[error("Non-leaf node {0} sits in round 0")]
    InternalInRoundZero(usize),

    #[error("Node {node} points to missing parent {parent}")]
    MissingParent { node: usize, parent: usize },

    #[error("Node {node} is not listed among the children of its parent {parent}")]
    NotListedByParent { node: usize, parent: usize },

    #[error("Node {parent} lists child {child} whose parent is {actual:?}")]
    ForeignChild {
        parent: usize,
        child: usize,
        actual: Option<usize>,
    },

    #[error("Parent {parent} (round {parent_round}) is not newer than child {child} (round {child_round})")]
    NonMonotonicRound {
        child: usize,
        child_round: usize,
        parent: usize,
        parent_round: usize,
    },

    #[error("Leaf set of node {0} differs from the union of its children's")]
    LeafSetMismatch(usize),

    #[error("Leaf {0} is covered by more than one root")]
    OverlappingRoots(usize),

    #[error("Leaf {0} is not covered by any root")]
    UncoveredLeaf(usize),
}

/// Check every structural invariant of `snapshot`. Empty result means the
/// tree is well formed.
pub fn validate_snapshot(snapshot: &TreeSnapshot) -> Vec<Violation> {
    let nodes = &snapshot.nodes;
    let mut violations = Vec::new();

    for (position, node) in nodes.iter().enumerate() {
        if node.index != position {
            violations.push(Violation::NonDenseIndex {
                position,
                index: node.index,
            });
        }
    }
    // Index-based checks below assume a dense arena.
    if !violations.is_empty() {
        return violations;
    }

    for node in nodes {
        match (node.role, node.round) {
            (NodeRole::Leaf, r) if r != 0 => {
                violations.push(Violation::LeafOutsideRoundZero(node.index))
            }
            (NodeRole::Internal | NodeRole::Root, 0) => {
                violations.push(Violation::InternalInRoundZero(node.index))
            }
            _ => {}
        }

        if let Some(parent_index) = node.parent_index {
            match nodes.get(parent_index) {
                None => violations.push(Violation::MissingParent {
                    node: node.index,
                    parent: parent_index,
                }),
                Some(parent) => {
                    if !parent.children.contains(&node.index) {
                        violations.push(Violation::NotListedByParent {
                            node: node.index,
                            parent: parent_index,
                        });
                    }
                    if parent.round <= node.round {
                        violations.push(Violation::NonMonotonicRound {
                            child: node.index,
                            child_round: node.round,
                            parent: parent_index,
                            parent_round: parent.round,
                        });
                    }
                }
            }
        }

        for &child in &node.children {
            let actual = nodes.get(child).and_then(|c| c.parent_index);
            if actual != Some(node.index) {
                violations.push(Violation::ForeignChild {
                    parent: node.index,
                    child,
                    actual,
                });
            }
        }

        if !node.is_leaf() && !leaf_set_matches(snapshot, node.index) {
            violations.push(Violation::LeafSetMismatch(node.index));
        }
    }

    let leaves: BTreeSet<usize> = nodes
        .iter()
        .filter(|n| n.round == 0)
        .map(|n| n.index)
        .collect();
    let mut covered = BTreeSet::new();
    for root in snapshot.roots() {
        for &leaf in &root.original_leaf_indices {
            if !covered.insert(leaf) {
                violations.push(Violation::OverlappingRoots(leaf));
            }
        }
    }
    for leaf in leaves.difference(&covered) {
        violations.push(Violation::UncoveredLeaf(*leaf));
    }

    violations
}

fn leaf_set_matches(snapshot: &TreeSnapshot, index: usize) -> bool {
    let Some(node) = snapshot.node(index) else {
        return false;
    };
    let mut union = Vec::new();
    for &child in &node.children {
        match snapshot.node(child) {
            Some(c) => union.extend_from_slice(&c.original_leaf_indices),
            None => return false,
        }
    }
    union.sort_unstable();
    let unique = union.windows(2).all(|w| w[0] != w[1]);
    unique && union == node.original_leaf_indices
}
