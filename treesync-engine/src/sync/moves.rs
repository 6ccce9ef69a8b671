//! Move inference: narrows loosely matched delete/create pairs down to a
//! one-to-one set of renames.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use treesync_core::{Node, Operation};

use super::paths::{base_name, common_prefix_depth, depth};

/// Distance returned for a pair whose keys are identical.
pub const IDENTICAL_KEYS: usize = usize::MAX;

/// A delete and a create recognized as one relocation of `node`.
#[derive(Debug, Clone)]
pub struct Move {
    delete: Arc<Operation>,
    create: Arc<Operation>,
    node: Node,
}

impl Move {
    pub fn new(delete: Arc<Operation>, create: Arc<Operation>, node: Node) -> Self {
        Self {
            delete,
            create,
            node,
        }
    }

    pub fn delete_operation(&self) -> &Arc<Operation> {
        &self.delete
    }

    pub fn create_operation(&self) -> &Arc<Operation> {
        &self.create
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn delete_key(&self) -> &str {
        self.delete.key()
    }

    pub fn create_key(&self) -> &str {
        self.create.key()
    }

    /// Depth of the path prefix shared by source and target, or
    /// [`IDENTICAL_KEYS`] when both keys are the same.
    pub fn distance(&self) -> usize {
        if self.delete_key() == self.create_key() {
            return IDENTICAL_KEYS;
        }
        common_prefix_depth(self.delete_key(), self.create_key())
    }

    pub fn same_base(&self) -> bool {
        base_name(self.delete_key()) == base_name(self.create_key())
    }

    /// Ranking used for selection: any finite distance beats identical keys.
    fn closeness(&self) -> Option<usize> {
        match self.distance() {
            IDENTICAL_KEYS => None,
            finite => Some(finite),
        }
    }

    fn source_depth(&self) -> usize {
        depth(self.delete_key())
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.delete_key(), self.create_key())
    }
}

/// Resolves ambiguous candidates into a disjoint set of moves.
///
/// Sources are handled deepest first so that a child rename is settled
/// before its parent can claim the same target. For each source the best
/// unclaimed target wins: greater distance first, then an unchanged file
/// name. Remaining ties keep the earliest candidate in input order. A final
/// pass keeps one source per target.
pub fn sort_closest_moves(mut candidates: Vec<Move>) -> Vec<Move> {
    candidates.sort_by_key(|m| std::cmp::Reverse(m.source_depth()));
    let kept = select_closest(&candidates);
    debug!(
        candidates = candidates.len(),
        moves = kept.len(),
        "resolved move candidates"
    );

    let mut slots: Vec<Option<Move>> = candidates.into_iter().map(Some).collect();
    kept.into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

/// Indices of the surviving candidates, in ascending order.
fn select_closest(candidates: &[Move]) -> Vec<usize> {
    let mut claimed_targets: HashSet<&str> = HashSet::new();
    let mut seen_sources: HashSet<&str> = HashSet::new();
    let mut by_source: Vec<usize> = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        let source = candidate.delete_key();
        if !seen_sources.insert(source) {
            continue;
        }
        let mut best: Option<usize> = None;
        for (other_index, other) in candidates.iter().enumerate().skip(index) {
            if other.delete_key() != source || claimed_targets.contains(other.create_key()) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => prefers(other, &candidates[current]),
            };
            if better {
                best = Some(other_index);
            }
        }
        if let Some(best) = best {
            claimed_targets.insert(candidates[best].create_key());
            by_source.push(best);
        }
    }

    let mut by_target: HashMap<&str, usize> = HashMap::new();
    for index in by_source {
        let target = candidates[index].create_key();
        match by_target.get(target) {
            Some(&current) if candidates[current].closeness() >= candidates[index].closeness() => {}
            _ => {
                by_target.insert(target, index);
            }
        }
    }

    let mut kept: Vec<usize> = by_target.into_values().collect();
    kept.sort_unstable();
    kept
}

fn prefers(candidate: &Move, current: &Move) -> bool {
    match candidate.closeness().cmp(&current.closeness()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.same_base() && !current.same_base(),
    }
}
