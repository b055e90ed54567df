//! Transposition table: structural key -> node.

use rustc_hash::FxHashMap;

use crate::node::{Arena, Node, NodeId};
use crate::state_key::StateKey;

/// Additive-only for the duration of one search; entries are never removed.
/// Merges statistics for states reached independently by different
/// simulations so visit/value accumulation is not split across duplicates.
#[derive(Default)]
pub struct TranspositionTable {
    map: FxHashMap<StateKey, NodeId>,
}

impl TranspositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: StateKey) -> Option<NodeId> {
        self.map.get(&key).copied()
    }

    /// Existing node for an equal key, or a fresh one built via `make` and
    /// pushed into the arena. The bool is true when a node was created.
    pub fn get_or_create(
        &mut self,
        key: StateKey,
        arena: &mut Arena,
        make: impl FnOnce() -> Node,
    ) -> (NodeId, bool) {
        if let Some(&id) = self.map.get(&key) {
            return (id, false);
        }
        let id = arena.push(make());
        self.map.insert(key, id);
        (id, true)
    }
}
