//! Core search: UCT/RAVE selection, oracle-driven expansion, discounted
//! rollout with progressive widening, path backpropagation.
//!
//! This module holds the shared tree operations plus the blocking
//! `run_search` path (one simulation at a time against an `Oracle`).
//! The pipelined, in-flight path lives in `driver`.

use ds_core::{is_terminal, DialogueState};
use ds_oracle::Oracle;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::node::{Arena, Edge, Node, NodeId};
use crate::state_key::{state_key, StateKey};
use crate::transposition::TranspositionTable;

/// Per-step discount applied to rollout evaluations.
pub(crate) const ROLLOUT_DISCOUNT: f32 = 0.95;

/// Stride used to derive per-simulation RNG seeds from the base seed.
pub(crate) const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Simulation budget per search.
    pub simulations: u32,
    /// Maximum rollout steps per simulation.
    pub rollout_depth: u32,
    /// Terminal-depth cutoff.
    pub max_depth: u32,
    /// Branching factor at expansion.
    pub max_children: usize,
    /// Exploration constant C.
    pub c_explore: f32,
    /// Blend RAVE statistics into selection.
    pub use_rave: bool,
    /// Maximum in-flight simulations in the driver path.
    pub max_inflight: usize,
    /// Base seed for rollout sampling.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            simulations: 32,
            rollout_depth: 3,
            max_depth: 5,
            max_children: 4,
            c_explore: 1.5,
            use_rave: true,
            max_inflight: 8,
            seed: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum MctsError {
    #[error("invalid config: {msg}")]
    InvalidConfig { msg: &'static str },
}

#[derive(Debug, Default, Clone)]
pub struct SearchStats {
    pub node_count: usize,
    pub expansions: u32,
    /// Expansions where the oracle returned zero candidates.
    pub empty_expansions: u32,
    /// Expansion lookups that found an equal-key node already in the table.
    pub transposition_hits: u32,
    /// Simulations that hit a state another simulation was already expanding.
    pub inprogress_collisions: u32,
    /// Oracle tickets that failed at the client level (driver path).
    pub ticket_failures: u32,
    /// High-water mark of concurrently in-flight simulations (driver path).
    pub pending_count_max: usize,
    pub rollout_steps: u64,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Action label of the most-visited root child; empty when root never
    /// acquired children.
    pub best_action: String,
    /// Root average value over all simulations.
    pub root_value: f32,
    pub root_visits: u32,
    /// Root actions with their child visit counts, in creation order.
    pub candidates: Vec<(String, u32)>,
    pub stats: SearchStats,
}

pub struct Mcts {
    pub(crate) cfg: SearchConfig,
    pub(crate) arena: Arena,
    pub(crate) table: TranspositionTable,
    /// Advisory marker: state keys whose expansion is currently in flight.
    pub(crate) in_progress: FxHashSet<StateKey>,
    pub(crate) stats: SearchStats,
}

impl Mcts {
    pub fn new(cfg: SearchConfig) -> Result<Self, MctsError> {
        if !(cfg.c_explore.is_finite() && cfg.c_explore > 0.0) {
            return Err(MctsError::InvalidConfig {
                msg: "c_explore must be finite and > 0",
            });
        }
        if cfg.simulations == 0 {
            return Err(MctsError::InvalidConfig {
                msg: "simulations must be > 0",
            });
        }
        if cfg.max_children == 0 {
            return Err(MctsError::InvalidConfig {
                msg: "max_children must be > 0",
            });
        }
        if cfg.max_inflight == 0 {
            return Err(MctsError::InvalidConfig {
                msg: "max_inflight must be > 0",
            });
        }
        Ok(Self {
            cfg,
            arena: Arena::default(),
            table: TranspositionTable::new(),
            in_progress: FxHashSet::default(),
            stats: SearchStats::default(),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    /// Blocking search: simulations run sequentially against `oracle`.
    ///
    /// Semantics are identical to the driver path; this is also the
    /// deterministic reference (stub oracle + fixed seed reproduce the same
    /// best action).
    pub fn run_search(&mut self, root_state: DialogueState, oracle: &impl Oracle) -> SearchResult {
        let root_id = self.reset_tree(root_state);

        for sim in 0..self.cfg.simulations {
            let mut rng = self.sim_rng(sim as u64 + 1);

            let mut path = self.select_path(root_id);
            let frontier = *path.last().expect("path starts at root");
            let frontier_terminal =
                is_terminal(&self.arena.get(frontier).state, self.cfg.max_depth);

            if !frontier_terminal && !self.arena.get(frontier).is_expanded {
                let key = state_key(&self.arena.get(frontier).state);
                self.claim_expansion(key);
                let parent_state = self.arena.get(frontier).state.clone();
                let actions = oracle.propose_actions(&parent_state, self.cfg.max_children);
                let priors = if actions.is_empty() {
                    Vec::new()
                } else {
                    oracle.score_priors(&parent_state, &actions)
                };
                if let Some(first) = self.apply_expansion(frontier, actions, priors) {
                    path.push(first);
                }
                self.release_expansion(key);
            }

            let start = self.arena.get(*path.last().expect("non-empty path")).state.clone();
            let value = self.rollout(start, oracle, &mut rng);
            self.backup(&path, value);
        }

        self.finish(root_id)
    }

    pub(crate) fn sim_rng(&self, sim_index: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.cfg.seed ^ sim_index.wrapping_mul(SEED_STRIDE))
    }

    /// Drop any previous tree and install a fresh root.
    pub(crate) fn reset_tree(&mut self, root_state: DialogueState) -> NodeId {
        let cap = (self.cfg.simulations as usize)
            .saturating_mul(self.cfg.max_children)
            .saturating_add(1)
            .min(1 << 16);
        self.arena = Arena::with_capacity(cap);
        self.table = TranspositionTable::new();
        self.in_progress.clear();
        self.stats = SearchStats::default();

        let key = state_key(&root_state);
        let (root_id, _created) =
            self.table
                .get_or_create(key, &mut self.arena, || Node::new(root_state, None, None));
        self.stats.node_count = self.arena.len();
        root_id
    }

    /// Descend from root while the node is non-terminal, fully expanded and
    /// has children; the returned path records every visited node root-first.
    pub(crate) fn select_path(&self, root_id: NodeId) -> Vec<NodeId> {
        let mut path = vec![root_id];
        let mut id = root_id;
        loop {
            let node = self.arena.get(id);
            if is_terminal(&node.state, self.cfg.max_depth)
                || !node.is_expanded
                || node.children.is_empty()
            {
                return path;
            }
            let next = self.select_child(id);
            path.push(next);
            id = next;
        }
    }

    /// Child maximizing the UCT/RAVE-blended score; first-best tie-break
    /// (earliest-created edge wins).
    fn select_child(&self, id: NodeId) -> NodeId {
        let parent = self.arena.get(id);
        let child_count = parent.children.len();
        let mut best = parent.children[0].child;
        let mut best_score = f32::NEG_INFINITY;
        for edge in &parent.children {
            let child = self.arena.get(edge.child);
            let prior = edge.prior.unwrap_or(1.0 / child_count as f32);
            let score = blended_score(
                child.q(),
                child.rave_q(),
                child.n,
                child.rave_n,
                prior,
                parent.n,
                self.cfg.c_explore,
                self.cfg.use_rave,
            );
            if score > best_score {
                best_score = score;
                best = edge.child;
            }
        }
        best
    }

    /// Mark `key` as being expanded; counts a collision when the key was
    /// already claimed by a concurrent simulation.
    pub(crate) fn claim_expansion(&mut self, key: StateKey) -> bool {
        let claimed = self.in_progress.insert(key);
        if !claimed {
            self.stats.inprogress_collisions += 1;
        }
        claimed
    }

    pub(crate) fn release_expansion(&mut self, key: StateKey) {
        self.in_progress.remove(&key);
    }

    /// Attach children for `actions` via the transposition table and mark
    /// the node fully expanded. Returns the first child, if any.
    ///
    /// Zero candidates mark the node fully expanded with no children, so it
    /// behaves as terminal in later selections. Priors shorter than the
    /// candidate list leave the tail edges with `prior: None`.
    pub(crate) fn apply_expansion(
        &mut self,
        id: NodeId,
        actions: Vec<String>,
        priors: Vec<f32>,
    ) -> Option<NodeId> {
        if self.arena.get(id).is_expanded {
            // Another simulation won the race; reuse its children.
            return self.arena.get(id).children.first().map(|e| e.child);
        }
        if actions.is_empty() {
            self.arena.get_mut(id).is_expanded = true;
            self.stats.empty_expansions += 1;
            return None;
        }

        let parent_state = self.arena.get(id).state.clone();
        let mut first = None;
        for (i, action) in actions.into_iter().enumerate() {
            let child_state = parent_state.with_action(&action);
            let key = state_key(&child_state);
            let make_action = action.clone();
            let (child_id, created) = self.table.get_or_create(key, &mut self.arena, || {
                Node::new(child_state, Some(id), Some(make_action))
            });
            if !created {
                self.stats.transposition_hits += 1;
            }
            let parent = self.arena.get_mut(id);
            // Duplicate candidate texts map to the same child; one edge is enough.
            if parent.children.iter().any(|e| e.child == child_id) {
                continue;
            }
            parent.children.push(Edge {
                action,
                prior: priors.get(i).copied(),
                child: child_id,
            });
            if first.is_none() {
                first = Some(child_id);
            }
        }

        self.arena.get_mut(id).is_expanded = true;
        self.stats.expansions += 1;
        self.stats.node_count = self.arena.len();
        first
    }

    /// Discounted rollout with progressive widening.
    ///
    /// Zero executed steps (terminal start, zero rollout depth, or an empty
    /// first proposal) fall back to evaluating the start state directly, so
    /// terminal frontiers still contribute a value signal.
    fn rollout(&mut self, start: DialogueState, oracle: &impl Oracle, rng: &mut ChaCha8Rng) -> f32 {
        let mut state = start.clone();
        let mut total = 0.0f32;
        let mut steps = 0u32;
        for step in 0..self.cfg.rollout_depth {
            if is_terminal(&state, self.cfg.max_depth) {
                break;
            }
            let candidates = oracle.propose_actions(&state, self.cfg.max_children);
            if candidates.is_empty() {
                break;
            }
            let width = progressive_width(step).min(candidates.len());
            let pick = rng.gen_range(0..width);
            state = state.with_action(&candidates[pick]);
            let value = oracle.evaluate(&state);
            total += value * ROLLOUT_DISCOUNT.powi(step as i32);
            steps += 1;
            self.stats.rollout_steps += 1;
        }
        if steps > 0 {
            total / steps as f32
        } else {
            oracle.evaluate(&start)
        }
    }

    /// Leaf-to-root accumulation of one simulation's value.
    pub(crate) fn backup(&mut self, path: &[NodeId], value: f32) {
        for &id in path.iter().rev() {
            let node = self.arena.get_mut(id);
            node.n += 1;
            node.w += value;
            if self.cfg.use_rave {
                // RAVE updates stay on the selection path only.
                node.rave_n += 1;
                node.rave_w += value;
            }
        }
    }

    pub(crate) fn finish(&self, root_id: NodeId) -> SearchResult {
        let root = self.arena.get(root_id);
        let mut candidates = Vec::with_capacity(root.children.len());
        let mut best: Option<(usize, u32)> = None;
        for (i, edge) in root.children.iter().enumerate() {
            let n = self.arena.get(edge.child).n;
            candidates.push((edge.action.clone(), n));
            // Strict comparison keeps the earliest-created child on ties.
            if best.map_or(true, |(_, bn)| n > bn) {
                best = Some((i, n));
            }
        }
        let best_action = best
            .map(|(i, _)| root.children[i].action.clone())
            .unwrap_or_default();
        SearchResult {
            best_action,
            root_value: root.q(),
            root_visits: root.n,
            candidates,
            stats: self.stats.clone(),
        }
    }
}

/// `β·q + (1−β)·rave_q + C·prior·sqrt(parent_n)/(1+child_n)` with
/// `β = child_n / (child_n + child_rave_n + 4·prior·parent_n)`.
///
/// The blend trusts direct statistics more as visits grow and falls back to
/// RAVE while they are sparse; with RAVE disabled it degenerates to plain
/// PUCT (β = 1).
#[allow(clippy::too_many_arguments)]
pub(crate) fn blended_score(
    q: f32,
    rave_q: f32,
    child_n: u32,
    child_rave_n: u32,
    prior: f32,
    parent_n: u32,
    c: f32,
    use_rave: bool,
) -> f32 {
    let beta = if use_rave {
        let denom = child_n as f32 + child_rave_n as f32 + 4.0 * prior * parent_n as f32;
        if denom > 0.0 {
            child_n as f32 / denom
        } else {
            1.0
        }
    } else {
        1.0
    };
    let exploitation = beta * q + (1.0 - beta) * rave_q;
    exploitation + exploration_term(c, prior, parent_n, child_n)
}

/// `C·prior·sqrt(parent_n)/(1+child_n)`: strictly decreasing in `child_n`.
pub(crate) fn exploration_term(c: f32, prior: f32, parent_n: u32, child_n: u32) -> f32 {
    c * prior * (parent_n as f32).sqrt() / (1.0 + child_n as f32)
}

/// Rollout candidate prefix width: `max(1, floor(sqrt(step + 1)))`.
pub(crate) fn progressive_width(step: u32) -> usize {
    (((step + 1) as f32).sqrt().floor() as usize).max(1)
}
