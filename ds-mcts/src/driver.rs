//! Incremental, non-blocking driver for one search.
//!
//! Many simulations are kept in flight at once as small state machines;
//! their oracle calls run on the `OracleClient` worker pool while all tree
//! and table mutation stays on the caller's thread. Expansion is claimed
//! exactly once per node (losers park until the winner publishes children),
//! and backpropagation is applied single-writer, so no update is ever lost.

use std::collections::VecDeque;
use std::time::Duration;

use ds_core::{is_terminal, DialogueState};
use ds_oracle::{OracleClient, OracleError, Ticket};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::mcts::{progressive_width, Mcts, SearchResult, ROLLOUT_DISCOUNT};
use crate::node::NodeId;
use crate::state_key::{state_key, StateKey};

enum SimPhase {
    /// Fresh task: run selection from root.
    Select,
    /// Expansion claimed; waiting for proposed candidate actions.
    AwaitActions {
        node: NodeId,
        key: StateKey,
        ticket: Option<Ticket<Vec<String>>>,
    },
    /// Candidates in hand; waiting for their priors.
    AwaitPriors {
        node: NodeId,
        key: StateKey,
        actions: Vec<String>,
        ticket: Option<Ticket<Vec<f32>>>,
    },
    /// Lost an expansion claim; waiting for the winner to publish children.
    Parked { node: NodeId },
    /// Rollout step: waiting for candidate actions at the current state.
    RolloutPropose {
        state: DialogueState,
        step: u32,
        total: f32,
        steps: u32,
        ticket: Option<Ticket<Vec<String>>>,
    },
    /// Rollout step: state extended; waiting for its evaluation.
    RolloutEval {
        state: DialogueState,
        step: u32,
        total: f32,
        steps: u32,
        ticket: Option<Ticket<f32>>,
    },
    /// Zero-step rollout: waiting for the frontier state's own evaluation.
    FrontierEval {
        state: DialogueState,
        ticket: Option<Ticket<f32>>,
    },
}

struct SimTask {
    path: Vec<NodeId>,
    phase: SimPhase,
    rng: ChaCha8Rng,
}

enum StepOutcome {
    /// Simulation finished with this value; backpropagate it.
    Done(f32),
    /// Advanced (submitted or transitioned) but now waiting on a ticket.
    Pending,
    /// Could not move at all (parked, backpressure, or ticket not ready).
    WouldBlock,
}

enum Advance {
    Done(f32),
    Phase(SimPhase),
}

/// Incremental driver; create via `Mcts::begin_search_with_client` and pump
/// `tick()` until it returns a result.
pub struct SearchDriver {
    root_id: NodeId,
    launched: u32,
    completed: u32,
    tasks: VecDeque<SimTask>,
}

impl Mcts {
    /// Begin a non-blocking search driven by `SearchDriver::tick()`.
    pub fn begin_search_with_client(&mut self, root_state: DialogueState) -> SearchDriver {
        let root_id = self.reset_tree(root_state);
        SearchDriver {
            root_id,
            launched: 0,
            completed: 0,
            tasks: VecDeque::new(),
        }
    }

    /// Pipelined search: up to `max_inflight` simulations in flight over
    /// `client`, blocking only on the coalesced progress signal.
    pub fn run_search_with_client(
        &mut self,
        root_state: DialogueState,
        client: &OracleClient,
    ) -> SearchResult {
        let mut driver = self.begin_search_with_client(root_state);
        loop {
            if let Some(res) = driver.tick(self, client, 1024) {
                return res;
            }
            client.wait_for_progress(Duration::from_millis(2));
        }
    }
}

impl SearchDriver {
    /// Advance the search by up to `max_work` small operations.
    ///
    /// Returns `Some(SearchResult)` when the search is complete; otherwise
    /// `None` (caller should wait for client progress and tick again).
    pub fn tick(
        &mut self,
        mcts: &mut Mcts,
        client: &OracleClient,
        max_work: u32,
    ) -> Option<SearchResult> {
        let mut blocked_streak = 0usize;
        for _ in 0..max_work {
            if self.completed >= mcts.cfg.simulations {
                return Some(mcts.finish(self.root_id));
            }

            // Launch new simulations up to the inflight cap and budget.
            if self.tasks.len() < mcts.cfg.max_inflight && self.launched < mcts.cfg.simulations {
                self.launched += 1;
                let rng = mcts.sim_rng(self.launched as u64);
                self.tasks.push_back(SimTask {
                    path: Vec::new(),
                    phase: SimPhase::Select,
                    rng,
                });
                mcts.stats.pending_count_max = mcts.stats.pending_count_max.max(self.tasks.len());
                blocked_streak = 0;
                continue;
            }

            let Some(mut task) = self.tasks.pop_front() else {
                return None;
            };
            match step_task(&mut task, self.root_id, mcts, client) {
                StepOutcome::Done(value) => {
                    mcts.backup(&task.path, value);
                    self.completed += 1;
                    blocked_streak = 0;
                }
                StepOutcome::Pending => {
                    self.tasks.push_back(task);
                    blocked_streak = 0;
                }
                StepOutcome::WouldBlock => {
                    self.tasks.push_back(task);
                    blocked_streak += 1;
                    if blocked_streak > self.tasks.len() {
                        // Every in-flight task is waiting; yield to the caller.
                        return None;
                    }
                }
            }
        }
        None
    }
}

/// Advance one simulation as far as it can go without blocking.
fn step_task(
    task: &mut SimTask,
    root_id: NodeId,
    mcts: &mut Mcts,
    client: &OracleClient,
) -> StepOutcome {
    let mut advanced = false;
    loop {
        match std::mem::replace(&mut task.phase, SimPhase::Select) {
            SimPhase::Select => {
                task.path = mcts.select_path(root_id);
                let frontier = *task.path.last().expect("path starts at root");
                let node = mcts.arena.get(frontier);
                if is_terminal(&node.state, mcts.cfg.max_depth) || node.is_expanded {
                    let start = node.state.clone();
                    match rollout_entry(mcts, start, 0, 0.0, 0) {
                        Advance::Done(v) => return StepOutcome::Done(v),
                        Advance::Phase(p) => task.phase = p,
                    }
                    advanced = true;
                    continue;
                }
                let key = state_key(&node.state);
                if !mcts.claim_expansion(key) {
                    task.phase = SimPhase::Parked { node: frontier };
                    return StepOutcome::WouldBlock;
                }
                task.phase = SimPhase::AwaitActions {
                    node: frontier,
                    key,
                    ticket: None,
                };
                advanced = true;
            }

            SimPhase::Parked { node } => {
                if !mcts.arena.get(node).is_expanded {
                    task.phase = SimPhase::Parked { node };
                    return StepOutcome::WouldBlock;
                }
                // Winner published; reuse its children like any expansion.
                let start = match mcts.arena.get(node).children.first().map(|e| e.child) {
                    Some(first) => {
                        task.path.push(first);
                        mcts.arena.get(first).state.clone()
                    }
                    None => mcts.arena.get(node).state.clone(),
                };
                match rollout_entry(mcts, start, 0, 0.0, 0) {
                    Advance::Done(v) => return StepOutcome::Done(v),
                    Advance::Phase(p) => task.phase = p,
                }
                advanced = true;
            }

            SimPhase::AwaitActions { node, key, ticket } => {
                let ticket = match ticket {
                    Some(t) => t,
                    None => {
                        let state = mcts.arena.get(node).state.clone();
                        match client.submit_propose(&state, mcts.cfg.max_children) {
                            Ok(t) => {
                                advanced = true;
                                t
                            }
                            Err(OracleError::Backpressure(_)) => {
                                task.phase = SimPhase::AwaitActions {
                                    node,
                                    key,
                                    ticket: None,
                                };
                                return StepOutcome::WouldBlock;
                            }
                            Err(_) => {
                                // Client gone: no expansion possible here.
                                mcts.stats.ticket_failures += 1;
                                mcts.apply_expansion(node, Vec::new(), Vec::new());
                                mcts.release_expansion(key);
                                let start = mcts.arena.get(node).state.clone();
                                match rollout_entry(mcts, start, 0, 0.0, 0) {
                                    Advance::Done(v) => return StepOutcome::Done(v),
                                    Advance::Phase(p) => task.phase = p,
                                }
                                continue;
                            }
                        }
                    }
                };
                match ticket.try_recv() {
                    Ok(None) => {
                        task.phase = SimPhase::AwaitActions {
                            node,
                            key,
                            ticket: Some(ticket),
                        };
                        return if advanced {
                            StepOutcome::Pending
                        } else {
                            StepOutcome::WouldBlock
                        };
                    }
                    Ok(Some(actions)) if !actions.is_empty() => {
                        task.phase = SimPhase::AwaitPriors {
                            node,
                            key,
                            actions,
                            ticket: None,
                        };
                        advanced = true;
                    }
                    other => {
                        // Empty proposal or a failed ticket: expansion yields
                        // no children and the node behaves as terminal.
                        if other.is_err() {
                            mcts.stats.ticket_failures += 1;
                        }
                        mcts.apply_expansion(node, Vec::new(), Vec::new());
                        mcts.release_expansion(key);
                        let start = mcts.arena.get(node).state.clone();
                        match rollout_entry(mcts, start, 0, 0.0, 0) {
                            Advance::Done(v) => return StepOutcome::Done(v),
                            Advance::Phase(p) => task.phase = p,
                        }
                        advanced = true;
                    }
                }
            }

            SimPhase::AwaitPriors {
                node,
                key,
                actions,
                ticket,
            } => {
                let ticket = match ticket {
                    Some(t) => t,
                    None => {
                        let state = mcts.arena.get(node).state.clone();
                        match client.submit_priors(&state, actions.clone()) {
                            Ok(t) => {
                                advanced = true;
                                t
                            }
                            Err(OracleError::Backpressure(_)) => {
                                task.phase = SimPhase::AwaitPriors {
                                    node,
                                    key,
                                    actions,
                                    ticket: None,
                                };
                                return StepOutcome::WouldBlock;
                            }
                            Err(_) => {
                                // Expand without priors; selection treats the
                                // missing priors as uniform.
                                mcts.stats.ticket_failures += 1;
                                task.phase = expand_and_enter_rollout(
                                    task, mcts, node, key, actions,
                                    Vec::new(),
                                );
                                continue;
                            }
                        }
                    }
                };
                match ticket.try_recv() {
                    Ok(None) => {
                        task.phase = SimPhase::AwaitPriors {
                            node,
                            key,
                            actions,
                            ticket: Some(ticket),
                        };
                        return if advanced {
                            StepOutcome::Pending
                        } else {
                            StepOutcome::WouldBlock
                        };
                    }
                    Ok(Some(priors)) => {
                        task.phase =
                            expand_and_enter_rollout(task, mcts, node, key, actions, priors);
                        advanced = true;
                    }
                    Err(_) => {
                        mcts.stats.ticket_failures += 1;
                        task.phase =
                            expand_and_enter_rollout(task, mcts, node, key, actions, Vec::new());
                        advanced = true;
                    }
                }
            }

            SimPhase::RolloutPropose {
                state,
                step,
                total,
                steps,
                ticket,
            } => {
                let ticket = match ticket {
                    Some(t) => t,
                    None => match client.submit_propose(&state, mcts.cfg.max_children) {
                        Ok(t) => {
                            advanced = true;
                            t
                        }
                        Err(OracleError::Backpressure(_)) => {
                            task.phase = SimPhase::RolloutPropose {
                                state,
                                step,
                                total,
                                steps,
                                ticket: None,
                            };
                            return StepOutcome::WouldBlock;
                        }
                        Err(_) => {
                            mcts.stats.ticket_failures += 1;
                            match finalize_rollout(state, total, steps) {
                                Advance::Done(v) => return StepOutcome::Done(v),
                                Advance::Phase(p) => task.phase = p,
                            }
                            continue;
                        }
                    },
                };
                match ticket.try_recv() {
                    Ok(None) => {
                        task.phase = SimPhase::RolloutPropose {
                            state,
                            step,
                            total,
                            steps,
                            ticket: Some(ticket),
                        };
                        return if advanced {
                            StepOutcome::Pending
                        } else {
                            StepOutcome::WouldBlock
                        };
                    }
                    Ok(Some(candidates)) if !candidates.is_empty() => {
                        let width = progressive_width(step).min(candidates.len());
                        let pick = task.rng.gen_range(0..width);
                        let next = state.with_action(&candidates[pick]);
                        task.phase = SimPhase::RolloutEval {
                            state: next,
                            step,
                            total,
                            steps,
                            ticket: None,
                        };
                        advanced = true;
                    }
                    other => {
                        if other.is_err() {
                            mcts.stats.ticket_failures += 1;
                        }
                        match finalize_rollout(state, total, steps) {
                            Advance::Done(v) => return StepOutcome::Done(v),
                            Advance::Phase(p) => task.phase = p,
                        }
                        advanced = true;
                    }
                }
            }

            SimPhase::RolloutEval {
                state,
                step,
                total,
                steps,
                ticket,
            } => {
                let ticket = match ticket {
                    Some(t) => t,
                    None => match client.submit_evaluate(&state) {
                        Ok(t) => {
                            advanced = true;
                            t
                        }
                        Err(OracleError::Backpressure(_)) => {
                            task.phase = SimPhase::RolloutEval {
                                state,
                                step,
                                total,
                                steps,
                                ticket: None,
                            };
                            return StepOutcome::WouldBlock;
                        }
                        Err(_) => {
                            // Neutral default, same as an evaluate failure.
                            mcts.stats.ticket_failures += 1;
                            match accumulate_rollout(mcts, state, step, total, steps, 0.5) {
                                Advance::Done(v) => return StepOutcome::Done(v),
                                Advance::Phase(p) => task.phase = p,
                            }
                            continue;
                        }
                    },
                };
                match ticket.try_recv() {
                    Ok(None) => {
                        task.phase = SimPhase::RolloutEval {
                            state,
                            step,
                            total,
                            steps,
                            ticket: Some(ticket),
                        };
                        return if advanced {
                            StepOutcome::Pending
                        } else {
                            StepOutcome::WouldBlock
                        };
                    }
                    Ok(Some(value)) => {
                        match accumulate_rollout(mcts, state, step, total, steps, value) {
                            Advance::Done(v) => return StepOutcome::Done(v),
                            Advance::Phase(p) => task.phase = p,
                        }
                        advanced = true;
                    }
                    Err(_) => {
                        mcts.stats.ticket_failures += 1;
                        match accumulate_rollout(mcts, state, step, total, steps, 0.5) {
                            Advance::Done(v) => return StepOutcome::Done(v),
                            Advance::Phase(p) => task.phase = p,
                        }
                        advanced = true;
                    }
                }
            }

            SimPhase::FrontierEval { state, ticket } => {
                let ticket = match ticket {
                    Some(t) => t,
                    None => match client.submit_evaluate(&state) {
                        Ok(t) => {
                            advanced = true;
                            t
                        }
                        Err(OracleError::Backpressure(_)) => {
                            task.phase = SimPhase::FrontierEval {
                                state,
                                ticket: None,
                            };
                            return StepOutcome::WouldBlock;
                        }
                        Err(_) => {
                            mcts.stats.ticket_failures += 1;
                            return StepOutcome::Done(0.5);
                        }
                    },
                };
                match ticket.try_recv() {
                    Ok(None) => {
                        task.phase = SimPhase::FrontierEval {
                            state,
                            ticket: Some(ticket),
                        };
                        return if advanced {
                            StepOutcome::Pending
                        } else {
                            StepOutcome::WouldBlock
                        };
                    }
                    Ok(Some(value)) => return StepOutcome::Done(value),
                    Err(_) => {
                        mcts.stats.ticket_failures += 1;
                        return StepOutcome::Done(0.5);
                    }
                }
            }
        }
    }
}

/// Publish an expansion, extend the path to the first child (if any), and
/// enter the rollout from there.
fn expand_and_enter_rollout(
    task: &mut SimTask,
    mcts: &mut Mcts,
    node: NodeId,
    key: StateKey,
    actions: Vec<String>,
    priors: Vec<f32>,
) -> SimPhase {
    let first = mcts.apply_expansion(node, actions, priors);
    mcts.release_expansion(key);
    let start = match first {
        Some(first) => {
            task.path.push(first);
            mcts.arena.get(first).state.clone()
        }
        None => mcts.arena.get(node).state.clone(),
    };
    match rollout_entry(mcts, start, 0, 0.0, 0) {
        Advance::Phase(p) => p,
        Advance::Done(_) => {
            // rollout_entry with zero steps never completes synchronously.
            unreachable!("zero-step rollout entry always awaits an evaluation")
        }
    }
}

/// Decide the next rollout move at a loop boundary: stop (terminal or depth
/// budget reached) or propose candidates for one more step.
fn rollout_entry(
    mcts: &Mcts,
    state: DialogueState,
    step: u32,
    total: f32,
    steps: u32,
) -> Advance {
    if step >= mcts.cfg.rollout_depth || is_terminal(&state, mcts.cfg.max_depth) {
        return finalize_rollout(state, total, steps);
    }
    Advance::Phase(SimPhase::RolloutPropose {
        state,
        step,
        total,
        steps,
        ticket: None,
    })
}

/// Finish a rollout: average over executed steps, or fall back to the
/// frontier's own evaluation when no step ran.
fn finalize_rollout(state: DialogueState, total: f32, steps: u32) -> Advance {
    if steps > 0 {
        Advance::Done(total / steps as f32)
    } else {
        Advance::Phase(SimPhase::FrontierEval {
            state,
            ticket: None,
        })
    }
}

/// Fold one step's evaluation into the rollout and advance to the next.
fn accumulate_rollout(
    mcts: &mut Mcts,
    state: DialogueState,
    step: u32,
    mut total: f32,
    mut steps: u32,
    value: f32,
) -> Advance {
    total += value * ROLLOUT_DISCOUNT.powi(step as i32);
    steps += 1;
    mcts.stats.rollout_steps += 1;
    rollout_entry(mcts, state, step + 1, total, steps)
}
