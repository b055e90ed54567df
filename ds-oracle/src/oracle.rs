//! Oracle contract consumed by the search engine.

use ds_core::DialogueState;

/// The three suspension points of the search.
///
/// Contract:
/// - `propose_actions` returns up to `count` candidate next-turn texts and
///   may return fewer (or none) on partial failure; it never errors.
/// - `score_priors` returns a probability distribution over `actions`
///   summing to 1; on any parse or transport failure it returns the
///   uniform distribution instead of failing.
/// - `evaluate` returns a scalar in [0,1]; on any failure it returns the
///   neutral constant 0.5 and does not raise.
pub trait Oracle {
    fn propose_actions(&self, state: &DialogueState, count: usize) -> Vec<String>;

    fn score_priors(&self, state: &DialogueState, actions: &[String]) -> Vec<f32>;

    fn evaluate(&self, state: &DialogueState) -> f32;
}

/// Numbered candidates + uniform priors + neutral value (baseline stub).
pub struct UniformOracle;

impl Oracle for UniformOracle {
    fn propose_actions(&self, _state: &DialogueState, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("option {i}")).collect()
    }

    fn score_priors(&self, _state: &DialogueState, actions: &[String]) -> Vec<f32> {
        uniform(actions.len())
    }

    fn evaluate(&self, _state: &DialogueState) -> f32 {
        0.5
    }
}

/// Uniform distribution over `n` entries (empty for `n == 0`).
pub(crate) fn uniform(n: usize) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f32; n]
}
