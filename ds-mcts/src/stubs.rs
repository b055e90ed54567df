//! Scripted oracles shared by the engine and driver tests.

use std::sync::atomic::{AtomicU32, Ordering};

use ds_core::{DialogueState, Role};
use ds_oracle::Oracle;

/// Two fixed candidates where "A" is clearly better: any state whose reply
/// path contains "A" evaluates to 1.0, everything else to 0.0.
pub(crate) struct AbOracle;

impl Oracle for AbOracle {
    fn propose_actions(&self, _state: &DialogueState, count: usize) -> Vec<String> {
        ["A", "B"].iter().take(count).map(|s| s.to_string()).collect()
    }

    fn score_priors(&self, _state: &DialogueState, actions: &[String]) -> Vec<f32> {
        vec![1.0 / actions.len().max(1) as f32; actions.len()]
    }

    fn evaluate(&self, state: &DialogueState) -> f32 {
        let took_a = state
            .turns
            .iter()
            .any(|t| t.role == Role::Assistant && t.text == "A");
        if took_a {
            1.0
        } else {
            0.0
        }
    }
}

/// Never proposes anything; every expansion comes back empty.
pub(crate) struct EmptyOracle;

impl Oracle for EmptyOracle {
    fn propose_actions(&self, _state: &DialogueState, _count: usize) -> Vec<String> {
        Vec::new()
    }

    fn score_priors(&self, _state: &DialogueState, _actions: &[String]) -> Vec<f32> {
        Vec::new()
    }

    fn evaluate(&self, _state: &DialogueState) -> f32 {
        0.5
    }
}

/// Proposes the same candidate text twice; exercises transposition merging
/// of duplicate children.
pub(crate) struct DuplicateOracle;

impl Oracle for DuplicateOracle {
    fn propose_actions(&self, _state: &DialogueState, _count: usize) -> Vec<String> {
        vec!["same".to_string(), "same".to_string()]
    }

    fn score_priors(&self, _state: &DialogueState, actions: &[String]) -> Vec<f32> {
        vec![1.0 / actions.len().max(1) as f32; actions.len()]
    }

    fn evaluate(&self, _state: &DialogueState) -> f32 {
        0.7
    }
}

/// Deterministic oracle whose evaluate panics on every `period`-th call.
/// Behind an `OracleClient` the panic surfaces as a failed ticket, so only
/// the issuing simulation should be degraded.
pub(crate) struct PanickyEvalOracle {
    pub(crate) period: u32,
    pub(crate) calls: AtomicU32,
}

impl PanickyEvalOracle {
    pub(crate) fn new(period: u32) -> Self {
        Self {
            period,
            calls: AtomicU32::new(0),
        }
    }
}

impl Oracle for PanickyEvalOracle {
    fn propose_actions(&self, _state: &DialogueState, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("reply {i}")).collect()
    }

    fn score_priors(&self, _state: &DialogueState, actions: &[String]) -> Vec<f32> {
        vec![1.0 / actions.len().max(1) as f32; actions.len()]
    }

    fn evaluate(&self, _state: &DialogueState) -> f32 {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.period > 0 && n % self.period == self.period - 1 {
            panic!("scripted evaluate failure");
        }
        0.6
    }
}
