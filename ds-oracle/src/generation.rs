//! `GenerationOracle`: the three oracle operations built on a raw
//! `Completion` capability.
//!
//! Failure policy per operation:
//! - propose: a failed or empty completion shrinks the candidate list.
//! - priors: any failed rating call or degenerate softmax falls back to the
//!   uniform distribution.
//! - evaluate: any failure yields the neutral 0.5.

use ds_core::{DialogueState, EvalScores};

use crate::completion::{Completion, CompletionRequest};
use crate::oracle::{uniform, Oracle};

const RATING_INSTRUCTION: &str = "Rate the following candidate response to the conversation on a scale of 1 to 10. Reply with a single number.";
const EVALUATE_INSTRUCTION: &str = "Judge the latest assistant response. Reply with three values in [0,1], formatted as: coherence=X relevance=Y engagement=Z";

#[derive(Debug, Clone, Copy)]
pub struct GenerationConfig {
    /// Temperature for the first proposed candidate.
    pub base_temperature: f32,
    /// Added per candidate index to promote diversity across candidates.
    pub temperature_step: f32,
    /// Token cap for proposed candidate turns.
    pub max_tokens: u32,
    /// Token cap for rating/judging replies.
    pub judge_max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_temperature: 0.7,
            temperature_step: 0.05,
            max_tokens: 256,
            judge_max_tokens: 32,
        }
    }
}

pub struct GenerationOracle<C> {
    inner: C,
    cfg: GenerationConfig,
}

impl<C: Completion> GenerationOracle<C> {
    pub fn new(inner: C) -> Self {
        Self::with_config(inner, GenerationConfig::default())
    }

    pub fn with_config(inner: C, cfg: GenerationConfig) -> Self {
        Self { inner, cfg }
    }

    fn rate(&self, state: &DialogueState, action: &str) -> Option<f32> {
        let req = CompletionRequest {
            state,
            instruction: format!("{RATING_INSTRUCTION}\n\nCandidate: {action}"),
            temperature: 0.0,
            max_tokens: self.cfg.judge_max_tokens,
        };
        let reply = self.inner.complete(&req).ok()?;
        extract_numbers(&reply).into_iter().next()
    }
}

impl<C: Completion> Oracle for GenerationOracle<C> {
    fn propose_actions(&self, state: &DialogueState, count: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let req = CompletionRequest {
                state,
                instruction: String::new(),
                temperature: self.cfg.base_temperature + self.cfg.temperature_step * i as f32,
                max_tokens: self.cfg.max_tokens,
            };
            match self.inner.complete(&req) {
                Ok(text) if !text.trim().is_empty() => out.push(text),
                _ => {}
            }
        }
        out
    }

    fn score_priors(&self, state: &DialogueState, actions: &[String]) -> Vec<f32> {
        let mut ratings = Vec::with_capacity(actions.len());
        for action in actions {
            match self.rate(state, action) {
                Some(r) if r.is_finite() => ratings.push(r),
                _ => return uniform(actions.len()),
            }
        }
        softmax(&ratings).unwrap_or_else(|| uniform(actions.len()))
    }

    fn evaluate(&self, state: &DialogueState) -> f32 {
        let req = CompletionRequest {
            state,
            instruction: EVALUATE_INSTRUCTION.to_string(),
            temperature: 0.0,
            max_tokens: self.cfg.judge_max_tokens,
        };
        let Ok(reply) = self.inner.complete(&req) else {
            return 0.5;
        };
        let nums = extract_numbers(&reply);
        if nums.len() < 3 {
            return 0.5;
        }
        EvalScores::clamped(nums[0], nums[1], nums[2]).weighted()
    }
}

/// Numerically stable softmax. `None` when the input is empty or the result
/// would be degenerate (non-finite sum).
pub(crate) fn softmax(xs: &[f32]) -> Option<Vec<f32>> {
    if xs.is_empty() {
        return None;
    }
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }
    let exps: Vec<f32> = xs.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return None;
    }
    Some(exps.into_iter().map(|e| e / sum).collect())
}

/// Pull every numeric literal out of free-form judge text, in order.
///
/// Tolerates surrounding prose and `label=0.8` / `label: 0.8` forms.
pub(crate) fn extract_numbers(text: &str) -> Vec<f32> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || ch == '.' || (ch == '-' && cur.is_empty()) {
            cur.push(ch);
        } else if !cur.is_empty() {
            if let Ok(v) = cur.parse::<f32>() {
                out.push(v);
            }
            cur.clear();
        }
    }
    if let Ok(v) = cur.parse::<f32>() {
        out.push(v);
    }
    out
}
