//! Raw text-completion seam.

use ds_core::DialogueState;

use crate::OracleError;

/// One stochastic completion request against the underlying service.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// Conversation to complete against (system + turns + active query).
    pub state: &'a DialogueState,
    /// Instruction appended after the conversation (empty for a plain
    /// continuation; judge prompts for rating/evaluation calls).
    pub instruction: String,
    /// Sampling temperature for this call.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

/// Capability to run one completion.
///
/// Retry/backoff is the implementor's concern; callers treat a returned
/// error as a single failed call.
pub trait Completion {
    fn complete(&self, req: &CompletionRequest<'_>) -> Result<String, OracleError>;
}
