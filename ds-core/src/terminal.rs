//! Terminal predicate shared by selection, expansion and rollout.

use crate::state::DialogueState;

/// Closing phrases that end a dialogue regardless of depth.
///
/// Matched case-insensitively as substrings of the active query.
pub const CLOSING_PHRASES: [&str; 2] = ["goodbye", "thank you"];

/// True if `query` contains any closing phrase (case-insensitive).
pub fn contains_closing_phrase(query: &str) -> bool {
    let q = query.to_lowercase();
    CLOSING_PHRASES.iter().any(|p| q.contains(p))
}

/// True iff the dialogue has reached the depth cutoff or the active query
/// contains a closing phrase.
pub fn is_terminal(state: &DialogueState, max_depth: u32) -> bool {
    state.depth >= max_depth || contains_closing_phrase(&state.query)
}
