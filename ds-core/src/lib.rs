//! Canonical dialogue-state definitions shared by the search stack.
//!
//! - `DialogueState` is immutable: every transition appends one assistant
//!   turn and bumps `depth`, producing a fresh state.
//! - The terminal predicate lives here so selection, expansion and rollout
//!   all evaluate the same rule.

pub mod state;
pub mod terminal;

pub use state::{DialogueState, EvalScores, Role, Turn};
pub use terminal::{contains_closing_phrase, is_terminal, CLOSING_PHRASES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");


#[cfg(test)]
mod state_tests;
