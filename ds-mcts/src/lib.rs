//! MCTS over a dialogue-response space.
//!
//! The design uses:
//! - Arena-backed node storage (`NodeId` indices, no owning back-references)
//! - UCT/RAVE-blended selection with stored action priors
//! - A transposition table merging statistics for structurally equal states
//! - Oracle calls as the only suspension points; `SearchDriver` multiplexes
//!   many in-flight simulations over an `OracleClient` without blocking,
//!   while all tree mutation stays on the driver thread.

pub mod driver;
pub mod mcts;
pub mod node;
pub mod state_key;
pub mod transposition;

pub use driver::SearchDriver;
pub use mcts::{Mcts, MctsError, SearchConfig, SearchResult, SearchStats};
pub use node::{Arena, Edge, Node, NodeId};
pub use state_key::{state_key, StateKey};
pub use transposition::TranspositionTable;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}

#[cfg(test)]
pub(crate) mod stubs;
