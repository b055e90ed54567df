//! Generation-oracle boundary for the dialogue search engine.
//!
//! Three layers:
//! - `Completion`: one raw stochastic text completion (the transport seam).
//! - `Oracle`: the contract the engine consumes (propose / priors / evaluate),
//!   with `GenerationOracle` building it on top of any `Completion`.
//! - `OracleClient`: background worker pool with ticket-based submit/poll so
//!   many oracle calls can be in flight while the search thread keeps moving.

pub mod client;
pub mod completion;
pub mod generation;
pub mod oracle;

pub use client::{
    ClientOptions, ClientStatsSnapshot, LatencyHistogramSnapshot, LatencySummary, OracleClient,
    Ticket,
};
pub use completion::{Completion, CompletionRequest};
pub use generation::{GenerationConfig, GenerationOracle};
pub use oracle::{Oracle, UniformOracle};

use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oracle-side failures.
///
/// `Transport` and `Parse` never escape the `Oracle` operations (they are
/// absorbed into documented neutral defaults); the remaining variants are
/// client-level and degrade only the submitting caller.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(String),
    /// Constructed by `Completion` implementors that validate replies at
    /// the transport seam; `GenerationOracle` itself absorbs malformed
    /// reply text into its neutral defaults without raising.
    #[error("unparseable oracle reply: {0}")]
    Parse(String),
    #[error("backpressure: {0}")]
    Backpressure(&'static str),
    #[error("oracle client disconnected")]
    Disconnected,
    #[error("request timed out")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}

#[cfg(test)]
mod client_tests;
#[cfg(test)]
mod generation_tests;
