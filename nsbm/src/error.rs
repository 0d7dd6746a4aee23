//! Error taxonomy of the engine.
//!
//! Non-convergence is not an error: it shows up as
//! [`SamplerStatus::MaxIterationsReached`](mcmc_util::SamplerStatus) in the
//! equilibration report. Numerically degenerate moves are rejected inside
//! the sampler and only counted.

use mcmc_util::SamplerStatus;
use thiserror::Error;

/// Errors surfaced to the caller.
#[derive(Debug, Error)]
pub enum NsbmError {
    /// Empty graph, bad indices or weights, inconsistent partitions, ...
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A hierarchy level beyond the built depth was requested
    #[error("level {requested} out of range (hierarchy depth {depth})")]
    LevelOutOfRange {
        /// requested level
        requested: usize,
        /// number of built levels
        depth: usize,
    },

    /// An equilibration run already reached a terminal status
    #[error("sampler already finished ({0}); construct a new sampler to resume")]
    SamplerFinished(SamplerStatus),

    /// A snapshot does not match the graph it is restored onto
    #[error("snapshot mismatch: {0}")]
    Snapshot(String),

    /// (De)serialization of a snapshot failed
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// Worker pool could not be created
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, NsbmError>;

pub(crate) fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(NsbmError::InvalidInput(msg.into()))
}
