//! Nested stochastic block model (NSBM) for graph community detection.
//!
//! Fits a hierarchy of block partitions to a weighted graph by minimizing
//! the description length of a microcanonical stochastic block model with
//! Markov chain Monte Carlo. Level 0 partitions the vertices; every level
//! above partitions the blocks of the level below. After equilibration,
//! independent chains sample the posterior to give per-vertex membership
//! marginals, co-clustering affinity and stability scores.
//!
//! # Model
//!
//! Plain, degree-corrected or planted-partition SBM at level 0, with the
//! nested multigraph prior at every level above.
//!
//! # References
//!
//! Peixoto (2014). "Hierarchical block structures and high-resolution
//! model selection in large networks." Phys. Rev. X 4, 011047.
//!
//! Peixoto (2020). "Merge-split Markov chain Monte Carlo for community
//! detection." Phys. Rev. E 102, 012305.

#![warn(missing_docs)]

/// Error taxonomy and crate-wide `Result`
pub mod error;

/// Immutable weighted graph adapter
pub mod graph;

/// Log-combinatorial helpers and the per-level entropy models
pub mod model;

/// Block partition of one level with its sufficient statistics
pub mod block_state;

/// Stack of block states forming the hierarchy
pub mod nested;

/// Configuration bundles with documented defaults
pub mod options;

/// Modularity, partition similarity and relabelling
pub mod metrics;

/// Louvain-style greedy initializer
pub mod greedy;

/// Vertex and merge-split moves, sweeps and equilibration
pub mod sampler;

/// Building and partially rebuilding the hierarchy
pub mod hierarchy;

/// Co-clustering, stability and cross-level consistency of draws
pub mod affinity;

/// Multi-chain posterior sampling
pub mod posterior;

/// Serializable nested state
pub mod snapshot;

/// Top-level driver
pub mod inference;


pub use error::{NsbmError, Result};
pub use graph::{Graph, GraphBuilder, WeightMode};
pub use inference::{Nsbm, NsbmResult};
pub use mcmc_util::SamplerStatus;
pub use model::ModelVariant;
pub use options::{InitMethod, NsbmOptions, QualityFunction};
pub use posterior::PosteriorSummary;
pub use snapshot::NestedSnapshot;
