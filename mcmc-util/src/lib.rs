//! Generic Markov chain plumbing shared by the samplers in this workspace.
//!
//! A model implements [`traits::SweepState`]; [`runner::ChainRunner`] then
//! takes care of warmup, thinning and seeded parallel chains, and
//! [`convergence::RecordBreakMonitor`] decides when an equilibration run
//! can stop.

pub mod chain;
pub mod convergence;
pub mod runner;
pub mod traits;

pub use chain::McmcChain;
pub use convergence::{MonitorSignal, RecordBreakMonitor, SamplerStatus};
pub use runner::ChainRunner;
pub use traits::SweepState;
