use crate::model::ModelVariant;
use serde::{Deserialize, Serialize};

/// Objective of the greedy initializer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFunction {
    /// Newman-Girvan modularity `Σ_c [w_c / m - γ (K_c / 2m)^2]`
    Modularity {
        /// resolution γ
        resolution: f64,
    },
    /// Constant Potts model `Σ_c [w_c - γ n_c (n_c - 1) / 2]`
    Cpm {
        /// resolution γ
        resolution: f64,
    },
}

impl Default for QualityFunction {
    fn default() -> Self {
        QualityFunction::Modularity { resolution: 1.0 }
    }
}

/// Starting partition of level 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    /// Louvain-style greedy partition
    #[default]
    Greedy,
    /// Every vertex in one block
    Single,
    /// Uniformly random labels over `blocks` blocks
    Random {
        /// number of blocks to draw from
        blocks: usize,
    },
    /// Caller-supplied labels (must have one entry per vertex)
    Given(Vec<usize>),
}

/// Options of the greedy initializer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedyOptions {
    /// Quality function. Default: modularity with resolution 1
    pub quality: QualityFunction,
    /// Maximum number of local-moving passes per aggregation level. Default: 20
    pub max_local_iter: usize,
    /// Maximum number of aggregation levels. Default: 20
    pub max_aggregations: usize,
    /// Random seed for the vertex visiting order. Default: 42
    pub seed: u64,
}

impl Default for GreedyOptions {
    fn default() -> Self {
        GreedyOptions {
            quality: QualityFunction::default(),
            max_local_iter: 20,
            max_aggregations: 20,
            seed: 42,
        }
    }
}

/// Move parameters of a single sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepOptions {
    /// Inverse temperature of the acceptance rule. `f64::INFINITY` accepts
    /// only non-increasing moves. Default: 1.0
    pub beta: f64,
    /// Proposal temperature ε: weight of the uniform component of the
    /// informed proposal. Default: 1.0
    pub epsilon: f64,
    /// Cap on the number of occupied blocks per level. Default: None
    pub max_blocks: Option<usize>,
    /// Run merge-split moves every this many sweeps (0 disables). Default: 5
    pub merge_split_interval: usize,
    /// Greedy refinement passes after a split. Default: 2
    pub split_refine: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions {
            beta: 1.0,
            epsilon: 1.0,
            max_blocks: None,
            merge_split_interval: 5,
            split_refine: 2,
        }
    }
}

/// Record-breaking equilibration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EquilibrationOptions {
    /// Sweeps without a record before a break is counted. Default: 10
    pub wait: usize,
    /// Breaks needed to declare convergence. Default: 2
    pub nbreaks: usize,
    /// Relative improvement a record must exceed. Default: 1e-6
    pub epsilon: f64,
    /// Sweep budget. Default: 1000
    pub max_sweeps: usize,
    /// Unconditional sweeps before monitoring starts. Default: 0
    pub presweeps: usize,
    /// Move parameters
    pub sweep: SweepOptions,
}

impl Default for EquilibrationOptions {
    fn default() -> Self {
        EquilibrationOptions {
            wait: 10,
            nbreaks: 2,
            epsilon: 1e-6,
            max_sweeps: 1000,
            presweeps: 0,
            sweep: SweepOptions::default(),
        }
    }
}

/// Posterior sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PosteriorOptions {
    /// Independent chains. Default: 1
    pub n_chains: usize,
    /// Draws kept per chain; the first is the starting state. Default: 10
    pub n_draws: usize,
    /// Nested sweeps discarded before the first draw. Default: 0
    pub burnin: usize,
    /// Nested sweeps between draws. Default: 1
    pub thin: usize,
    /// Worker threads (0 = all cores). Default: 0
    pub n_jobs: usize,
    /// Show a progress bar over chains. Default: false
    pub show_progress: bool,
    /// Compute the dense `n x n` co-clustering matrix. Default: true
    pub affinity: bool,
    /// Move parameters
    pub sweep: SweepOptions,
}

impl Default for PosteriorOptions {
    fn default() -> Self {
        PosteriorOptions {
            n_chains: 1,
            n_draws: 10,
            burnin: 0,
            thin: 1,
            n_jobs: 0,
            show_progress: false,
            affinity: true,
            sweep: SweepOptions::default(),
        }
    }
}

/// Configuration bundle of a full NSBM run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NsbmOptions {
    /// Level-0 entropy model. Default: degree-corrected
    pub model: ModelVariant,
    /// Weight of the planted-partition prior. Default: 1.0
    pub planted_strength: f64,
    /// Level-0 starting partition. Default: greedy
    pub init: InitMethod,
    /// Quality function of the greedy initializer. Default: modularity (γ = 1)
    pub quality: QualityFunction,
    /// Maximum number of hierarchy levels. Default: 10
    pub max_levels: usize,
    /// Pad the hierarchy with single-block levels up to this length
    /// (0 = no padding). Default: 0
    pub hierarchy_length: usize,
    /// Unconditional sweeps before each equilibration. Default: 0
    pub sweep_iterations: usize,
    /// Sweep budget of each equilibration. Default: 1000
    pub max_sweeps: usize,
    /// Relative tolerance of the record-breaking monitor. Default: 1e-6
    pub convergence_tolerance: f64,
    /// Sweeps without a record before a break is counted. Default: 10
    pub wait: usize,
    /// Breaks needed to declare convergence. Default: 2
    pub nbreaks: usize,
    /// Proposal temperature ε. Default: 1.0
    pub temperature: f64,
    /// Inverse temperature of the acceptance rule. Default: 1.0
    pub beta: f64,
    /// Cap on occupied blocks per level. Default: None
    pub max_blocks: Option<usize>,
    /// Merge-split cadence in sweeps (0 disables). Default: 5
    pub merge_split_interval: usize,
    /// Random seed. Default: 42
    pub seed: u64,
    /// Worker threads for posterior chains (0 = all cores). Default: 0
    pub n_jobs: usize,
    /// Posterior chains. Default: 1
    pub n_chains: usize,
    /// Posterior draws per chain (0 skips posterior sampling). Default: 0
    pub n_draws: usize,
    /// Nested sweeps discarded before the first draw. Default: 0
    pub burnin: usize,
    /// Nested sweeps between draws. Default: 1
    pub thin: usize,
    /// Reject graphs with more than one connected component. Default: false
    pub require_connected: bool,
    /// Show progress bars. Default: false
    pub show_progress: bool,
    /// Include level 0 in the returned level labels. Default: true
    pub return_low: bool,
    /// Drop levels whose projected partition repeats the level below from
    /// the returned labels and statistics (the snapshot keeps them).
    /// Default: false
    pub prune: bool,
    /// Compute the posterior co-clustering matrix, which takes `n^2`
    /// memory. Default: true
    pub affinity: bool,
    /// Run on the subgraph induced by these vertices. Default: None
    pub restrict_to: Option<Vec<usize>>,
}

impl Default for NsbmOptions {
    fn default() -> Self {
        NsbmOptions {
            model: ModelVariant::DegreeCorrected,
            planted_strength: 1.0,
            init: InitMethod::Greedy,
            quality: QualityFunction::default(),
            max_levels: 10,
            hierarchy_length: 0,
            sweep_iterations: 0,
            max_sweeps: 1000,
            convergence_tolerance: 1e-6,
            wait: 10,
            nbreaks: 2,
            temperature: 1.0,
            beta: 1.0,
            max_blocks: None,
            merge_split_interval: 5,
            seed: 42,
            n_jobs: 0,
            n_chains: 1,
            n_draws: 0,
            burnin: 0,
            thin: 1,
            require_connected: false,
            show_progress: false,
            return_low: true,
            prune: false,
            affinity: true,
            restrict_to: None,
        }
    }
}

impl NsbmOptions {
    /// Move parameters shared by equilibration and posterior chains
    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            beta: self.beta,
            epsilon: self.temperature,
            max_blocks: self.max_blocks,
            merge_split_interval: self.merge_split_interval,
            ..SweepOptions::default()
        }
    }

    /// Equilibration parameters
    pub fn equilibration_options(&self) -> EquilibrationOptions {
        EquilibrationOptions {
            wait: self.wait,
            nbreaks: self.nbreaks,
            epsilon: self.convergence_tolerance,
            max_sweeps: self.max_sweeps,
            presweeps: self.sweep_iterations,
            sweep: self.sweep_options(),
        }
    }

    /// Greedy initializer parameters
    pub fn greedy_options(&self) -> GreedyOptions {
        GreedyOptions {
            quality: self.quality,
            seed: self.seed,
            ..GreedyOptions::default()
        }
    }

    /// Posterior sampling parameters
    pub fn posterior_options(&self) -> PosteriorOptions {
        PosteriorOptions {
            n_chains: self.n_chains,
            n_draws: self.n_draws,
            burnin: self.burnin,
            thin: self.thin,
            n_jobs: self.n_jobs,
            show_progress: self.show_progress,
            affinity: self.affinity,
            sweep: self.sweep_options(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let opts: NsbmOptions =
            serde_json::from_str(r#"{"model": "plain", "max_levels": 3, "init": {"random": {"blocks": 4}}}"#)
                .unwrap();
        assert_eq!(opts.model, ModelVariant::Plain);
        assert_eq!(opts.max_levels, 3);
        assert_eq!(opts.init, InitMethod::Random { blocks: 4 });
        assert_eq!(opts.seed, 42);
        assert_eq!(opts.wait, 10);
        assert!(!opts.prune);
        assert!(opts.affinity);
    }

    #[test]
    fn test_derived_options() {
        let opts = NsbmOptions {
            temperature: 0.5,
            convergence_tolerance: 1e-3,
            n_draws: 7,
            ..NsbmOptions::default()
        };
        assert_eq!(opts.sweep_options().epsilon, 0.5);
        assert_eq!(opts.equilibration_options().epsilon, 1e-3);
        assert_eq!(opts.posterior_options().n_draws, 7);
        assert_eq!(opts.greedy_options().seed, 42);
    }
}
