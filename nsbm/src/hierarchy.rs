//! Building and partially rebuilding the nested hierarchy.

use crate::error::{invalid, NsbmError, Result};
use crate::graph::Graph;
use crate::greedy;
use crate::metrics::renumber;
use crate::model::EntropyModel;
use crate::nested::NestedState;
use crate::options::{InitMethod, NsbmOptions};
use crate::sampler::{EquilibrationReport, McmcSampler, SweepScope};
use log::info;
use mcmc_util::SamplerStatus;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Relative entropy difference below which two candidates tie
const TIE_TOL: f64 = 1e-9;

/// A built hierarchy with the reports of every equilibration performed
#[derive(Debug, Clone)]
pub struct BuiltHierarchy {
    /// The equilibrated nested state
    pub nested: NestedState,
    /// Reports in the order the equilibrations ran; the last one is the
    /// final joint equilibration
    pub reports: Vec<EquilibrationReport>,
}

impl BuiltHierarchy {
    /// Status of the final joint equilibration
    pub fn status(&self) -> SamplerStatus {
        self.reports
            .last()
            .map(|r| r.status)
            .unwrap_or(SamplerStatus::Uninitialized)
    }
}

/// Builds the stack of levels: equilibrate level 0, coarsen, equilibrate the
/// new top, and repeat until the top collapses to one block or the level
/// cap is hit.
#[derive(Debug, Clone)]
pub struct HierarchyBuilder {
    options: NsbmOptions,
    reference: Option<Arc<Vec<usize>>>,
}

impl HierarchyBuilder {
    /// Builder with the given options and no reference partition
    pub fn new(options: NsbmOptions) -> Self {
        HierarchyBuilder {
            options,
            reference: None,
        }
    }

    /// Reference partition used by the planted model
    pub fn with_reference(mut self, reference: Vec<usize>) -> Self {
        self.reference = Some(Arc::new(reference));
        self
    }

    /// Options in use
    pub fn options(&self) -> &NsbmOptions {
        &self.options
    }

    /// Level-0 entropy model for a graph with `n` vertices
    pub fn base_model(&self, n: usize) -> Result<EntropyModel> {
        if let Some(reference) = &self.reference {
            if reference.len() != n {
                return invalid(format!(
                    "reference partition has {} entries for {} vertices",
                    reference.len(),
                    n
                ));
            }
        }
        EntropyModel::level_zero(
            self.options.model,
            self.reference.clone(),
            self.options.planted_strength,
        )
        .ok_or_else(|| {
            NsbmError::InvalidInput("the planted model needs a reference partition".into())
        })
    }

    fn initial_labels(&self, graph: &Graph) -> Result<Vec<usize>> {
        let n = graph.num_vertices();
        let labels = match &self.options.init {
            InitMethod::Greedy => greedy::optimize(graph, &self.options.greedy_options())?.labels,
            InitMethod::Single => vec![0; n],
            InitMethod::Random { blocks } => {
                let k = (*blocks).clamp(1, n);
                let mut rng = SmallRng::seed_from_u64(self.options.seed);
                (0..n).map(|_| rng.random_range(0..k)).collect()
            }
            InitMethod::Given(labels) => {
                if labels.len() != n {
                    return invalid(format!(
                        "initial partition has {} entries for {} vertices",
                        labels.len(),
                        n
                    ));
                }
                labels.clone()
            }
        };
        Ok(renumber(&labels).0)
    }

    fn equilibrate(
        &self,
        nested: &mut NestedState,
        scope: SweepScope,
        stage: u64,
    ) -> Result<EquilibrationReport> {
        let seed = self.options.seed.wrapping_add(stage.wrapping_mul(0x9E37_79B9));
        let mut sampler = McmcSampler::new(self.options.equilibration_options(), seed);
        sampler.equilibrate(nested, scope)
    }

    /// Build and equilibrate the full hierarchy over `graph`.
    pub fn build(&self, graph: Arc<Graph>) -> Result<BuiltHierarchy> {
        graph.validate_for_inference(self.options.require_connected)?;
        let base = self.base_model(graph.num_vertices())?;
        let labels = self.initial_labels(&graph)?;

        let mut nested = NestedState::single_level(graph, base, labels)?;
        let mut reports = vec![self.equilibrate(&mut nested, SweepScope::Level(0), 0)?];
        info!(
            "level 0: B = {}, S = {:.4}",
            nested.top().num_nonempty(),
            nested.entropy()
        );

        self.grow(&mut nested, &mut reports)?;
        Ok(BuiltHierarchy { nested, reports })
    }

    /// Discard every level above `level` and rebuild the rest of the stack.
    pub fn rebuild_from(&self, nested: &mut NestedState, level: usize) -> Result<Vec<EquilibrationReport>> {
        if level >= nested.depth() {
            return Err(NsbmError::LevelOutOfRange {
                requested: level,
                depth: nested.depth(),
            });
        }
        nested.truncate(level + 1)?;
        let mut reports = vec![];
        self.grow(nested, &mut reports)?;
        Ok(reports)
    }

    /// Starting partition of a new level over the current top blocks:
    /// greedy versus single block, lowest total entropy wins and ties go to
    /// the candidate with more blocks.
    fn next_level_labels(&self, nested: &NestedState) -> Result<Vec<usize>> {
        let coarse = nested.top_block_graph()?;
        let num_blocks = coarse.num_vertices();

        let mut candidates = vec![vec![0; num_blocks]];
        if coarse.total_weight() > 0.0 {
            let mut gopts = self.options.greedy_options();
            gopts.seed = gopts.seed.wrapping_add(nested.depth() as u64);
            candidates.push(greedy::optimize(&coarse, &gopts)?.labels);
        }

        let mut best: Option<(f64, usize, Vec<usize>)> = None;
        for labels in candidates {
            let mut trial = nested.clone();
            trial.push_level(labels.clone())?;
            let entropy = trial.entropy();
            let blocks = trial.top().num_nonempty();
            let better = match &best {
                None => true,
                Some((s, b, _)) => {
                    let tol = TIE_TOL * s.abs().max(1.0);
                    entropy < s - tol || ((entropy - s).abs() <= tol && blocks > *b)
                }
            };
            if better {
                best = Some((entropy, blocks, labels));
            }
        }
        Ok(best.map(|(_, _, labels)| labels).unwrap_or_else(|| vec![0; num_blocks]))
    }

    fn grow(&self, nested: &mut NestedState, reports: &mut Vec<EquilibrationReport>) -> Result<()> {
        let max_levels = self.options.max_levels.max(1);

        while nested.depth() < max_levels {
            let below = nested.top().num_nonempty();
            if below <= 1 {
                break;
            }

            let labels = self.next_level_labels(nested)?;
            nested.push_level(labels)?;
            let top = nested.depth() - 1;
            reports.push(self.equilibrate(nested, SweepScope::Level(top), top as u64)?);

            let blocks = nested.top().num_nonempty();
            info!("level {}: B = {}, S = {:.4}", top, blocks, nested.entropy());

            if blocks >= below {
                info!("level {} did not coarsen; collapsing it to a single block", top);
                nested.replace_top(vec![0; below])?;
                break;
            }
        }

        let target = self.options.hierarchy_length.min(max_levels);
        while nested.depth() < target {
            let below = nested.top().num_nonempty();
            nested.push_level(vec![0; below])?;
        }

        let stage = (nested.depth() + 1) as u64;
        reports.push(self.equilibrate(nested, SweepScope::Nested, stage)?);
        info!(
            "hierarchy: levels = {}, blocks = {:?}, S = {:.4}",
            nested.depth(),
            nested.levels_blocks(),
            nested.entropy()
        );
        Ok(())
    }
}
