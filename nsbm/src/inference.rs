use crate::error::{invalid, NsbmError, Result};
use crate::graph::Graph;
use crate::hierarchy::HierarchyBuilder;
use crate::metrics::{modularity, normalized_mutual_info, renumber, same_partition};
use crate::model::ModelVariant;
use crate::nested::NestedState;
use crate::options::NsbmOptions;
use crate::posterior::{self, PosteriorSummary};
use crate::sampler::{EquilibrationReport, McmcSampler, SweepScope};
use crate::snapshot::NestedSnapshot;
use log::info;
use mcmc_util::SamplerStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything a run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsbmResult {
    /// Original vertex index of every row when the run was restricted to
    /// a subset; `None` means rows are the input vertices
    pub vertices: Option<Vec<usize>>,
    /// Depth of the equilibrated hierarchy
    pub depth: usize,
    /// Hierarchy levels described by the per-level statistics below
    /// (every level unless `prune` dropped some)
    pub levels: Vec<usize>,
    /// Hierarchy level of every row of `labels`
    pub label_levels: Vec<usize>,
    /// Per returned level, the dense block of every vertex
    pub labels: Vec<Vec<usize>>,
    /// Occupied blocks per level
    pub blocks: Vec<usize>,
    /// Entropy of every level
    pub level_entropies: Vec<f64>,
    /// Total description length of the whole hierarchy
    pub entropy: f64,
    /// Modularity of every level's projected partition
    pub modularity: Vec<f64>,
    /// NMI between the projected partitions of consecutive entries of
    /// `levels`
    pub adjacent_nmi: Vec<f64>,
    /// Levels whose projected partition repeats the level below
    pub uninformative: Vec<bool>,
    /// Reports of every equilibration, the joint one last
    pub reports: Vec<EquilibrationReport>,
    /// Posterior statistics when draws were requested
    pub posterior: Option<PosteriorSummary>,
    /// State to resume from
    pub snapshot: NestedSnapshot,
}

impl NsbmResult {
    /// Status of the last equilibration
    pub fn status(&self) -> SamplerStatus {
        self.reports
            .last()
            .map(|r| r.status)
            .unwrap_or(SamplerStatus::Uninitialized)
    }

    /// Number of levels in the hierarchy
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Labels of hierarchy level `level`.
    ///
    /// Levels beyond the hierarchy and level 0 under `return_low = false`
    /// are out of range; a level dropped by `prune` is invalid input.
    pub fn level_labels(&self, level: usize) -> Result<&[usize]> {
        let lowest = self.label_levels.first().copied().unwrap_or(0);
        if level >= self.depth || level < lowest {
            return Err(NsbmError::LevelOutOfRange {
                requested: level,
                depth: self.depth,
            });
        }
        match self.label_levels.iter().position(|&l| l == level) {
            Some(i) => Ok(&self.labels[i]),
            None => invalid(format!("level {} was pruned as uninformative", level)),
        }
    }
}

/// Nested stochastic block model inference.
///
/// # Example
///
/// ```ignore
/// use nsbm::{Graph, Nsbm, NsbmOptions};
///
/// let graph = Graph::from_edges(n, &edges, false)?;
/// let result = Nsbm::new(NsbmOptions::default()).fit(&graph)?;
/// let finest = result.level_labels(0)?;
/// ```
#[derive(Debug, Clone)]
pub struct Nsbm {
    options: NsbmOptions,
    reference: Option<Vec<usize>>,
}

impl Nsbm {
    /// Create a new NSBM instance.
    pub fn new(options: NsbmOptions) -> Self {
        Nsbm {
            options,
            reference: None,
        }
    }

    /// Reference partition over the input vertices (planted model)
    pub fn with_reference(mut self, reference: Vec<usize>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Options in use
    pub fn options(&self) -> &NsbmOptions {
        &self.options
    }

    /// Graph and reference after applying `restrict_to`
    fn working_graph(&self, graph: &Graph) -> Result<(Arc<Graph>, Option<Vec<usize>>)> {
        if let Some(reference) = &self.reference {
            if reference.len() != graph.num_vertices() {
                return invalid(format!(
                    "reference partition has {} entries for {} vertices",
                    reference.len(),
                    graph.num_vertices()
                ));
            }
        }
        match &self.options.restrict_to {
            None => Ok((Arc::new(graph.clone()), self.reference.clone())),
            Some(vertices) => {
                let sub = graph.induced_subgraph(vertices)?;
                let reference = self
                    .reference
                    .as_ref()
                    .map(|r| vertices.iter().map(|&v| r[v]).collect());
                info!(
                    "restricted to {} of {} vertices",
                    sub.num_vertices(),
                    graph.num_vertices()
                );
                Ok((Arc::new(sub), reference))
            }
        }
    }

    fn builder(&self, reference: Option<Vec<usize>>) -> HierarchyBuilder {
        let builder = HierarchyBuilder::new(self.options.clone());
        match reference {
            Some(r) => builder.with_reference(r),
            None => builder,
        }
    }

    /// Equilibrate the hierarchy over `graph` and, if `n_draws > 0`,
    /// sample the posterior around it.
    pub fn fit(&self, graph: &Graph) -> Result<NsbmResult> {
        let (graph, reference) = self.working_graph(graph)?;

        info!(
            "NSBM: n={}, levels={}, dc={}",
            graph.num_vertices(),
            self.options.max_levels,
            self.options.model == ModelVariant::DegreeCorrected,
        );

        let built = self.builder(reference).build(graph)?;
        self.finish(built.nested, built.reports)
    }

    /// Continue from a snapshot taken on `graph`: one joint equilibration
    /// (skipped when `max_sweeps == 0`), then posterior sampling as in
    /// [`Nsbm::fit`].
    pub fn resume(&self, graph: &Graph, snapshot: &NestedSnapshot) -> Result<NsbmResult> {
        let (graph, _) = self.working_graph(graph)?;
        let mut nested = snapshot.restore(graph)?;

        info!(
            "NSBM resume: n={}, levels={}, S={:.4}",
            nested.num_vertices(),
            nested.depth(),
            nested.entropy()
        );

        let mut reports = vec![];
        if self.options.max_sweeps > 0 {
            let mut sampler = McmcSampler::new(self.options.equilibration_options(), self.options.seed);
            reports.push(sampler.equilibrate(&mut nested, SweepScope::Nested)?);
        }
        self.finish(nested, reports)
    }

    /// Labels and statistics of a snapshot without any sampling
    pub fn labels_from_snapshot(&self, graph: &Graph, snapshot: &NestedSnapshot) -> Result<NsbmResult> {
        let (graph, _) = self.working_graph(graph)?;
        let nested = snapshot.restore(graph)?;
        let summary = Nsbm::new(NsbmOptions {
            n_draws: 0,
            ..self.options.clone()
        });
        summary.finish(nested, vec![])
    }

    fn finish(&self, nested: NestedState, reports: Vec<EquilibrationReport>) -> Result<NsbmResult> {
        let graph = nested.graph().clone();
        let depth = nested.depth();
        let projected: Vec<Vec<usize>> = nested
            .projected_partitions()
            .iter()
            .map(|labels| renumber(labels).0)
            .collect();

        let mut uninformative = vec![false; depth];
        for l in 1..depth {
            if same_partition(&projected[l], &projected[l - 1]) {
                uninformative[l] = true;
            }
        }

        let levels: Vec<usize> = (0..depth)
            .filter(|&l| !(self.options.prune && uninformative[l]))
            .collect();
        if levels.len() < depth {
            info!(
                "pruning uninformative levels {:?}",
                (0..depth).filter(|l| !levels.contains(l)).collect::<Vec<_>>()
            );
        }

        let modularity_per_level: Vec<f64> = levels
            .iter()
            .map(|&l| modularity(&graph, &projected[l], 1.0))
            .collect();

        let adjacent_nmi: Vec<f64> = levels
            .windows(2)
            .map(|w| normalized_mutual_info(&projected[w[0]], &projected[w[1]]))
            .collect();

        let posterior = if self.options.n_draws > 0 {
            let mut summary = posterior::sample(
                &nested,
                &self.options.posterior_options(),
                self.options.seed,
            )?;
            if levels.len() < depth {
                summary.retain_levels(&levels);
            }
            Some(summary)
        } else {
            None
        };

        let skip_low = !self.options.return_low && levels.len() > 1;
        let label_levels: Vec<usize> = levels
            .iter()
            .copied()
            .filter(|&l| !(skip_low && l == 0))
            .collect();
        let labels = label_levels.iter().map(|&l| projected[l].clone()).collect();

        let blocks = nested.levels_blocks();
        let level_entropies = nested.level_entropies();

        let result = NsbmResult {
            vertices: self.options.restrict_to.clone(),
            depth,
            label_levels,
            labels,
            blocks: levels.iter().map(|&l| blocks[l]).collect(),
            level_entropies: levels.iter().map(|&l| level_entropies[l]).collect(),
            entropy: nested.entropy(),
            modularity: modularity_per_level,
            adjacent_nmi,
            uninformative: levels.iter().map(|&l| uninformative[l]).collect(),
            levels,
            reports,
            posterior,
            snapshot: NestedSnapshot::from_nested(&nested),
        };

        info!(
            "NSBM done: S={:.4}, blocks={:?}, status={}",
            result.entropy,
            result.blocks,
            result.status()
        );
        Ok(result)
    }
}
