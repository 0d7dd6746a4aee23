//! Posterior sampling from an equilibrated hierarchy.
//!
//! Independent chains start from clones of the state and record projected
//! partitions; draws are aligned to the state's own labels and folded into
//! a [`PosteriorAccumulator`], whose `merge` is associative and commutative
//! so that chain completion order cannot change the result.

use crate::affinity::*;
use crate::error::{invalid, NsbmError, Result};
use crate::metrics::num_labels;
use crate::nested::NestedState;
use crate::options::{PosteriorOptions, SweepOptions};
use crate::sampler::sweep_nested;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use mcmc_util::{ChainRunner, McmcChain, SweepState};
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Sweepable chain over a nested state
#[derive(Debug, Clone)]
pub struct ChainState {
    nested: NestedState,
    options: SweepOptions,
    sweeps: usize,
}

impl ChainState {
    /// Chain starting from `nested`
    pub fn new(nested: NestedState, options: SweepOptions) -> Self {
        ChainState {
            nested,
            options,
            sweeps: 0,
        }
    }

    /// Current state
    pub fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl SweepState for ChainState {
    type Draw = Vec<Vec<usize>>;
    type Error = NsbmError;

    fn sweep(&mut self, rng: &mut SmallRng) -> Result<()> {
        sweep_nested(&mut self.nested, &self.options, self.sweeps, rng)?;
        self.sweeps += 1;
        Ok(())
    }

    fn entropy(&self) -> f64 {
        self.nested.entropy()
    }

    fn draw(&self) -> Vec<Vec<usize>> {
        self.nested.projected_partitions()
    }
}

/// Aligned draw tagged with its chain and position
#[derive(Debug, Clone)]
struct TaggedDraw {
    chain: usize,
    index: usize,
    entropy: f64,
    levels: Vec<Vec<usize>>,
}

/// Integer marginal counts plus the aligned draws of one or more chains
#[derive(Debug, Clone)]
pub struct PosteriorAccumulator {
    n: usize,
    counts: Vec<Vec<Vec<u64>>>,
    draws: Vec<TaggedDraw>,
}

impl PosteriorAccumulator {
    /// Empty accumulator for `depth` levels over `n` vertices
    pub fn empty(n: usize, depth: usize) -> Self {
        PosteriorAccumulator {
            n,
            counts: vec![vec![vec![]; n]; depth],
            draws: vec![],
        }
    }

    /// Fold the draws of chain `chain` aligned to `reference`
    pub fn from_chain(reference: &[Vec<usize>], chain: usize, draws: McmcChain<Vec<Vec<usize>>>) -> Self {
        let n = reference.first().map(|r| r.len()).unwrap_or(0);
        let mut acc = Self::empty(n, reference.len());
        for (index, (levels, entropy)) in draws.samples.into_iter().zip(draws.entropies).enumerate() {
            let aligned: Vec<Vec<usize>> = levels
                .iter()
                .zip(reference.iter())
                .map(|(labels, r)| align_to_reference(labels, r))
                .collect();
            acc.add(TaggedDraw {
                chain,
                index,
                entropy,
                levels: aligned,
            });
        }
        acc
    }

    fn add(&mut self, draw: TaggedDraw) {
        for (l, labels) in draw.levels.iter().enumerate() {
            for (v, &c) in labels.iter().enumerate() {
                let row = &mut self.counts[l][v];
                if row.len() <= c {
                    row.resize(c + 1, 0);
                }
                row[c] += 1;
            }
        }
        self.draws.push(draw);
    }

    /// Combine two accumulators
    pub fn merge(mut self, other: Self) -> Self {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                if a.len() < b.len() {
                    a.resize(b.len(), 0);
                }
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
            }
        }
        self.draws.extend(other.draws);
        self
    }

    /// Total number of draws folded in
    pub fn num_draws(&self) -> usize {
        self.draws.len()
    }

    /// Marginal of level `l` (`n x k`, rows sum to 1)
    pub fn marginal(&self, l: usize) -> Result<DMatrix<f64>> {
        let counts = self.counts.get(l).ok_or(NsbmError::LevelOutOfRange {
            requested: l,
            depth: self.counts.len(),
        })?;
        Ok(level_marginal(counts, self.n))
    }

    /// Summary statistics; draws are ordered by (chain, index) first so
    /// the result does not depend on merge order.
    pub fn summarize(mut self, reference: &[Vec<usize>], with_affinity: bool) -> PosteriorSummary {
        self.draws.sort_by_key(|d| (d.chain, d.index));
        let depth = self.counts.len();
        let n = self.n;

        let marginals: Vec<DMatrix<f64>> = self.counts.iter().map(|c| level_marginal(c, n)).collect();
        let mf = marginals.iter().map(mf_entropy).collect();

        let mut stability = Vec::with_capacity(depth);
        let mut per_block = Vec::with_capacity(depth);
        let mut group_marginals = Vec::with_capacity(depth);
        for l in 0..depth {
            let level_draws: Vec<&[usize]> = self.draws.iter().map(|d| d.levels[l].as_slice()).collect();
            let s = vertex_stability(&level_draws, n);
            per_block.push(block_stability(&s, &reference[l]));
            stability.push(s);

            let mut hist: Vec<usize> = vec![];
            for labels in &level_draws {
                let b = distinct(labels);
                if hist.len() <= b {
                    hist.resize(b + 1, 0);
                }
                hist[b] += 1;
            }
            group_marginals.push(hist);
        }

        let affinity = with_affinity.then(|| {
            let level0: Vec<&[usize]> = self.draws.iter().map(|d| d.levels[0].as_slice()).collect();
            co_clustering(&level0, n)
        });
        let all_levels: Vec<Vec<Vec<usize>>> = self.draws.iter().map(|d| d.levels.clone()).collect();
        let consistency = cross_level_consistency(&all_levels, reference);

        PosteriorSummary {
            depth,
            levels: (0..depth).collect(),
            n_draws: self.draws.len(),
            entropies: self.draws.iter().map(|d| d.entropy).collect(),
            marginals,
            mf_entropy: mf,
            affinity,
            stability,
            block_stability: per_block,
            consistency,
            group_marginals,
        }
    }
}

fn pick<T: Default>(v: &mut Vec<T>, idx: &[usize]) {
    let kept: Vec<T> = idx.iter().map(|&i| std::mem::take(&mut v[i])).collect();
    *v = kept;
}

fn level_marginal(counts: &[Vec<u64>], n: usize) -> DMatrix<f64> {
    let k = counts.iter().map(|r| r.len()).max().unwrap_or(0);
    marginals_from_counts(counts, n, k)
}

fn distinct(labels: &[usize]) -> usize {
    let mut seen = vec![false; num_labels(labels)];
    labels.iter().for_each(|&c| seen[c] = true);
    seen.into_iter().filter(|&x| x).count()
}

/// Posterior statistics of a run.
///
/// Per-level vectors follow `levels`, which lists the hierarchy levels
/// they describe (all of `0..depth` unless uninformative levels were
/// pruned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorSummary {
    /// Depth of the sampled hierarchy
    pub depth: usize,
    /// Hierarchy level of every per-level entry
    pub levels: Vec<usize>,
    /// Number of draws over all chains
    pub n_draws: usize,
    /// Entropy of each draw, ordered by chain then draw
    pub entropies: Vec<f64>,
    /// Per level: vertex x block marginal, columns aligned to the
    /// equilibrated labels (extra columns for unmatched blocks)
    pub marginals: Vec<DMatrix<f64>>,
    /// Per level mean-field entropy
    pub mf_entropy: Vec<f64>,
    /// Level-0 co-clustering frequencies (`None` when turned off)
    pub affinity: Option<DMatrix<f64>>,
    /// Per level, per vertex Jaccard stability
    pub stability: Vec<Vec<f64>>,
    /// Per level, per equilibrated block mean stability
    pub block_stability: Vec<Vec<f64>>,
    /// Vertex x adjacent level pair consistency; column `i` pairs
    /// `levels[i]` with the level above it
    pub consistency: DMatrix<f64>,
    /// Per level histogram of the number of occupied blocks
    pub group_marginals: Vec<Vec<usize>>,
}

impl PosteriorSummary {
    fn position(&self, level: usize) -> Result<usize> {
        if level >= self.depth {
            return Err(NsbmError::LevelOutOfRange {
                requested: level,
                depth: self.depth,
            });
        }
        self.levels
            .iter()
            .position(|&l| l == level)
            .ok_or_else(|| NsbmError::InvalidInput(format!("level {} was pruned", level)))
    }

    /// Marginal of hierarchy level `level`
    pub fn marginal(&self, level: usize) -> Result<&DMatrix<f64>> {
        Ok(&self.marginals[self.position(level)?])
    }

    /// Per-vertex stability of hierarchy level `level`
    pub fn level_stability(&self, level: usize) -> Result<&[f64]> {
        Ok(&self.stability[self.position(level)?])
    }

    /// Keep only the hierarchy levels in `keep` (ascending). Consistency
    /// columns survive when both levels of the pair do.
    pub fn retain_levels(&mut self, keep: &[usize]) {
        let idx: Vec<usize> = keep
            .iter()
            .filter_map(|l| self.levels.iter().position(|x| x == l))
            .collect();
        pick(&mut self.stability, &idx);
        pick(&mut self.block_stability, &idx);
        pick(&mut self.group_marginals, &idx);
        self.marginals = idx.iter().map(|&i| self.marginals[i].clone()).collect();
        self.mf_entropy = idx.iter().map(|&i| self.mf_entropy[i]).collect();

        let cols: Vec<usize> = idx
            .iter()
            .copied()
            .filter(|&i| i + 1 < self.levels.len() && idx.contains(&(i + 1)))
            .collect();
        self.consistency = self.consistency.select_columns(cols.iter());
        self.levels = idx.iter().map(|&i| self.levels[i]).collect();
    }
}

/// Run `opts.n_chains` chains from `nested` and summarize their draws.
///
/// Chain `i` uses seed `seed + i`; the first draw of each chain is the
/// starting state when `burnin` is zero.
pub fn sample(nested: &NestedState, opts: &PosteriorOptions, seed: u64) -> Result<PosteriorSummary> {
    if opts.n_draws == 0 {
        return invalid("posterior sampling needs at least one draw");
    }
    if opts.n_chains == 0 {
        return invalid("posterior sampling needs at least one chain");
    }

    let reference = nested.projected_partitions();
    let n = nested.num_vertices();
    let depth = nested.depth();

    info!(
        "posterior: {} chains x {} draws (burnin = {}, thin = {})",
        opts.n_chains, opts.n_draws, opts.burnin, opts.thin
    );

    let runner = ChainRunner {
        n_samples: opts.n_draws,
        warmup: opts.burnin,
        thin: opts.thin,
        seed,
    };
    let init = ChainState::new(nested.clone(), opts.sweep.clone());

    let pb = ProgressBar::new(opts.n_chains as u64);
    if !opts.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    let chains = runner.run_parallel_with(opts.n_chains, opts.n_jobs, &init, |_| pb.inc(1))?;
    pb.finish_and_clear();

    let acc = chains
        .into_par_iter()
        .enumerate()
        .map(|(c, chain)| PosteriorAccumulator::from_chain(&reference, c, chain))
        .reduce(|| PosteriorAccumulator::empty(n, depth), PosteriorAccumulator::merge);

    Ok(acc.summarize(&reference, opts.affinity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::model::EntropyModel;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn small_nested() -> NestedState {
        let mut edges = vec![];
        for c in 0..3 {
            for i in 0..5 {
                for j in (i + 1)..5 {
                    edges.push((c * 5 + i, c * 5 + j, 1.0));
                }
            }
        }
        edges.push((0, 5, 1.0));
        edges.push((5, 10, 1.0));
        let g = Arc::new(Graph::from_edges(15, &edges, false).unwrap());
        let labels: Vec<usize> = (0..15).map(|v| v / 5).collect();
        NestedState::from_partitions(g, EntropyModel::DegreeCorrected, &[labels, vec![0, 0, 0]]).unwrap()
    }

    #[test]
    fn test_single_draw_is_one_hot() {
        let nested = small_nested();
        let opts = PosteriorOptions {
            n_draws: 1,
            n_chains: 2,
            n_jobs: 1,
            ..PosteriorOptions::default()
        };
        let summary = sample(&nested, &opts, 3).unwrap();
        let labels = nested.project_partition(0).unwrap();
        let m = &summary.marginals[0];
        for v in 0..15 {
            for c in 0..m.ncols() {
                let expected = if labels[v] == c { 1.0 } else { 0.0 };
                assert_eq!(m[(v, c)], expected);
            }
        }
        assert_eq!(summary.n_draws, 2);
        assert_eq!(summary.stability[0], vec![1.0; 15]);
        assert_abs_diff_eq!(summary.mf_entropy[0], 0.0);
    }

    #[test]
    fn test_rows_sum_to_one_and_merge_order_is_irrelevant() {
        let nested = small_nested();
        let opts = PosteriorOptions {
            n_draws: 4,
            n_chains: 3,
            n_jobs: 2,
            ..PosteriorOptions::default()
        };
        let summary = sample(&nested, &opts, 11).unwrap();
        for m in &summary.marginals {
            for v in 0..15 {
                assert_abs_diff_eq!(m.row(v).sum(), 1.0, epsilon = 1e-6);
            }
        }
        assert_eq!(summary.consistency.shape(), (15, 1));
        assert_eq!(summary.group_marginals[0].iter().sum::<usize>(), 12);

        // fold the same chains in two different orders
        let reference = nested.projected_partitions();
        let runner = ChainRunner {
            n_samples: 3,
            warmup: 0,
            thin: 1,
            seed: 5,
        };
        let init = ChainState::new(nested.clone(), SweepOptions::default());
        let chains = runner.run_parallel(3, 1, &init).unwrap();
        let parts: Vec<PosteriorAccumulator> = chains
            .into_iter()
            .enumerate()
            .map(|(c, ch)| PosteriorAccumulator::from_chain(&reference, c, ch))
            .collect();
        let forward = parts
            .iter()
            .cloned()
            .fold(PosteriorAccumulator::empty(15, 2), PosteriorAccumulator::merge)
            .summarize(&reference, true);
        let backward = parts
            .into_iter()
            .rev()
            .fold(PosteriorAccumulator::empty(15, 2), PosteriorAccumulator::merge)
            .summarize(&reference, true);
        assert_eq!(forward.affinity, backward.affinity);
        assert_eq!(forward.marginals, backward.marginals);
        assert_eq!(forward.stability, backward.stability);
        assert_eq!(forward.entropies, backward.entropies);
    }

    #[test]
    fn test_marginal_level_out_of_range() {
        let acc = PosteriorAccumulator::empty(4, 2);
        assert_eq!(acc.marginal(1).unwrap().nrows(), 4);
        assert!(matches!(
            acc.marginal(5),
            Err(NsbmError::LevelOutOfRange { requested: 5, depth: 2 })
        ));

        let nested = small_nested();
        let opts = PosteriorOptions {
            n_draws: 2,
            n_jobs: 1,
            affinity: false,
            ..PosteriorOptions::default()
        };
        let summary = sample(&nested, &opts, 1).unwrap();
        assert!(summary.affinity.is_none());
        assert_eq!(summary.levels, vec![0, 1]);
        assert!(summary.marginal(1).is_ok());
        assert!(matches!(
            summary.marginal(2),
            Err(NsbmError::LevelOutOfRange { requested: 2, depth: 2 })
        ));
    }

    #[test]
    fn test_zero_draws_rejected() {
        let nested = small_nested();
        let opts = PosteriorOptions {
            n_draws: 0,
            ..PosteriorOptions::default()
        };
        assert!(matches!(
            sample(&nested, &opts, 0),
            Err(NsbmError::InvalidInput(_))
        ));
    }
}
