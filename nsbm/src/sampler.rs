//! Metropolis-Hastings sweeps over a nested state.
//!
//! A level sweep visits every vertex of the level in shuffled order and
//! proposes a move with the informed proposal
//!
//! ```text
//! q(s | v) = Σ_t p(t | v) (m_ts + ε) / (Σ_{s' ∈ C} m_ts' + ε |C|)
//! ```
//!
//! where `t` is the block of a neighbor drawn proportionally to edge
//! weight and `C` holds the occupied candidate blocks plus one slot for a
//! new block when births are allowed. Below the top, candidates must share
//! the parent of the vertex's current block. Moves are accepted with
//! `min(1, exp(-β ΔS) q(r | v') / q(s | v))`; the reverse probability is
//! evaluated on the state after the move.
//!
//! Every level sweep ends by rebuilding the hierarchy canonically, so all
//! block ids are dense between sweeps.

use crate::block_state::BlockState;
use crate::error::{NsbmError, Result};
use crate::nested::NestedState;
use crate::options::{EquilibrationOptions, SweepOptions};
use log::{debug, warn};
use mcmc_util::{MonitorSignal, RecordBreakMonitor, SamplerStatus};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const MIN_EPSILON: f64 = 1e-9;

/// Move counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Single-vertex moves proposed (no-op proposals excluded)
    pub proposed: usize,
    /// Single-vertex moves accepted
    pub accepted: usize,
    /// Moves rejected because their entropy change was not finite
    pub degenerate: usize,
    /// Merge or split moves proposed
    pub merge_split_proposed: usize,
    /// Merge or split moves accepted
    pub merge_split_accepted: usize,
}

impl SweepStats {
    /// Add the counters of `other`
    pub fn absorb(&mut self, other: &SweepStats) {
        self.proposed += other.proposed;
        self.accepted += other.accepted;
        self.degenerate += other.degenerate;
        self.merge_split_proposed += other.merge_split_proposed;
        self.merge_split_accepted += other.merge_split_accepted;
    }

    /// Fraction of single-vertex proposals accepted
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Parents of the blocks of one level and the sibling groups they define
struct LevelContext {
    parent: Vec<usize>,
    groups: Vec<Vec<usize>>,
    has_upper: bool,
}

impl LevelContext {
    fn new(nested: &NestedState, l: usize) -> Self {
        match nested.level(l + 1) {
            Some(upper) => {
                let parent = upper.membership().to_vec();
                let mut groups = vec![vec![]; upper.num_slots()];
                for (r, &p) in parent.iter().enumerate() {
                    groups[p].push(r);
                }
                LevelContext {
                    parent,
                    groups,
                    has_upper: true,
                }
            }
            None => LevelContext {
                parent: vec![],
                groups: vec![],
                has_upper: false,
            },
        }
    }

    fn parent_of(&self, r: usize) -> Option<usize> {
        if self.has_upper {
            self.parent.get(r).copied()
        } else {
            None
        }
    }

    fn allowed(&self, state: &BlockState, p: Option<usize>, s: usize) -> bool {
        state.block_size(s) > 0.0 && (p.is_none() || self.parent_of(s) == p)
    }

    /// Occupied blocks a vertex of block `r` may move to (including `r`)
    fn candidates(&self, state: &BlockState, r: usize) -> Vec<usize> {
        match self.parent_of(r) {
            Some(p) => self.groups[p]
                .iter()
                .copied()
                .filter(|&s| state.block_size(s) > 0.0)
                .collect(),
            None => state.nonempty_blocks(),
        }
    }

    fn register(&mut self, s: usize, p: Option<usize>) {
        if let Some(p) = p {
            if s < self.parent.len() {
                let old = self.parent[s];
                self.groups[old].retain(|&x| x != s);
                self.parent[s] = p;
            } else {
                self.parent.resize(s + 1, p);
            }
            self.groups[p].push(s);
        }
    }

    fn unregister(&mut self, s: usize, p: Option<usize>) {
        if let Some(p) = p {
            if self.parent.len() == s + 1 {
                self.parent.pop();
                self.groups[p].retain(|&x| x != s);
            }
        }
    }
}

fn can_birth(state: &BlockState, v: usize, opts: &SweepOptions) -> bool {
    state.block_size(state.block_of(v)) > 1.0
        && opts.max_blocks.is_none_or(|cap| state.num_nonempty() < cap)
}

fn link(state: &BlockState, t: usize, s: usize) -> f64 {
    if state.graph().is_directed() {
        state.edge_count(t, s) + state.edge_count(s, t)
    } else {
        state.edge_count(t, s)
    }
}

/// Allowed entries of row `t`, sorted by block id
fn allowed_row(state: &BlockState, ctx: &LevelContext, p: Option<usize>, t: usize) -> Vec<(usize, f64)> {
    let mut row: fnv::FnvHashMap<usize, f64> = state.block_row(t).collect();
    if state.graph().is_directed() {
        for (s, m) in state.block_column(t) {
            *row.entry(s).or_insert(0.0) += m;
        }
    }
    let mut row: Vec<(usize, f64)> = row
        .into_iter()
        .filter(|&(s, m)| m > 0.0 && ctx.allowed(state, p, s))
        .collect();
    row.sort_unstable_by_key(|&(s, _)| s);
    row
}

fn sorted_neighbors(state: &BlockState, v: usize) -> Vec<(usize, f64)> {
    let mut nbr: Vec<(usize, f64)> = state.neighbor_blocks(v).into_iter().collect();
    nbr.sort_unstable_by_key(|&(t, _)| t);
    nbr
}

/// Probability that the informed proposal picks `target` for `v`. Targets
/// that are empty (or past the last slot) stand for "a new block".
fn proposal_prob(
    state: &BlockState,
    ctx: &LevelContext,
    v: usize,
    target: usize,
    nbr: &[(usize, f64)],
    eps: f64,
    birth: bool,
) -> f64 {
    let r = state.block_of(v);
    let p = ctx.parent_of(r);
    let cands = ctx.candidates(state, r);
    let n_c = (cands.len() + usize::from(birth)) as f64;

    let is_new = state.block_size(target) <= 0.0;
    if (is_new && !birth) || (!is_new && !ctx.allowed(state, p, target)) {
        return 0.0;
    }

    let total: f64 = nbr.iter().map(|&(_, w)| w).sum();
    if total <= 0.0 {
        return 1.0 / n_c;
    }

    nbr.iter()
        .map(|&(t, w)| {
            let mass: f64 = allowed_row(state, ctx, p, t).iter().map(|&(_, m)| m).sum();
            let m_ts = if is_new { 0.0 } else { link(state, t, target) };
            (w / total) * (m_ts + eps) / (mass + eps * n_c)
        })
        .sum()
}

fn sample_target(
    state: &BlockState,
    ctx: &LevelContext,
    v: usize,
    nbr: &[(usize, f64)],
    eps: f64,
    birth: bool,
    rng: &mut SmallRng,
) -> usize {
    let r = state.block_of(v);
    let p = ctx.parent_of(r);
    let cands = ctx.candidates(state, r);
    let n_c = cands.len() + usize::from(birth);
    let uniform = |rng: &mut SmallRng| {
        let i = rng.random_range(0..n_c.max(1));
        cands.get(i).copied().unwrap_or(state.num_slots())
    };

    let total: f64 = nbr.iter().map(|&(_, w)| w).sum();
    if total <= 0.0 {
        return uniform(rng);
    }

    let mut x = rng.random::<f64>() * total;
    let mut t = nbr[nbr.len() - 1].0;
    for &(b, w) in nbr {
        if x < w {
            t = b;
            break;
        }
        x -= w;
    }

    let row = allowed_row(state, ctx, p, t);
    let mass: f64 = row.iter().map(|&(_, m)| m).sum();
    let denom = mass + eps * n_c as f64;
    if rng.random::<f64>() * denom < eps * n_c as f64 || row.is_empty() {
        return uniform(rng);
    }

    let mut x = rng.random::<f64>() * mass;
    for &(s, m) in &row {
        if x < m {
            return s;
        }
        x -= m;
    }
    row[row.len() - 1].0
}

fn metropolis(ds: f64, log_hastings: f64, beta: f64, rng: &mut SmallRng) -> bool {
    if beta.is_infinite() {
        return ds <= 0.0;
    }
    let log_a = -beta * ds + log_hastings;
    log_a >= 0.0 || rng.random::<f64>() < log_a.exp()
}

fn vertex_move(
    state: &mut BlockState,
    mut upper: Option<&mut BlockState>,
    ctx: &mut LevelContext,
    v: usize,
    opts: &SweepOptions,
    rng: &mut SmallRng,
    stats: &mut SweepStats,
) {
    let r = state.block_of(v);
    let eps = opts.epsilon.max(MIN_EPSILON);
    let nbr = sorted_neighbors(state, v);
    let birth = can_birth(state, v, opts);

    let s = sample_target(state, ctx, v, &nbr, eps, birth, rng);
    if s == r {
        return;
    }
    stats.proposed += 1;

    let q_fwd = proposal_prob(state, ctx, v, s, &nbr, eps, birth);
    let p = ctx.parent_of(r);
    let r_empties = state.block_size(r) <= 1.0;
    let is_new = s >= state.num_slots();

    let mut ds = state.entropy_delta(v, s);
    if let (Some(up), Some(p)) = (upper.as_deref(), p) {
        if r_empties {
            ds += up.vertex_count_delta(p, -1.0);
        }
        if is_new {
            ds += up.vertex_count_delta(p, 1.0);
        }
    }
    if !ds.is_finite() {
        stats.degenerate += 1;
        return;
    }

    let slots = state.num_slots();
    state.move_vertex(v, s);
    let s = state.block_of(v);
    if is_new {
        ctx.register(s, p);
    }

    let birth_rev = can_birth(state, v, opts);
    let rev_target = if state.block_size(r) > 0.0 {
        r
    } else {
        state.num_slots()
    };
    let q_rev = proposal_prob(state, ctx, v, rev_target, &nbr, eps, birth_rev);

    if metropolis(ds, q_rev.ln() - q_fwd.ln(), opts.beta, rng) {
        stats.accepted += 1;
        if let (Some(up), Some(p)) = (upper.as_deref_mut(), p) {
            if r_empties {
                up.adjust_block_size(p, -1.0);
            }
            if is_new {
                up.adjust_block_size(p, 1.0);
            }
        }
    } else {
        state.move_vertex(v, r);
        if is_new {
            state.trim_empty_slots_to(slots);
            ctx.unregister(s, p);
        }
    }
}

fn members_of(state: &BlockState, r: usize) -> Vec<usize> {
    (0..state.num_vertices())
        .filter(|&v| state.block_of(v) == r)
        .collect()
}

fn merge_move(
    state: &mut BlockState,
    upper: Option<&mut BlockState>,
    ctx: &LevelContext,
    r: usize,
    opts: &SweepOptions,
    rng: &mut SmallRng,
    stats: &mut SweepStats,
) {
    let others: Vec<usize> = ctx
        .candidates(state, r)
        .into_iter()
        .filter(|&s| s != r)
        .collect();
    if others.is_empty() {
        return;
    }
    let s = others[rng.random_range(0..others.len())];
    let members = members_of(state, r);
    stats.merge_split_proposed += 1;

    let mut ds = 0.0;
    for &v in &members {
        ds += state.entropy_delta(v, s);
        state.move_vertex(v, s);
    }
    let p = ctx.parent_of(r);
    if let (Some(up), Some(p)) = (upper.as_deref(), p) {
        ds += up.vertex_count_delta(p, -1.0);
    }

    if ds.is_finite() && metropolis(ds, 0.0, opts.beta, rng) {
        stats.merge_split_accepted += 1;
        if let (Some(up), Some(p)) = (upper, p) {
            up.adjust_block_size(p, -1.0);
        }
    } else {
        if !ds.is_finite() {
            stats.degenerate += 1;
        }
        for &v in &members {
            state.move_vertex(v, r);
        }
    }
}

fn split_move(
    state: &mut BlockState,
    upper: Option<&mut BlockState>,
    ctx: &mut LevelContext,
    r: usize,
    opts: &SweepOptions,
    rng: &mut SmallRng,
    stats: &mut SweepStats,
) {
    let mut members = members_of(state, r);
    if members.len() < 2 || opts.max_blocks.is_some_and(|cap| state.num_nonempty() >= cap) {
        return;
    }
    stats.merge_split_proposed += 1;
    members.shuffle(rng);
    let p = ctx.parent_of(r);

    // two seeds; every other member joins the side it is more strongly
    // attached to among the members placed so far (ties at random)
    let mut side: fnv::FnvHashMap<usize, bool> = fnv::FnvHashMap::default();
    side.insert(members[0], false);
    side.insert(members[1], true);
    for &v in &members[2..] {
        let graph = state.graph();
        let ins: &[(usize, f64)] = if graph.is_directed() {
            graph.in_neighbors(v)
        } else {
            &[]
        };
        let (mut to_r, mut to_s) = (0.0, 0.0);
        for &(u, w) in graph.out_neighbors(v).iter().chain(ins) {
            match side.get(&u) {
                Some(false) => to_r += w,
                Some(true) => to_s += w,
                None => {}
            }
        }
        let to_new = if to_r == to_s {
            rng.random::<f64>() < 0.5
        } else {
            to_s > to_r
        };
        side.insert(v, to_new);
    }

    let s = state.num_slots();
    let mut ds = 0.0;
    for &v in &members {
        if side.get(&v).copied().unwrap_or(false) {
            ds += state.entropy_delta(v, s);
            state.move_vertex(v, s);
        }
    }
    ctx.register(s, p);

    for _ in 0..opts.split_refine {
        for &v in &members {
            let cur = state.block_of(v);
            if state.block_size(cur) <= 1.0 {
                continue;
            }
            let other = if cur == r { s } else { r };
            let d = state.entropy_delta(v, other);
            if d < 0.0 {
                state.move_vertex(v, other);
                ds += d;
            }
        }
    }

    if let (Some(up), Some(p)) = (upper.as_deref(), p) {
        ds += up.vertex_count_delta(p, 1.0);
    }

    if ds.is_finite() && metropolis(ds, 0.0, opts.beta, rng) {
        stats.merge_split_accepted += 1;
        if let (Some(up), Some(p)) = (upper, p) {
            up.adjust_block_size(p, 1.0);
        }
    } else {
        if !ds.is_finite() {
            stats.degenerate += 1;
        }
        for &v in &members {
            state.move_vertex(v, r);
        }
        state.trim_empty_slots_to(s);
        ctx.unregister(s, p);
    }
}

/// One sweep over level `l`; merge-split moves run when `sweep_index + 1`
/// is a multiple of the merge-split interval. The hierarchy is rebuilt
/// canonically afterwards.
pub fn sweep_level(
    nested: &mut NestedState,
    l: usize,
    opts: &SweepOptions,
    sweep_index: usize,
    rng: &mut SmallRng,
) -> Result<SweepStats> {
    if l >= nested.depth() {
        return Err(NsbmError::LevelOutOfRange {
            requested: l,
            depth: nested.depth(),
        });
    }

    let mut stats = SweepStats::default();
    let mut ctx = LevelContext::new(nested, l);
    {
        let (state, mut upper) = nested.level_pair_mut(l);

        let mut order: Vec<usize> = (0..state.num_vertices()).collect();
        order.shuffle(rng);
        for v in order {
            vertex_move(state, upper.as_deref_mut(), &mut ctx, v, opts, rng, &mut stats);
        }

        let interval = opts.merge_split_interval;
        if interval > 0 && (sweep_index + 1) % interval == 0 {
            for _ in 0..state.num_nonempty() {
                let blocks = state.nonempty_blocks();
                let r = blocks[rng.random_range(0..blocks.len())];
                if rng.random::<f64>() < 0.5 {
                    merge_move(state, upper.as_deref_mut(), &ctx, r, opts, rng, &mut stats);
                } else {
                    split_move(state, upper.as_deref_mut(), &mut ctx, r, opts, rng, &mut stats);
                }
            }
        }
    }

    nested.canonicalize()?;
    Ok(stats)
}

/// Bottom-up sweep over every level
pub fn sweep_nested(
    nested: &mut NestedState,
    opts: &SweepOptions,
    sweep_index: usize,
    rng: &mut SmallRng,
) -> Result<SweepStats> {
    let mut stats = SweepStats::default();
    for l in 0..nested.depth() {
        stats.absorb(&sweep_level(nested, l, opts, sweep_index, rng)?);
    }
    Ok(stats)
}

/// Which levels an equilibration sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    /// A single level
    Level(usize),
    /// All levels, bottom-up
    Nested,
}

/// Outcome of [`McmcSampler::equilibrate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquilibrationReport {
    /// Terminal status
    pub status: SamplerStatus,
    /// Monitored sweeps performed
    pub sweeps: usize,
    /// Entropy before the first sweep
    pub initial_entropy: f64,
    /// Lowest entropy seen (the state returned)
    pub best_entropy: f64,
    /// Entropy of the last sweep before restoring the best state
    pub final_entropy: f64,
    /// Move counters
    pub stats: SweepStats,
}

/// Equilibration driver with its own random stream.
///
/// A sampler runs one equilibration; once it reaches a terminal status it
/// refuses further work.
#[derive(Debug, Clone)]
pub struct McmcSampler {
    options: EquilibrationOptions,
    rng: SmallRng,
    status: SamplerStatus,
    sweeps: usize,
}

impl McmcSampler {
    /// New sampler seeded with `seed`
    pub fn new(options: EquilibrationOptions, seed: u64) -> Self {
        McmcSampler {
            options,
            rng: SmallRng::seed_from_u64(seed),
            status: SamplerStatus::Uninitialized,
            sweeps: 0,
        }
    }

    /// Current status
    pub fn status(&self) -> SamplerStatus {
        self.status
    }

    /// Sweeps performed so far (presweeps included)
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    fn sweep(&mut self, nested: &mut NestedState, scope: SweepScope) -> Result<SweepStats> {
        let stats = match scope {
            SweepScope::Level(l) => {
                sweep_level(nested, l, &self.options.sweep, self.sweeps, &mut self.rng)?
            }
            SweepScope::Nested => {
                sweep_nested(nested, &self.options.sweep, self.sweeps, &mut self.rng)?
            }
        };
        self.sweeps += 1;
        Ok(stats)
    }

    /// Sweep until the record-breaking monitor declares convergence or the
    /// sweep budget runs out, then restore the lowest-entropy state seen.
    pub fn equilibrate(
        &mut self,
        nested: &mut NestedState,
        scope: SweepScope,
    ) -> Result<EquilibrationReport> {
        if self.status.is_terminal() {
            return Err(NsbmError::SamplerFinished(self.status));
        }
        if let SweepScope::Level(l) = scope {
            if l >= nested.depth() {
                return Err(NsbmError::LevelOutOfRange {
                    requested: l,
                    depth: nested.depth(),
                });
            }
        }
        self.status = SamplerStatus::Sweeping;

        let mut stats = SweepStats::default();
        for _ in 0..self.options.presweeps {
            stats.absorb(&self.sweep(nested, scope)?);
        }

        let opts = &self.options;
        let mut monitor = RecordBreakMonitor::new(opts.wait, opts.nbreaks, opts.epsilon, opts.max_sweeps);
        let initial_entropy = nested.entropy();
        monitor.start(initial_entropy);

        let mut best_entropy = initial_entropy;
        let mut best_partitions = nested.partitions();
        let mut final_entropy = initial_entropy;

        if self.options.max_sweeps == 0 {
            self.status = SamplerStatus::MaxIterationsReached;
        }

        while !self.status.is_terminal() {
            stats.absorb(&self.sweep(nested, scope)?);
            let entropy = nested.entropy();
            final_entropy = entropy;
            if entropy < best_entropy {
                best_entropy = entropy;
                best_partitions = nested.partitions();
            }
            debug!(
                "sweep {}: S = {:.4}, blocks = {:?}",
                monitor.sweeps() + 1,
                entropy,
                nested.levels_blocks()
            );

            match monitor.observe(entropy) {
                MonitorSignal::Converged => self.status = SamplerStatus::Converged,
                MonitorSignal::Exhausted => self.status = SamplerStatus::MaxIterationsReached,
                MonitorSignal::Record | MonitorSignal::Continue => {}
            }
        }

        if self.status == SamplerStatus::MaxIterationsReached {
            warn!(
                "equilibration did not converge within {} sweeps (S = {:.4})",
                self.options.max_sweeps, best_entropy
            );
        }

        if best_entropy < final_entropy {
            *nested = NestedState::from_partitions(
                nested.graph().clone(),
                nested.base_model().clone(),
                &best_partitions,
            )?;
        }

        Ok(EquilibrationReport {
            status: self.status,
            sweeps: monitor.sweeps(),
            initial_entropy,
            best_entropy,
            final_entropy,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::model::EntropyModel;
    use std::sync::Arc;

    fn two_cliques(size: usize, bridge: bool) -> Arc<Graph> {
        let mut edges = vec![];
        for c in 0..2 {
            for i in 0..size {
                for j in (i + 1)..size {
                    edges.push((c * size + i, c * size + j, 1.0));
                }
            }
        }
        if bridge {
            edges.push((0, size, 1.0));
        }
        Arc::new(Graph::from_edges(2 * size, &edges, false).unwrap())
    }

    #[test]
    fn test_proposal_is_normalized() {
        let g = two_cliques(5, true);
        let labels: Vec<usize> = (0..10).map(|v| v % 3).collect();
        let nested = NestedState::single_level(g, EntropyModel::DegreeCorrected, labels).unwrap();
        let ctx = LevelContext::new(&nested, 0);
        let state = nested.level(0).unwrap();
        for v in 0..10 {
            let nbr = sorted_neighbors(state, v);
            let birth = can_birth(state, v, &SweepOptions::default());
            let mut total = 0.0;
            for s in 0..state.num_slots() {
                total += proposal_prob(state, &ctx, v, s, &nbr, 0.7, birth);
            }
            total += proposal_prob(state, &ctx, v, state.num_slots(), &nbr, 0.7, birth);
            assert!((total - 1.0).abs() < 1e-9, "v = {}: total = {}", v, total);
        }
    }

    #[test]
    fn test_greedy_sweeps_never_increase_entropy() {
        let g = two_cliques(6, true);
        let labels: Vec<usize> = (0..12).map(|v| v % 4).collect();
        let mut nested = NestedState::from_partitions(
            g,
            EntropyModel::DegreeCorrected,
            &[labels, vec![0, 0, 0, 0]],
        )
        .unwrap();
        let opts = SweepOptions {
            beta: f64::INFINITY,
            ..SweepOptions::default()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let mut prev = nested.entropy();
        for i in 0..20 {
            sweep_nested(&mut nested, &opts, i, &mut rng).unwrap();
            let s = nested.entropy();
            assert!(s <= prev + 1e-8, "sweep {}: {} > {}", i, s, prev);
            prev = s;
            let blocks = nested.levels_blocks();
            assert!(blocks[1] <= blocks[0]);
        }
    }

    #[test]
    fn test_equilibrate_splits_two_cliques() {
        let g = two_cliques(10, false);
        let labels: Vec<usize> = (0..20).map(|v| v % 4).collect();
        let mut nested =
            NestedState::single_level(g, EntropyModel::DegreeCorrected, labels).unwrap();
        let opts = EquilibrationOptions {
            wait: 20,
            nbreaks: 3,
            ..EquilibrationOptions::default()
        };
        let mut sampler = McmcSampler::new(opts, 1);
        let report = sampler.equilibrate(&mut nested, SweepScope::Level(0)).unwrap();
        assert!(report.status.is_terminal());
        assert!(report.best_entropy <= report.initial_entropy);
        assert_eq!(nested.levels_blocks(), vec![2]);
        let labels = nested.project_partition(0).unwrap();
        assert!((0..10).all(|v| labels[v] == labels[0]));
        assert!((10..20).all(|v| labels[v] == labels[10]));
    }

    #[test]
    fn test_finished_sampler_refuses_work() {
        let g = two_cliques(4, true);
        let mut nested =
            NestedState::single_level(g, EntropyModel::Plain, vec![0; 8]).unwrap();
        let opts = EquilibrationOptions {
            max_sweeps: 3,
            wait: 100,
            ..EquilibrationOptions::default()
        };
        let mut sampler = McmcSampler::new(opts, 5);
        assert_eq!(sampler.status(), SamplerStatus::Uninitialized);
        let report = sampler.equilibrate(&mut nested, SweepScope::Nested).unwrap();
        assert_eq!(report.status, SamplerStatus::MaxIterationsReached);
        assert_eq!(report.sweeps, 3);
        assert!(matches!(
            sampler.equilibrate(&mut nested, SweepScope::Nested),
            Err(NsbmError::SamplerFinished(SamplerStatus::MaxIterationsReached))
        ));
    }

    #[test]
    fn test_level_out_of_range() {
        let g = two_cliques(3, true);
        let mut nested = NestedState::single_level(g, EntropyModel::Plain, vec![0; 6]).unwrap();
        let mut sampler = McmcSampler::new(EquilibrationOptions::default(), 0);
        assert!(matches!(
            sampler.equilibrate(&mut nested, SweepScope::Level(1)),
            Err(NsbmError::LevelOutOfRange { requested: 1, depth: 1 })
        ));
    }

    #[test]
    fn test_merge_split_keeps_parents_consistent() {
        let g = two_cliques(8, true);
        let labels: Vec<usize> = (0..16).map(|v| v % 6).collect();
        let mut nested = NestedState::from_partitions(
            g,
            EntropyModel::DegreeCorrected,
            &[labels, vec![0, 0, 0, 1, 1, 1], vec![0, 0]],
        )
        .unwrap();
        let opts = SweepOptions {
            merge_split_interval: 1,
            ..SweepOptions::default()
        };
        let mut rng = SmallRng::seed_from_u64(11);
        for i in 0..40 {
            sweep_nested(&mut nested, &opts, i, &mut rng).unwrap();
            let blocks = nested.levels_blocks();
            assert!(blocks.windows(2).all(|w| w[1] <= w[0]), "{:?}", blocks);
            assert!(nested.entropy().is_finite());
        }
    }

    #[test]
    fn test_block_cap() {
        let g = two_cliques(5, true);
        let mut nested =
            NestedState::single_level(g, EntropyModel::DegreeCorrected, vec![0; 10]).unwrap();
        let opts = SweepOptions {
            max_blocks: Some(1),
            ..SweepOptions::default()
        };
        let mut rng = SmallRng::seed_from_u64(0);
        for i in 0..10 {
            sweep_nested(&mut nested, &opts, i, &mut rng).unwrap();
            assert_eq!(nested.levels_blocks(), vec![1]);
        }
    }
}
