//! Louvain-style greedy partition: shuffled local moving followed by
//! aggregation into super-vertices, repeated until no vertex moves.
//!
//! Both quality functions are optimized in constant Potts form,
//! `Δ = w_{i→c} - res · W_c · w_i`. Modularity sets the node weight to
//! the degree and `res = γ / 2m`; CPM uses unit node weights and `res = γ`.

use crate::error::Result;
use crate::graph::Graph;
use crate::metrics::{modularity, renumber};
use crate::options::{GreedyOptions, QualityFunction};
use log::debug;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const GAIN_TOL: f64 = 1e-12;

/// Output of [`optimize`]
#[derive(Debug, Clone)]
pub struct GreedyPartition {
    /// Community of every vertex, dense in order of first appearance
    pub labels: Vec<usize>,
    /// Number of communities
    pub num_blocks: usize,
    /// Value of the quality function
    pub quality: f64,
    /// Number of aggregation rounds performed
    pub aggregations: usize,
}

/// Node weights and resolution of the Potts form of `quality`
fn potts_form(graph: &Graph, quality: QualityFunction) -> (Vec<f64>, f64) {
    let n = graph.num_vertices();
    match quality {
        QualityFunction::Modularity { resolution } => {
            let m2 = 2.0 * graph.total_weight();
            let node_weight = (0..n).map(|v| graph.degree(v)).collect();
            (node_weight, if m2 > 0.0 { resolution / m2 } else { 0.0 })
        }
        QualityFunction::Cpm { resolution } => (vec![1.0; n], resolution),
    }
}

/// Undirected working graph of one aggregation level
#[derive(Debug, Clone)]
struct LevelGraph {
    adj: Vec<Vec<(usize, f64)>>,
    loops: Vec<f64>,
    node_weight: Vec<f64>,
}

impl LevelGraph {
    fn from_graph(graph: &Graph, node_weight: Vec<f64>) -> Self {
        let n = graph.num_vertices();
        LevelGraph {
            adj: (0..n).map(|v| graph.out_neighbors(v).to_vec()).collect(),
            loops: (0..n).map(|v| graph.self_loop(v)).collect(),
            node_weight,
        }
    }

    fn num_nodes(&self) -> usize {
        self.adj.len()
    }

    /// Collapse communities into super-nodes
    fn aggregate(&self, comm: &[usize], k: usize) -> LevelGraph {
        let mut adj_map: Vec<fnv::FnvHashMap<usize, f64>> = vec![Default::default(); k];
        let mut loops = vec![0.0; k];
        let mut node_weight = vec![0.0; k];

        for i in 0..self.num_nodes() {
            let c = comm[i];
            loops[c] += self.loops[i];
            node_weight[c] += self.node_weight[i];
            for &(j, w) in &self.adj[i] {
                let d = comm[j];
                if c == d {
                    // each internal edge is seen from both endpoints
                    loops[c] += w / 2.0;
                } else {
                    *adj_map[c].entry(d).or_insert(0.0) += w;
                }
            }
        }

        let adj = adj_map
            .into_iter()
            .map(|row| {
                let mut row: Vec<(usize, f64)> = row.into_iter().collect();
                row.sort_unstable_by_key(|&(j, _)| j);
                row
            })
            .collect();

        LevelGraph {
            adj,
            loops,
            node_weight,
        }
    }
}

/// Local moving phase; returns whether any node changed community.
fn local_moves(
    g: &LevelGraph,
    comm: &mut [usize],
    resolution: f64,
    max_iter: usize,
    rng: &mut SmallRng,
) -> bool {
    let n = g.num_nodes();
    let mut tot = vec![0.0; n];
    for i in 0..n {
        tot[comm[i]] += g.node_weight[i];
    }
    let gain = |w_to: f64, tot_c: f64, w_i: f64| w_to - resolution * tot_c * w_i;

    let mut order: Vec<usize> = (0..n).collect();
    let mut w_to = vec![0.0; n];
    let mut touched: Vec<usize> = Vec::new();
    let mut any_moved = false;

    for _ in 0..max_iter.max(1) {
        order.shuffle(rng);
        let mut moved = false;

        for &i in &order {
            let own = comm[i];
            let w_i = g.node_weight[i];

            for &(j, w) in &g.adj[i] {
                let c = comm[j];
                if w_to[c] == 0.0 {
                    touched.push(c);
                }
                w_to[c] += w;
            }

            tot[own] -= w_i;

            let mut best = own;
            let mut best_gain = gain(w_to[own], tot[own], w_i);

            touched.sort_unstable();
            for &c in &touched {
                if c == own {
                    continue;
                }
                let gc = gain(w_to[c], tot[c], w_i);
                if gc > best_gain + GAIN_TOL {
                    best = c;
                    best_gain = gc;
                }
            }

            tot[best] += w_i;
            if best != own {
                comm[i] = best;
                moved = true;
            }

            for &c in &touched {
                w_to[c] = 0.0;
            }
            touched.clear();
        }

        if !moved {
            break;
        }
        any_moved = true;
    }
    any_moved
}

fn quality_value(graph: &Graph, labels: &[usize], quality: QualityFunction) -> f64 {
    match quality {
        QualityFunction::Modularity { resolution } => modularity(graph, labels, resolution),
        QualityFunction::Cpm { resolution } => {
            let k = labels.iter().max().map(|&x| x + 1).unwrap_or(0);
            let mut internal = vec![0.0; k];
            let mut sizes = vec![0.0; k];
            for &(u, v, w) in graph.edges() {
                if labels[u] == labels[v] {
                    internal[labels[u]] += w;
                }
            }
            for &c in labels {
                sizes[c] += 1.0;
            }
            (0..k)
                .map(|c| internal[c] - resolution * sizes[c] * (sizes[c] - 1.0) / 2.0)
                .sum()
        }
    }
}

/// Greedy partition of `graph` under `opts.quality`.
///
/// Directed graphs are symmetrized first. Deterministic for a fixed seed.
pub fn optimize(graph: &Graph, opts: &GreedyOptions) -> Result<GreedyPartition> {
    let undirected = graph.symmetrized()?;
    let mut rng = SmallRng::seed_from_u64(opts.seed);

    let n = undirected.num_vertices();
    let (node_weight, resolution) = potts_form(&undirected, opts.quality);
    let mut level = LevelGraph::from_graph(&undirected, node_weight);
    let mut node_of_vertex: Vec<usize> = (0..n).collect();
    let mut aggregations = 0;

    for _ in 0..opts.max_aggregations.max(1) {
        let mut comm: Vec<usize> = (0..level.num_nodes()).collect();
        let moved = local_moves(&level, &mut comm, resolution, opts.max_local_iter, &mut rng);
        let (dense, raw_of_dense) = renumber(&comm);
        let k = raw_of_dense.len();

        for x in node_of_vertex.iter_mut() {
            *x = dense[*x];
        }

        if !moved || k == level.num_nodes() {
            break;
        }
        level = level.aggregate(&dense, k);
        aggregations += 1;
        debug!("greedy aggregation {}: {} communities", aggregations, k);
    }

    let (labels, raw_of_dense) = renumber(&node_of_vertex);
    let quality = quality_value(&undirected, &labels, opts.quality);

    Ok(GreedyPartition {
        num_blocks: raw_of_dense.len(),
        labels,
        quality,
        aggregations,
    })
}
