//! Read-only weighted graph consumed by the block model.
//!
//! Parallel edges are merged by summing, undirected edges are stored once
//! as `(min, max)`, and self-loops are kept apart from the adjacency lists.
//! An undirected self-loop of weight `w` contributes `2w` to the degree.

use crate::error::{invalid, Result};
use fnv::FnvHashMap;
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A weighted edge (source, target, weight)
pub type WeightedEdge = (usize, usize, f64);

/// Which edge attribute acts as the edge count in the block model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    /// every input edge counts once (parallel edges add up)
    Unit,
    /// the (summed) edge weight
    #[default]
    Weight,
    /// the (summed) value of one covariate column
    Covariate(usize),
}

#[derive(Debug, Clone)]
struct EdgeData {
    source: usize,
    target: usize,
    weight: f64,
    multiplicity: f64,
    covariates: Vec<f64>,
}

/// Collects raw edges and validates them into a [`Graph`].
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    n: usize,
    directed: bool,
    raw: Vec<(usize, usize, f64, Vec<f64>)>,
}

impl GraphBuilder {
    /// Start a graph over `n` vertices
    pub fn new(n: usize, directed: bool) -> Self {
        GraphBuilder {
            n,
            directed,
            raw: vec![],
        }
    }

    /// Add one weighted edge
    pub fn add_edge(&mut self, source: usize, target: usize, weight: f64) -> &mut Self {
        self.raw.push((source, target, weight, vec![]));
        self
    }

    /// Add one weighted edge with extra numeric attributes
    pub fn add_edge_with_covariates(
        &mut self,
        source: usize,
        target: usize,
        weight: f64,
        covariates: &[f64],
    ) -> &mut Self {
        self.raw.push((source, target, weight, covariates.to_vec()));
        self
    }

    /// Validate, merge parallel edges and build the adjacency.
    pub fn build(self, mode: WeightMode) -> Result<Graph> {
        let n = self.n;
        let n_cov = self.raw.first().map(|e| e.3.len()).unwrap_or(0);

        let mut index: FnvHashMap<(usize, usize), usize> = FnvHashMap::default();
        let mut data: Vec<EdgeData> = vec![];

        for (u, v, w, cov) in self.raw {
            if u >= n || v >= n {
                return invalid(format!("edge ({}, {}) out of range for {} vertices", u, v, n));
            }
            if !w.is_finite() || w < 0.0 {
                return invalid(format!("edge ({}, {}) has invalid weight {}", u, v, w));
            }
            if cov.len() != n_cov {
                return invalid(format!(
                    "edge ({}, {}) has {} covariates, expected {}",
                    u,
                    v,
                    cov.len(),
                    n_cov
                ));
            }
            if cov.iter().any(|x| !x.is_finite()) {
                return invalid(format!("edge ({}, {}) has a non-finite covariate", u, v));
            }

            let key = if self.directed || u <= v {
                (u, v)
            } else {
                (v, u)
            };

            match index.get(&key) {
                Some(&e) => {
                    let x = &mut data[e];
                    x.weight += w;
                    x.multiplicity += 1.0;
                    for (a, b) in x.covariates.iter_mut().zip(cov.iter()) {
                        *a += b;
                    }
                }
                None => {
                    index.insert(key, data.len());
                    data.push(EdgeData {
                        source: key.0,
                        target: key.1,
                        weight: w,
                        multiplicity: 1.0,
                        covariates: cov,
                    });
                }
            }
        }

        if let WeightMode::Covariate(c) = mode {
            if c >= n_cov {
                return invalid(format!(
                    "covariate {} requested but edges carry {} covariates",
                    c, n_cov
                ));
            }
        }

        data.sort_by_key(|e| (e.source, e.target));
        Graph::from_edge_data(n, self.directed, data, mode)
    }
}

/// Immutable weighted graph with sorted adjacency lists.
#[derive(Debug, Clone)]
pub struct Graph {
    n: usize,
    directed: bool,
    mode: WeightMode,
    data: Vec<EdgeData>,
    edges: Vec<WeightedEdge>,
    out_adj: Vec<Vec<(usize, f64)>>,
    in_adj: Vec<Vec<(usize, f64)>>,
    self_loop: Vec<f64>,
    out_degree: Vec<f64>,
    in_degree: Vec<f64>,
    total_weight: f64,
}

impl Graph {
    /// Build from a weighted edge list using the weights as counts.
    pub fn from_edges(n: usize, edges: &[WeightedEdge], directed: bool) -> Result<Graph> {
        let mut builder = GraphBuilder::new(n, directed);
        for &(u, v, w) in edges {
            builder.add_edge(u, v, w);
        }
        builder.build(WeightMode::Weight)
    }

    /// Build from a square sparse adjacency matrix.
    ///
    /// Undirected graphs read only the upper triangle (diagonal included);
    /// directed graphs read entry `(i, j)` as an edge `i -> j`.
    pub fn from_csc(adj: &CscMatrix<f64>, directed: bool) -> Result<Graph> {
        if adj.nrows() != adj.ncols() {
            return invalid(format!(
                "adjacency must be square, got {} x {}",
                adj.nrows(),
                adj.ncols()
            ));
        }
        let mut builder = GraphBuilder::new(adj.nrows(), directed);
        for (i, j, &w) in adj.triplet_iter() {
            if (directed || i <= j) && w != 0.0 {
                builder.add_edge(i, j, w);
            }
        }
        builder.build(WeightMode::Weight)
    }

    fn from_edge_data(
        n: usize,
        directed: bool,
        data: Vec<EdgeData>,
        mode: WeightMode,
    ) -> Result<Graph> {
        let mut edges = Vec::with_capacity(data.len());
        let mut out_adj = vec![Vec::new(); n];
        let mut in_adj = vec![Vec::new(); if directed { n } else { 0 }];
        let mut self_loop = vec![0.0; n];
        let mut out_degree = vec![0.0; n];
        let mut in_degree = vec![0.0; if directed { n } else { 0 }];
        let mut total_weight = 0.0;

        for e in data.iter() {
            let w = match mode {
                WeightMode::Unit => e.multiplicity,
                WeightMode::Weight => e.weight,
                WeightMode::Covariate(c) => e.covariates[c],
            };
            if !w.is_finite() || w < 0.0 {
                return invalid(format!(
                    "edge ({}, {}) has invalid effective weight {}",
                    e.source, e.target, w
                ));
            }
            if w == 0.0 {
                continue;
            }

            let (u, v) = (e.source, e.target);
            edges.push((u, v, w));
            total_weight += w;

            if u == v {
                self_loop[u] += w;
                if directed {
                    out_degree[u] += w;
                    in_degree[u] += w;
                } else {
                    out_degree[u] += 2.0 * w;
                }
            } else if directed {
                out_adj[u].push((v, w));
                in_adj[v].push((u, w));
                out_degree[u] += w;
                in_degree[v] += w;
            } else {
                out_adj[u].push((v, w));
                out_adj[v].push((u, w));
                out_degree[u] += w;
                out_degree[v] += w;
            }
        }

        for adj in out_adj.iter_mut().chain(in_adj.iter_mut()) {
            adj.sort_unstable_by_key(|&(x, _)| x);
        }

        Ok(Graph {
            n,
            directed,
            mode,
            data,
            edges,
            out_adj,
            in_adj,
            self_loop,
            out_degree,
            in_degree,
            total_weight,
        })
    }

    /// Number of vertices
    pub fn num_vertices(&self) -> usize {
        self.n
    }

    /// Number of distinct (merged) edges with nonzero weight
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Whether edges are directed
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Which attribute supplies the edge counts
    pub fn weight_mode(&self) -> WeightMode {
        self.mode
    }

    /// Merged edges `(source, target, weight)`, sorted
    pub fn edges(&self) -> &[WeightedEdge] {
        &self.edges
    }

    /// Covariates of the merged input edge `source -> target` (summed over
    /// parallel edges)
    pub fn edge_covariates(&self, source: usize, target: usize) -> Option<&[f64]> {
        let key = if self.directed || source <= target {
            (source, target)
        } else {
            (target, source)
        };
        self.data
            .binary_search_by_key(&key, |e| (e.source, e.target))
            .ok()
            .map(|i| self.data[i].covariates.as_slice())
    }

    /// Total edge weight `E` (each undirected edge counted once)
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Neighbors of `v` excluding `v` itself: all of them for undirected
    /// graphs, the out-neighbors for directed ones.
    pub fn out_neighbors(&self, v: usize) -> &[(usize, f64)] {
        &self.out_adj[v]
    }

    /// In-neighbors of `v` (same as [`Graph::out_neighbors`] if undirected)
    pub fn in_neighbors(&self, v: usize) -> &[(usize, f64)] {
        if self.directed {
            &self.in_adj[v]
        } else {
            &self.out_adj[v]
        }
    }

    /// Self-loop weight of `v`
    pub fn self_loop(&self, v: usize) -> f64 {
        self.self_loop[v]
    }

    /// Undirected degree, or out-degree for directed graphs
    pub fn out_degree(&self, v: usize) -> f64 {
        self.out_degree[v]
    }

    /// In-degree (undirected: same as the degree)
    pub fn in_degree(&self, v: usize) -> f64 {
        if self.directed {
            self.in_degree[v]
        } else {
            self.out_degree[v]
        }
    }

    /// Total degree (in + out for directed graphs)
    pub fn degree(&self, v: usize) -> f64 {
        if self.directed {
            self.out_degree[v] + self.in_degree[v]
        } else {
            self.out_degree[v]
        }
    }

    /// Weakly connected components by BFS, labelled `0..k` in first-seen order.
    pub fn connected_components(&self) -> Vec<usize> {
        let n = self.n;
        let mut labels = vec![usize::MAX; n];
        let mut queue = VecDeque::new();
        let mut comp = 0;

        for start in 0..n {
            if labels[start] != usize::MAX {
                continue;
            }
            labels[start] = comp;
            queue.push_back(start);
            while let Some(u) = queue.pop_front() {
                let ins: &[(usize, f64)] = if self.directed { &self.in_adj[u] } else { &[] };
                for &(x, _) in self.out_adj[u].iter().chain(ins.iter()) {
                    if labels[x] == usize::MAX {
                        labels[x] = comp;
                        queue.push_back(x);
                    }
                }
            }
            comp += 1;
        }
        labels
    }

    /// Number of weakly connected components
    pub fn num_components(&self) -> usize {
        self.connected_components()
            .iter()
            .max()
            .map(|&c| c + 1)
            .unwrap_or(0)
    }

    /// Check the assumptions of the block model before any chain starts.
    pub fn validate_for_inference(&self, require_connected: bool) -> Result<()> {
        if self.n == 0 {
            return invalid("empty graph (0 vertices)");
        }
        if self.n < 2 {
            return invalid(format!("graph needs at least two vertices, got {}", self.n));
        }
        if self.total_weight <= 0.0 {
            return invalid("graph has no edges with positive weight");
        }
        if require_connected {
            let k = self.num_components();
            if k > 1 {
                return invalid(format!("graph is disconnected ({} components)", k));
            }
        }
        Ok(())
    }

    /// Subgraph induced by `vertices`; vertex `i` of the result is `vertices[i]`.
    pub fn induced_subgraph(&self, vertices: &[usize]) -> Result<Graph> {
        let mut position = vec![usize::MAX; self.n];
        for (i, &v) in vertices.iter().enumerate() {
            if v >= self.n {
                return invalid(format!("vertex {} out of range for {} vertices", v, self.n));
            }
            if position[v] != usize::MAX {
                return invalid(format!("vertex {} listed twice", v));
            }
            position[v] = i;
        }

        let data: Vec<EdgeData> = self
            .data
            .iter()
            .filter(|e| position[e.source] != usize::MAX && position[e.target] != usize::MAX)
            .map(|e| {
                let (a, b) = (position[e.source], position[e.target]);
                let (a, b) = if self.directed || a <= b { (a, b) } else { (b, a) };
                EdgeData {
                    source: a,
                    target: b,
                    ..e.clone()
                }
            })
            .collect();

        let mut data = data;
        data.sort_by_key(|e| (e.source, e.target));
        Graph::from_edge_data(vertices.len(), self.directed, data, self.mode)
    }

    /// Quotient graph over `num_blocks` blocks: inter-block weights are
    /// summed into edges, intra-block weights into self-loops.
    pub fn coarsen(&self, labels: &[usize], num_blocks: usize) -> Result<Graph> {
        if labels.len() != self.n {
            return invalid(format!(
                "{} labels for {} vertices",
                labels.len(),
                self.n
            ));
        }
        if let Some(&b) = labels.iter().find(|&&b| b >= num_blocks) {
            return invalid(format!("label {} out of range for {} blocks", b, num_blocks));
        }

        let mut index: FnvHashMap<(usize, usize), usize> = FnvHashMap::default();
        let mut data: Vec<EdgeData> = vec![];

        for &(u, v, w) in self.edges.iter() {
            let (r, s) = (labels[u], labels[v]);
            let key = if self.directed || r <= s { (r, s) } else { (s, r) };
            match index.get(&key) {
                Some(&e) => {
                    data[e].weight += w;
                    data[e].multiplicity += w;
                }
                None => {
                    index.insert(key, data.len());
                    data.push(EdgeData {
                        source: key.0,
                        target: key.1,
                        weight: w,
                        multiplicity: w,
                        covariates: vec![],
                    });
                }
            }
        }

        data.sort_by_key(|e| (e.source, e.target));
        Graph::from_edge_data(num_blocks, self.directed, data, WeightMode::Weight)
    }

    /// Undirected view (directed edges summed in both directions)
    pub fn symmetrized(&self) -> Result<Graph> {
        if !self.directed {
            return Ok(self.clone());
        }
        let labels: Vec<usize> = (0..self.n).collect();
        let undirected = Graph {
            directed: false,
            ..self.clone()
        };
        undirected.coarsen(&labels, self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn simple_graph() -> Graph {
        // Triangle 0-1-2 plus edge 3-4 and a weak bridge 1-3
        let edges = vec![
            (0, 1, 1.0),
            (1, 2, 1.0),
            (0, 2, 1.0),
            (3, 4, 1.0),
            (1, 3, 0.5),
        ];
        Graph::from_edges(5, &edges, false).unwrap()
    }

    #[test]
    fn test_degrees_and_merge() {
        let g = simple_graph();
        assert_eq!(g.num_vertices(), 5);
        assert_eq!(g.num_edges(), 5);
        assert_abs_diff_eq!(g.total_weight(), 4.5);
        assert_abs_diff_eq!(g.degree(1), 2.5);

        let g = Graph::from_edges(3, &[(0, 1, 1.0), (1, 0, 2.0), (2, 2, 1.0)], false).unwrap();
        assert_eq!(g.num_edges(), 2);
        assert_abs_diff_eq!(g.out_neighbors(0)[0].1, 3.0);
        // undirected self-loops count twice
        assert_abs_diff_eq!(g.degree(2), 2.0);
        assert!(g.out_neighbors(2).is_empty());
    }

    #[test]
    fn test_directed_degrees() {
        let g = Graph::from_edges(3, &[(0, 1, 1.0), (1, 0, 2.0), (1, 2, 1.0)], true).unwrap();
        assert_eq!(g.num_edges(), 3);
        assert_abs_diff_eq!(g.out_degree(1), 3.0);
        assert_abs_diff_eq!(g.in_degree(1), 1.0);
        assert_abs_diff_eq!(g.degree(1), 4.0);
        assert_eq!(g.in_neighbors(2), &[(1, 1.0)]);
    }

    #[test]
    fn test_invalid_edges() {
        assert!(Graph::from_edges(2, &[(0, 2, 1.0)], false).is_err());
        assert!(Graph::from_edges(2, &[(0, 1, -1.0)], false).is_err());
        assert!(Graph::from_edges(2, &[(0, 1, f64::NAN)], false).is_err());
    }

    #[test]
    fn test_validate_for_inference() {
        let empty = Graph::from_edges(0, &[], false).unwrap();
        assert!(empty.validate_for_inference(false).is_err());
        let single = Graph::from_edges(1, &[(0, 0, 1.0)], false).unwrap();
        assert!(single.validate_for_inference(false).is_err());
        let no_edges = Graph::from_edges(3, &[], false).unwrap();
        assert!(no_edges.validate_for_inference(false).is_err());

        let g = simple_graph();
        assert!(g.validate_for_inference(true).is_ok());
        let split = Graph::from_edges(4, &[(0, 1, 1.0), (2, 3, 1.0)], false).unwrap();
        assert!(split.validate_for_inference(false).is_ok());
        assert!(split.validate_for_inference(true).is_err());
        assert_eq!(split.connected_components(), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_weight_modes() {
        let mut builder = GraphBuilder::new(3, false);
        builder
            .add_edge_with_covariates(0, 1, 0.5, &[2.0])
            .add_edge_with_covariates(1, 0, 0.25, &[3.0])
            .add_edge_with_covariates(1, 2, 1.0, &[0.0]);

        let unit = builder.clone().build(WeightMode::Unit).unwrap();
        assert_abs_diff_eq!(unit.total_weight(), 3.0);

        let weight = builder.clone().build(WeightMode::Weight).unwrap();
        assert_abs_diff_eq!(weight.total_weight(), 1.75);

        let cov = builder.clone().build(WeightMode::Covariate(0)).unwrap();
        // the zero covariate drops edge 1-2
        assert_eq!(cov.num_edges(), 1);
        assert_abs_diff_eq!(cov.total_weight(), 5.0);
        assert_eq!(cov.edge_covariates(1, 0), Some(&[5.0][..]));

        assert!(builder.build(WeightMode::Covariate(1)).is_err());
    }

    #[test]
    fn test_coarsen_keeps_weight() {
        let g = simple_graph();
        let coarse = g.coarsen(&[0, 0, 0, 1, 1], 2).unwrap();
        assert_eq!(coarse.num_vertices(), 2);
        assert_abs_diff_eq!(coarse.total_weight(), g.total_weight());
        assert_abs_diff_eq!(coarse.self_loop(0), 3.0);
        assert_abs_diff_eq!(coarse.self_loop(1), 1.0);
        assert_abs_diff_eq!(coarse.degree(0), 6.5);
        assert_abs_diff_eq!(coarse.degree(0) + coarse.degree(1), 9.0);
    }

    #[test]
    fn test_induced_subgraph() {
        let g = simple_graph();
        let sub = g.induced_subgraph(&[3, 1, 4]).unwrap();
        assert_eq!(sub.num_vertices(), 3);
        assert_eq!(sub.num_edges(), 2);
        assert_abs_diff_eq!(sub.total_weight(), 1.5);
        assert!(g.induced_subgraph(&[1, 1]).is_err());
    }

    #[test]
    fn test_from_csc_symmetric() {
        let coo = nalgebra_sparse::CooMatrix::try_from_triplets(
            3,
            3,
            vec![0, 1, 1, 2],
            vec![1, 0, 2, 1],
            vec![1.0, 1.0, 2.0, 2.0],
        )
        .unwrap();
        let csc = CscMatrix::from(&coo);
        let g = Graph::from_csc(&csc, false).unwrap();
        assert_eq!(g.num_edges(), 2);
        assert_abs_diff_eq!(g.total_weight(), 3.0);
    }
}
