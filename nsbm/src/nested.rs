//! Stack of block states. Level 0 partitions the input graph; level `l + 1`
//! partitions the blocks of level `l`, whose graph is the block matrix of
//! level `l`.

use crate::block_state::BlockState;
use crate::error::{invalid, NsbmError, Result};
use crate::graph::Graph;
use crate::metrics::renumber;
use crate::model::{clamp_entropy, EntropyModel};
use std::sync::Arc;

/// Nested block state
#[derive(Debug, Clone)]
pub struct NestedState {
    graph: Arc<Graph>,
    base_model: EntropyModel,
    levels: Vec<BlockState>,
}

impl NestedState {
    /// Build the hierarchy from per-level partitions.
    ///
    /// `partitions[0]` labels the input vertices; `partitions[l + 1]` labels
    /// the blocks of level `l` (indexed by the raw labels of
    /// `partitions[l]`). Every level is relabelled densely in order of first
    /// appearance, so equal hierarchies always yield identical states.
    pub fn from_partitions(
        graph: Arc<Graph>,
        base_model: EntropyModel,
        partitions: &[Vec<usize>],
    ) -> Result<Self> {
        if partitions.is_empty() {
            return invalid("a nested state needs at least one level");
        }

        let depth = partitions.len();
        let mut levels = Vec::with_capacity(depth);
        let mut level_graph = graph.clone();
        let mut dense_of_raw: Option<Vec<usize>> = None;

        for (l, raw) in partitions.iter().enumerate() {
            let labels: Vec<usize> = match &dense_of_raw {
                None => raw.clone(),
                Some(raw_of_dense) => raw_of_dense
                    .iter()
                    .map(|&old| {
                        raw.get(old).copied().ok_or_else(|| {
                            NsbmError::InvalidInput(format!(
                                "level {} partition has {} entries but block {} exists below",
                                l,
                                raw.len(),
                                old
                            ))
                        })
                    })
                    .collect::<Result<_>>()?,
            };
            if labels.len() != level_graph.num_vertices() {
                return invalid(format!(
                    "level {} partition has {} entries for {} vertices",
                    l,
                    labels.len(),
                    level_graph.num_vertices()
                ));
            }

            let (dense, raw_of_dense) = renumber(&labels);
            let model = if l == 0 {
                base_model.clone()
            } else {
                EntropyModel::Nested
            };
            let num_blocks = raw_of_dense.len();
            let state = BlockState::new(level_graph.clone(), dense.clone(), model, l + 1 == depth)?;

            if l + 1 < depth {
                level_graph = Arc::new(level_graph.coarsen(&dense, num_blocks)?);
            }
            dense_of_raw = Some(raw_of_dense);
            levels.push(state);
        }

        Ok(NestedState {
            graph,
            base_model,
            levels,
        })
    }

    /// Single level with the given level-0 labels
    pub fn single_level(graph: Arc<Graph>, base_model: EntropyModel, labels: Vec<usize>) -> Result<Self> {
        Self::from_partitions(graph, base_model, &[labels])
    }

    /// Rebuild every level from the current memberships (dropping empty
    /// slots and relabelling densely)
    pub fn canonicalize(&mut self) -> Result<()> {
        let partitions = self.partitions();
        *self = Self::from_partitions(self.graph.clone(), self.base_model.clone(), &partitions)?;
        Ok(())
    }

    /// Input graph
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Level-0 entropy model
    pub fn base_model(&self) -> &EntropyModel {
        &self.base_model
    }

    /// Number of levels
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Number of input vertices
    pub fn num_vertices(&self) -> usize {
        self.graph.num_vertices()
    }

    /// Block state of level `l`
    pub fn level(&self, l: usize) -> Option<&BlockState> {
        self.levels.get(l)
    }

    /// All levels, bottom first
    pub fn levels(&self) -> &[BlockState] {
        &self.levels
    }

    pub(crate) fn top(&self) -> &BlockState {
        &self.levels[self.levels.len() - 1]
    }

    /// Level `l` and, if present, the level above it
    pub(crate) fn level_pair_mut(&mut self, l: usize) -> (&mut BlockState, Option<&mut BlockState>) {
        let (lower, upper) = self.levels.split_at_mut(l + 1);
        (&mut lower[l], upper.first_mut())
    }

    /// Raw memberships per level
    pub fn partitions(&self) -> Vec<Vec<usize>> {
        self.levels.iter().map(|s| s.membership().to_vec()).collect()
    }

    /// Occupied blocks per level
    pub fn levels_blocks(&self) -> Vec<usize> {
        self.levels.iter().map(|s| s.num_nonempty()).collect()
    }

    /// Entropy of each level
    pub fn level_entropies(&self) -> Vec<f64> {
        self.levels.iter().map(|s| s.entropy()).collect()
    }

    /// Total description length of the hierarchy
    pub fn entropy(&self) -> f64 {
        clamp_entropy(self.levels.iter().map(|s| s.entropy()).sum())
    }

    /// Block of every input vertex at level `l`, following memberships
    /// upward.
    pub fn project_partition(&self, l: usize) -> Result<Vec<usize>> {
        if l >= self.depth() {
            return Err(NsbmError::LevelOutOfRange {
                requested: l,
                depth: self.depth(),
            });
        }
        let mut labels: Vec<usize> = self.levels[0].membership().to_vec();
        for state in &self.levels[1..=l] {
            let up = state.membership();
            for x in labels.iter_mut() {
                *x = up[*x];
            }
        }
        Ok(labels)
    }

    /// Projected labels of every level
    pub fn projected_partitions(&self) -> Vec<Vec<usize>> {
        (0..self.depth())
            .filter_map(|l| self.project_partition(l).ok())
            .collect()
    }

    /// Keep the lowest `depth` levels and make the last one the top
    pub fn truncate(&mut self, depth: usize) -> Result<()> {
        let mut partitions = self.partitions();
        partitions.truncate(depth.max(1));
        *self = Self::from_partitions(self.graph.clone(), self.base_model.clone(), &partitions)?;
        Ok(())
    }

    /// Add a level on top with the given labels over the current top blocks
    pub fn push_level(&mut self, labels: Vec<usize>) -> Result<()> {
        let mut partitions = self.partitions();
        partitions.push(labels);
        *self = Self::from_partitions(self.graph.clone(), self.base_model.clone(), &partitions)?;
        Ok(())
    }

    /// Replace the top level's partition
    pub fn replace_top(&mut self, labels: Vec<usize>) -> Result<()> {
        let mut partitions = self.partitions();
        let last = partitions.len() - 1;
        partitions[last] = labels;
        *self = Self::from_partitions(self.graph.clone(), self.base_model.clone(), &partitions)?;
        Ok(())
    }

    /// Graph whose vertices are the top level's blocks
    pub fn top_block_graph(&self) -> Result<Graph> {
        let top = self.top();
        top.graph().coarsen(top.membership(), top.num_slots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn two_triangles() -> Arc<Graph> {
        let edges = vec![
            (0, 1, 1.0),
            (1, 2, 1.0),
            (0, 2, 1.0),
            (3, 4, 1.0),
            (4, 5, 1.0),
            (3, 5, 1.0),
            (2, 3, 1.0),
        ];
        Arc::new(Graph::from_edges(6, &edges, false).unwrap())
    }

    #[test]
    fn test_from_partitions_relabels_densely() {
        let g = two_triangles();
        let parts = vec![vec![7, 7, 7, 2, 2, 2], vec![0, 0, 5, 0, 0, 0, 0, 1]];
        let nested = NestedState::from_partitions(g, EntropyModel::DegreeCorrected, &parts).unwrap();
        assert_eq!(nested.depth(), 2);
        assert_eq!(nested.level(0).unwrap().membership(), &[0, 0, 0, 1, 1, 1]);
        // raw block 7 -> label 1, raw block 2 -> label 5
        assert_eq!(nested.level(1).unwrap().membership(), &[0, 1]);
        assert_eq!(nested.levels_blocks(), vec![2, 2]);
        assert_eq!(nested.project_partition(1).unwrap(), vec![0, 0, 0, 1, 1, 1]);
        assert!(matches!(
            nested.project_partition(2),
            Err(NsbmError::LevelOutOfRange { requested: 2, depth: 2 })
        ));
        assert!(nested.level(1).unwrap().is_top());
        assert!(!nested.level(0).unwrap().is_top());
    }

    #[test]
    fn test_upper_graph_is_block_matrix() {
        let g = two_triangles();
        let nested = NestedState::from_partitions(
            g,
            EntropyModel::DegreeCorrected,
            &[vec![0, 0, 0, 1, 1, 1], vec![0, 0]],
        )
        .unwrap();
        let upper = nested.level(1).unwrap();
        assert_eq!(upper.graph().num_vertices(), 2);
        assert_abs_diff_eq!(upper.graph().self_loop(0), 3.0);
        assert_abs_diff_eq!(upper.graph().total_weight(), 7.0);
        assert_abs_diff_eq!(upper.edge_count(0, 0), 14.0);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let g = two_triangles();
        let mut nested = NestedState::from_partitions(
            g,
            EntropyModel::Plain,
            &[vec![0, 0, 0, 1, 1, 1], vec![0, 0]],
        )
        .unwrap();
        let before = nested.entropy();
        nested.canonicalize().unwrap();
        assert_abs_diff_eq!(nested.entropy(), before, epsilon = 1e-10);
        assert_eq!(
            nested.level_entropies().iter().sum::<f64>(),
            nested.entropy()
        );
    }

    #[test]
    fn test_bad_partitions() {
        let g = two_triangles();
        assert!(NestedState::from_partitions(g.clone(), EntropyModel::Plain, &[]).is_err());
        assert!(NestedState::single_level(g.clone(), EntropyModel::Plain, vec![0; 5]).is_err());
        assert!(NestedState::from_partitions(
            g,
            EntropyModel::Plain,
            &[vec![0, 0, 0, 3, 3, 3], vec![0, 0]]
        )
        .is_err());
    }

    #[test]
    fn test_push_and_truncate() {
        let g = two_triangles();
        let mut nested =
            NestedState::single_level(g, EntropyModel::DegreeCorrected, vec![0, 0, 0, 1, 1, 1])
                .unwrap();
        nested.push_level(vec![0, 0]).unwrap();
        assert_eq!(nested.levels_blocks(), vec![2, 1]);
        nested.truncate(1).unwrap();
        assert_eq!(nested.depth(), 1);
        assert!(nested.level(0).unwrap().is_top());
    }
}
