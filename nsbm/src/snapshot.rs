//! Serializable snapshot of an equilibrated hierarchy.
//!
//! A snapshot stores the partitions of every level, the level-0 model and
//! a fingerprint of the graph it was fit on. Restoring it onto the same
//! graph reproduces the nested state exactly, so sampling can resume (or
//! labels be recomputed) without another equilibration.

use crate::error::{NsbmError, Result};
use crate::graph::Graph;
use crate::model::{EntropyModel, ModelVariant};
use crate::nested::NestedState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Relative tolerance on the total edge weight of the fingerprint
const WEIGHT_TOL: f64 = 1e-9;

/// Graph fingerprint checked on restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFingerprint {
    /// number of vertices
    pub num_vertices: usize,
    /// number of stored edges
    pub num_edges: usize,
    /// directedness
    pub directed: bool,
    /// sum of edge weights
    pub total_weight: f64,
}

impl GraphFingerprint {
    /// Fingerprint of `graph`
    pub fn of(graph: &Graph) -> Self {
        GraphFingerprint {
            num_vertices: graph.num_vertices(),
            num_edges: graph.num_edges(),
            directed: graph.is_directed(),
            total_weight: graph.total_weight(),
        }
    }

    fn check(&self, other: &GraphFingerprint) -> Result<()> {
        let tol = WEIGHT_TOL * self.total_weight.abs().max(1.0);
        if self.num_vertices != other.num_vertices
            || self.num_edges != other.num_edges
            || self.directed != other.directed
            || (self.total_weight - other.total_weight).abs() > tol
        {
            return Err(NsbmError::Snapshot(format!(
                "snapshot was taken on {:?}, graph is {:?}",
                self, other
            )));
        }
        Ok(())
    }
}

/// Serializable nested state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSnapshot {
    /// Dense labels per level; level `l + 1` labels the blocks of level `l`
    pub partitions: Vec<Vec<usize>>,
    /// Level-0 model variant
    pub model: ModelVariant,
    /// Reference partition of the planted model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Vec<usize>>,
    /// Weight of the planted prior
    #[serde(default = "default_strength")]
    pub planted_strength: f64,
    /// Graph the partitions belong to
    pub graph: GraphFingerprint,
    /// Total entropy at the time of the snapshot
    pub entropy: f64,
}

fn default_strength() -> f64 {
    1.0
}

impl NestedSnapshot {
    /// Capture `nested`
    pub fn from_nested(nested: &NestedState) -> Self {
        let (model, reference, planted_strength) = match nested.base_model() {
            EntropyModel::Plain => (ModelVariant::Plain, None, 1.0),
            EntropyModel::DegreeCorrected | EntropyModel::Nested => {
                (ModelVariant::DegreeCorrected, None, 1.0)
            }
            EntropyModel::Planted {
                reference,
                strength,
            } => (ModelVariant::Planted, Some(reference.as_ref().clone()), *strength),
        };
        NestedSnapshot {
            partitions: nested.partitions(),
            model,
            reference,
            planted_strength,
            graph: GraphFingerprint::of(nested.graph()),
            entropy: nested.entropy(),
        }
    }

    /// Number of levels stored
    pub fn depth(&self) -> usize {
        self.partitions.len()
    }

    /// Rebuild the nested state on `graph`
    pub fn restore(&self, graph: Arc<Graph>) -> Result<NestedState> {
        self.graph.check(&GraphFingerprint::of(&graph))?;
        if let Some(reference) = &self.reference {
            if reference.len() != graph.num_vertices() {
                return Err(NsbmError::Snapshot(format!(
                    "reference partition has {} entries for {} vertices",
                    reference.len(),
                    graph.num_vertices()
                )));
            }
        }
        let base = EntropyModel::level_zero(
            self.model,
            self.reference.clone().map(Arc::new),
            self.planted_strength,
        )
        .ok_or_else(|| NsbmError::Snapshot("planted snapshot without a reference".into()))?;

        NestedState::from_partitions(graph, base, &self.partitions).map_err(|e| match e {
            NsbmError::InvalidInput(msg) => NsbmError::Snapshot(msg),
            other => other,
        })
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
