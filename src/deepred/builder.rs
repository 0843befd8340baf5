//! Fits one local sub-tree per threshold of the current graph.
//!
//! Each threshold `x_i > b` becomes a binary problem: predict from the activations of
//! layer `L` whether unit `i` of layer `L + 1` exceeds `b`. The fits are independent, so
//! they run on the rayon pool; each task writes only its own pre-allocated slot.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ndarray::ArrayView2;
#[cfg(not(feature = "non-parallel"))]
use rayon::prelude::*;
use tracing::debug;

use crate::convert::{to_rule_graph, ConvertOptions};
use crate::error::{DeepRedError, Result};
use crate::graph::{RuleGraph, ThresholdKey};
use crate::learner::{LearnerParams, TreeLearner};
use crate::utils::fidelity;

/// Learned replacement of every threshold of one layer iteration.
pub type SubTreeTable = BTreeMap<ThresholdKey, RuleGraph>;

/// A fitted and converted sub-tree with its measurements.
#[derive(Debug, Clone)]
pub struct SubTree {
    pub key: ThresholdKey,
    pub graph: RuleGraph,
    /// Agreement with its own training labels.
    pub accuracy: f64,
    /// Present nodes of `graph`.
    pub size: usize,
    pub duration: Duration,
}

/// Inputs shared by every sub-tree fit of one layer.
pub struct SubTreeBuilder<'a, L: TreeLearner + ?Sized> {
    pub learner: &'a L,
    /// Activations of the layer the sub-trees read (`L`).
    pub features: ArrayView2<'a, f64>,
    /// Activations of the layer the thresholds refer to (`L + 1`).
    pub targets: ArrayView2<'a, f64>,
    pub params: &'a LearnerParams,
    pub options: ConvertOptions,
    /// Index of `features` in the layer list, used for logs and error context.
    pub layer: usize,
}

impl<L: TreeLearner + ?Sized> SubTreeBuilder<'_, L> {
    /// Fits one sub-tree per key. The result is in key order.
    ///
    /// Every task runs to completion; if any of them failed, the error of the first failing
    /// key is returned and no result is.
    pub fn build_all(&self, keys: &[ThresholdKey]) -> Result<Vec<SubTree>> {
        let mut slots: Vec<Option<Result<SubTree>>> = keys.iter().map(|_| None).collect();
        let task = |(index, slot): (usize, &mut Option<Result<SubTree>>)| {
            *slot = Some(self.build(keys[index], index, keys.len()));
        };

        #[cfg(feature = "non-parallel")]
        slots.iter_mut().enumerate().for_each(task);
        #[cfg(not(feature = "non-parallel"))]
        slots.par_iter_mut().enumerate().for_each(task);

        slots
            .into_iter()
            .zip(keys)
            .map(|(slot, key)| {
                slot.unwrap_or_else(|| {
                    Err(DeepRedError::Invariant(format!("no result for sub-tree {}", key)))
                })
            })
            .collect()
    }

    /// Fits the sub-tree of a single key.
    pub fn build(&self, key: ThresholdKey, index: usize, total: usize) -> Result<SubTree> {
        let start = Instant::now();
        if key.feature >= self.targets.ncols() {
            return Err(DeepRedError::InvalidInput(format!(
                "threshold {} refers to unit {} but layer {} has {} units",
                key,
                key.feature,
                self.layer + 1,
                self.targets.ncols()
            )));
        }
        debug!(layer = self.layer, "start sub-tree for {} ({}/{})", key, index + 1, total);

        let labels: Vec<usize> = self
            .targets
            .column(key.feature)
            .iter()
            .map(|&value| usize::from(value > key.threshold))
            .collect();
        let tree = self
            .learner
            .fit(self.features, &labels, self.params)
            .map_err(|source| DeepRedError::Fit {
                context: format!("{} at layer {}", key, self.layer),
                source,
            })?;
        let graph = to_rule_graph(&tree, &self.options, format!("sub-tree {} at layer {}", key, self.layer))?;

        let accuracy = fidelity(&graph.predict(self.features), &labels);
        let size = graph.node_count();
        let duration = start.elapsed();
        debug!(
            layer = self.layer,
            accuracy,
            size,
            "end sub-tree for {} ({}/{})",
            key,
            index + 1,
            total
        );
        Ok(SubTree { key, graph, accuracy, size, duration })
    }
}

/// Moves the sub-graphs into a lookup table.
pub fn into_table(subtrees: &[SubTree]) -> SubTreeTable {
    subtrees.iter().map(|subtree| (subtree.key, subtree.graph.clone())).collect()
}
