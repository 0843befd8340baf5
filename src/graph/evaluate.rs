//! Evaluation of a rule graph on feature matrices.

use ndarray::{ArrayView1, ArrayView2};
use rustc_hash::FxHashMap;

use super::{NodeId, PredecessorMap, RuleGraph, RuleNode};
use crate::error::Result;

const NO_LABELS: &[usize] = &[];

impl RuleGraph {
    /// Follows the decision path of a single sample and returns the labels of the leaf it
    /// reaches, or an empty slice if the path ends on an absent branch.
    ///
    /// # Panics
    /// Panics if a split tests a feature index outside `row`.
    pub fn evaluate_row(&self, row: ArrayView1<'_, f64>) -> &[usize] {
        let mut current = Some(self.root());
        while let Some(id) = current {
            match self.node(id) {
                RuleNode::Leaf { classes } => return classes,
                RuleNode::Split { feature, threshold, true_branch, false_branch } => {
                    current = if row[*feature] > *threshold { *true_branch } else { *false_branch };
                }
            }
        }
        NO_LABELS
    }

    /// Label set reached by every row of `features`.
    pub fn evaluate(&self, features: ArrayView2<'_, f64>) -> Vec<&[usize]> {
        features.rows().into_iter().map(|row| self.evaluate_row(row)).collect()
    }

    /// Predicted class per row: the first label of the reached leaf.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Vec<Option<usize>> {
        self.evaluate(features)
            .into_iter()
            .map(|labels| labels.first().copied())
            .collect()
    }

    /// Same result as [`RuleGraph::evaluate`], computed by pushing sample sets through the
    /// present nodes in topological order so each node is visited once per batch.
    pub fn evaluate_batched(
        &self,
        features: ArrayView2<'_, f64>,
        nodes: &[NodeId],
        preds: &PredecessorMap,
    ) -> Result<Vec<&[usize]>> {
        let order = self.topological_order(nodes, preds)?;
        let mut labels = vec![NO_LABELS; features.nrows()];
        let mut pending: FxHashMap<NodeId, Vec<usize>> = FxHashMap::default();
        pending.insert(self.root(), (0..features.nrows()).collect());

        for id in order {
            let Some(samples) = pending.remove(&id) else {
                continue;
            };
            match self.node(id) {
                RuleNode::Leaf { classes } => {
                    for sample in samples {
                        labels[sample] = classes.as_slice();
                    }
                }
                RuleNode::Split { feature, threshold, true_branch, false_branch } => {
                    let (above, below): (Vec<usize>, Vec<usize>) = samples
                        .into_iter()
                        .partition(|&sample| features[[sample, *feature]] > *threshold);
                    for (child, routed) in [(*true_branch, above), (*false_branch, below)] {
                        if let Some(child) = child {
                            if !routed.is_empty() {
                                pending.entry(child).or_default().extend(routed);
                            }
                        }
                    }
                }
            }
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::shared_leaf_graph;
    use ndarray::array;

    #[test]
    fn test_evaluate_follows_greater_than_convention() {
        let graph = shared_leaf_graph();
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [0.5, 0.9]];
        let labels = graph.evaluate(x.view());
        assert_eq!(labels, vec![&[0][..], &[0], &[0], &[1], &[0]]);
        assert_eq!(graph.predict(x.view()), vec![Some(0), Some(0), Some(0), Some(1), Some(0)]);
    }

    #[test]
    fn test_absent_branch_yields_no_label() {
        let nodes = vec![RuleNode::split(0, 0.0, Some(1), None), RuleNode::leaf(vec![2, 0])];
        let graph = RuleGraph::from_parts(nodes, 0, "test", 1).unwrap();
        let x = array![[1.0], [-1.0]];
        assert_eq!(graph.evaluate(x.view()), vec![&[2, 0][..], &[]]);
        assert_eq!(graph.predict(x.view()), vec![Some(2), None]);
    }

    #[test]
    fn test_batched_matches_per_sample() {
        let graph = shared_leaf_graph();
        let nodes = graph.all_nodes();
        let preds = graph.predecessor_map(&nodes);
        let x = array![[0.0, 0.0], [0.7, 0.2], [0.9, 0.8], [0.2, 0.9]];
        assert_eq!(
            graph.evaluate_batched(x.view(), &nodes, &preds).unwrap(),
            graph.evaluate(x.view())
        );
    }
}
