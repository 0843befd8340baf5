//! Conversion of fitted decision trees into rule graphs.

use crate::error::{DeepRedError, Result};
use crate::graph::{NodeId, RuleGraph, RuleNode};
use crate::learner::{FittedNode, FittedTree};
use crate::utils::argmax_counts;

/// Controls how much of a fitted tree survives the conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertOptions {
    /// Keep only the strongest class on every leaf.
    pub one_class_per_leaf: bool,
    /// Children reached by fewer samples become absent branches.
    pub min_rule_samples: usize,
    /// Splits whose smaller child holds less than this fraction of the node's samples are
    /// collapsed into a leaf.
    pub min_split_fraction: f64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions { one_class_per_leaf: true, min_rule_samples: 1, min_split_fraction: 0.0 }
    }
}

/// Converts `tree` into a rule graph over `tree.n_features()` inputs.
///
/// The fitted `x <= t` child becomes the false branch of `x > t`. Node ids follow the
/// graph's preorder, true branch first.
pub fn to_rule_graph(tree: &FittedTree, options: &ConvertOptions, tag: impl Into<String>) -> Result<RuleGraph> {
    if tree.is_empty() {
        return Err(DeepRedError::InvalidInput("fitted tree has no nodes".to_string()));
    }
    let mut nodes = Vec::with_capacity(tree.len());
    convert_node(tree, FittedTree::ROOT, options, &mut nodes);
    RuleGraph::from_parts(nodes, 0, tag, tree.n_features())
}

fn convert_node(tree: &FittedTree, id: usize, options: &ConvertOptions, nodes: &mut Vec<RuleNode>) -> NodeId {
    let node = tree.node(id);
    let slot = nodes.len();
    nodes.push(RuleNode::leaf(leaf_classes(node.counts(), options.one_class_per_leaf)));

    let FittedNode::Split { feature, threshold, left, right, .. } = node else {
        return slot;
    };
    let n_total = node.n_samples();
    let n_left = tree.node(*left).n_samples();
    let n_right = tree.node(*right).n_samples();
    if (n_left.min(n_right) as f64) < options.min_split_fraction * n_total as f64 {
        return slot;
    }

    let keep_right = n_right >= options.min_rule_samples;
    let keep_left = n_left >= options.min_rule_samples;
    if !keep_right && !keep_left {
        return slot;
    }
    let true_branch = keep_right.then(|| convert_node(tree, *right, options, nodes));
    let false_branch = keep_left.then(|| convert_node(tree, *left, options, nodes));
    nodes[slot] = RuleNode::split(*feature, *threshold, true_branch, false_branch);
    slot
}

/// Classes with non-zero support, strongest first (ties to the lower index).
pub fn leaf_classes(counts: &[usize], one_class: bool) -> Vec<usize> {
    let mut classes: Vec<usize> = (0..counts.len()).filter(|&c| counts[c] > 0).collect();
    classes.sort_by(|&a, &b| counts[b].cmp(&counts[a]));
    if classes.is_empty() {
        classes.push(argmax_counts(counts));
    }
    if one_class {
        classes.truncate(1);
    }
    classes
}

/// Decision list over `n_classes` output units: `x_c > 0.5` leads to `{c}` for every class
/// but the last, which is the final else-leaf.
pub fn decision_list(n_classes: usize, tag: impl Into<String>) -> Result<RuleGraph> {
    if n_classes == 0 {
        return Err(DeepRedError::InvalidInput("output layer has no units".to_string()));
    }
    let mut nodes = Vec::with_capacity(2 * n_classes - 1);
    for class in 0..n_classes - 1 {
        let split = nodes.len();
        nodes.push(RuleNode::split(class, 0.5, Some(split + 1), Some(split + 2)));
        nodes.push(RuleNode::leaf(vec![class]));
    }
    nodes.push(RuleNode::leaf(vec![n_classes - 1]));
    RuleGraph::from_parts(nodes, 0, tag, n_classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// `x_0 <= 0.5` holds 3 samples of class 0, the other side 2 samples of class 1.
    fn stump() -> FittedTree {
        FittedTree::from_nodes(
            vec![
                FittedNode::Split { feature: 0, threshold: 0.5, left: 1, right: 2, counts: vec![3, 2] },
                FittedNode::Leaf { counts: vec![3, 0] },
                FittedNode::Leaf { counts: vec![0, 2] },
            ],
            1,
            2,
        )
    }

    #[test]
    fn test_left_child_becomes_false_branch() {
        let graph = to_rule_graph(&stump(), &ConvertOptions::default(), "t").unwrap();
        assert_eq!(
            graph.nodes(),
            &[RuleNode::split(0, 0.5, Some(1), Some(2)), RuleNode::leaf(vec![1]), RuleNode::leaf(vec![0])]
        );
        assert_eq!(graph.input_size, 1);
        let x = array![[0.2], [0.9]];
        assert_eq!(graph.predict(x.view()), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_min_split_fraction_collapses_unbalanced_splits() {
        let options = ConvertOptions { min_split_fraction: 0.5, ..ConvertOptions::default() };
        let graph = to_rule_graph(&stump(), &options, "t").unwrap();
        assert_eq!(graph.nodes(), &[RuleNode::leaf(vec![0])]);

        let options = ConvertOptions { one_class_per_leaf: false, ..options };
        let graph = to_rule_graph(&stump(), &options, "t").unwrap();
        assert_eq!(graph.nodes(), &[RuleNode::leaf(vec![0, 1])]);
    }

    #[test]
    fn test_min_rule_samples_drops_small_children() {
        let options = ConvertOptions { min_rule_samples: 3, ..ConvertOptions::default() };
        let graph = to_rule_graph(&stump(), &options, "t").unwrap();
        assert_eq!(graph.nodes(), &[RuleNode::split(0, 0.5, None, Some(1)), RuleNode::leaf(vec![0])]);

        let options = ConvertOptions { min_rule_samples: 4, ..ConvertOptions::default() };
        let graph = to_rule_graph(&stump(), &options, "t").unwrap();
        assert_eq!(graph.nodes(), &[RuleNode::leaf(vec![0])]);
    }

    #[test]
    fn test_leaf_classes_order_by_support() {
        assert_eq!(leaf_classes(&[1, 3, 3, 0], false), vec![1, 2, 0]);
        assert_eq!(leaf_classes(&[1, 3, 3, 0], true), vec![1]);
        assert_eq!(leaf_classes(&[0, 0], false), vec![0]);
    }

    #[test]
    fn test_decision_list_enumerates_classes() {
        let graph = decision_list(3, "fallback").unwrap();
        assert_eq!(graph.node_count(), 5);
        let y = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.4, 0.3, 0.3]];
        assert_eq!(graph.predict(y.view()), vec![Some(0), Some(1), Some(2), Some(2)]);

        assert_eq!(decision_list(1, "fallback").unwrap().nodes(), &[RuleNode::leaf(vec![0])]);
        assert!(decision_list(0, "fallback").is_err());
    }

    #[test]
    fn test_decision_list_depth_is_minimal() {
        // Rows with no unit above 0.5 must pass a failing test of every unit but the
        // last class before any leaf can be chosen, so k - 1 levels are a lower bound.
        let k = 5;
        let graph = decision_list(k, "fallback").unwrap();
        assert_eq!(graph.depth(), k - 1);
        let one_hot = ndarray::Array2::from_shape_fn((k, k), |(row, unit)| if row == unit { 1.0 } else { 0.0 });
        let expected: Vec<Option<usize>> = (0..k).map(Some).collect();
        assert_eq!(graph.predict(one_hot.view()), expected);
        assert_eq!(graph.predict(ndarray::Array2::<f64>::zeros((1, k)).view()), vec![Some(k - 1)]);
    }
}
