//! Splices learned sub-graphs into the rule graph in place of the splits they explain.

use serde::Serialize;
use tracing::{trace, warn};

use super::builder::SubTreeTable;
use crate::error::{DeepRedError, Result};
use crate::graph::{NodeId, PredecessorMap, RuleGraph, RuleNode};

/// Outcome counters of one [`merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub spliced: usize,
    /// Targets detached by an earlier splice of the same merge.
    pub skipped: usize,
}

/// Replaces every split of `nodes` whose key is in `table` by a fresh copy of the
/// corresponding sub-graph. The copy's `{1}` leaves lead to the split's true branch and its
/// `{0}` leaves to the false branch. `preds` must describe `graph` on entry and describes it
/// again on return.
///
/// The targets are taken from `nodes` up front, so the result does not depend on the order
/// of the table.
pub fn merge(
    graph: &mut RuleGraph,
    nodes: &[NodeId],
    preds: &mut PredecessorMap,
    table: &SubTreeTable,
) -> Result<MergeStats> {
    let targets: Vec<(NodeId, &RuleGraph)> = nodes
        .iter()
        .filter_map(|&id| graph.node(id).key().and_then(|key| table.get(&key)).map(|sub| (id, sub)))
        .collect();

    if let Some(&(detached, _)) = targets.iter().find(|&&(id, _)| !is_attached(graph, preds, id)) {
        return Err(DeepRedError::Invariant(format!(
            "merge target {} is neither the root nor referenced by any node",
            detached
        )));
    }

    let mut stats = MergeStats::default();
    for (target, sub) in targets {
        if !is_attached(graph, preds, target) {
            warn!(node = target, "skipping splice of a node detached earlier in this merge");
            stats.skipped += 1;
            continue;
        }
        splice_subgraph(graph, target, sub, preds)?;
        stats.spliced += 1;
    }
    Ok(stats)
}

fn is_attached(graph: &RuleGraph, preds: &PredecessorMap, id: NodeId) -> bool {
    id == graph.root() || preds.contains(id)
}

/// Puts a copy of `sub` in place of the split `target`.
fn splice_subgraph(graph: &mut RuleGraph, target: NodeId, sub: &RuleGraph, preds: &mut PredecessorMap) -> Result<()> {
    let RuleNode::Split { true_branch, false_branch, .. } = *graph.node(target) else {
        return Err(DeepRedError::Invariant(format!("merge target {} is a leaf", target)));
    };

    let mut region = graph.import(sub);
    graph.replace_leaves_matching(&[1], true_branch, &mut region);
    graph.replace_leaves_matching(&[0], false_branch, &mut region);
    graph.link_region(&region, preds);
    trace!(
        node = target,
        replacement = ?region.root,
        imported = region.nodes.len(),
        "splicing sub-graph"
    );
    graph.splice_node(target, region.root, preds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::shared_leaf_graph;
    use crate::graph::ThresholdKey;
    use ndarray::array;

    fn stump(feature: usize, threshold: f64) -> RuleGraph {
        let nodes = vec![
            RuleNode::split(feature, threshold, Some(1), Some(2)),
            RuleNode::leaf(vec![1]),
            RuleNode::leaf(vec![0]),
        ];
        RuleGraph::from_parts(nodes, 0, "sub", 2).unwrap()
    }

    #[test]
    fn test_merge_replaces_every_matching_split() {
        let mut graph = shared_leaf_graph();
        let nodes = graph.all_nodes();
        let mut preds = graph.predecessor_map(&nodes);
        let table = SubTreeTable::from([
            (ThresholdKey::new(0, 0.5), stump(1, 0.2)),
            (ThresholdKey::new(1, 0.5), stump(0, 0.7)),
        ]);

        let stats = merge(&mut graph, &nodes, &mut preds, &table).unwrap();
        assert_eq!(stats, MergeStats { spliced: 2, skipped: 0 });
        preds.check(&graph).unwrap();

        // The graph now reads the lower layer: h_0 = x_1 > 0.2, h_1 = x_0 > 0.7.
        let x = array![[0.0, 0.0], [0.9, 0.0], [0.0, 0.9], [0.9, 0.9]];
        assert_eq!(graph.predict(x.view()), vec![Some(0), Some(0), Some(0), Some(1)]);
        assert!(graph.thresholds(&graph.all_nodes()).iter().all(|key| table.get(key).is_none()));
    }

    #[test]
    fn test_keys_without_subtree_are_kept() {
        let mut graph = shared_leaf_graph();
        let nodes = graph.all_nodes();
        let mut preds = graph.predecessor_map(&nodes);
        let table = SubTreeTable::from([(ThresholdKey::new(1, 0.5), stump(0, 0.7))]);

        merge(&mut graph, &nodes, &mut preds, &table).unwrap();
        preds.check(&graph).unwrap();
        assert_eq!(graph.node(graph.root()).key(), Some(ThresholdKey::new(0, 0.5)));
    }

    #[test]
    fn test_detached_targets_are_skipped() {
        let mut graph = shared_leaf_graph();
        let nodes = graph.all_nodes();
        let mut preds = graph.predecessor_map(&nodes);
        // The root's condition never holds, so node 1 becomes unreachable.
        let table = SubTreeTable::from([
            (ThresholdKey::new(0, 0.5), RuleGraph::leaf(vec![0], "sub", 2).unwrap()),
            (ThresholdKey::new(1, 0.5), stump(0, 0.7)),
        ]);

        let stats = merge(&mut graph, &nodes, &mut preds, &table).unwrap();
        assert_eq!(stats, MergeStats { spliced: 1, skipped: 1 });
        assert_eq!(graph.all_nodes(), vec![2]);
        preds.check(&graph).unwrap();
    }

    #[test]
    fn test_unattached_target_is_an_invariant_violation() {
        let mut graph = shared_leaf_graph();
        let nodes = graph.all_nodes();
        let mut preds = graph.predecessor_map(&nodes);
        preds.take(1);
        let table = SubTreeTable::from([(ThresholdKey::new(1, 0.5), stump(0, 0.7))]);
        assert!(matches!(
            merge(&mut graph, &nodes, &mut preds, &table),
            Err(DeepRedError::Invariant(_))
        ));
    }
}
