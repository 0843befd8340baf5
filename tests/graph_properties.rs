use ndarray::{Array2, ArrayView1};
use proptest::prelude::*;

use deepred::deepred::{merge, SubTreeTable};
use deepred::{NodeId, RuleGraph, RuleNode, ThresholdKey};

const N_FEATURES: usize = 2;
const THRESHOLDS: [f64; 3] = [0.25, 0.5, 0.75];

/// Raw material of one arena slot: (is_leaf, feature, threshold index, true pick, false pick, class).
type Slot = (bool, usize, usize, u8, u8, usize);

/// Turns slots into a DAG whose children always have a larger index. A pick that is a
/// multiple of 5 means an absent branch when `allow_absent` is set.
fn assemble(slots: &[Slot], allow_absent: bool, input_size: usize) -> RuleGraph {
    let n = slots.len();
    let child = |id: usize, pick: u8| -> Option<NodeId> {
        if allow_absent && pick % 5 == 0 {
            None
        } else {
            Some(id + 1 + pick as usize % (n - id - 1))
        }
    };
    let nodes = slots
        .iter()
        .enumerate()
        .map(|(id, &(is_leaf, feature, threshold, t, f, class))| {
            if is_leaf || id == n - 1 {
                RuleNode::leaf(vec![class])
            } else {
                RuleNode::split(feature, THRESHOLDS[threshold], child(id, t), child(id, f))
            }
        })
        .collect();
    RuleGraph::from_parts(nodes, 0, "generated", input_size).unwrap()
}

fn arb_graph(max_nodes: usize, n_classes: usize, allow_absent: bool) -> impl Strategy<Value = RuleGraph> {
    prop::collection::vec(
        (prop::bool::weighted(0.3), 0..N_FEATURES, 0..THRESHOLDS.len(), any::<u8>(), any::<u8>(), 0..n_classes),
        1..max_nodes,
    )
    .prop_map(move |slots| assemble(&slots, allow_absent, N_FEATURES))
}

fn arb_samples() -> impl Strategy<Value = Array2<f64>> {
    prop::collection::vec(0.0f64..1.0, N_FEATURES..(N_FEATURES * 40))
        .prop_map(|mut values| {
            values.truncate(values.len() / N_FEATURES * N_FEATURES);
            let rows = values.len() / N_FEATURES;
            Array2::from_shape_vec((rows, N_FEATURES), values).unwrap()
        })
}

/// Every threshold the generator can produce, in key order.
fn all_keys() -> Vec<ThresholdKey> {
    let mut keys: Vec<ThresholdKey> = (0..N_FEATURES)
        .flat_map(|feature| THRESHOLDS.iter().map(move |&threshold| ThresholdKey::new(feature, threshold)))
        .collect();
    keys.sort();
    keys
}

/// Walks `graph`, deciding every split by the sub-graph of its threshold.
fn walk_with_subgraphs<'a>(graph: &'a RuleGraph, table: &SubTreeTable, row: ArrayView1<'_, f64>) -> &'a [usize] {
    let mut current = Some(graph.root());
    while let Some(id) = current {
        match graph.node(id) {
            RuleNode::Leaf { classes } => return classes,
            RuleNode::Split { feature, threshold, true_branch, false_branch } => {
                current = match table[&ThresholdKey::new(*feature, *threshold)].evaluate_row(row) {
                    [1] => *true_branch,
                    [0] => *false_branch,
                    _ => return &[],
                };
            }
        }
    }
    &[]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_batched_evaluation_matches_per_sample(graph in arb_graph(24, 3, true), x in arb_samples()) {
        let nodes = graph.all_nodes();
        let preds = graph.predecessor_map(&nodes);
        prop_assert_eq!(graph.evaluate_batched(x.view(), &nodes, &preds).unwrap(), graph.evaluate(x.view()));
    }

    #[test]
    fn prop_pruning_preserves_evaluation(graph in arb_graph(24, 3, true), x in arb_samples()) {
        let mut pruned = graph.clone();
        let mut preds = pruned.predecessor_map(&pruned.all_nodes());
        pruned.prune_unreachable(&mut preds).unwrap();

        preds.check(&pruned).unwrap();
        prop_assert!(pruned.node_count() <= graph.node_count());
        prop_assert_eq!(pruned.evaluate(x.view()), graph.evaluate(x.view()));
    }

    #[test]
    fn prop_redundancy_elimination_preserves_evaluation(graph in arb_graph(24, 3, true), x in arb_samples()) {
        let mut shared = graph.clone();
        let removed = shared.canonicalize_redundancy();

        prop_assert_eq!(shared.node_count() + removed, graph.node_count());
        prop_assert_eq!(shared.evaluate(x.view()), graph.evaluate(x.view()));
        prop_assert_eq!(shared.canonicalize_redundancy(), 0);
    }

    #[test]
    fn prop_merge_follows_subgraph_decisions(
        graph in arb_graph(16, 3, false),
        subgraphs in prop::collection::vec(arb_graph(8, 2, true), N_FEATURES * THRESHOLDS.len()),
        x in arb_samples(),
    ) {
        let table: SubTreeTable = all_keys().into_iter().zip(subgraphs).collect();
        let mut merged = graph.clone();
        let nodes = merged.all_nodes();
        let mut preds = merged.predecessor_map(&nodes);
        merge(&mut merged, &nodes, &mut preds, &table).unwrap();

        preds.check(&merged).unwrap();
        for row in x.rows() {
            prop_assert_eq!(merged.evaluate_row(row), walk_with_subgraphs(&graph, &table, row));
        }
    }

    #[test]
    fn prop_merge_does_not_depend_on_target_order(
        graph in arb_graph(16, 3, false),
        subgraphs in prop::collection::vec(arb_graph(8, 2, true), N_FEATURES * THRESHOLDS.len()),
    ) {
        let table: SubTreeTable = all_keys().into_iter().zip(subgraphs).collect();
        let nodes = graph.all_nodes();
        let reversed: Vec<NodeId> = nodes.iter().rev().copied().collect();

        let mut forward = graph.clone();
        let mut preds = forward.predecessor_map(&nodes);
        merge(&mut forward, &nodes, &mut preds, &table).unwrap();
        let mut backward = graph.clone();
        let mut preds = backward.predecessor_map(&nodes);
        merge(&mut backward, &reversed, &mut preds, &table).unwrap();

        forward.compact();
        backward.compact();
        prop_assert_eq!(forward.nodes(), backward.nodes());
    }
}
