//! Reverse-edge index of a rule graph, needed for in-place rewrites.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use super::{Branch, NodeId, RuleGraph};
use crate::error::{DeepRedError, Result};

/// A `(parent, branch)` pair: `parent`'s `branch` edge points at the keyed node.
pub type PredEntry = (NodeId, Branch);

/// Maps every present non-root node to the set of edges pointing at it.
///
/// Invariant (checked by [`PredecessorMap::check`]): every present non-root node has a
/// non-empty entry set, every entry names a present parent, and the root has no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredecessorMap {
    entries: FxHashMap<NodeId, BTreeSet<PredEntry>>,
}

impl PredecessorMap {
    pub fn get(&self, id: NodeId) -> Option<&BTreeSet<PredEntry>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of nodes with at least one predecessor.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BTreeSet<PredEntry>)> {
        self.entries.iter().map(|(&id, set)| (id, set))
    }

    pub(crate) fn insert(&mut self, child: NodeId, entry: PredEntry) {
        self.entries.entry(child).or_default().insert(entry);
    }

    /// Removes and returns the entry set of `id`.
    pub(crate) fn take(&mut self, id: NodeId) -> BTreeSet<PredEntry> {
        self.entries.remove(&id).unwrap_or_default()
    }

    /// Drops every entry of `child` naming `parent`. Returns `true` when this leaves `child`
    /// without predecessors (its key is removed). A node that had no entry returns `false`.
    pub(crate) fn detach(&mut self, child: NodeId, parent: NodeId) -> bool {
        let Some(set) = self.entries.get_mut(&child) else {
            return false;
        };
        set.retain(|&(p, _)| p != parent);
        if set.is_empty() {
            self.entries.remove(&child);
            true
        } else {
            false
        }
    }

    /// Verifies the map against a from-scratch recomputation over the present nodes.
    pub fn check(&self, graph: &RuleGraph) -> Result<()> {
        if let Some(entries) = self.entries.get(&graph.root()) {
            return Err(DeepRedError::Invariant(format!(
                "root {} has predecessor entries {:?}",
                graph.root(),
                entries
            )));
        }
        let present = graph.all_nodes();
        let expected = graph.predecessor_map(&present);
        for id in present.iter().copied().filter(|&id| id != graph.root()) {
            match (self.entries.get(&id), expected.entries.get(&id)) {
                (Some(actual), Some(wanted)) if actual == wanted => {}
                (actual, wanted) => {
                    return Err(DeepRedError::Invariant(format!(
                        "node {} has predecessors {:?}, expected {:?}",
                        id, actual, wanted
                    )));
                }
            }
        }
        if self.entries.len() != expected.entries.len() {
            let stale: Vec<NodeId> = self
                .entries
                .keys()
                .copied()
                .filter(|id| !expected.entries.contains_key(id))
                .collect();
            return Err(DeepRedError::Invariant(format!(
                "entries for nodes that are not present: {:?}",
                stale
            )));
        }
        Ok(())
    }
}

impl RuleGraph {
    /// Builds the predecessor map restricted to edges leaving `nodes`.
    pub fn predecessor_map(&self, nodes: &[NodeId]) -> PredecessorMap {
        let mut map = PredecessorMap::default();
        for &id in nodes {
            for (branch, child) in self.node(id).edges() {
                map.insert(child, (id, branch));
            }
        }
        map
    }

    /// Orders `nodes` so that every parent precedes its children (Kahn's algorithm on the
    /// predecessor map). Fails if the map and the graph disagree.
    pub fn topological_order(&self, nodes: &[NodeId], preds: &PredecessorMap) -> Result<Vec<NodeId>> {
        let mut in_degree: FxHashMap<NodeId, usize> = nodes
            .iter()
            .map(|&id| (id, preds.get(id).map_or(0, |set| set.len())))
            .collect();
        let mut ready: Vec<NodeId> = nodes.iter().copied().filter(|id| in_degree[id] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(id) = ready.pop() {
            order.push(id);
            for (_, child) in self.node(id).edges() {
                let degree = in_degree.get_mut(&child).ok_or_else(|| {
                    DeepRedError::Invariant(format!("child {} of node {} is not in the node set", child, id))
                })?;
                *degree = degree.checked_sub(1).ok_or_else(|| {
                    DeepRedError::Invariant(format!("edge {} -> {} is missing from the predecessor map", id, child))
                })?;
                if *degree == 0 {
                    ready.push(child);
                }
            }
        }

        if order.len() != nodes.len() {
            return Err(DeepRedError::Invariant(format!(
                "topological order covers {} of {} nodes",
                order.len(),
                nodes.len()
            )));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::shared_leaf_graph;

    #[test]
    fn test_predecessor_map_of_shared_leaf() {
        let graph = shared_leaf_graph();
        let preds = graph.predecessor_map(&graph.all_nodes());
        assert!(!preds.contains(graph.root()));
        assert_eq!(preds.len(), 3);
        let shared: Vec<PredEntry> = preds.get(2).unwrap().iter().copied().collect();
        assert_eq!(shared, vec![(0, Branch::False), (1, Branch::False)]);
        assert!(preds.check(&graph).is_ok());
    }

    #[test]
    fn test_check_detects_stale_and_missing_entries() {
        let graph = shared_leaf_graph();
        let mut preds = graph.predecessor_map(&graph.all_nodes());
        preds.insert(3, (2, Branch::True));
        assert!(matches!(preds.check(&graph), Err(DeepRedError::Invariant(_))));

        let mut preds = graph.predecessor_map(&graph.all_nodes());
        preds.take(1);
        assert!(preds.check(&graph).is_err());

        let mut preds = graph.predecessor_map(&graph.all_nodes());
        preds.insert(0, (1, Branch::True));
        assert!(preds.check(&graph).is_err());
    }

    #[test]
    fn test_detach_reports_orphans() {
        let graph = shared_leaf_graph();
        let mut preds = graph.predecessor_map(&graph.all_nodes());
        assert!(!preds.detach(2, 0));
        assert!(preds.detach(2, 1));
        assert!(!preds.contains(2));
        assert!(!preds.detach(2, 1));
    }

    #[test]
    fn test_topological_order_puts_parents_first() {
        let graph = shared_leaf_graph();
        let nodes = graph.all_nodes();
        let preds = graph.predecessor_map(&nodes);
        let order = graph.topological_order(&nodes, &preds).unwrap();
        let position = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
        assert_eq!(order[0], 0);
        assert!(position(1) < position(2));
        assert!(position(1) < position(3));
    }
}
