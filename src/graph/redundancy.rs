//! Redundancy elimination by hash-consing the graph into a fresh arena.

use rustc_hash::FxHashMap;

use super::{NodeId, RuleGraph, RuleNode};

/// Builds a deduplicated arena: structurally equal nodes get the same id.
#[derive(Default)]
struct Interner {
    nodes: Vec<RuleNode>,
    splits: FxHashMap<(usize, u64, Option<NodeId>, Option<NodeId>), NodeId>,
    leaves: FxHashMap<Vec<usize>, NodeId>,
}

impl Interner {
    fn intern_leaf(&mut self, classes: &[usize]) -> NodeId {
        if let Some(&id) = self.leaves.get(classes) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(RuleNode::leaf(classes.to_vec()));
        self.leaves.insert(classes.to_vec(), id);
        id
    }

    /// A split whose branches coincide is the branch itself, possibly absent.
    fn intern_split(
        &mut self,
        feature: usize,
        threshold: f64,
        true_id: Option<NodeId>,
        false_id: Option<NodeId>,
    ) -> Option<NodeId> {
        if true_id == false_id {
            return true_id;
        }
        Some(self.push_split(feature, threshold, true_id, false_id))
    }

    fn push_split(
        &mut self,
        feature: usize,
        threshold: f64,
        true_id: Option<NodeId>,
        false_id: Option<NodeId>,
    ) -> NodeId {
        let key = (feature, threshold.to_bits(), true_id, false_id);
        if let Some(&id) = self.splits.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(RuleNode::split(feature, threshold, true_id, false_id));
        self.splits.insert(key, id);
        id
    }
}

impl RuleGraph {
    /// Shares identical leaves and identical splits, and replaces every split whose two
    /// branches are the same by that branch. The result is compacted. Returns the number of
    /// present nodes removed.
    pub fn canonicalize_redundancy(&mut self) -> usize {
        let before = self.node_count();
        let mut interner = Interner::default();
        let mut memo = FxHashMap::default();

        let root = match copy_and_intern(self, self.root, &mut interner, &mut memo) {
            Some(root) => root,
            // The whole graph evaluates to nothing; keep a single childless split.
            None => match &self.nodes[self.root] {
                RuleNode::Split { feature, threshold, .. } => interner.push_split(*feature, *threshold, None, None),
                RuleNode::Leaf { classes } => interner.intern_leaf(classes),
            },
        };

        self.nodes = interner.nodes;
        self.root = root;
        self.compact();
        before - self.node_count()
    }
}

/// Interns every node under `root` children first. `None` when nothing under `root`
/// reaches a leaf.
fn copy_and_intern(
    graph: &RuleGraph,
    root: NodeId,
    interner: &mut Interner,
    memo: &mut FxHashMap<NodeId, Option<NodeId>>,
) -> Option<NodeId> {
    // (node, children already interned)
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if memo.contains_key(&id) {
            continue;
        }
        match graph.node(id) {
            RuleNode::Leaf { classes } => {
                let leaf = interner.intern_leaf(classes);
                memo.insert(id, Some(leaf));
            }
            RuleNode::Split { feature, threshold, true_branch, false_branch } if expanded => {
                let true_id = true_branch.and_then(|child| memo.get(&child).copied().flatten());
                let false_id = false_branch.and_then(|child| memo.get(&child).copied().flatten());
                let interned = interner.intern_split(*feature, *threshold, true_id, false_id);
                memo.insert(id, interned);
            }
            RuleNode::Split { true_branch, false_branch, .. } => {
                stack.push((id, true));
                // True branch on top, so it is interned first.
                stack.extend(false_branch.iter().chain(true_branch.iter()).map(|&child| (child, false)));
            }
        }
    }
    memo.get(&root).copied().flatten()
}
