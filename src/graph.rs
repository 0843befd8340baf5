//! Defines the rule graph: an arena of axis-aligned split nodes and class-label leaves
//! forming a single-rooted DAG.
//!
//! Nodes are addressed by [`NodeId`] (an index into the arena). Rewrites never free slots
//! eagerly: a node that is no longer reachable from the root simply stops being *present*
//! and is dropped by the next compaction ([`RuleGraph::prune_unreachable`] or
//! [`RuleGraph::canonicalize_redundancy`]).

mod evaluate;
mod predecessors;
mod redundancy;
mod rewrite;

pub use predecessors::{PredEntry, PredecessorMap};
pub use rewrite::{ImportedRegion, PruneStats};

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{DeepRedError, Result};

/// Type alias for a node identifier within a [`RuleGraph`] arena.
pub type NodeId = usize;

/// Which outgoing edge of a split node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Branch {
    /// Taken when `x[feature] > threshold`.
    True,
    False,
}

impl Branch {
    pub const BOTH: [Branch; 2] = [Branch::True, Branch::False];
}

/// Identifies one decision boundary: `x[feature] > threshold`.
///
/// Equality, hashing and ordering use the threshold's bit pattern, so keys are usable in
/// hash maps and ordered maps alike.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdKey {
    pub feature: usize,
    pub threshold: f64,
}

impl ThresholdKey {
    pub fn new(feature: usize, threshold: f64) -> Self {
        ThresholdKey { feature, threshold }
    }
}

impl PartialEq for ThresholdKey {
    fn eq(&self, other: &Self) -> bool {
        self.feature == other.feature && self.threshold.to_bits() == other.threshold.to_bits()
    }
}

impl Eq for ThresholdKey {}

impl Hash for ThresholdKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.feature.hash(state);
        self.threshold.to_bits().hash(state);
    }
}

impl Ord for ThresholdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.feature
            .cmp(&other.feature)
            .then_with(|| self.threshold.total_cmp(&other.threshold))
    }
}

impl PartialOrd for ThresholdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x_{} > {}", self.feature, self.threshold)
    }
}

/// A node of the rule graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleNode {
    /// Tests `x[feature] > threshold`. An absent branch ends evaluation with no label.
    Split {
        feature: usize,
        threshold: f64,
        true_branch: Option<NodeId>,
        false_branch: Option<NodeId>,
    },
    /// Class labels ordered by training support; the first one is the prediction.
    Leaf { classes: Vec<usize> },
}

impl RuleNode {
    pub fn split(feature: usize, threshold: f64, true_branch: Option<NodeId>, false_branch: Option<NodeId>) -> Self {
        RuleNode::Split { feature, threshold, true_branch, false_branch }
    }

    pub fn leaf(classes: Vec<usize>) -> Self {
        RuleNode::Leaf { classes }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, RuleNode::Leaf { .. })
    }

    /// The decision boundary of a split, `None` for leaves.
    pub fn key(&self) -> Option<ThresholdKey> {
        match self {
            RuleNode::Split { feature, threshold, .. } => Some(ThresholdKey::new(*feature, *threshold)),
            RuleNode::Leaf { .. } => None,
        }
    }

    pub fn branch(&self, branch: Branch) -> Option<NodeId> {
        match (self, branch) {
            (RuleNode::Split { true_branch, .. }, Branch::True) => *true_branch,
            (RuleNode::Split { false_branch, .. }, Branch::False) => *false_branch,
            (RuleNode::Leaf { .. }, _) => None,
        }
    }

    /// Outgoing edges as `(branch, child)` pairs; empty for leaves.
    pub fn edges(&self) -> impl Iterator<Item = (Branch, NodeId)> + '_ {
        Branch::BOTH
            .into_iter()
            .filter_map(move |branch| self.branch(branch).map(|child| (branch, child)))
    }

    pub(crate) fn set_branch(&mut self, branch: Branch, target: Option<NodeId>) {
        match (self, branch) {
            (RuleNode::Split { true_branch, .. }, Branch::True) => *true_branch = target,
            (RuleNode::Split { false_branch, .. }, Branch::False) => *false_branch = target,
            (RuleNode::Leaf { .. }, _) => debug_assert!(false, "set_branch called on a leaf"),
        }
    }
}

/// A single-rooted decision DAG over an input vector of `input_size` features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGraph {
    nodes: Vec<RuleNode>,
    root: NodeId,
    /// Free-form description of how the graph was produced.
    pub tag: String,
    /// Width of the feature vectors the graph evaluates.
    pub input_size: usize,
}

impl RuleGraph {
    /// Assembles a graph from an arena and a root, validating that every child reference
    /// is in bounds, that leaves carry at least one label and that the reachable part is
    /// acyclic.
    pub fn from_parts(nodes: Vec<RuleNode>, root: NodeId, tag: impl Into<String>, input_size: usize) -> Result<Self> {
        if root >= nodes.len() {
            return Err(DeepRedError::InvalidInput(format!(
                "root {} is outside the arena ({} nodes)",
                root,
                nodes.len()
            )));
        }
        for (id, node) in nodes.iter().enumerate() {
            match node {
                RuleNode::Leaf { classes } if classes.is_empty() => {
                    return Err(DeepRedError::InvalidInput(format!("leaf {} has no class label", id)));
                }
                RuleNode::Leaf { .. } => {}
                RuleNode::Split { .. } => {
                    if let Some((_, child)) = node.edges().find(|&(_, child)| child >= nodes.len()) {
                        return Err(DeepRedError::InvalidInput(format!(
                            "node {} points at missing node {}",
                            id, child
                        )));
                    }
                }
            }
        }
        let graph = RuleGraph { nodes, root, tag: tag.into(), input_size };
        if graph.has_cycle() {
            return Err(DeepRedError::InvalidInput("rule graph contains a cycle".to_string()));
        }
        Ok(graph)
    }

    /// A graph made of a single leaf.
    pub fn leaf(classes: Vec<usize>, tag: impl Into<String>, input_size: usize) -> Result<Self> {
        Self::from_parts(vec![RuleNode::leaf(classes)], 0, tag, input_size)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// # Panics
    /// Panics if `id` is outside the arena.
    pub fn node(&self, id: NodeId) -> &RuleNode {
        &self.nodes[id]
    }

    /// The raw arena, including slots that are no longer present.
    pub fn nodes(&self) -> &[RuleNode] {
        &self.nodes
    }

    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn push(&mut self, node: RuleNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// All present nodes (reachable from the root), in depth-first preorder with the true
    /// branch visited before the false branch. Shared nodes appear once.
    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            if let RuleNode::Split { true_branch, false_branch, .. } = &self.nodes[id] {
                stack.extend(false_branch.iter().chain(true_branch.iter()).copied());
            }
        }
        order
    }

    /// Number of present nodes.
    pub fn node_count(&self) -> usize {
        self.all_nodes().len()
    }

    /// Whether `id` is reachable from the root.
    pub fn contains(&self, id: NodeId) -> bool {
        self.all_nodes().contains(&id)
    }

    /// Distinct decision boundaries among the split nodes of `nodes`, in key order.
    pub fn thresholds(&self, nodes: &[NodeId]) -> Vec<ThresholdKey> {
        nodes
            .iter()
            .filter_map(|&id| self.nodes[id].key())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Length (in edges) of the longest root-to-node path.
    pub fn depth(&self) -> usize {
        let mut memo: FxHashMap<NodeId, usize> = FxHashMap::default();
        // (node, children already pushed)
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if memo.contains_key(&id) {
                continue;
            }
            if expanded {
                let depth = self.nodes[id]
                    .edges()
                    .map(|(_, child)| 1 + memo.get(&child).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0);
                memo.insert(id, depth);
                continue;
            }
            stack.push((id, true));
            stack.extend(self.nodes[id].edges().map(|(_, child)| (child, false)));
        }
        memo.get(&self.root).copied().unwrap_or(0)
    }

    /// Renumbers the present nodes in [`RuleGraph::all_nodes`] order (root becomes 0) and
    /// drops every other slot. Two compacted graphs are structurally identical exactly when
    /// their arenas compare equal.
    pub fn compact(&mut self) {
        let order = self.all_nodes();
        let remap: FxHashMap<NodeId, NodeId> =
            order.iter().enumerate().map(|(new_id, &old_id)| (old_id, new_id)).collect();
        let nodes = order
            .iter()
            .map(|&old_id| match &self.nodes[old_id] {
                RuleNode::Split { feature, threshold, true_branch, false_branch } => RuleNode::split(
                    *feature,
                    *threshold,
                    true_branch.map(|c| remap[&c]),
                    false_branch.map(|c| remap[&c]),
                ),
                leaf @ RuleNode::Leaf { .. } => leaf.clone(),
            })
            .collect();
        self.nodes = nodes;
        self.root = 0;
    }

    fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unseen,
            Open,
            Done,
        }
        let mut marks = vec![Mark::Unseen; self.nodes.len()];
        // (node, children already pushed)
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                marks[id] = Mark::Done;
                continue;
            }
            match marks[id] {
                Mark::Done => continue,
                Mark::Open => return true,
                Mark::Unseen => {}
            }
            marks[id] = Mark::Open;
            stack.push((id, true));
            for (_, child) in self.nodes[id].edges() {
                match marks[child] {
                    Mark::Open => return true,
                    Mark::Unseen => stack.push((child, false)),
                    Mark::Done => {}
                }
            }
        }
        false
    }
}

/// Renders the graph as an indented tree. Shared nodes are expanded once and referenced
/// afterwards.
impl fmt::Display for RuleGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} nodes, {} inputs)", self.tag, self.node_count(), self.input_size)?;
        self.fmt_tree(f)
    }
}

impl RuleGraph {
    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut visited = FxHashSet::default();
        let mut stack = vec![(Some(self.root), String::new())];
        while let Some((id, prefix)) = stack.pop() {
            let Some(id) = id else {
                writeln!(f, "{}(absent)", prefix)?;
                continue;
            };
            match &self.nodes[id] {
                RuleNode::Leaf { classes } => writeln!(f, "{}Leaf(classes = {:?}) [ID: {}]", prefix, classes, id)?,
                RuleNode::Split { feature, threshold, true_branch, false_branch } => {
                    if !visited.insert(id) {
                        writeln!(f, "{}-> Shared Node [ID: {}]", prefix, id)?;
                        continue;
                    }
                    writeln!(f, "{}Node(x_{} > {:.4}?) [ID: {}]", prefix, feature, threshold, id)?;
                    stack.push((*false_branch, format!("{}  `-- False:", prefix)));
                    stack.push((*true_branch, format!("{}  |-- True: ", prefix)));
                }
            }
        }
        Ok(())
    }
}
