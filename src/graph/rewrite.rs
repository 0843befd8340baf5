//! In-place rewrites: importing sub-graphs, leaf substitution, node splicing and dead-edge
//! pruning. All of them keep a [`PredecessorMap`] consistent with the graph.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Branch, NodeId, PredecessorMap, RuleGraph, RuleNode};
use crate::error::{DeepRedError, Result};

/// Nodes copied into an arena by [`RuleGraph::import`].
///
/// `root` is the entry point of the copy. It becomes `None` when the copy collapsed into an
/// absent branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedRegion {
    pub root: Option<NodeId>,
    pub nodes: Vec<NodeId>,
}

/// Counters reported by [`RuleGraph::prune_unreachable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Splits replaced by their only live branch.
    pub bypassed: usize,
    /// Dead branches set to absent because the live branch was absent too.
    pub cut_edges: usize,
    /// Present nodes dropped by the compaction.
    pub removed: usize,
}

/// Outcome of a split condition over the interval hull of the inputs reaching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionStatus {
    AlwaysTrue,
    AlwaysFalse,
    Undetermined,
}

/// Per-feature `(lower, upper]` bounds. Features without an entry are unbounded.
type Hull = FxHashMap<usize, (f64, f64)>;

fn bounds(hull: &Hull, feature: usize) -> (f64, f64) {
    hull.get(&feature).copied().unwrap_or((f64::NEG_INFINITY, f64::INFINITY))
}

fn check_condition_bounds(hull: &Hull, feature: usize, threshold: f64) -> ConditionStatus {
    let (lower, upper) = bounds(hull, feature);
    if lower >= threshold {
        ConditionStatus::AlwaysTrue
    } else if upper <= threshold {
        ConditionStatus::AlwaysFalse
    } else {
        ConditionStatus::Undetermined
    }
}

/// Hull of the inputs that take `branch` out of a split. `None` if no input can.
fn restrict(hull: &Hull, feature: usize, threshold: f64, branch: Branch) -> Option<Hull> {
    let (lower, upper) = bounds(hull, feature);
    let (lower, upper) = match branch {
        Branch::True => (lower.max(threshold), upper),
        Branch::False => (lower, upper.min(threshold)),
    };
    if lower >= upper {
        return None;
    }
    let mut restricted = hull.clone();
    restricted.insert(feature, (lower, upper));
    Some(restricted)
}

/// Widens `acc` so it also covers `other`.
fn widen(acc: &mut Hull, other: &Hull) {
    acc.retain(|feature, (lower, upper)| match other.get(feature) {
        Some(&(other_lower, other_upper)) => {
            *lower = lower.min(other_lower);
            *upper = upper.max(other_upper);
            true
        }
        None => false,
    });
}

impl RuleGraph {
    /// Copies the present nodes of `other` into this arena under fresh ids. Repeated imports
    /// of the same graph never share nodes.
    pub fn import(&mut self, other: &RuleGraph) -> ImportedRegion {
        let order = other.all_nodes();
        let base = self.nodes.len();
        let remap: FxHashMap<NodeId, NodeId> =
            order.iter().enumerate().map(|(offset, &old_id)| (old_id, base + offset)).collect();

        for &old_id in &order {
            let copy = match other.node(old_id) {
                RuleNode::Split { feature, threshold, true_branch, false_branch } => RuleNode::split(
                    *feature,
                    *threshold,
                    true_branch.map(|c| remap[&c]),
                    false_branch.map(|c| remap[&c]),
                ),
                leaf @ RuleNode::Leaf { .. } => leaf.clone(),
            };
            self.push(copy);
        }

        ImportedRegion {
            root: Some(remap[&other.root()]),
            nodes: (base..base + order.len()).collect(),
        }
    }

    /// Redirects every edge of `region` that points at one of its leaves labelled exactly
    /// `classes` to `replacement`. If the region root is such a leaf, the region collapses
    /// to `replacement`. Matched leaves leave the region. Returns the number of matched
    /// leaves.
    pub fn replace_leaves_matching(
        &mut self,
        classes: &[usize],
        replacement: Option<NodeId>,
        region: &mut ImportedRegion,
    ) -> usize {
        let matched: FxHashSet<NodeId> = region
            .nodes
            .iter()
            .copied()
            .filter(|&id| matches!(&self.nodes[id], RuleNode::Leaf { classes: labels } if labels.as_slice() == classes))
            .collect();
        if matched.is_empty() {
            return 0;
        }

        for &id in &region.nodes {
            for branch in Branch::BOTH {
                if self.nodes[id].branch(branch).is_some_and(|child| matched.contains(&child)) {
                    self.nodes[id].set_branch(branch, replacement);
                }
            }
        }
        if region.root.is_some_and(|root| matched.contains(&root)) {
            region.root = replacement;
        }
        region.nodes.retain(|id| !matched.contains(id));
        matched.len()
    }

    /// Records every edge leaving the region's nodes in `preds`.
    pub fn link_region(&self, region: &ImportedRegion, preds: &mut PredecessorMap) {
        for &id in &region.nodes {
            for (branch, child) in self.nodes[id].edges() {
                preds.insert(child, (id, branch));
            }
        }
    }

    /// Puts `replacement` in place of `target`: every edge into `target` is redirected to
    /// it (or `replacement` becomes the root), and `target` is detached from its children.
    /// Nodes left without predecessors are detached recursively.
    ///
    /// `target` must be the root or have predecessor entries.
    pub fn splice_node(
        &mut self,
        target: NodeId,
        replacement: Option<NodeId>,
        preds: &mut PredecessorMap,
    ) -> Result<()> {
        if target >= self.nodes.len() {
            return Err(DeepRedError::Invariant(format!(
                "splice target {} is outside the arena ({} nodes)",
                target,
                self.nodes.len()
            )));
        }

        if target == self.root {
            if preds.contains(target) {
                return Err(DeepRedError::Invariant(format!("root {} has predecessor entries", target)));
            }
            let Some(new_root) = replacement else {
                return Err(DeepRedError::Invariant(format!(
                    "root {} cannot be replaced by an absent branch",
                    target
                )));
            };
            self.root = new_root;
        } else {
            let entries = preds.take(target);
            if entries.is_empty() {
                return Err(DeepRedError::Invariant(format!(
                    "splice target {} has no predecessor entries",
                    target
                )));
            }
            for &(parent, branch) in &entries {
                self.nodes[parent].set_branch(branch, replacement);
            }
            if let Some(new_node) = replacement {
                for entry in entries {
                    preds.insert(new_node, entry);
                }
            }
        }

        self.release(target, preds);
        Ok(())
    }

    /// Drops the entries of `id`'s children that name `id`, cascading into children that
    /// end up without predecessors.
    fn release(&self, id: NodeId, preds: &mut PredecessorMap) {
        let mut stack = vec![id];
        while let Some(parent) = stack.pop() {
            let node = &self.nodes[parent];
            let mut children: Vec<NodeId> = node.edges().map(|(_, child)| child).collect();
            children.dedup();
            for child in children {
                if preds.detach(child, parent) && child != self.root {
                    stack.push(child);
                }
            }
        }
    }

    /// Removes edges no input can take. For every present node the per-feature interval
    /// hull of the inputs reaching it is computed in topological order; a split whose
    /// condition is decided by its hull is bypassed by its live branch, or has its dead
    /// branch cut when the live branch is absent. The arena is then compacted and `preds`
    /// rebuilt. Evaluation is unchanged on every input.
    pub fn prune_unreachable(&mut self, preds: &mut PredecessorMap) -> Result<PruneStats> {
        let present = self.all_nodes();
        let order = self.topological_order(&present, preds)?;

        let mut incoming: FxHashMap<NodeId, Hull> = FxHashMap::default();
        incoming.insert(self.root, Hull::default());
        let mut live_branch: FxHashMap<NodeId, Branch> = FxHashMap::default();

        for id in order {
            // Reached only through dead edges.
            let Some(hull) = incoming.remove(&id) else {
                continue;
            };
            let RuleNode::Split { feature, threshold, .. } = self.nodes[id] else {
                continue;
            };
            let live: &[Branch] = match check_condition_bounds(&hull, feature, threshold) {
                ConditionStatus::AlwaysTrue => &[Branch::True],
                ConditionStatus::AlwaysFalse => &[Branch::False],
                ConditionStatus::Undetermined => &Branch::BOTH,
            };
            if let [only] = live {
                live_branch.insert(id, *only);
            }
            for &branch in live {
                let Some(child) = self.nodes[id].branch(branch) else {
                    continue;
                };
                let Some(child_hull) = restrict(&hull, feature, threshold, branch) else {
                    continue;
                };
                match incoming.get_mut(&child) {
                    Some(acc) => widen(acc, &child_hull),
                    None => {
                        incoming.insert(child, child_hull);
                    }
                }
            }
        }

        let mut stats = PruneStats::default();
        let mut bypass: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for (&id, &live) in &live_branch {
            match self.nodes[id].branch(live) {
                Some(child) => {
                    bypass.insert(id, child);
                }
                None => {
                    let dead = match live {
                        Branch::True => Branch::False,
                        Branch::False => Branch::True,
                    };
                    self.nodes[id].set_branch(dead, None);
                    stats.cut_edges += 1;
                }
            }
        }
        stats.bypassed = bypass.len();

        let resolve = |mut id: NodeId| {
            while let Some(&next) = bypass.get(&id) {
                id = next;
            }
            id
        };
        for &id in &present {
            for branch in Branch::BOTH {
                if let Some(child) = self.nodes[id].branch(branch) {
                    if bypass.contains_key(&child) {
                        self.nodes[id].set_branch(branch, Some(resolve(child)));
                    }
                }
            }
        }
        self.root = resolve(self.root);

        self.compact();
        let remaining = self.all_nodes();
        stats.removed = present.len() - remaining.len();
        *preds = self.predecessor_map(&remaining);
        Ok(stats)
    }
}
