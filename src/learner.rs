//! Binary axis-aligned decision tree learner.
//!
//! The extraction only needs *some* learner: it forwards a free-form parameter map and
//! consumes the fitted structure through [`FittedTree`]. [`CartLearner`] is the default, a
//! CART-style classifier using Gini impurity with midpoint thresholds. Like scikit-learn,
//! the left child of a split holds the samples with `x[feature] <= threshold`.

use std::collections::BTreeMap;

use ndarray::ArrayView2;
use serde_json::Value;
use thiserror::Error;

/// Free-form training parameters, forwarded verbatim to the learner.
pub type LearnerParams = BTreeMap<String, Value>;

/// Errors a learner reports when it cannot produce a valid tree.
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("cannot fit a tree on an empty sample set")]
    EmptyInput,

    #[error("feature matrix has no columns")]
    NoFeatures,

    #[error("got {labels} labels for {samples} samples")]
    LabelCountMismatch { labels: usize, samples: usize },

    #[error("non-finite feature value at row {row}, column {column}")]
    NonFiniteFeature { row: usize, column: usize },

    #[error("unknown training parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid value for training parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Capability consumed by the extraction: fit a tree from features and class ids.
///
/// Implementations must be `Sync` because per-threshold fits run concurrently.
pub trait TreeLearner: Sync {
    fn fit(
        &self,
        features: ArrayView2<'_, f64>,
        labels: &[usize],
        params: &LearnerParams,
    ) -> Result<FittedTree, LearnerError>;
}

/// A node of a fitted tree. Every node keeps the per-class sample counts that reached it.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedNode {
    Split {
        feature: usize,
        threshold: f64,
        /// Child for `x[feature] <= threshold`.
        left: usize,
        /// Child for `x[feature] > threshold`.
        right: usize,
        counts: Vec<usize>,
    },
    Leaf {
        counts: Vec<usize>,
    },
}

impl FittedNode {
    pub fn counts(&self) -> &[usize] {
        match self {
            FittedNode::Split { counts, .. } | FittedNode::Leaf { counts } => counts,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.counts().iter().sum()
    }
}

/// A fitted tree stored as a flat node vector with the root at index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedTree {
    nodes: Vec<FittedNode>,
    n_features: usize,
    n_classes: usize,
}

impl FittedTree {
    /// Assembles a tree from raw nodes. The root must be at index 0.
    pub fn from_nodes(nodes: Vec<FittedNode>, n_features: usize, n_classes: usize) -> Self {
        FittedTree { nodes, n_features, n_classes }
    }

    pub const ROOT: usize = 0;

    pub fn node(&self, id: usize) -> &FittedNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Predicts the majority class of the leaf reached by `sample`.
    pub fn predict(&self, sample: &[f64]) -> usize {
        let mut id = Self::ROOT;
        loop {
            match &self.nodes[id] {
                FittedNode::Leaf { counts } => return crate::utils::argmax_counts(counts),
                FittedNode::Split { feature, threshold, left, right, .. } => {
                    id = if sample[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Settings understood by [`CartLearner`], parsed from a [`LearnerParams`] map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartSettings {
    /// `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub min_impurity_decrease: f64,
}

impl Default for CartSettings {
    fn default() -> Self {
        CartSettings {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_impurity_decrease: 0.0,
        }
    }
}

impl CartSettings {
    /// Parses the parameter map. Unknown keys and badly typed values are rejected.
    pub fn from_params(params: &LearnerParams) -> Result<Self, LearnerError> {
        let mut settings = CartSettings::default();
        for (name, value) in params {
            match name.as_str() {
                "max_depth" => {
                    settings.max_depth = if value.is_null() {
                        None
                    } else {
                        Some(as_count(name, value, 0)?)
                    };
                }
                "min_samples_split" => settings.min_samples_split = as_count(name, value, 2)?,
                "min_samples_leaf" => settings.min_samples_leaf = as_count(name, value, 1)?,
                "min_impurity_decrease" => {
                    let decrease = value.as_f64().ok_or_else(|| invalid(name, "expected a number"))?;
                    if decrease < 0.0 {
                        return Err(invalid(name, "must be >= 0"));
                    }
                    settings.min_impurity_decrease = decrease;
                }
                _ => return Err(LearnerError::UnknownParameter(name.clone())),
            }
        }
        Ok(settings)
    }
}

fn invalid(name: &str, reason: &str) -> LearnerError {
    LearnerError::InvalidParameter { name: name.to_string(), reason: reason.to_string() }
}

fn as_count(name: &str, value: &Value, min: usize) -> Result<usize, LearnerError> {
    let raw = value
        .as_u64()
        .ok_or_else(|| invalid(name, "expected a non-negative integer"))?;
    let count = usize::try_from(raw).map_err(|_| invalid(name, "value too large"))?;
    if count < min {
        return Err(invalid(name, &format!("must be >= {}", min)));
    }
    Ok(count)
}

/// CART classifier with Gini impurity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CartLearner;

impl TreeLearner for CartLearner {
    fn fit(
        &self,
        features: ArrayView2<'_, f64>,
        labels: &[usize],
        params: &LearnerParams,
    ) -> Result<FittedTree, LearnerError> {
        let settings = CartSettings::from_params(params)?;
        let (n_samples, n_features) = features.dim();
        if n_samples == 0 {
            return Err(LearnerError::EmptyInput);
        }
        if n_features == 0 {
            return Err(LearnerError::NoFeatures);
        }
        if labels.len() != n_samples {
            return Err(LearnerError::LabelCountMismatch { labels: labels.len(), samples: n_samples });
        }
        if let Some(((row, column), _)) = features.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(LearnerError::NonFiniteFeature { row, column });
        }

        let n_classes = labels.iter().copied().max().unwrap_or(0) + 1;
        let mut grower = Grower {
            features,
            labels,
            n_classes,
            n_total: n_samples,
            settings,
            nodes: Vec::new(),
        };
        let indices: Vec<usize> = (0..n_samples).collect();
        grower.grow(&indices, 0);

        Ok(FittedTree::from_nodes(grower.nodes, n_features, n_classes))
    }
}

struct Grower<'a, 'b> {
    features: ArrayView2<'a, f64>,
    labels: &'b [usize],
    n_classes: usize,
    n_total: usize,
    settings: CartSettings,
    nodes: Vec<FittedNode>,
}

impl Grower<'_, '_> {
    /// Grows the subtree for `indices` and returns its node index.
    fn grow(&mut self, indices: &[usize], depth: usize) -> usize {
        let counts = self.class_counts(indices);
        let depth_exhausted = self.settings.max_depth.is_some_and(|max| depth >= max);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;

        if depth_exhausted || pure || indices.len() < self.settings.min_samples_split {
            return self.push(FittedNode::Leaf { counts });
        }
        let Some((feature, threshold)) = self.best_split(indices, &counts) else {
            return self.push(FittedNode::Leaf { counts });
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.features[[i, feature]] <= threshold);

        // Reserve the slot so the parent precedes its children.
        let id = self.push(FittedNode::Leaf { counts: Vec::new() });
        let left = self.grow(&left_indices, depth + 1);
        let right = self.grow(&right_indices, depth + 1);
        self.nodes[id] = FittedNode::Split { feature, threshold, left, right, counts };
        id
    }

    fn push(&mut self, node: FittedNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in indices {
            counts[self.labels[i]] += 1;
        }
        counts
    }

    /// Finds the `(feature, threshold)` with the largest Gini decrease.
    /// Ties keep the first candidate (lowest feature, lowest threshold).
    fn best_split(&self, indices: &[usize], parent_counts: &[usize]) -> Option<(usize, f64)> {
        let n = indices.len();
        let parent_gini = gini(parent_counts, n);
        let min_leaf = self.settings.min_samples_leaf;

        let mut best: Option<(usize, f64)> = None;
        let mut best_gain = 0.0;

        let mut column: Vec<(f64, usize)> = Vec::with_capacity(n);
        for feature in 0..self.features.ncols() {
            column.clear();
            column.extend(indices.iter().map(|&i| (self.features[[i, feature]], self.labels[i])));
            column.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_counts = vec![0usize; self.n_classes];
            for split_at in 1..n {
                let (prev_value, prev_label) = column[split_at - 1];
                left_counts[prev_label] += 1;
                let value = column[split_at].0;
                if value <= prev_value {
                    continue;
                }
                let n_left = split_at;
                let n_right = n - split_at;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let right_counts: Vec<usize> =
                    parent_counts.iter().zip(&left_counts).map(|(p, l)| p - l).collect();
                let weighted = (n_left as f64 * gini(&left_counts, n_left)
                    + n_right as f64 * gini(&right_counts, n_right))
                    / n as f64;
                let gain = parent_gini - weighted;
                let decrease = gain * n as f64 / self.n_total as f64;

                if gain > best_gain && decrease >= self.settings.min_impurity_decrease {
                    best_gain = gain;
                    let mut threshold = (prev_value + value) / 2.0;
                    if threshold >= value {
                        threshold = prev_value;
                    }
                    best = Some((feature, threshold));
                }
            }
        }
        best
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    fn params(value: Value) -> LearnerParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_fit_single_threshold() {
        let x = array![[0.1], [0.2], [0.8], [0.9]];
        let tree = CartLearner.fit(x.view(), &[0, 0, 1, 1], &LearnerParams::new()).unwrap();

        assert_eq!(tree.len(), 3);
        match tree.node(FittedTree::ROOT) {
            FittedNode::Split { feature, threshold, counts, .. } => {
                assert_eq!(*feature, 0);
                assert!(*threshold > 0.2 && *threshold < 0.8);
                assert_eq!(counts, &vec![2, 2]);
            }
            other => panic!("expected a split, got {:?}", other),
        }
        assert_eq!(tree.predict(&[0.15]), 0);
        assert_eq!(tree.predict(&[0.85]), 1);
    }

    #[test]
    fn test_labels_and_features_borrowed_separately() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let view = x.view();
        let tree = {
            let labels = vec![0, 0, 1, 1];
            CartLearner.fit(view, &labels, &LearnerParams::new()).unwrap()
        };
        assert_eq!(tree.predict(&[2.5]), 1);
        assert_eq!(CartLearner.fit(view, &[1, 1, 0, 0], &LearnerParams::new()).unwrap().predict(&[2.5]), 0);
    }

    #[test]
    fn test_fit_prefers_informative_feature() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let tree = CartLearner.fit(x.view(), &[0, 0, 1, 1], &LearnerParams::new()).unwrap();
        match tree.node(FittedTree::ROOT) {
            FittedNode::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 0.5);
            }
            other => panic!("expected a split, got {:?}", other),
        }
    }

    #[test]
    fn test_single_class_yields_leaf() {
        let x = array![[1.0], [2.0], [3.0]];
        let tree = CartLearner.fit(x.view(), &[1, 1, 1], &LearnerParams::new()).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node(0).counts(), &[0, 3]);
        assert_eq!(tree.predict(&[10.0]), 1);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let labels = [0, 1, 0, 1];
        let stump = CartLearner.fit(x.view(), &labels, &params(json!({"max_depth": 1}))).unwrap();
        assert!(stump.len() <= 3);
        let root_only = CartLearner.fit(x.view(), &labels, &params(json!({"max_depth": 0}))).unwrap();
        assert_eq!(root_only.len(), 1);
        let full = CartLearner.fit(x.view(), &labels, &params(json!({"max_depth": null}))).unwrap();
        for (i, &label) in labels.iter().enumerate() {
            assert_eq!(full.predict(&[i as f64]), label);
        }
    }

    #[test]
    fn test_min_samples_leaf_blocks_small_children() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let tree = CartLearner
            .fit(x.view(), &[1, 0, 0, 0], &params(json!({"min_samples_leaf": 2})))
            .unwrap();
        if let FittedNode::Split { left, right, .. } = tree.node(0) {
            assert!(tree.node(*left).n_samples() >= 2);
            assert!(tree.node(*right).n_samples() >= 2);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let x = array![[0.0], [1.0]];
        assert!(matches!(
            CartLearner.fit(x.view(), &[0], &LearnerParams::new()),
            Err(LearnerError::LabelCountMismatch { labels: 1, samples: 2 })
        ));
        let nan = array![[0.0], [f64::NAN]];
        assert!(matches!(
            CartLearner.fit(nan.view(), &[0, 1], &LearnerParams::new()),
            Err(LearnerError::NonFiniteFeature { row: 1, column: 0 })
        ));
        let empty = ndarray::Array2::<f64>::zeros((0, 2));
        assert!(matches!(
            CartLearner.fit(empty.view(), &[], &LearnerParams::new()),
            Err(LearnerError::EmptyInput)
        ));
    }

    #[test]
    fn test_parameter_validation() {
        assert!(matches!(
            CartSettings::from_params(&params(json!({"criterion": "gini"}))),
            Err(LearnerError::UnknownParameter(name)) if name == "criterion"
        ));
        assert!(matches!(
            CartSettings::from_params(&params(json!({"max_depth": "deep"}))),
            Err(LearnerError::InvalidParameter { .. })
        ));
        assert!(matches!(
            CartSettings::from_params(&params(json!({"min_samples_split": 1}))),
            Err(LearnerError::InvalidParameter { .. })
        ));
        let settings = CartSettings::from_params(&params(json!({
            "max_depth": 3, "min_samples_leaf": 2, "min_impurity_decrease": 0.01
        })))
        .unwrap();
        assert_eq!(settings.max_depth, Some(3));
        assert_eq!(settings.min_samples_leaf, 2);
        assert_eq!(settings.min_samples_split, 2);
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[4, 0], 4), 0.0);
        assert!((gini(&[2, 2], 4) - 0.5).abs() < 1e-12);
        assert_eq!(gini(&[], 0), 0.0);
    }
}
