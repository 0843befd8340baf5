//! Per-step measurements accumulated during an extraction.

use std::time::Duration;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::builder::{SubTree, SubTreeTable};
use crate::graph::{RuleGraph, ThresholdKey};

/// Measurements of a run. Every `Vec` holds one entry per step, the initial fit first;
/// the `sub_tree_*` vectors start with the first refinement step and hold one entry per
/// threshold of that step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// Layer whose activations the graph reads after the step.
    pub layers: Vec<usize>,
    /// Present nodes after pruning.
    pub dag_size: Vec<usize>,
    /// Present nodes right after the merge.
    pub size_before_reduction: Vec<usize>,
    pub fidelity: Vec<f64>,
    pub sub_tree_keys: Vec<Vec<ThresholdKey>>,
    pub sub_tree_acc: Vec<Vec<f64>>,
    pub sub_tree_size: Vec<Vec<usize>>,
    /// Seconds.
    pub sub_tree_time: Vec<Vec<f64>>,
    /// Seconds.
    pub step_time: Vec<f64>,
    /// Present nodes of the returned graph.
    pub final_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessLog>,
}

/// Snapshots kept when `save_process` is enabled.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessLog {
    /// Graph after every step, the initial graph first.
    pub dag: Vec<RuleGraph>,
    /// Sub-tree table of every refinement step.
    #[serde(serialize_with = "serialize_tables")]
    pub sub_tree: Vec<SubTreeTable>,
}

/// What one refinement step measured.
#[derive(Debug, Clone)]
pub(crate) struct StepRecord {
    pub layer: usize,
    pub size_before_reduction: usize,
    pub dag_size: usize,
    pub fidelity: f64,
    pub step_time: Duration,
}

impl Diagnostics {
    pub(crate) fn new(save_process: bool) -> Self {
        Diagnostics { process: save_process.then(ProcessLog::default), ..Diagnostics::default() }
    }

    pub(crate) fn record_initial(&mut self, layer: usize, graph: &RuleGraph, fidelity: f64) {
        let size = graph.node_count();
        self.layers.push(layer);
        self.dag_size.push(size);
        self.size_before_reduction.push(size);
        self.fidelity.push(fidelity);
        if let Some(process) = &mut self.process {
            process.dag.push(graph.clone());
        }
    }

    pub(crate) fn record_step(&mut self, step: StepRecord, subtrees: &[SubTree]) {
        self.layers.push(step.layer);
        self.size_before_reduction.push(step.size_before_reduction);
        self.dag_size.push(step.dag_size);
        self.fidelity.push(step.fidelity);
        self.step_time.push(step.step_time.as_secs_f64());
        self.sub_tree_keys.push(subtrees.iter().map(|s| s.key).collect());
        self.sub_tree_acc.push(subtrees.iter().map(|s| s.accuracy).collect());
        self.sub_tree_size.push(subtrees.iter().map(|s| s.size).collect());
        self.sub_tree_time.push(subtrees.iter().map(|s| s.duration.as_secs_f64()).collect());
    }

    /// Stores the snapshots of a step. No-op unless snapshots are enabled.
    pub(crate) fn record_snapshot(&mut self, graph: &RuleGraph, table: SubTreeTable) {
        if let Some(process) = &mut self.process {
            process.dag.push(graph.clone());
            process.sub_tree.push(table);
        }
    }

    /// Number of recorded steps, the initial fit included.
    pub fn steps(&self) -> usize {
        self.layers.len()
    }

    /// Fidelity after the last step.
    pub fn final_fidelity(&self) -> Option<f64> {
        self.fidelity.last().copied()
    }
}

/// JSON object keys must be strings, so every table is written as `{"x_i > b": graph}`.
fn serialize_tables<S: Serializer>(tables: &[SubTreeTable], serializer: S) -> Result<S::Ok, S::Error> {
    struct Table<'a>(&'a SubTreeTable);

    impl Serialize for Table<'_> {
        fn serialize<M: Serializer>(&self, serializer: M) -> Result<M::Ok, M::Error> {
            let mut map = serializer.serialize_map(Some(self.0.len()))?;
            for (key, graph) in self.0 {
                map.serialize_entry(&key.to_string(), graph)?;
            }
            map.end()
        }
    }

    serializer.collect_seq(tables.iter().map(Table))
}
