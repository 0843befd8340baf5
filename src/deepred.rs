//! Orchestrates the layer-by-layer extraction of a rule graph from recorded activations.
//!
//! The graph starts as a shallow tree mapping the last hidden layer to the output classes
//! (or as a decision list over the output units). Each iteration then moves the graph one
//! layer closer to the input:
//! 1. every distinct threshold `x_i > b` of the graph gets a local sub-tree predicting it
//!    from the layer below ([`builder`]),
//! 2. the sub-trees are spliced in place of the splits they explain ([`merge`]),
//! 3. fidelity against the network's output is measured and dead edges are pruned.
//!
//! Redundant nodes are shared at the end.

pub mod builder;
pub mod diagnostics;
pub mod merge;

pub use builder::{SubTree, SubTreeBuilder, SubTreeTable};
pub use diagnostics::{Diagnostics, ProcessLog};
pub use merge::{merge, MergeStats};

use std::time::Instant;

use ndarray::{Array2, ArrayView2};
use tracing::{debug, info, warn};

use crate::config::DeepRedConfig;
use crate::convert::{decision_list, to_rule_graph};
use crate::error::{DeepRedError, Result};
use crate::export;
use crate::graph::{NodeId, PredecessorMap, RuleGraph};
use crate::learner::{CartLearner, TreeLearner};
use crate::utils::{argmax_rows, fidelity};
use diagnostics::StepRecord;

/// Tag of the initial tree.
pub const INITIAL_TAG: &str = "deepred initial tree";
/// Tag of the output-unit decision list used when no initial tree is fitted.
pub const DECISION_LIST_TAG: &str = "half-in decision list";
/// Tag of the graph while sub-trees are being merged into it.
pub const MERGED_TAG: &str = "deepred-ddag";
/// Tag of the returned graph.
pub const FINISHED_TAG: &str = "Decision graph generated by DeepRED";

/// Result of an extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Reads the input layer.
    pub graph: RuleGraph,
    pub diagnostics: Diagnostics,
}

/// Extracts a rule graph with the default [`CartLearner`].
///
/// `layers` holds one activation matrix per layer (rows are samples), input first and
/// output last.
pub fn deepred(layers: &[Array2<f64>], config: &DeepRedConfig) -> Result<Extraction> {
    deepred_with(&CartLearner, layers, config)
}

/// Extracts a rule graph using `learner` for every tree fit.
pub fn deepred_with<L: TreeLearner + ?Sized>(
    learner: &L,
    layers: &[Array2<f64>],
    config: &DeepRedConfig,
) -> Result<Extraction> {
    config.validate()?;
    validate_layers(layers)?;

    let n_layers = layers.len();
    let output = layers[n_layers - 1].view();
    let reference = argmax_rows(output);
    let mut diagnostics = Diagnostics::new(config.save_process);

    // `graph_layer` is the layer whose units the graph's splits test.
    let (mut graph, graph_layer) = initial_graph(learner, layers, &reference, config)?;
    let initial_fidelity = fidelity(&graph.predict(layers[graph_layer].view()), &reference);
    info!(
        layer = graph_layer,
        fidelity = initial_fidelity,
        size = graph.node_count(),
        "initial graph"
    );
    diagnostics.record_initial(graph_layer, &graph, initial_fidelity);

    for layer in (0..graph_layer).rev() {
        let step_start = Instant::now();
        info!(layer, "working on layer");
        let features = layers[layer].view();

        let nodes = graph.all_nodes();
        let keys = graph.thresholds(&nodes);
        let subtrees = if keys.is_empty() {
            warn!(layer, "graph has no thresholds, nothing to refine");
            Vec::new()
        } else {
            let builder = SubTreeBuilder {
                learner,
                features,
                targets: layers[layer + 1].view(),
                params: &config.dt_train_params,
                options: config.subtree_convert_options(),
                layer,
            };
            builder.build_all(&keys)?
        };
        let table = builder::into_table(&subtrees);

        let mut preds = graph.predecessor_map(&nodes);
        if !table.is_empty() {
            graph.tag = MERGED_TAG.to_string();
            let stats = merge(&mut graph, &nodes, &mut preds, &table)?;
            debug!(layer, spliced = stats.spliced, skipped = stats.skipped, "merged sub-trees");
        }

        let present = graph.all_nodes();
        let step_fidelity = batched_fidelity(&graph, features, &present, &preds, &reference)?;
        let pruned = graph.prune_unreachable(&mut preds)?;
        graph.input_size = features.ncols();
        let dag_size = graph.node_count();
        info!(
            layer,
            fidelity = step_fidelity,
            size_before_reduction = present.len(),
            size = dag_size,
            bypassed = pruned.bypassed,
            "layer done"
        );

        if config.verbose > 2 {
            export::write_dot(&graph, config.output_dir.join(format!("deepred_layer_{}.dot", layer)))?;
        }
        diagnostics.record_snapshot(&graph, table);
        diagnostics.record_step(
            StepRecord {
                layer,
                size_before_reduction: present.len(),
                dag_size,
                fidelity: step_fidelity,
                step_time: step_start.elapsed(),
            },
            &subtrees,
        );
    }

    graph.tag = FINISHED_TAG.to_string();
    let removed = graph.canonicalize_redundancy();
    diagnostics.final_size = graph.node_count();
    info!(size = diagnostics.final_size, removed, "redundancy eliminated");
    if config.verbose > 2 {
        export::write_dot(&graph, config.output_dir.join("result.dot"))?;
    }

    Ok(Extraction { graph, diagnostics })
}

/// Rejects layer lists the extraction cannot work on, before any fit.
pub fn validate_layers(layers: &[Array2<f64>]) -> Result<()> {
    if layers.len() < 3 {
        return Err(DeepRedError::TooFewLayers(layers.len()));
    }
    let expected = layers[0].nrows();
    if expected == 0 {
        return Err(DeepRedError::NoSamples);
    }
    for (layer, activations) in layers.iter().enumerate() {
        if activations.nrows() != expected {
            return Err(DeepRedError::RowCountMismatch { layer, rows: activations.nrows(), expected });
        }
        if activations.ncols() == 0 {
            return Err(DeepRedError::InvalidInput(format!("layer {} has no units", layer)));
        }
    }
    Ok(())
}

/// Builds the starting graph and returns it with the index of the layer it reads.
fn initial_graph<L: TreeLearner + ?Sized>(
    learner: &L,
    layers: &[Array2<f64>],
    reference: &[usize],
    config: &DeepRedConfig,
) -> Result<(RuleGraph, usize)> {
    let output_layer = layers.len() - 1;
    if !config.build_first {
        let graph = decision_list(layers[output_layer].ncols(), DECISION_LIST_TAG)?;
        return Ok((graph, output_layer));
    }

    let hidden_layer = output_layer - 1;
    let tree = learner
        .fit(layers[hidden_layer].view(), reference, &config.initial_dt_train_params)
        .map_err(|source| DeepRedError::Fit {
            context: format!("initial tree on layer {}", hidden_layer),
            source,
        })?;
    let graph = to_rule_graph(&tree, &config.initial_convert_options(), INITIAL_TAG)?;
    Ok((graph, hidden_layer))
}

/// Fidelity of the first label of each sample's leaf, evaluated batch-wise.
fn batched_fidelity(
    graph: &RuleGraph,
    features: ArrayView2<'_, f64>,
    present: &[NodeId],
    preds: &PredecessorMap,
    reference: &[usize],
) -> Result<f64> {
    let predicted: Vec<Option<usize>> = graph
        .evaluate_batched(features, present, preds)?
        .into_iter()
        .map(|labels| labels.first().copied())
        .collect();
    Ok(fidelity(&predicted, reference))
}
