//! DeepRED: extraction of decision rule graphs from the recorded activations of a
//! feed-forward network, one layer at a time from the output back to the input.

pub mod config;
pub mod convert;
pub mod data;
pub mod deepred;
pub mod error;
pub mod export;
pub mod graph;
pub mod learner;
pub mod results;
pub mod utils;

pub use crate::config::DeepRedConfig;
pub use crate::deepred::{deepred, deepred_with, Diagnostics, Extraction};
pub use crate::error::{DeepRedError, Result};
pub use crate::graph::{Branch, NodeId, PredecessorMap, RuleGraph, RuleNode, ThresholdKey};
pub use crate::learner::{CartLearner, FittedTree, LearnerError, LearnerParams, TreeLearner};
