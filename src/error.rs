//! Error types shared by the extraction pipeline.

use thiserror::Error;

use crate::learner::LearnerError;

/// Errors raised while loading activations, fitting sub-trees or rewriting the rule graph.
#[derive(Debug, Error)]
pub enum DeepRedError {
    #[error("expected at least 3 activation layers (input, hidden, output), got {0}")]
    TooFewLayers(usize),

    #[error("activation matrices contain no samples")]
    NoSamples,

    #[error("layer {layer} has {rows} rows, expected {expected} (rows of the input layer)")]
    RowCountMismatch {
        layer: usize,
        rows: usize,
        expected: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A decision tree fit failed. Aborts the whole extraction.
    #[error("decision tree fit failed for {context}: {source}")]
    Fit {
        context: String,
        #[source]
        source: LearnerError,
    },

    /// The predecessor bookkeeping disagrees with the graph structure.
    #[error("predecessor map inconsistency: {0}")]
    Invariant(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeepRedError>;
