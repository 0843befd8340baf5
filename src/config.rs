//! Run configuration for the extraction, loadable from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::level_filters::LevelFilter;

use crate::convert::ConvertOptions;
use crate::error::{DeepRedError, Result};
use crate::learner::LearnerParams;

// --- Defaults ---
pub const DEFAULT_SUBTREE_MAX_DEPTH: u64 = 3;
pub const DEFAULT_INITIAL_MAX_DEPTH: u64 = 5;
pub const DEFAULT_MIN_SPLIT_FRACTION: f64 = 0.02;
pub const DEFAULT_OUTPUT_DIR: &str = "runs/";
/// Highest accepted `verbose` level.
pub const MAX_VERBOSE: u8 = 3;

/// Every option of a run. Missing keys in a JSON file take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeepRedConfig {
    /// Keep a single class on the leaves of the initial graph.
    pub one_class_on_leafs: bool,
    /// Learner parameters of every per-threshold fit.
    pub dt_train_params: LearnerParams,
    /// Learner parameters of the initial hidden → output fit.
    pub initial_dt_train_params: LearnerParams,
    pub min_split_fraction: f64,
    pub min_rule_samples: usize,
    /// 0 = warnings only, 1 = per layer, 2 = per sub-tree, 3 = per splice and DOT dumps.
    pub verbose: u8,
    pub output_dir: PathBuf,
    /// Keep a snapshot of the graph after every step and of every sub-tree table.
    pub save_process: bool,
    /// Start from a fitted tree instead of the output-unit decision list.
    pub build_first: bool,
}

impl Default for DeepRedConfig {
    fn default() -> Self {
        DeepRedConfig {
            one_class_on_leafs: true,
            dt_train_params: max_depth_params(DEFAULT_SUBTREE_MAX_DEPTH),
            initial_dt_train_params: max_depth_params(DEFAULT_INITIAL_MAX_DEPTH),
            min_split_fraction: DEFAULT_MIN_SPLIT_FRACTION,
            min_rule_samples: 1,
            verbose: 1,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            save_process: false,
            build_first: true,
        }
    }
}

fn max_depth_params(depth: u64) -> LearnerParams {
    LearnerParams::from([("max_depth".to_string(), json!(depth))])
}

impl DeepRedConfig {
    /// Reads and validates a configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: DeepRedConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_split_fraction) {
            return Err(DeepRedError::InvalidConfig(format!(
                "min_split_fraction must be in [0, 1], got {}",
                self.min_split_fraction
            )));
        }
        if self.min_rule_samples == 0 {
            return Err(DeepRedError::InvalidConfig("min_rule_samples must be at least 1".to_string()));
        }
        if self.verbose > MAX_VERBOSE {
            return Err(DeepRedError::InvalidConfig(format!(
                "verbose must be at most {}, got {}",
                MAX_VERBOSE, self.verbose
            )));
        }
        Ok(())
    }

    /// Log level matching `verbose`.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Conversion options of the initial graph.
    pub fn initial_convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            one_class_per_leaf: self.one_class_on_leafs,
            min_rule_samples: self.min_rule_samples,
            min_split_fraction: self.min_split_fraction,
        }
    }

    /// Conversion options of the per-threshold sub-trees. Their leaves must name a single
    /// boolean outcome.
    pub fn subtree_convert_options(&self) -> ConvertOptions {
        ConvertOptions { one_class_per_leaf: true, ..self.initial_convert_options() }
    }
}
