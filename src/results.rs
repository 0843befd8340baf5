use std::fs::File;
use std::path::Path;
use std::time::Duration;

use csv::WriterBuilder;
use tracing::info;

use crate::deepred::{Diagnostics, Extraction};
use crate::error::Result;
use crate::export;
use crate::utils::calculate_stats;

pub const RESULT_JSON: &str = "result.json";
pub const DIAGNOSTICS_JSON: &str = "diagnostics.json";
pub const STEPS_CSV: &str = "steps.csv";

/// One row of the per-step report.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub step: usize,
    pub layer: usize,
    pub fidelity: f64,
    pub size_before_reduction: usize,
    pub dag_size: usize,
    // --- Sub-tree metrics, zero for the initial step ---
    pub sub_trees: usize,
    pub sub_tree_acc_mean: f64,
    pub sub_tree_size_total: usize,
    // --- Wall Time Metrics (seconds) ---
    pub sub_tree_time_min: f64,
    pub sub_tree_time_median: f64,
    pub sub_tree_time_max: f64,
    pub sub_tree_time_mean: f64,
    pub sub_tree_time_std_dev: f64,
    pub step_time: f64,
}

/// Flattens the diagnostics into one row per step, the initial fit first.
pub fn step_summaries(diagnostics: &Diagnostics) -> Vec<StepSummary> {
    (0..diagnostics.steps())
        .map(|step| {
            // Refinement step `step` owns entry `step - 1` of the per-refinement vectors.
            let refinement = step.checked_sub(1);
            let accuracies = refinement.and_then(|r| diagnostics.sub_tree_acc.get(r)).map_or(&[][..], Vec::as_slice);
            let sizes = refinement.and_then(|r| diagnostics.sub_tree_size.get(r)).map_or(&[][..], Vec::as_slice);
            let times: Vec<Duration> = refinement
                .and_then(|r| diagnostics.sub_tree_time.get(r))
                .map_or(&[][..], Vec::as_slice)
                .iter()
                .map(|&seconds| Duration::from_secs_f64(seconds))
                .collect();
            let (min, median, max, mean, std_dev) = calculate_stats(&times);

            StepSummary {
                step,
                layer: diagnostics.layers[step],
                fidelity: diagnostics.fidelity[step],
                size_before_reduction: diagnostics.size_before_reduction[step],
                dag_size: diagnostics.dag_size[step],
                sub_trees: accuracies.len(),
                sub_tree_acc_mean: if accuracies.is_empty() {
                    0.0
                } else {
                    accuracies.iter().sum::<f64>() / accuracies.len() as f64
                },
                sub_tree_size_total: sizes.iter().sum(),
                sub_tree_time_min: min,
                sub_tree_time_median: median,
                sub_tree_time_max: max,
                sub_tree_time_mean: mean,
                sub_tree_time_std_dev: std_dev,
                step_time: refinement.and_then(|r| diagnostics.step_time.get(r)).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// Prints a formatted summary table of the extraction to the console.
pub fn print_summary_table(extraction: &Extraction) {
    println!("\n======== DEEPRED SUMMARY ({}) ========", extraction.graph.tag);
    println!(
        "Step | Layer | Fidelity | Size (merged) | Size (pruned) | Sub-trees | Sub-tree Acc | {} | Step Time (s)",
        "Sub-tree Time (min/median/max, s)"
    );
    println!(
        "-----|-------|----------|---------------|---------------|-----------|--------------|-{}-|--------------",
        "-".repeat(33)
    );
    for row in step_summaries(&extraction.diagnostics) {
        let sub_tree_time = format!(
            "{:.3} / {:.3} / {:.3}",
            row.sub_tree_time_min, row.sub_tree_time_median, row.sub_tree_time_max
        );
        println!(
            "{:>4} | {:>5} | {:>8.4} | {:>13} | {:>13} | {:>9} | {:>12.4} | {:>33} | {:>13.3}",
            row.step,
            row.layer,
            row.fidelity,
            row.size_before_reduction,
            row.dag_size,
            row.sub_trees,
            row.sub_tree_acc_mean,
            sub_tree_time,
            row.step_time
        );
    }
    println!(
        "Final graph: {} nodes, depth {}, reads {} inputs",
        extraction.diagnostics.final_size,
        extraction.graph.depth(),
        extraction.graph.input_size
    );
    println!("{}", "=".repeat(124));
}

/// Writes the header and one row per step to `csv_path`. Creates or truncates the file.
pub fn write_steps_csv<P: AsRef<Path>>(rows: &[StepSummary], csv_path: P) -> Result<()> {
    let file = File::create(csv_path.as_ref())?;
    let mut wtr = WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "Step", "Layer", "Fidelity", "SizeBeforeReduction", "DagSize",
        "SubTrees", "SubTreeAcc_Mean", "SubTreeSize_Total",
        // Sub-tree wall time
        "SubTreeTime_Min", "SubTreeTime_Median", "SubTreeTime_Max", "SubTreeTime_Mean", "SubTreeTime_StdDev",
        "StepTime",
    ])?;

    for row in rows {
        wtr.write_record(&[
            row.step.to_string(),
            row.layer.to_string(),
            format!("{:.6}", row.fidelity),
            row.size_before_reduction.to_string(),
            row.dag_size.to_string(),
            row.sub_trees.to_string(),
            format!("{:.6}", row.sub_tree_acc_mean),
            row.sub_tree_size_total.to_string(),
            format!("{:.6}", row.sub_tree_time_min),
            format!("{:.6}", row.sub_tree_time_median),
            format!("{:.6}", row.sub_tree_time_max),
            format!("{:.6}", row.sub_tree_time_mean),
            format!("{:.6}", row.sub_tree_time_std_dev),
            format!("{:.6}", row.step_time),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes the graph, the diagnostics and the per-step CSV into `dir`.
pub fn write_run<P: AsRef<Path>>(extraction: &Extraction, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    export::write_json(&extraction.graph, dir.join(RESULT_JSON))?;
    export::write_json(&extraction.diagnostics, dir.join(DIAGNOSTICS_JSON))?;
    write_steps_csv(&step_summaries(&extraction.diagnostics), dir.join(STEPS_CSV))?;
    info!("results written to {:?}", dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RuleGraph, ThresholdKey};

    fn diagnostics() -> Diagnostics {
        Diagnostics {
            layers: vec![1, 0],
            dag_size: vec![3, 5],
            size_before_reduction: vec![3, 7],
            fidelity: vec![0.75, 1.0],
            sub_tree_keys: vec![vec![ThresholdKey::new(0, 0.5), ThresholdKey::new(1, 0.5)]],
            sub_tree_acc: vec![vec![1.0, 0.5]],
            sub_tree_size: vec![vec![3, 1]],
            sub_tree_time: vec![vec![0.25, 0.75]],
            step_time: vec![1.5],
            final_size: 5,
            process: None,
        }
    }

    #[test]
    fn test_step_summaries() {
        let rows = step_summaries(&diagnostics());
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].layer, 1);
        assert_eq!(rows[0].sub_trees, 0);
        assert_eq!(rows[0].step_time, 0.0);

        let step = &rows[1];
        assert_eq!(step.sub_trees, 2);
        assert_eq!(step.sub_tree_acc_mean, 0.75);
        assert_eq!(step.sub_tree_size_total, 4);
        assert!((step.sub_tree_time_min - 0.25).abs() < 1e-9);
        assert!((step.sub_tree_time_max - 0.75).abs() < 1e-9);
        assert!((step.sub_tree_time_median - 0.5).abs() < 1e-9);
        assert_eq!(step.step_time, 1.5);
    }

    #[test]
    fn test_write_run() {
        let dir = tempfile::tempdir().unwrap();
        let extraction = Extraction {
            graph: RuleGraph::leaf(vec![0], "t", 2).unwrap(),
            diagnostics: diagnostics(),
        };
        write_run(&extraction, dir.path()).unwrap();

        let csv = std::fs::read_to_string(dir.path().join(STEPS_CSV)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Step,Layer,Fidelity"));
        assert!(lines[2].starts_with("1,0,1.000000,7,5,2"));

        let graph = export::read_graph_json(dir.path().join(RESULT_JSON)).unwrap();
        assert_eq!(graph, extraction.graph);
        let diagnostics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(DIAGNOSTICS_JSON)).unwrap()).unwrap();
        assert_eq!(diagnostics["final_size"], 5);
    }
}
