//! Export of rule graphs and run diagnostics: JSON for reloading and further analysis,
//! Graphviz DOT for visualization.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::graph::{RuleGraph, RuleNode};

/// Renders the present nodes of `graph` as a Graphviz digraph. True edges are solid,
/// false edges dashed; absent branches are not drawn.
pub fn export_visualization(graph: &RuleGraph) -> String {
    let mut dot = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(dot, "digraph {:?} {{", graph.tag);
    let _ = writeln!(dot, "  node [shape=box, fontname=\"Helvetica\"];");

    for id in graph.all_nodes() {
        match graph.node(id) {
            RuleNode::Leaf { classes } => {
                let labels: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
                let _ = writeln!(dot, "  n{} [label=\"{{{}}}\", shape=ellipse];", id, labels.join(", "));
            }
            RuleNode::Split { feature, threshold, true_branch, false_branch } => {
                let _ = writeln!(dot, "  n{} [label=\"x_{} > {}\"];", id, feature, threshold);
                if let Some(child) = true_branch {
                    let _ = writeln!(dot, "  n{} -> n{} [label=\"true\"];", id, child);
                }
                if let Some(child) = false_branch {
                    let _ = writeln!(dot, "  n{} -> n{} [label=\"false\", style=dashed];", id, child);
                }
            }
        }
    }
    dot.push_str("}\n");
    dot
}

/// Writes the DOT rendering of `graph`, creating parent directories as needed.
pub fn write_dot<P: AsRef<Path>>(graph: &RuleGraph, path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    fs::write(path, export_visualization(graph))?;
    debug!("wrote visualization to {:?}", path);
    Ok(())
}

/// Writes any serializable value as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    debug!("wrote {:?}", path);
    Ok(())
}

/// Reads a graph written by [`write_json`] and checks its structure.
pub fn read_graph_json<P: AsRef<Path>>(path: P) -> Result<RuleGraph> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let raw: RuleGraph = serde_json::from_reader(reader)?;
    RuleGraph::from_parts(raw.nodes().to_vec(), raw.root(), raw.tag.clone(), raw.input_size)
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}
