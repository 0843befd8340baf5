//! Loading of per-layer activation matrices.
//!
//! Two layouts are supported:
//! - one JSON file `{"layers": [[[f64, ..], ..], ..]}` holding every layer, input first;
//! - one headerless CSV file per layer, one sample per row.
//!
//! This module does not have performance critical code. Shape checks are strict.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use csv::ReaderBuilder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeepRedError, Result};

/// On-disk layout of the JSON activation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationFile {
    /// `layers[l][sample][unit]`.
    pub layers: Vec<Vec<Vec<f64>>>,
}

impl ActivationFile {
    /// Converts every layer into a matrix. Rows of a layer must have equal length.
    pub fn into_matrices(self) -> Result<Vec<Array2<f64>>> {
        self.layers
            .into_iter()
            .enumerate()
            .map(|(layer, rows)| rows_to_matrix(rows, &format!("layer {}", layer)))
            .collect()
    }
}

/// Loads every layer from a JSON activation file.
pub fn load_activations_json<P: AsRef<Path>>(path: P) -> Result<Vec<Array2<f64>>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let file: ActivationFile = serde_json::from_reader(reader)?;
    let layers = file.into_matrices()?;
    debug!("loaded {} layers from {:?}", layers.len(), path);
    Ok(layers)
}

/// Loads one layer from a headerless CSV file.
pub fn load_layer_csv<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let values = record
            .iter()
            .enumerate()
            .map(|(column, field)| {
                field.parse::<f64>().map_err(|e| {
                    DeepRedError::InvalidInput(format!(
                        "{:?}: row {}, column {}: cannot parse {:?} ({})",
                        path, row, column, field, e
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(values);
    }
    let matrix = rows_to_matrix(rows, &format!("{:?}", path))?;
    debug!("loaded {:?} with shape {:?}", path, matrix.dim());
    Ok(matrix)
}

/// Loads one layer per CSV file, in the given order.
pub fn load_layers_csv<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Array2<f64>>> {
    paths.iter().map(load_layer_csv).collect()
}

fn rows_to_matrix(rows: Vec<Vec<f64>>, what: &str) -> Result<Array2<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().position(|r| r.len() != n_cols) {
        return Err(DeepRedError::InvalidInput(format!(
            "{}: row {} has {} values, expected {}",
            what,
            row,
            rows[row].len(),
            n_cols
        )));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|e| DeepRedError::InvalidInput(format!("{}: {}", what, e)))
}
