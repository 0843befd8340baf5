//! Utility functions for class-label handling, fidelity and timing statistics.

use std::time::Duration;

use ndarray::ArrayView2;

/// Index of the largest count. Ties are broken by choosing the lower index.
///
/// Returns 0 if `counts` is empty.
pub fn argmax_counts(counts: &[usize]) -> usize {
    let mut max_count = 0;
    let mut winning_index = 0;
    for (index, &count) in counts.iter().enumerate() {
        if index == 0 || count > max_count {
            max_count = count;
            winning_index = index;
        }
    }
    winning_index
}

/// Argmax of every row (ties go to the lower index). `NaN` entries never win.
pub fn argmax_rows(values: ArrayView2<'_, f64>) -> Vec<usize> {
    values
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (index, &value) in row.iter().enumerate() {
                if value > row[best] || row[best].is_nan() {
                    best = index;
                }
            }
            best
        })
        .collect()
}

/// Fraction of samples whose prediction equals the reference class. A missing prediction
/// counts as a mismatch. Returns 0 for empty input.
pub fn fidelity(predicted: &[Option<usize>], reference: &[usize]) -> f64 {
    debug_assert_eq!(predicted.len(), reference.len());
    if reference.is_empty() {
        return 0.0;
    }
    let hits = predicted
        .iter()
        .zip(reference)
        .filter(|&(prediction, expected)| *prediction == Some(*expected))
        .count();
    hits as f64 / reference.len() as f64
}

/// Calculates min, median, max, mean, and standard deviation for a slice of Durations.
///
/// # Returns
/// A tuple `(min_sec, median_sec, max_sec, mean_sec, std_dev_sec)`.
/// Returns `(0.0, 0.0, 0.0, 0.0, 0.0)` if the slice is empty.
pub fn calculate_stats(durations: &[Duration]) -> (f64, f64, f64, f64, f64) {
    if durations.is_empty() {
        return (0.0, 0.0, 0.0, 0.0, 0.0);
    }

    let mut times_sec: Vec<f64> = durations.iter().map(|d| d.as_secs_f64()).collect();
    let n = times_sec.len();
    let n_f64 = n as f64;

    let mean = times_sec.iter().sum::<f64>() / n_f64;
    // Population variance.
    let variance = times_sec.iter().map(|&t| (t - mean).powi(2)).sum::<f64>() / n_f64;

    times_sec.sort_unstable_by(f64::total_cmp);
    let median = if n % 2 == 1 {
        times_sec[n / 2]
    } else {
        (times_sec[n / 2 - 1] + times_sec[n / 2]) / 2.0
    };

    (times_sec[0], median, times_sec[n - 1], mean, variance.sqrt())
}
