use ndarray::{Array1, Array2, Zip};

use super::accumulator::Marginals;

/// Aggregate matrix corrected by the mean-normalized marginals of its list
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateNormalization {
    pub rows: Array1<f64>,
    pub cols: Array1<f64>,
    pub corrected: Array2<f64>,
}

impl AggregateNormalization {
    pub fn compute(matrix: &Array2<f64>, marginals: &Marginals) -> Self {
        let rows = normalize_by_mean(&marginals.rows);
        let cols = normalize_by_mean(&marginals.cols);
        let corrected = correct(matrix, &rows, &cols);
        Self {
            rows,
            cols,
            corrected,
        }
    }
}

/// Divide by the mean. A vector with no positive mean reads as all zeros.
pub fn normalize_by_mean(vector: &Array1<f64>) -> Array1<f64> {
    match vector.mean() {
        Some(mean) if mean > 0.0 && mean.is_finite() => vector / mean,
        _ => Array1::zeros(vector.len()),
    }
}

/// `matrix[r][c] / (rows[r] * cols[c])`, or 0 where that product is not positive
pub fn correct(matrix: &Array2<f64>, rows: &Array1<f64>, cols: &Array1<f64>) -> Array2<f64> {
    let mut out = Array2::zeros(matrix.raw_dim());
    Zip::indexed(&mut out)
        .and(matrix)
        .for_each(|(r, c), out, &value| {
            let denom = rows[r] * cols[c];
            if denom > 0.0 && denom.is_finite() {
                *out = value / denom;
            }
        });
    out
}
