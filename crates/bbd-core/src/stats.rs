//! Shared numerical helpers: the canonical percentile function, descriptive
//! statistics, and the Cholesky factorization used for correlation handling.
//!
//! There is exactly one percentile implementation in this crate and its input
//! scale is 0-100. Callers must never pass fractions.

use crate::error::BbdError;
use crate::types::Percentiles;
use crate::BbdResult;

/// Compute the percentile value from a **sorted** slice using linear interpolation.
///
/// `p` is on the 0-100 scale.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!((0.0..=100.0).contains(&p), "percentile scale is 0-100, got {p}");
    assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Sort a slice in place (NaN-tolerant total order) and extract the standard band.
pub fn percentile_band(values: &mut [f64]) -> Percentiles {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Percentiles {
        p10: percentile_sorted(values, 10.0),
        p25: percentile_sorted(values, 25.0),
        p50: percentile_sorted(values, 50.0),
        p75: percentile_sorted(values, 75.0),
        p90: percentile_sorted(values, 90.0),
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// Median of a **sorted** slice.
pub fn median_sorted(sorted: &[f64]) -> f64 {
    assert!(!sorted.is_empty());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ---------------------------------------------------------------------------
// Correlation matrix handling
// ---------------------------------------------------------------------------

/// Validate shape, symmetry, and unit diagonal of a correlation matrix.
pub fn validate_correlation_matrix(corr: &[Vec<f64>], n: usize) -> BbdResult<()> {
    if corr.len() != n {
        return Err(BbdError::ConfigInvalid {
            field: "correlation_matrix".into(),
            reason: format!("Must be {n}x{n}, got {} rows", corr.len()),
        });
    }
    for (i, row) in corr.iter().enumerate() {
        if row.len() != n {
            return Err(BbdError::ConfigInvalid {
                field: "correlation_matrix".into(),
                reason: format!("Row {i} has {} columns, expected {n}", row.len()),
            });
        }
    }
    for i in 0..n {
        if (corr[i][i] - 1.0).abs() > 1e-9 {
            return Err(BbdError::ConfigInvalid {
                field: "correlation_matrix".into(),
                reason: format!("Diagonal element [{i}][{i}] must be 1.0, got {}", corr[i][i]),
            });
        }
        for j in 0..i {
            if !corr[i][j].is_finite() || (corr[i][j] - corr[j][i]).abs() > 1e-9 {
                return Err(BbdError::ConfigInvalid {
                    field: "correlation_matrix".into(),
                    reason: format!("Matrix is not symmetric at [{i}][{j}]"),
                });
            }
        }
    }
    Ok(())
}

/// Cholesky factorization of a symmetric positive semi-definite matrix.
///
/// Returns the lower-triangular factor L with A = L * L^T. Fails with
/// `ConfigInvalid` when the matrix is not PSD, so the factorization attempt
/// doubles as the PSD check required at configuration time.
pub fn cholesky(matrix: &[Vec<f64>]) -> BbdResult<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0_f64; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i][k] * l[j][k];
            }
            if i == j {
                let d = matrix[i][i] - sum;
                // Tolerate tiny negative drift on a semi-definite boundary
                if d < -1e-10 {
                    return Err(BbdError::ConfigInvalid {
                        field: "correlation_matrix".into(),
                        reason: "Matrix is not positive semi-definite (Cholesky failed)".into(),
                    });
                }
                l[i][j] = d.max(0.0).sqrt();
            } else if l[j][j].abs() < 1e-12 {
                // Degenerate pivot: column already fully explained
                l[i][j] = 0.0;
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }
    Ok(l)
}
