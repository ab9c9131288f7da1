//! Numeric helpers for comparing CPU and accelerator outputs.

use serde::Serialize;

use crate::Scalar;

/// Computes a simple checksum over distance samples to aid parity testing.
pub fn checksum(values: &[Scalar]) -> Scalar {
    values.iter().copied().fold(0.0, |acc, v| acc + v)
}

/// Residuals between a reference series and a candidate series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParityReport {
    pub compared: usize,
    pub max_abs_error: Scalar,
    pub mean_abs_error: Scalar,
    pub worst_index: Option<usize>,
    /// Set when the two series differ in length; only the common prefix is compared.
    pub length_mismatch: bool,
}

impl ParityReport {
    pub fn within(&self, tolerance: Scalar) -> bool {
        !self.length_mismatch && self.max_abs_error <= tolerance
    }
}

/// Element-wise comparison. A NaN on either side counts as an infinite error.
pub fn compare(reference: &[Scalar], candidate: &[Scalar]) -> ParityReport {
    let mut max_abs_error = 0.0f32;
    let mut worst_index = None;
    let mut total = 0.0f64;
    let compared = reference.len().min(candidate.len());

    for (idx, (lhs, rhs)) in reference.iter().zip(candidate.iter()).enumerate() {
        let err = (lhs - rhs).abs();
        let err = if err.is_nan() { Scalar::INFINITY } else { err };
        total += err as f64;
        if worst_index.is_none() || err > max_abs_error {
            max_abs_error = err;
            worst_index = Some(idx);
        }
    }

    ParityReport {
        compared,
        max_abs_error,
        mean_abs_error: if compared == 0 {
            0.0
        } else {
            (total / compared as f64) as Scalar
        },
        worst_index,
        length_mismatch: reference.len() != candidate.len(),
    }
}
