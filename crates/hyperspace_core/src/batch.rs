//! Batch marshalling: period validation, accelerator row packing and the CPU
//! reference path.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sdf::lattice_distance;
use crate::Scalar;

/// Batches at least this long are evaluated across the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 1024;

/// Width of one accelerator input row: `x, y, z, dim0, dim1`.
pub const ROW_WIDTH: usize = 5;

/// Rejected lattice periods. The only error a caller of `evaluate` can see.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    #[error("lattice period {axis} is not finite ({value})")]
    NonFinitePeriod { axis: usize, value: Scalar },

    #[error("lattice period {axis} is zero")]
    ZeroPeriod { axis: usize },
}

/// Lattice periods shared by every position of a batch.
///
/// `dim0` tiles `x`, `dim1` tiles `z`. Only constructible through
/// [`DimsPair::new`], so a value of this type always holds finite, non-zero
/// periods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimsPair {
    dim0: Scalar,
    dim1: Scalar,
}

impl DimsPair {
    pub fn new(dims: [Scalar; 2]) -> Result<Self, ValidationError> {
        for (axis, value) in dims.iter().copied().enumerate() {
            if !value.is_finite() {
                return Err(ValidationError::NonFinitePeriod { axis, value });
            }
            if value == 0.0 {
                return Err(ValidationError::ZeroPeriod { axis });
            }
        }
        Ok(Self {
            dim0: dims[0],
            dim1: dims[1],
        })
    }

    pub fn dim0(&self) -> Scalar {
        self.dim0
    }

    pub fn dim1(&self) -> Scalar {
        self.dim1
    }

    pub fn to_array(self) -> [Scalar; 2] {
        [self.dim0, self.dim1]
    }

    /// Advances both periods by `step`, the per-frame increment of a fly-through.
    pub fn advanced(self, step: Scalar) -> Result<Self, ValidationError> {
        Self::new([self.dim0 + step, self.dim1 + step])
    }
}

impl<'de> Deserialize<'de> for DimsPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <[Scalar; 2]>::deserialize(deserializer)?;
        DimsPair::new(raw).map_err(serde::de::Error::custom)
    }
}

/// One `N x 5` tensor row as laid out for the accelerator.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AcceleratorRow {
    pub position: [Scalar; 3],
    pub dims: [Scalar; 2],
}

const _: () = assert!(core::mem::size_of::<AcceleratorRow>() == ROW_WIDTH * 4);

impl AcceleratorRow {
    pub fn to_array(&self) -> [Scalar; ROW_WIDTH] {
        [
            self.position[0],
            self.position[1],
            self.position[2],
            self.dims[0],
            self.dims[1],
        ]
    }
}

/// Builds the accelerator tensor, broadcasting `dims` into every row.
pub fn pack_rows(positions: &[[Scalar; 3]], dims: DimsPair) -> Vec<AcceleratorRow> {
    let dims = dims.to_array();
    positions
        .iter()
        .map(|&position| AcceleratorRow { position, dims })
        .collect()
}

/// CPU reference path. Output index `i` always corresponds to `positions[i]`.
pub fn evaluate_cpu(positions: &[[Scalar; 3]], dims: DimsPair) -> Vec<Scalar> {
    let dims = dims.to_array();
    if positions.len() >= PARALLEL_THRESHOLD {
        positions
            .par_iter()
            .map(|&p| lattice_distance(p, dims))
            .collect()
    } else {
        positions
            .iter()
            .map(|&p| lattice_distance(p, dims))
            .collect()
    }
}
