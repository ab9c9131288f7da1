//! CPU reference cases for the lattice distance parity runs.

use glam::Vec3;
use hyperspace_core::{lattice_distance, AcceleratorRow};
pub use hyperspace_core::Scalar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// One position evaluated against one pair of lattice periods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeCase {
    pub position: Vec3,
    pub dims: [Scalar; 2],
}

impl LatticeCase {
    pub fn new(position: [Scalar; 3], dims: [Scalar; 2]) -> Self {
        Self {
            position: Vec3::from_array(position),
            dims,
        }
    }

    pub fn reference(&self) -> Scalar {
        lattice_distance(self.position.to_array(), self.dims)
    }

    pub fn to_row(&self) -> AcceleratorRow {
        AcceleratorRow {
            position: self.position.to_array(),
            dims: self.dims,
        }
    }
}

/// Deterministic generator for lattice parity cases.
pub fn generate_lattice_cases(count: usize, seed: u64) -> Vec<LatticeCase> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut cases = Vec::with_capacity(count);
    for _ in 0..count {
        let position = Vec3::new(
            rng.gen_range(-50.0..=50.0),
            rng.gen_range(-4.0..=4.0),
            rng.gen_range(-50.0..=50.0),
        );
        let dims = [rng.gen_range(1.0..=6.0), rng.gen_range(1.0..=6.0)];
        cases.push(LatticeCase { position, dims });
    }
    cases
}

/// Edge/stress cases: negative coordinates, cell boundaries, large magnitudes
/// and negative periods. Coordinates stay within
/// [`hyperspace_core::PARITY_COORDINATE_LIMIT`].
pub fn lattice_stress_cases() -> Vec<LatticeCase> {
    vec![
        LatticeCase::new([0.0, 0.0, 0.0], [2.0, 2.0]),
        LatticeCase::new([1.0, 0.0, 0.0], [2.0, 2.0]),
        LatticeCase::new([-1.0, 0.0, -1.0], [2.0, 2.0]),
        LatticeCase::new([-0.6, 0.0, 0.6], [1.0, 1.0]),
        LatticeCase::new([-7.3, 2.5, -11.9], [2.5, 3.5]),
        LatticeCase::new([1.25, -0.5, 1.75], [2.5, 3.5]),
        LatticeCase::new([0.0, 12.0, 0.0], [2.0, 2.0]),
        LatticeCase::new([1e-6, -1e-6, 1e-6], [0.5, 0.5]),
        LatticeCase::new([256.75, 1.0, -384.25], [3.0, 5.0]),
        LatticeCase::new([-511.5, -3.0, 498.125], [1.5, 0.75]),
        LatticeCase::new([0.3, 1.2, -0.4], [-2.5, 0.75]),
        LatticeCase::new([-4.2, 0.0, 3.3], [-1.5, -3.0]),
        LatticeCase::new([2.0, 0.0, 2.0], [0.125, 0.125]),
        LatticeCase::new([5.0, 0.0, -5.0], [40.0, 40.0]),
    ]
}

pub fn references(cases: &[LatticeCase]) -> Vec<Scalar> {
    cases.iter().map(LatticeCase::reference).collect()
}

pub fn to_rows(cases: &[LatticeCase]) -> Vec<AcceleratorRow> {
    cases.iter().map(LatticeCase::to_row).collect()
}
