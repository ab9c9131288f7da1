//! Exact distance field for the periodic sphere lattice.
//!
//! The lattice is tiled along `x` (period `d1`) and `z` (period `d2`); `y` is
//! left untiled. Every lattice cell holds a sphere of radius [`SPHERE_RADIUS`]
//! centred on the cell origin.

use glam::Vec3;

use crate::Scalar;

/// Radius of the sphere placed in every lattice cell.
pub const SPHERE_RADIUS: Scalar = 1.0;

/// One evaluation point: three spatial coordinates plus the two lattice periods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point5D {
    pub x: Scalar,
    pub y: Scalar,
    pub z: Scalar,
    pub d1: Scalar,
    pub d2: Scalar,
}

impl Point5D {
    pub fn new(position: [Scalar; 3], dims: [Scalar; 2]) -> Self {
        Self {
            x: position[0],
            y: position[1],
            z: position[2],
            d1: dims[0],
            d2: dims[1],
        }
    }

    pub fn from_row(row: [Scalar; 5]) -> Self {
        Self {
            x: row[0],
            y: row[1],
            z: row[2],
            d1: row[3],
            d2: row[4],
        }
    }

    /// Spatial part after folding `x` and `z` into the centred lattice cell.
    pub fn folded(&self) -> Vec3 {
        Vec3::new(wrap(self.x, self.d1), self.y, wrap(self.z, self.d2))
    }

    pub fn distance(&self) -> Scalar {
        self.folded().length() - SPHERE_RADIUS
    }
}

/// Modulo whose result carries the sign of `period`.
///
/// For positive periods the result lies in `[0, period)`. Rounding can push
/// `r + period` up to exactly `period` when `r` is a tiny negative remainder;
/// that case folds back to zero.
#[inline]
pub fn floored_mod(value: Scalar, period: Scalar) -> Scalar {
    let mut r = value % period;
    if r != 0.0 && (r < 0.0) != (period < 0.0) {
        r += period;
    }
    if r.abs() >= period.abs() {
        r = 0.0;
    }
    r
}

/// Maps `value` into the cell centred on the origin, `[-period/2, period/2)`.
#[inline]
pub fn wrap(value: Scalar, period: Scalar) -> Scalar {
    let half = period * 0.5;
    floored_mod(value + half, period) - half
}

/// Signed distance from `position` to the nearest lattice sphere.
///
/// Negative inside a sphere, zero on its surface, positive outside. Periods
/// must be finite and non-zero; callers validate them beforehand.
#[inline]
pub fn lattice_distance(position: [Scalar; 3], dims: [Scalar; 2]) -> Scalar {
    Point5D::new(position, dims).distance()
}
