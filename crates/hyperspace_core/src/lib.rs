//! Core lattice SDF logic that remains independent of GPU backends or transports.
//!
//! This crate hosts:
//! - the exact distance field for the periodic sphere lattice
//! - batch validation and accelerator row packing
//! - the dispatcher that prefers an accelerator and falls back to the CPU
//! - startup configuration shared by the driver and the accelerator probe

pub mod accelerator;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod sdf;
pub mod wire;

/// Convenience re-export for the scalar type used across the engine.
pub type Scalar = f32;

/// Maximum allowed absolute difference between accelerated and CPU distances.
pub const PARITY_TOLERANCE: Scalar = 1e-4;

/// Largest `|x|` or `|z|` for which [`PARITY_TOLERANCE`] is guaranteed.
///
/// WGSL defines f32 `%` as `x - y * trunc(x / y)`, which rounds the product to
/// the precision of the coordinate; Rust's `%` is exact. At a few thousand
/// units the difference alone exceeds the tolerance.
pub const PARITY_COORDINATE_LIMIT: Scalar = 512.0;

pub use accelerator::{
    Accelerator, AcceleratorCapability, AcceleratorError, AcceleratorInitError,
    AcceleratorSettings, TensorShape,
};
pub use batch::{AcceleratorRow, DimsPair, ValidationError};
pub use config::EngineSettings;
pub use dispatch::BatchEvaluator;
pub use sdf::{lattice_distance, wrap};
pub use wire::{EngineStatus, SdfRequest, SdfResponse};
