//! GPU accelerator for the lattice SDF built on `wgpu` compute passes.

pub mod accelerator;
pub mod context;

use hyperspace_core::{Accelerator, AcceleratorInitError, AcceleratorSettings, BatchEvaluator};

pub use accelerator::GpuAccelerator;
pub use context::{GpuContext, ProbeOptions};

/// Probe suitable for [`BatchEvaluator::initialize`]: hardware adapters only.
pub fn probe(settings: &AcceleratorSettings) -> Result<Box<dyn Accelerator>, AcceleratorInitError> {
    let accelerator = GpuAccelerator::new(settings, ProbeOptions::default())?;
    Ok(Box::new(accelerator))
}

/// Builds an evaluator that uses the GPU when `settings` request it and one is present.
pub fn evaluator(settings: &AcceleratorSettings) -> BatchEvaluator {
    BatchEvaluator::initialize(settings, probe)
}
