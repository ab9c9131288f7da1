use anyhow::{Context, Result};
use hyperspace_core::{
    metrics::{self, ParityReport},
    Accelerator, AcceleratorSettings,
};
use hyperspace_gpu::{GpuAccelerator, ProbeOptions};
use tracing::info;

use crate::cpu::{references, to_rows, LatticeCase, Scalar};

/// Owns one compiled accelerator so every case set reuses the same device.
pub struct LatticeRunner {
    accelerator: GpuAccelerator,
}

impl LatticeRunner {
    pub fn new(settings: &AcceleratorSettings, allow_software_adapter: bool) -> Result<Self> {
        let accelerator = GpuAccelerator::new(
            settings,
            ProbeOptions {
                allow_software_adapter,
            },
        )
        .context("no usable wgpu accelerator for parity lab")?;
        info!(
            adapter = accelerator.label(),
            max_rows = accelerator.max_rows_per_dispatch(),
            "parity accelerator ready"
        );
        Ok(Self { accelerator })
    }

    pub fn run_cases(&self, cases: &[LatticeCase]) -> Result<Vec<Scalar>> {
        if cases.is_empty() {
            return Ok(Vec::new());
        }
        let rows = to_rows(cases);
        self.accelerator
            .run_rows(&rows)
            .context("accelerator dispatch failed")
    }

    /// Runs `cases` on the device and compares against the CPU reference.
    pub fn compare_cases(&self, cases: &[LatticeCase]) -> Result<ParityReport> {
        let gpu = self.run_cases(cases)?;
        Ok(metrics::compare(&references(cases), &gpu))
    }
}
