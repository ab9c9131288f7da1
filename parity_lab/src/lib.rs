//! Parity Lab crate: CPU lattice references + harness glue for CPU⇄WGSL parity.

#[path = "../cpu/mod.rs"]
pub mod cpu;

pub mod case_io;
pub mod wgpu_lattice_runner;
