//! Request/response payload shapes for whatever transport fronts the engine.

use serde::{Deserialize, Serialize};

use crate::accelerator::AcceleratorCapability;
use crate::dispatch::StatsSnapshot;
use crate::Scalar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdfRequest {
    pub positions: Vec<[Scalar; 3]>,
    /// Raw periods; validated by the evaluator, not at decode time.
    pub dims: [Scalar; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdfResponse {
    pub sdf_values: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub accelerator_available: bool,
    pub capability: AcceleratorCapability,
    pub backend: String,
    pub stats: StatsSnapshot,
}
