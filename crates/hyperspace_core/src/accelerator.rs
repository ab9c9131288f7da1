//! The opaque accelerator capability consumed by the dispatcher.

use std::{path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;

use crate::batch::{AcceleratorRow, ROW_WIDTH};
use crate::Scalar;

/// Process-wide accelerator state, resolved once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorCapability {
    NotRequested,
    Unavailable,
    Available,
}

/// Input/output tensor descriptor an accelerator model must agree with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub input_width: usize,
    pub output_width: usize,
}

impl TensorShape {
    /// `N x 5` rows in, `N` distances out.
    pub const LATTICE: TensorShape = TensorShape {
        input_width: ROW_WIDTH,
        output_width: 1,
    };
}

/// Raised while probing or loading the accelerator. Never reaches `evaluate`
/// callers; it only decides the capability.
#[derive(Error, Debug)]
pub enum AcceleratorInitError {
    #[error("no compatible accelerator device found")]
    NoDevice,

    #[error("accelerator driver rejected the device: {0}")]
    Driver(String),

    #[error("failed to load accelerator model {path}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("accelerator model failed to compile: {0}")]
    ModelCompile(String),

    #[error("accelerator tensor shape mismatch: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        expected: TensorShape,
        actual: TensorShape,
    },

    #[error("accelerator self-check diverged from the CPU reference by {max_abs_error:.3e}")]
    SelfCheck { max_abs_error: Scalar },

    #[error("failed to start accelerator worker: {0}")]
    Worker(#[source] std::io::Error),
}

/// Raised by a single accelerator invocation. The dispatcher absorbs it and
/// recomputes the batch on the CPU.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcceleratorError {
    #[error("accelerator device fault: {0}")]
    Device(String),

    #[error("accelerator returned {actual} values for {expected} rows")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("accelerator did not answer within {0:?}")]
    Timeout(Duration),

    #[error("accelerator worker is no longer running")]
    WorkerUnavailable,

    #[error("accelerator is still busy with an abandoned call")]
    Stalled,

    #[error("accelerator panicked: {0}")]
    Panicked(String),
}

/// A device that maps `N x 5` rows to `N` distances.
///
/// Implementations only need to be `Send`: the dispatcher moves the
/// accelerator onto a dedicated worker thread and serializes every call.
pub trait Accelerator: Send {
    /// Human readable device description, logged once at startup.
    fn label(&self) -> &str;

    fn shape(&self) -> TensorShape {
        TensorShape::LATTICE
    }

    fn invoke(&mut self, rows: &[AcceleratorRow]) -> Result<Vec<Scalar>, AcceleratorError>;
}

/// The subset of settings the dispatcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceleratorSettings {
    pub requested: bool,
    pub model_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for AcceleratorSettings {
    fn default() -> Self {
        Self {
            requested: false,
            model_path: None,
            timeout: Duration::from_millis(crate::config::DEFAULT_ACCELERATOR_TIMEOUT_MS),
        }
    }
}
