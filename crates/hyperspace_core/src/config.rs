//! Startup configuration for the lattice SDF engine and its fly-through viewer.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::accelerator::AcceleratorSettings;
use crate::Scalar;

pub const DEFAULT_ACCELERATOR_TIMEOUT_MS: u64 = 2_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    Low,
    Medium,
    High,
}

/// Engine and viewer settings, built once at startup and never mutated.
///
/// Missing keys fall back to [`EngineSettings::default`], so a config file
/// only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    #[serde(alias = "use_tpu")]
    pub use_accelerator: bool,
    /// Alternative accelerator model. `None` selects the built-in kernel.
    pub model_path: Option<PathBuf>,
    pub accelerator_timeout_ms: u64,
    pub render_quality: RenderQuality,
    pub max_ray_steps: u32,
    /// Vertical field of view in degrees.
    pub field_of_view: Scalar,
    pub resolution_scale: Scalar,
    /// Per-frame increment applied to both lattice periods during a fly-through.
    pub dim_step_size: Scalar,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            use_accelerator: false,
            model_path: None,
            accelerator_timeout_ms: DEFAULT_ACCELERATOR_TIMEOUT_MS,
            render_quality: RenderQuality::High,
            max_ray_steps: 100,
            field_of_view: 45.0,
            resolution_scale: 1.0,
            dim_step_size: 0.02,
        }
    }
}

impl EngineSettings {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Loads `path` if it exists. A missing file silently yields defaults; an
    /// unreadable or invalid one is logged and also yields defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => {
                info!(path = %path.display(), ?settings, "loaded configuration");
                settings
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "error loading config; using defaults");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.resolution_scale.is_finite() && self.resolution_scale > 0.0) {
            return Err(ConfigError::Invalid {
                field: "resolution_scale",
                reason: format!("must be positive, got {}", self.resolution_scale),
            });
        }
        if !(self.field_of_view > 0.0 && self.field_of_view < 180.0) {
            return Err(ConfigError::Invalid {
                field: "field_of_view",
                reason: format!("must lie in (0, 180) degrees, got {}", self.field_of_view),
            });
        }
        if self.max_ray_steps == 0 {
            return Err(ConfigError::Invalid {
                field: "max_ray_steps",
                reason: "must be at least 1".into(),
            });
        }
        if !self.dim_step_size.is_finite() {
            return Err(ConfigError::Invalid {
                field: "dim_step_size",
                reason: format!("must be finite, got {}", self.dim_step_size),
            });
        }
        Ok(())
    }

    /// The slice of configuration the dispatcher consumes.
    pub fn accelerator_settings(&self) -> AcceleratorSettings {
        AcceleratorSettings {
            requested: self.use_accelerator,
            model_path: self.model_path.clone(),
            timeout: Duration::from_millis(self.accelerator_timeout_ms),
        }
    }
}
