//! Adapter and device acquisition for the compute-only accelerator.

use hyperspace_core::AcceleratorInitError;
use tracing::{debug, error};
use wgpu::{
    Adapter, Backends, Device, DeviceDescriptor, DeviceType, Features, Instance,
    InstanceDescriptor, Limits, PowerPreference, Queue, RequestAdapterOptions,
};

/// How picky the probe is about the adapter it accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Accept software rasterizers (llvmpipe, WARP). Useful for parity runs on
    /// machines without a discrete device; pointless as a production accelerator.
    pub allow_software_adapter: bool,
}

pub struct GpuContext {
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// Human readable adapter description.
    pub fn label(&self) -> String {
        let info = self.adapter.get_info();
        format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type)
    }
}

/// Requests a compute-capable adapter and device with no surface attached.
pub async fn init(options: ProbeOptions) -> Result<GpuContext, AcceleratorInitError> {
    let instance = Instance::new(&InstanceDescriptor {
        backends: Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|err| {
            debug!(error = %err, "adapter request failed");
            AcceleratorInitError::NoDevice
        })?;

    let info = adapter.get_info();
    if info.device_type == DeviceType::Cpu && !options.allow_software_adapter {
        debug!(adapter = %info.name, "ignoring software adapter");
        return Err(AcceleratorInitError::NoDevice);
    }

    let (device, queue) = adapter
        .request_device(&DeviceDescriptor {
            label: Some("hyperspace_lattice_device"),
            required_features: Features::empty(),
            required_limits: Limits::downlevel_defaults(),
            ..Default::default()
        })
        .await
        .map_err(|err| AcceleratorInitError::Driver(err.to_string()))?;

    // Errors outside an error scope would otherwise abort the process.
    device.on_uncaptured_error(Box::new(|err| {
        error!(error = %err, "uncaptured wgpu error");
    }));

    Ok(GpuContext {
        adapter,
        device,
        queue,
    })
}
