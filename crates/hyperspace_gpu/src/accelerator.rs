//! wgpu compute implementation of the lattice accelerator.

use std::{borrow::Cow, fs, mem::size_of, ops::Range, sync::mpsc};

use hyperspace_core::{
    batch::ROW_WIDTH, lattice_distance, metrics::compare, Accelerator, AcceleratorError,
    AcceleratorInitError, AcceleratorRow, AcceleratorSettings, Scalar, PARITY_TOLERANCE,
};
use hyperspace_shaders::compute;
use tracing::{debug, info};
use wgpu::util::DeviceExt;
use wgpu::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType,
    BufferBindingType, BufferUsages, ComputePipeline, ErrorFilter, ShaderStages,
};

use crate::context::{self, GpuContext, ProbeOptions};

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct LatticeParams {
    count: [u32; 4],
}

/// Fixed rows evaluated once at startup; the model must reproduce the CPU
/// reference on all of them.
const SELF_CHECK_ROWS: [AcceleratorRow; 5] = [
    AcceleratorRow {
        position: [0.0, 0.0, 0.0],
        dims: [2.0, 2.0],
    },
    AcceleratorRow {
        position: [1.0, 0.0, 0.0],
        dims: [2.0, 2.0],
    },
    AcceleratorRow {
        position: [-0.6, 0.5, 3.1],
        dims: [1.0, 4.0],
    },
    AcceleratorRow {
        position: [7.25, -2.0, -5.5],
        dims: [3.0, 1.5],
    },
    AcceleratorRow {
        position: [0.3, 1.2, -0.4],
        dims: [-2.5, 0.75],
    },
];

/// Lattice SDF model compiled into a compute pipeline on one device.
pub struct GpuAccelerator {
    context: GpuContext,
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    max_rows_per_dispatch: usize,
    label: String,
}

impl GpuAccelerator {
    /// Loads the model, acquires a device and runs the self-check.
    pub fn new(
        settings: &AcceleratorSettings,
        options: ProbeOptions,
    ) -> Result<Self, AcceleratorInitError> {
        let source = load_model_source(settings)?;
        let context = pollster::block_on(context::init(options))?;
        let accelerator = Self::from_context(context, &source)?;
        accelerator.self_check()?;
        Ok(accelerator)
    }

    /// Builds the pipeline for `source` on an existing device.
    pub fn from_context(context: GpuContext, source: &str) -> Result<Self, AcceleratorInitError> {
        let device = &context.device;
        device.push_error_scope(ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("lattice_sdf.wgsl"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });

        let buffer_entry = |binding, ty: BufferBindingType| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("LatticeBindGroupLayout"),
            entries: &[
                buffer_entry(
                    compute::ROWS_BINDING,
                    BufferBindingType::Storage { read_only: true },
                ),
                buffer_entry(
                    compute::DISTANCES_BINDING,
                    BufferBindingType::Storage { read_only: false },
                ),
                buffer_entry(compute::PARAMS_BINDING, BufferBindingType::Uniform),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("LatticePipelineLayout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("LatticePipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(compute::LATTICE_ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(AcceleratorInitError::ModelCompile(err.to_string()));
        }

        let limits = device.limits();
        let by_workgroups = limits.max_compute_workgroups_per_dimension as usize
            * compute::LATTICE_WORKGROUP_SIZE as usize;
        let by_binding =
            limits.max_storage_buffer_binding_size as usize / size_of::<AcceleratorRow>();
        let max_rows_per_dispatch = by_workgroups.min(by_binding).max(1);

        let label = context.label();
        Ok(Self {
            context,
            pipeline,
            bind_group_layout,
            max_rows_per_dispatch,
            label,
        })
    }

    fn self_check(&self) -> Result<(), AcceleratorInitError> {
        let outputs = self
            .run_rows(&SELF_CHECK_ROWS)
            .map_err(|err| AcceleratorInitError::Driver(err.to_string()))?;
        let expected: Vec<Scalar> = SELF_CHECK_ROWS
            .iter()
            .map(|row| lattice_distance(row.position, row.dims))
            .collect();
        let report = compare(&expected, &outputs);
        if !report.within(PARITY_TOLERANCE) {
            return Err(AcceleratorInitError::SelfCheck {
                max_abs_error: report.max_abs_error,
            });
        }
        debug!(max_abs_error = report.max_abs_error, "accelerator self-check passed");
        Ok(())
    }

    pub fn max_rows_per_dispatch(&self) -> usize {
        self.max_rows_per_dispatch
    }

    /// Evaluates `rows` in as many dispatches as the device limits require.
    pub fn run_rows(&self, rows: &[AcceleratorRow]) -> Result<Vec<Scalar>, AcceleratorError> {
        let mut distances = Vec::with_capacity(rows.len());
        for range in chunk_ranges(rows.len(), self.max_rows_per_dispatch) {
            distances.extend(self.dispatch_chunk(&rows[range])?);
        }
        Ok(distances)
    }

    fn dispatch_chunk(&self, rows: &[AcceleratorRow]) -> Result<Vec<Scalar>, AcceleratorError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let device = &self.context.device;
        let queue = &self.context.queue;

        device.push_error_scope(ErrorFilter::OutOfMemory);
        device.push_error_scope(ErrorFilter::Validation);

        let params = LatticeParams {
            count: [rows.len() as u32, 0, 0, 0],
        };

        let row_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LatticeRows"),
            contents: bytemuck::cast_slice(rows),
            usage: BufferUsages::STORAGE,
        });

        let output_size = (rows.len() * size_of::<Scalar>()) as wgpu::BufferAddress;
        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("LatticeDistances"),
            size: output_size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("LatticeStaging"),
            size: output_size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LatticeParams"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LatticeBindGroup"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: compute::ROWS_BINDING,
                    resource: row_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: compute::DISTANCES_BINDING,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: compute::PARAMS_BINDING,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("LatticeEncoder"),
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("LatticePass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let workgroups = (rows.len() as u32).div_ceil(compute::LATTICE_WORKGROUP_SIZE);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
        queue.submit(Some(encoder.finish()));

        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            return Err(AcceleratorError::Device(err.to_string()));
        }

        let slice = staging_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| AcceleratorError::Device(err.to_string()))?;
        receiver
            .recv()
            .map_err(|_| AcceleratorError::Device("buffer map callback was dropped".into()))?
            .map_err(|err| AcceleratorError::Device(err.to_string()))?;

        let data = slice.get_mapped_range();
        let distances = bytemuck::cast_slice::<u8, Scalar>(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(distances)
    }
}

impl Accelerator for GpuAccelerator {
    fn label(&self) -> &str {
        &self.label
    }

    fn invoke(&mut self, rows: &[AcceleratorRow]) -> Result<Vec<Scalar>, AcceleratorError> {
        self.run_rows(rows)
    }
}

fn load_model_source(settings: &AcceleratorSettings) -> Result<String, AcceleratorInitError> {
    match &settings.model_path {
        Some(path) => {
            let source =
                fs::read_to_string(path).map_err(|source| AcceleratorInitError::ModelLoad {
                    path: path.clone(),
                    source,
                })?;
            info!(path = %path.display(), "loaded accelerator model");
            Ok(source)
        }
        None => Ok(compute::LATTICE_SDF.to_owned()),
    }
}

/// Splits `len` rows into consecutive ranges of at most `max` rows.
fn chunk_ranges(len: usize, max: usize) -> impl Iterator<Item = Range<usize>> {
    let max = max.max(1);
    (0..len)
        .step_by(max)
        .map(move |start| start..(start + max).min(len))
}

const _: () = assert!(size_of::<AcceleratorRow>() == ROW_WIDTH * size_of::<Scalar>());
