//! Headless wgpu backend.

use std::sync::mpsc;

use super::{shaders, Access, Bindings, BufferKind, ComputeBackend, KernelKind};
use crate::error::GpuError;

/// Compute-only wgpu device and queue.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuBackend {
    /// Request a high-performance adapter with no surface.
    pub async fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Boid Flocks Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceCreation)?;

        tracing::info!(adapter = ?adapter.get_info().name, "created compute device");
        Ok(Self { device, queue })
    }

    /// [`WgpuBackend::new`], blocking on the current thread.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    /// Wrap an existing device, e.g. one shared with a renderer.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// Compiled kernel plus the layout its bind groups are built against.
pub struct WgpuKernel {
    kind: KernelKind,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl WgpuKernel {
    pub fn kind(&self) -> KernelKind {
        self.kind
    }
}

fn create_kernel_pipeline(device: &wgpu::Device, kind: KernelKind) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
    let source = shaders::source(kind);
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{} Shader", kind.label())),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let entries: Vec<wgpu::BindGroupLayoutEntry> = kind
        .layout()
        .iter()
        .enumerate()
        .map(|(slot, access)| wgpu::BindGroupLayoutEntry {
            binding: slot as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: match access {
                    Access::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                    Access::ReadOnly => wgpu::BufferBindingType::Storage { read_only: true },
                    Access::Uniform => wgpu::BufferBindingType::Uniform,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{} Bind Group Layout", kind.label())),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{} Pipeline Layout", kind.label())),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{} Pipeline", kind.label())),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    (pipeline, bind_group_layout)
}

impl ComputeBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Kernel = WgpuKernel;

    fn create_buffer(&self, label: &str, size: u64, kind: BufferKind) -> Result<wgpu::Buffer, GpuError> {
        let usage = match kind {
            BufferKind::Storage => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
            }
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        };
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, data: &[u8]) -> Result<(), GpuError> {
        if data.len() as u64 > buffer.size() {
            return Err(GpuError::Binding(format!(
                "write of {} bytes exceeds buffer size {}",
                data.len(),
                buffer.size()
            )));
        }
        self.queue.write_buffer(buffer, 0, data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, GpuError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if size > buffer.size() {
            return Err(GpuError::BufferMapping(format!(
                "read of {} bytes exceeds buffer size {}",
                size,
                buffer.size()
            )));
        }

        // Copy into a mappable staging buffer
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(GpuError::BufferMapping(err.to_string())),
            Err(_) => return Err(GpuError::BufferMapping("map callback dropped".to_string())),
        }

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn create_kernel(&self, kind: KernelKind) -> Result<WgpuKernel, GpuError> {
        let (pipeline, bind_group_layout) = create_kernel_pipeline(&self.device, kind);
        tracing::debug!(kernel = kind.label(), "compiled kernel");
        Ok(WgpuKernel {
            kind,
            pipeline,
            bind_group_layout,
        })
    }

    fn dispatch(
        &self,
        kernel: &WgpuKernel,
        bindings: &Bindings<'_, wgpu::Buffer>,
        workgroups: u32,
    ) -> Result<(), GpuError> {
        let slots = kernel.kind.layout().len() as u32;
        let mut entries = Vec::with_capacity(slots as usize);
        for slot in 0..slots {
            let buffer = bindings.require(slot, kernel.kind)?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource: buffer.as_entire_binding(),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", kernel.kind.label())),
            layout: &kernel.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&format!("{} Encoder", kernel.kind.label())),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("{} Pass", kernel.kind.label())),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
