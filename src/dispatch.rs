//! Update passes: one consumer's buffers plus the steering kernel.
//!
//! A pass is driven in two halves so that every flock's work can be in
//! flight at once:
//!
//! ```ignore
//! let submitted = pass.submit(&backend, &frame, time, dt)?;
//! // ... submit other passes ...
//! let results = pass.fetch(&backend)?;
//! apply_results(flock, &frame, &results)?;
//! ```

use crate::assembler::FrameBuffers;
use crate::error::GpuError;
use crate::gpu::{update_slots, workgroups_for, Bindings, BufferKind, ComputeBackend, DeviceBuffer, KernelKind};
use crate::records::{AgentRecord, FlockConfigRecord, FlockDrivesRecord, ForceRecord, UpdateUniforms};

/// Outcome of [`UpdatePass::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Nothing to update; no kernel was dispatched.
    Skipped,
    Dispatched { workgroups: u32 },
}

/// Buffer set and kernel for updating one flock.
///
/// Each pass has exactly one writer and one reader. Simulation and orbit
/// previews never share a pass.
pub struct UpdatePass<B: ComputeBackend> {
    label: String,
    agents: DeviceBuffer<AgentRecord, B>,
    config: DeviceBuffer<FlockConfigRecord, B>,
    drives: DeviceBuffer<FlockDrivesRecord, B>,
    forces: DeviceBuffer<ForceRecord, B>,
    uniforms: DeviceBuffer<UpdateUniforms, B>,
    kernel: B::Kernel,
    /// Record count of the dispatch awaiting [`UpdatePass::fetch`].
    in_flight: Option<usize>,
}

impl<B: ComputeBackend> UpdatePass<B> {
    pub fn new(backend: &B, label: impl Into<String>) -> Result<Self, GpuError> {
        let label = label.into();
        Ok(Self {
            agents: DeviceBuffer::new(backend, format!("{} Agents", label), BufferKind::Storage)?,
            config: DeviceBuffer::new(backend, format!("{} Config", label), BufferKind::Storage)?,
            drives: DeviceBuffer::new(backend, format!("{} Drives", label), BufferKind::Storage)?,
            forces: DeviceBuffer::new(backend, format!("{} Forces", label), BufferKind::Storage)?,
            uniforms: DeviceBuffer::new(backend, format!("{} Uniforms", label), BufferKind::Uniform)?,
            kernel: backend.create_kernel(KernelKind::FlockUpdate)?,
            in_flight: None,
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Upload `frame` and dispatch the steering kernel.
    ///
    /// Fails if the results of a previous submit were never fetched.
    pub fn submit(&mut self, backend: &B, frame: &FrameBuffers, time: f32, delta_time: f32) -> Result<Submission, GpuError> {
        if self.in_flight.is_some() {
            return Err(GpuError::Binding(format!("{}: previous results not fetched", self.label)));
        }

        let count = frame.agents.len();
        if count == 0 {
            self.in_flight = Some(0);
            return Ok(Submission::Skipped);
        }

        self.agents.upload(backend, &frame.agents)?;
        self.config.upload(backend, &[frame.config])?;
        self.drives.upload(backend, &frame.drives)?;
        self.forces.upload(backend, &frame.forces)?;
        self.uniforms.upload(
            backend,
            &[UpdateUniforms {
                boids_count: count as u32,
                forces_count: frame.forces.len() as u32,
                time,
                delta_time,
            }],
        )?;

        let workgroups = workgroups_for(count as u32);
        let mut bindings = Bindings::new();
        self.agents.bind(&mut bindings, update_slots::AGENTS);
        self.config.bind(&mut bindings, update_slots::CONFIG);
        self.drives.bind(&mut bindings, update_slots::DRIVES);
        self.forces.bind(&mut bindings, update_slots::FORCES);
        self.uniforms.bind(&mut bindings, update_slots::UNIFORMS);
        backend.dispatch(&self.kernel, &bindings, workgroups)?;

        tracing::trace!(pass = %self.label, agents = count, workgroups, "dispatched update");
        self.in_flight = Some(count);
        Ok(Submission::Dispatched { workgroups })
    }

    /// Block until the last dispatch completes and read the agents back.
    ///
    /// Returns an empty vector when nothing is pending.
    pub fn fetch(&mut self, backend: &B) -> Result<Vec<AgentRecord>, GpuError> {
        match self.in_flight.take() {
            None | Some(0) => Ok(Vec::new()),
            Some(_) => self.agents.download_all(backend),
        }
    }

    /// Whether a submit is waiting for [`UpdatePass::fetch`].
    pub fn needs_fetch(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Current agent buffer capacity in records.
    pub fn agent_capacity(&self) -> usize {
        self.agents.capacity()
    }
}
