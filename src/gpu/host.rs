//! CPU compute backend.
//!
//! Buffers are plain byte vectors and kernels are [`HostKernel`] trait
//! objects. The built-in kernels mirror the WGSL sources in
//! [`shaders`](super::shaders) line for line, so the host backend doubles as
//! the reference implementation in tests.
//!
//! ```ignore
//! // Replace the steering kernel with one that leaves agents untouched.
//! let backend = HostBackend::new().with_kernel(KernelKind::FlockUpdate, IdentityKernel);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::f32::consts::{PI, TAU};
use std::rc::Rc;

use glam::Vec2;

use super::{flock_orbit_slots, force_orbit_slots, update_slots};
use super::{Access, Bindings, BufferKind, ComputeBackend, KernelKind, WORKGROUP_SIZE};
use crate::error::GpuError;
use crate::records::{
    AgentRecord, FlockConfigRecord, FlockDrivesRecord, ForceRecord, GpuRecord, OrbitPoint, OrbitUniforms,
    UpdateUniforms,
};

/// Host-memory buffer.
#[derive(Debug)]
pub struct HostBuffer {
    label: String,
    kind: BufferKind,
    data: RefCell<Vec<u8>>,
}

impl HostBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.data.borrow().len()
    }
}

/// A kernel the host backend can run.
pub trait HostKernel {
    fn run(&self, bindings: &HostBindings<'_>, workgroups: u32) -> Result<(), GpuError>;
}

/// Kernel that leaves every buffer as it found it.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKernel;

impl HostKernel for IdentityKernel {
    fn run(&self, _bindings: &HostBindings<'_>, _workgroups: u32) -> Result<(), GpuError> {
        Ok(())
    }
}

/// Typed view over the buffers bound to one dispatch.
pub struct HostBindings<'a> {
    kind: KernelKind,
    slots: &'a Bindings<'a, HostBuffer>,
}

impl<'a> HostBindings<'a> {
    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// Every whole record in the buffer at `slot`.
    pub fn read<T: GpuRecord>(&self, slot: u32) -> Result<Vec<T>, GpuError> {
        let buffer = self.slots.require(slot, self.kind)?;
        let data = buffer.data.borrow();
        Ok(super::decode_records(&data))
    }

    /// The first record in the buffer at `slot`.
    pub fn read_one<T: GpuRecord>(&self, slot: u32) -> Result<T, GpuError> {
        self.read::<T>(slot)?.into_iter().next().ok_or_else(|| {
            GpuError::Binding(format!("{} kernel: slot {} holds no record", self.kind.label(), slot))
        })
    }

    /// Overwrite the start of the buffer at `slot` with `records`.
    pub fn write<T: GpuRecord>(&self, slot: u32, records: &[T]) -> Result<(), GpuError> {
        let buffer = self.slots.require(slot, self.kind)?;
        write_bytes(buffer, &super::encode_records(records))
    }
}

fn write_bytes(buffer: &HostBuffer, bytes: &[u8]) -> Result<(), GpuError> {
    let mut data = buffer.data.borrow_mut();
    if bytes.len() > data.len() {
        return Err(GpuError::Binding(format!(
            "{}: write of {} bytes exceeds buffer size {}",
            buffer.label,
            bytes.len(),
            data.len()
        )));
    }
    data[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Kernel handle returned by [`HostBackend::create_kernel`].
#[derive(Clone)]
pub struct HostKernelHandle {
    kind: KernelKind,
    kernel: Rc<dyn HostKernel>,
}

impl HostKernelHandle {
    pub fn kind(&self) -> KernelKind {
        self.kind
    }
}

/// CPU backend running [`HostKernel`]s.
#[derive(Default)]
pub struct HostBackend {
    overrides: BTreeMap<KernelKind, Rc<dyn HostKernel>>,
    dispatches: RefCell<Vec<(KernelKind, u32)>>,
    buffers_created: Cell<usize>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `kernel` instead of the built-in kernel for `kind`.
    pub fn with_kernel(mut self, kind: KernelKind, kernel: impl HostKernel + 'static) -> Self {
        self.overrides.insert(kind, Rc::new(kernel));
        self
    }

    /// Every dispatch so far as `(kernel, workgroups)`.
    pub fn dispatches(&self) -> Vec<(KernelKind, u32)> {
        self.dispatches.borrow().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.borrow().len()
    }

    /// Number of buffer allocations, reallocations included.
    pub fn buffers_created(&self) -> usize {
        self.buffers_created.get()
    }
}

impl ComputeBackend for HostBackend {
    type Buffer = HostBuffer;
    type Kernel = HostKernelHandle;

    fn create_buffer(&self, label: &str, size: u64, kind: BufferKind) -> Result<HostBuffer, GpuError> {
        self.buffers_created.set(self.buffers_created.get() + 1);
        Ok(HostBuffer {
            label: label.to_string(),
            kind,
            data: RefCell::new(vec![0; size as usize]),
        })
    }

    fn write_buffer(&self, buffer: &HostBuffer, data: &[u8]) -> Result<(), GpuError> {
        write_bytes(buffer, data)
    }

    fn read_buffer(&self, buffer: &HostBuffer, size: u64) -> Result<Vec<u8>, GpuError> {
        let data = buffer.data.borrow();
        let size = size as usize;
        if size > data.len() {
            return Err(GpuError::BufferMapping(format!(
                "{}: read of {} bytes exceeds buffer size {}",
                buffer.label,
                size,
                data.len()
            )));
        }
        Ok(data[..size].to_vec())
    }

    fn create_kernel(&self, kind: KernelKind) -> Result<HostKernelHandle, GpuError> {
        let kernel: Rc<dyn HostKernel> = match self.overrides.get(&kind) {
            Some(kernel) => Rc::clone(kernel),
            None => match kind {
                KernelKind::FlockUpdate => Rc::new(SteeringKernel),
                KernelKind::FlockOrbits => Rc::new(FlockOrbitKernel),
                KernelKind::ForceOrbits => Rc::new(ForceOrbitKernel),
            },
        };
        Ok(HostKernelHandle { kind, kernel })
    }

    fn dispatch(
        &self,
        kernel: &HostKernelHandle,
        bindings: &Bindings<'_, HostBuffer>,
        workgroups: u32,
    ) -> Result<(), GpuError> {
        for (slot, access) in kernel.kind.layout().iter().enumerate() {
            let buffer = bindings.require(slot as u32, kernel.kind)?;
            let expected = match access {
                Access::Uniform => BufferKind::Uniform,
                Access::ReadOnly | Access::ReadWrite => BufferKind::Storage,
            };
            if buffer.kind != expected {
                return Err(GpuError::Binding(format!(
                    "{} kernel: slot {} expects a {:?} buffer, got '{}'",
                    kernel.kind.label(),
                    slot,
                    expected,
                    buffer.label
                )));
            }
        }
        self.dispatches.borrow_mut().push((kernel.kind, workgroups));
        let view = HostBindings {
            kind: kernel.kind,
            slots: bindings,
        };
        kernel.kernel.run(&view, workgroups)
    }
}

// ========== Reference kernels ==========

const EPSILON: f32 = 1e-6;

fn clamp_length(v: Vec2, max_length: f32) -> Vec2 {
    let length = v.length();
    if length > max_length && length > 0.0 {
        v / length * max_length
    } else {
        v
    }
}

/// Pull towards the middle of the band between the spawn and kill rings.
fn survival_accel(config: &FlockConfigRecord, position: Vec2) -> Vec2 {
    let offset = position - config.origin;
    let r = offset.length();
    if r <= f32::EPSILON {
        return Vec2::ZERO;
    }
    let band = (config.kill_radius - config.spawn_radius).abs().max(1e-3);
    let mid = 0.5 * (config.spawn_radius + config.kill_radius);
    -(offset / r) * ((r - mid) / band) * config.survival_drive
}

fn forces_accel(forces: &[ForceRecord], count: u32, position: Vec2, time: f32) -> Vec2 {
    forces
        .iter()
        .take(count as usize)
        .map(|f| f.sample(position, time))
        .fold(Vec2::ZERO, |acc, f| acc + f)
}

/// One steering step for the agent at `index`.
pub fn steer(
    index: usize,
    agents: &[AgentRecord],
    config: &FlockConfigRecord,
    drives: &[FlockDrivesRecord],
    forces: &[ForceRecord],
    uniforms: &UpdateUniforms,
) -> AgentRecord {
    let mut me = agents[index];
    let dt = uniforms.delta_time;
    let view_cos = (config.view_angle_tau * PI).cos();
    let avoid_cos = (config.avoid_angle_tau * PI).cos();

    let mut separation = Vec2::ZERO;
    let mut alignment = Vec2::ZERO;
    let mut cohesion = Vec2::ZERO;
    let mut total_weight = 0.0;

    for (j, other) in agents.iter().enumerate().take(uniforms.boids_count as usize) {
        if j == index {
            continue;
        }
        let d = other.position - me.position;
        let dist = d.length();
        if dist < EPSILON {
            continue;
        }
        let dir = d / dist;
        let Some(w) = drives.get(other.flock_index as usize) else {
            continue;
        };
        let facing = me.heading.dot(dir);
        if dist < config.avoid_radius && facing >= avoid_cos {
            separation -= dir / dist * w.separation;
        }
        if dist < config.view_radius && facing >= view_cos {
            let falloff = 1.0 - dist / config.view_radius;
            alignment += other.heading * falloff * w.alignment;
            cohesion += d * falloff * w.cohesion;
            total_weight += falloff;
        }
    }

    let mut accel = separation;
    if total_weight > 0.0 {
        accel += (alignment + cohesion) / total_weight;
    }
    accel += survival_accel(config, me.position);
    accel += forces_accel(forces, uniforms.forces_count, me.position, uniforms.time);
    accel = clamp_length(accel, config.max_acceleration);

    let velocity = me.heading * me.speed + accel * dt;
    let speed = velocity.length();
    let mut heading = me.heading;
    if speed > EPSILON {
        let desired = velocity / speed;
        let turn = heading.perp_dot(desired).atan2(heading.dot(desired));
        let max_turn = config.max_angular_speed_tau * TAU * dt;
        let angle = turn.clamp(-max_turn, max_turn);
        heading = Vec2::from_angle(angle).rotate(heading).normalize();
    }
    me.heading = heading;
    me.speed = speed.clamp(config.min_speed, config.max_speed);
    me.position += heading * me.speed * dt;
    me
}

/// Built-in [`KernelKind::FlockUpdate`] kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteeringKernel;

impl HostKernel for SteeringKernel {
    fn run(&self, bindings: &HostBindings<'_>, workgroups: u32) -> Result<(), GpuError> {
        let uniforms: UpdateUniforms = bindings.read_one(update_slots::UNIFORMS)?;
        let mut agents: Vec<AgentRecord> = bindings.read(update_slots::AGENTS)?;
        let config: FlockConfigRecord = bindings.read_one(update_slots::CONFIG)?;
        let drives: Vec<FlockDrivesRecord> = bindings.read(update_slots::DRIVES)?;
        let forces: Vec<ForceRecord> = bindings.read(update_slots::FORCES)?;

        let count = (uniforms.boids_count as usize)
            .min(agents.len())
            .min((workgroups * WORKGROUP_SIZE) as usize);
        let snapshot = agents.clone();
        for (i, agent) in agents.iter_mut().enumerate().take(count) {
            if agent.flock_index == 0 {
                *agent = steer(i, &snapshot, &config, &drives, &forces, &uniforms);
            }
        }
        bindings.write(update_slots::AGENTS, &agents)
    }
}

/// Built-in [`KernelKind::FlockOrbits`] kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlockOrbitKernel;

impl HostKernel for FlockOrbitKernel {
    fn run(&self, bindings: &HostBindings<'_>, workgroups: u32) -> Result<(), GpuError> {
        let uniforms: OrbitUniforms = bindings.read_one(flock_orbit_slots::UNIFORMS)?;
        let mut points: Vec<OrbitPoint> = bindings.read(flock_orbit_slots::POINTS)?;
        let config: FlockConfigRecord = bindings.read_one(flock_orbit_slots::CONFIG)?;
        let forces: Vec<ForceRecord> = bindings.read(flock_orbit_slots::FORCES)?;

        let length = uniforms.orbit_length as usize;
        let probes = uniforms.probes_count.min(workgroups * WORKGROUP_SIZE) as usize;
        for orbit in points.chunks_exact_mut(length.max(1)).take(probes) {
            let mut position = orbit[0].position;
            let mut velocity = Vec2::ZERO;
            for (k, point) in orbit.iter_mut().enumerate().skip(1) {
                let t = uniforms.time + k as f32 * uniforms.time_step;
                let mut accel = survival_accel(&config, position);
                accel += forces_accel(&forces, uniforms.forces_count, position, t);
                accel = clamp_length(accel, config.max_acceleration);
                velocity = clamp_length(velocity + accel * uniforms.time_step, config.max_speed);
                position += velocity * uniforms.time_step;
                point.position = position;
            }
        }
        bindings.write(flock_orbit_slots::POINTS, &points)
    }
}

/// Built-in [`KernelKind::ForceOrbits`] kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceOrbitKernel;

impl HostKernel for ForceOrbitKernel {
    fn run(&self, bindings: &HostBindings<'_>, workgroups: u32) -> Result<(), GpuError> {
        let uniforms: OrbitUniforms = bindings.read_one(force_orbit_slots::UNIFORMS)?;
        let mut points: Vec<OrbitPoint> = bindings.read(force_orbit_slots::POINTS)?;
        let forces: Vec<ForceRecord> = bindings.read(force_orbit_slots::FORCES)?;

        let length = uniforms.orbit_length as usize;
        let probes = uniforms.probes_count.min(workgroups * WORKGROUP_SIZE) as usize;
        for orbit in points.chunks_exact_mut(length.max(1)).take(probes) {
            let mut position = orbit[0].position;
            for (k, point) in orbit.iter_mut().enumerate().skip(1) {
                let t = uniforms.time + k as f32 * uniforms.time_step;
                position += forces_accel(&forces, uniforms.forces_count, position, t) * uniforms.time_step;
                point.position = position;
            }
        }
        bindings.write(force_orbit_slots::POINTS, &points)
    }
}
