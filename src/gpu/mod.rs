//! Compute device abstraction.
//!
//! [`ComputeBackend`] is the seam between the flocking core and whatever
//! runs the kernels. Two backends ship with the crate:
//!
//! - [`WgpuBackend`] - headless wgpu device running the WGSL kernels in [`shaders`]
//! - [`HostBackend`] - CPU reference that runs [`HostKernel`]s over byte buffers
//!
//! Buffers are owned through [`DeviceBuffer`], which grows on demand and
//! never shrinks.

pub mod host;
pub mod shaders;
pub mod wgpu_backend;

use std::marker::PhantomData;

use crate::error::GpuError;
use crate::records::GpuRecord;

pub use host::{HostBackend, HostBindings, HostKernel, IdentityKernel};
pub use wgpu_backend::WgpuBackend;

/// Threads per workgroup for every kernel.
pub const WORKGROUP_SIZE: u32 = 32;

/// Number of workgroups covering `count` threads.
#[inline]
pub fn workgroups_for(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE)
}

/// Binding slots of [`KernelKind::FlockUpdate`].
pub mod update_slots {
    pub const AGENTS: u32 = 0;
    pub const CONFIG: u32 = 1;
    pub const DRIVES: u32 = 2;
    pub const FORCES: u32 = 3;
    pub const UNIFORMS: u32 = 4;
}

/// Binding slots of [`KernelKind::FlockOrbits`].
pub mod flock_orbit_slots {
    pub const POINTS: u32 = 0;
    pub const CONFIG: u32 = 1;
    pub const FORCES: u32 = 2;
    pub const UNIFORMS: u32 = 3;
}

/// Binding slots of [`KernelKind::ForceOrbits`].
pub mod force_orbit_slots {
    pub const POINTS: u32 = 0;
    pub const FORCES: u32 = 1;
    pub const UNIFORMS: u32 = 2;
}

/// How a kernel accesses one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
    Uniform,
}

/// The kernels the core dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelKind {
    /// Steer every own agent of one flock.
    FlockUpdate,
    /// Trace probe polylines through a flock's steering field.
    FlockOrbits,
    /// Trace probe polylines through a single force field.
    ForceOrbits,
}

impl KernelKind {
    /// Access mode of each binding, indexed by slot.
    pub fn layout(self) -> &'static [Access] {
        match self {
            KernelKind::FlockUpdate => &[
                Access::ReadWrite,
                Access::ReadOnly,
                Access::ReadOnly,
                Access::ReadOnly,
                Access::Uniform,
            ],
            KernelKind::FlockOrbits => &[Access::ReadWrite, Access::ReadOnly, Access::ReadOnly, Access::Uniform],
            KernelKind::ForceOrbits => &[Access::ReadWrite, Access::ReadOnly, Access::Uniform],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KernelKind::FlockUpdate => "Flock Update",
            KernelKind::FlockOrbits => "Flock Orbits",
            KernelKind::ForceOrbits => "Force Orbits",
        }
    }
}

/// Whether a buffer is bound as storage or as a uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Storage,
    Uniform,
}

/// A device able to hold buffers and run the core's kernels.
///
/// `dispatch` may return before the work finishes; `read_buffer` blocks
/// until every submitted dispatch touching the buffer is complete.
pub trait ComputeBackend {
    type Buffer;
    type Kernel;

    fn create_buffer(&self, label: &str, size: u64, kind: BufferKind) -> Result<Self::Buffer, GpuError>;

    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), GpuError>;

    /// Copy the first `size` bytes of `buffer` back to the host.
    fn read_buffer(&self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, GpuError>;

    fn create_kernel(&self, kind: KernelKind) -> Result<Self::Kernel, GpuError>;

    fn dispatch(
        &self,
        kernel: &Self::Kernel,
        bindings: &Bindings<'_, Self::Buffer>,
        workgroups: u32,
    ) -> Result<(), GpuError>;
}

/// Slot table handed to [`ComputeBackend::dispatch`].
pub struct Bindings<'a, B> {
    slots: Vec<Option<&'a B>>,
}

impl<'a, B> Bindings<'a, B> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn set(&mut self, slot: u32, buffer: &'a B) {
        let slot = slot as usize;
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || None);
        }
        self.slots[slot] = Some(buffer);
    }

    pub fn get(&self, slot: u32) -> Option<&'a B> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// Bound buffer at `slot`, or a binding error naming the kernel.
    pub fn require(&self, slot: u32, kernel: KernelKind) -> Result<&'a B, GpuError> {
        self.get(slot)
            .ok_or_else(|| GpuError::Binding(format!("{} kernel: slot {} is unbound", kernel.label(), slot)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<B> Default for Bindings<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed, growable device buffer of [`GpuRecord`]s.
///
/// Exclusively owns its device handle; the handle is released when the
/// buffer is dropped or reallocated. Capacity never shrinks and is at least
/// one record, so a kernel always has something valid to bind.
pub struct DeviceBuffer<T: GpuRecord, B: ComputeBackend> {
    label: String,
    kind: BufferKind,
    capacity: usize,
    len: usize,
    handle: B::Buffer,
    _marker: PhantomData<T>,
}

impl<T: GpuRecord, B: ComputeBackend> DeviceBuffer<T, B> {
    pub fn new(backend: &B, label: impl Into<String>, kind: BufferKind) -> Result<Self, GpuError> {
        let label = label.into();
        let handle = backend.create_buffer(&label, T::WGSL_SIZE as u64, kind)?;
        Ok(Self {
            label,
            kind,
            capacity: 1,
            len: 0,
            handle,
            _marker: PhantomData,
        })
    }

    /// Reallocate if `count` records do not fit. Returns whether it grew.
    pub fn ensure_capacity(&mut self, backend: &B, count: usize) -> Result<bool, GpuError> {
        let needed = count.max(1);
        if needed <= self.capacity {
            return Ok(false);
        }
        let size = needed as u64 * T::WGSL_SIZE as u64;
        self.handle = backend.create_buffer(&self.label, size, self.kind)?;
        tracing::trace!(buffer = %self.label, from = self.capacity, to = needed, "grew device buffer");
        self.capacity = needed;
        Ok(true)
    }

    /// Write `records` to the start of the buffer, growing it first if needed.
    pub fn upload(&mut self, backend: &B, records: &[T]) -> Result<(), GpuError> {
        self.ensure_capacity(backend, records.len())?;
        if !records.is_empty() {
            let gpu: Vec<T::Gpu> = records.iter().map(T::to_gpu).collect();
            backend.write_buffer(&self.handle, bytemuck::cast_slice(&gpu))?;
        }
        self.len = records.len();
        Ok(())
    }

    /// Read `out.len()` records back from the start of the buffer.
    pub fn download(&self, backend: &B, out: &mut [T]) -> Result<(), GpuError> {
        if out.len() > self.capacity {
            return Err(GpuError::Binding(format!(
                "{}: cannot read {} records from a buffer of {}",
                self.label,
                out.len(),
                self.capacity
            )));
        }
        if out.is_empty() {
            return Ok(());
        }
        let bytes = backend.read_buffer(&self.handle, out.len() as u64 * T::WGSL_SIZE as u64)?;
        for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(T::WGSL_SIZE as usize)) {
            *slot = T::from_gpu(&bytemuck::pod_read_unaligned(chunk));
        }
        Ok(())
    }

    /// Read back the records written by the last upload.
    pub fn download_all(&self, backend: &B) -> Result<Vec<T>, GpuError> {
        if self.len == 0 {
            return Ok(Vec::new());
        }
        let bytes = backend.read_buffer(&self.handle, self.len as u64 * T::WGSL_SIZE as u64)?;
        Ok(decode_records(&bytes))
    }

    /// Bind this buffer at `slot`.
    pub fn bind<'a>(&'a self, bindings: &mut Bindings<'a, B::Buffer>, slot: u32) {
        bindings.set(slot, &self.handle);
    }

    /// Capacity in records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records written by the last upload.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Decode a byte buffer into records. Trailing partial records are ignored.
pub fn decode_records<T: GpuRecord>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::WGSL_SIZE as usize)
        .map(|chunk| T::from_gpu(&bytemuck::pod_read_unaligned(chunk)))
        .collect()
}

/// Encode records into the byte layout kernels expect.
pub fn encode_records<T: GpuRecord>(records: &[T]) -> Vec<u8> {
    let gpu: Vec<T::Gpu> = records.iter().map(T::to_gpu).collect();
    bytemuck::cast_slice(&gpu).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{AgentRecord, ForceRecord};
    use glam::Vec2;

    fn agent(i: u32) -> AgentRecord {
        AgentRecord {
            flock_index: 0,
            position: Vec2::new(i as f32, -(i as f32)),
            heading: Vec2::X,
            speed: 1.0 + i as f32,
        }
    }

    #[test]
    fn test_workgroups_for() {
        assert_eq!(workgroups_for(0), 0);
        assert_eq!(workgroups_for(1), 1);
        assert_eq!(workgroups_for(32), 1);
        assert_eq!(workgroups_for(33), 2);
    }

    #[test]
    fn test_buffer_allocates_at_least_one() {
        let backend = HostBackend::new();
        let mut buffer: DeviceBuffer<ForceRecord, _> = DeviceBuffer::new(&backend, "forces", BufferKind::Storage).unwrap();
        assert_eq!(buffer.capacity(), 1);
        assert!(!buffer.ensure_capacity(&backend, 0).unwrap());
        buffer.upload(&backend, &[]).unwrap();
        assert_eq!(buffer.capacity(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_grows_but_never_shrinks() {
        let backend = HostBackend::new();
        let mut buffer = DeviceBuffer::new(&backend, "agents", BufferKind::Storage).unwrap();
        let many: Vec<AgentRecord> = (0..10).map(agent).collect();
        buffer.upload(&backend, &many).unwrap();
        assert_eq!(buffer.capacity(), 10);

        buffer.upload(&backend, &many[..3]).unwrap();
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.ensure_capacity(&backend, 7).unwrap());
        assert!(buffer.ensure_capacity(&backend, 11).unwrap());
    }

    #[test]
    fn test_upload_download_round_trip() {
        let backend = HostBackend::new();
        let mut buffer = DeviceBuffer::new(&backend, "agents", BufferKind::Storage).unwrap();
        let records: Vec<AgentRecord> = (0..5).map(agent).collect();
        buffer.upload(&backend, &records).unwrap();

        let mut out = vec![agent(99); 5];
        buffer.download(&backend, &mut out).unwrap();
        assert_eq!(out, records);
        assert_eq!(buffer.download_all(&backend).unwrap(), records);
    }

    #[test]
    fn test_download_past_capacity_fails() {
        let backend = HostBackend::new();
        let buffer: DeviceBuffer<AgentRecord, _> = DeviceBuffer::new(&backend, "agents", BufferKind::Storage).unwrap();
        let mut out = vec![agent(0); 2];
        assert!(matches!(buffer.download(&backend, &mut out), Err(GpuError::Binding(_))));
    }

    #[test]
    fn test_bindings_slots() {
        let a = 1u8;
        let b = 2u8;
        let mut bindings = Bindings::new();
        bindings.set(2, &a);
        bindings.set(0, &b);
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings.get(0), Some(&b));
        assert_eq!(bindings.get(1), None);
        assert!(bindings.require(1, KernelKind::FlockUpdate).is_err());
        assert_eq!(bindings.require(2, KernelKind::FlockUpdate).unwrap(), &a);
    }
}
