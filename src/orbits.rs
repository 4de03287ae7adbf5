//! Orbit previews: probe polylines through a flock's or a force's field.
//!
//! A `density × density` grid of probes is laid over a [`Rect`]. Each probe
//! is integrated for `orbit_length` steps by a dedicated kernel and comes
//! back as one polyline. Previews own their buffers and never touch the
//! simulation's update passes.
//!
//! ```ignore
//! let mut orbits = FlockOrbits::new(&backend)?;
//! if orbits.request(&backend, &flock, &forces, rect, &OrbitSettings::default(), 0.0)? {
//!     let polylines = orbits.fetch(&backend)?.unwrap_or_default();
//! }
//! ```

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::agent::ForceId;
use crate::assembler::force_records;
use crate::error::GpuError;
use crate::flock::Flock;
use crate::force::Force;
use crate::gpu::{
    flock_orbit_slots, force_orbit_slots, workgroups_for, Bindings, BufferKind, ComputeBackend, DeviceBuffer,
    KernelKind,
};
use crate::records::{FlockConfigRecord, ForceRecord, OrbitPoint, OrbitUniforms};

/// Axis-aligned sampling area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Square of half-width `half_extent` around `center`.
    pub fn around(center: Vec2, half_extent: f32) -> Self {
        Self {
            min: center - Vec2::splat(half_extent),
            max: center + Vec2::splat(half_extent),
        }
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }
}

/// Probe grid and integration settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitSettings {
    /// Probes per side.
    pub density: u32,
    /// Points per polyline, the start included.
    pub orbit_length: u32,
    /// Seconds between consecutive points.
    pub time_step: f32,
    /// Flock previews only: sample the flock's forces as well.
    pub include_forces: bool,
}

impl Default for OrbitSettings {
    fn default() -> Self {
        Self {
            density: 20,
            orbit_length: 5,
            time_step: 0.5,
            include_forces: true,
        }
    }
}

/// Cell centres of a `density × density` grid over `rect`, row-major.
pub fn probe_starts(rect: Rect, density: u32) -> Vec<Vec2> {
    if density == 0 {
        return Vec::new();
    }
    let delta = rect.size() / density as f32;
    (0..density)
        .flat_map(|row| {
            (0..density).map(move |col| rect.min + delta * Vec2::new(col as f32 + 0.5, row as f32 + 0.5))
        })
        .collect()
}

/// Buffers shared by both preview kinds.
struct ProbeBuffers<B: ComputeBackend> {
    points: DeviceBuffer<OrbitPoint, B>,
    forces: DeviceBuffer<ForceRecord, B>,
    uniforms: DeviceBuffer<OrbitUniforms, B>,
    kernel: B::Kernel,
    /// `(probes, orbit_length)` of the request awaiting fetch.
    pending: Option<(u32, u32)>,
}

impl<B: ComputeBackend> ProbeBuffers<B> {
    fn new(backend: &B, label: &str, kind: KernelKind) -> Result<Self, GpuError> {
        Ok(Self {
            points: DeviceBuffer::new(backend, format!("{} Points", label), BufferKind::Storage)?,
            forces: DeviceBuffer::new(backend, format!("{} Forces", label), BufferKind::Storage)?,
            uniforms: DeviceBuffer::new(backend, format!("{} Uniforms", label), BufferKind::Uniform)?,
            kernel: backend.create_kernel(kind)?,
            pending: None,
        })
    }

    /// Upload probe starts, forces and uniforms. Returns the probe count.
    fn upload(
        &mut self,
        backend: &B,
        rect: Rect,
        settings: &OrbitSettings,
        orbit_length: u32,
        forces: &[ForceRecord],
        time: f32,
    ) -> Result<u32, GpuError> {
        let starts = probe_starts(rect, settings.density);
        let points: Vec<OrbitPoint> = starts
            .iter()
            .flat_map(|&position| std::iter::repeat(OrbitPoint { position }).take(orbit_length as usize))
            .collect();
        let probes = starts.len() as u32;

        self.points.upload(backend, &points)?;
        self.forces.upload(backend, forces)?;
        self.uniforms.upload(
            backend,
            &[OrbitUniforms {
                probes_count: probes,
                orbit_length,
                forces_count: forces.len() as u32,
                time,
                time_step: settings.time_step,
            }],
        )?;
        Ok(probes)
    }

    fn fetch(&mut self, backend: &B) -> Result<Option<Vec<Vec<Vec2>>>, GpuError> {
        let Some((probes, orbit_length)) = self.pending.take() else {
            return Ok(None);
        };
        if probes == 0 {
            return Ok(Some(Vec::new()));
        }
        let points = self.points.download_all(backend)?;
        Ok(Some(
            points
                .chunks_exact(orbit_length as usize)
                .map(|orbit| orbit.iter().map(|p| p.position).collect())
                .collect(),
        ))
    }
}

/// Polylines through one flock's survival and force field.
pub struct FlockOrbits<B: ComputeBackend> {
    buffers: ProbeBuffers<B>,
    config: DeviceBuffer<FlockConfigRecord, B>,
}

impl<B: ComputeBackend> FlockOrbits<B> {
    pub fn new(backend: &B) -> Result<Self, GpuError> {
        Ok(Self {
            buffers: ProbeBuffers::new(backend, "Flock Orbits", KernelKind::FlockOrbits)?,
            config: DeviceBuffer::new(backend, "Flock Orbits Config", BufferKind::Storage)?,
        })
    }

    /// Dispatch a preview for `flock`. Returns `false` without doing anything
    /// while the previous request is unfetched.
    pub fn request(
        &mut self,
        backend: &B,
        flock: &Flock,
        forces: &BTreeMap<ForceId, Force>,
        rect: Rect,
        settings: &OrbitSettings,
        time: f32,
    ) -> Result<bool, GpuError> {
        if self.buffers.pending.is_some() {
            return Ok(false);
        }
        let orbit_length = settings.orbit_length.max(2);
        let force_records = if settings.include_forces {
            force_records(flock.forces(), forces)
        } else {
            Vec::new()
        };

        let probes = self
            .buffers
            .upload(backend, rect, settings, orbit_length, &force_records, time)?;
        self.config.upload(backend, &[FlockConfigRecord::from_flock(flock)])?;

        if probes > 0 {
            let mut bindings = Bindings::new();
            self.buffers.points.bind(&mut bindings, flock_orbit_slots::POINTS);
            self.config.bind(&mut bindings, flock_orbit_slots::CONFIG);
            self.buffers.forces.bind(&mut bindings, flock_orbit_slots::FORCES);
            self.buffers.uniforms.bind(&mut bindings, flock_orbit_slots::UNIFORMS);
            backend.dispatch(&self.buffers.kernel, &bindings, workgroups_for(probes))?;
        }
        self.buffers.pending = Some((probes, orbit_length));
        Ok(true)
    }

    /// One polyline per probe, or `None` if nothing was requested.
    pub fn fetch(&mut self, backend: &B) -> Result<Option<Vec<Vec<Vec2>>>, GpuError> {
        self.buffers.fetch(backend)
    }

    pub fn needs_fetch(&self) -> bool {
        self.buffers.pending.is_some()
    }
}

/// Polylines through a single force field.
pub struct ForceOrbits<B: ComputeBackend> {
    buffers: ProbeBuffers<B>,
}

impl<B: ComputeBackend> ForceOrbits<B> {
    pub fn new(backend: &B) -> Result<Self, GpuError> {
        Ok(Self {
            buffers: ProbeBuffers::new(backend, "Force Orbits", KernelKind::ForceOrbits)?,
        })
    }

    /// Dispatch a preview for `force`. Returns `false` without doing anything
    /// while the previous request is unfetched.
    pub fn request(
        &mut self,
        backend: &B,
        force: &Force,
        rect: Rect,
        settings: &OrbitSettings,
        time: f32,
    ) -> Result<bool, GpuError> {
        if self.buffers.pending.is_some() {
            return Ok(false);
        }
        let orbit_length = settings.orbit_length.max(1);
        let probes = self
            .buffers
            .upload(backend, rect, settings, orbit_length, &[force.record(1.0)], time)?;

        if probes > 0 {
            let mut bindings = Bindings::new();
            self.buffers.points.bind(&mut bindings, force_orbit_slots::POINTS);
            self.buffers.forces.bind(&mut bindings, force_orbit_slots::FORCES);
            self.buffers.uniforms.bind(&mut bindings, force_orbit_slots::UNIFORMS);
            backend.dispatch(&self.buffers.kernel, &bindings, workgroups_for(probes))?;
        }
        self.buffers.pending = Some((probes, orbit_length));
        Ok(true)
    }

    pub fn fetch(&mut self, backend: &B) -> Result<Option<Vec<Vec<Vec2>>>, GpuError> {
        self.buffers.fetch(backend)
    }

    pub fn needs_fetch(&self) -> bool {
        self.buffers.pending.is_some()
    }
}
