//! Flat records exchanged with the update and orbit kernels.
//!
//! Each record derives [`GpuRecord`], which generates a `{Name}Gpu` mirror
//! with WGSL padding and checks its layout at compile time. The WGSL side of
//! every kernel is assembled from [`GpuRecord::WGSL_STRUCT`], so host and
//! device always agree on field order and offsets.
//!
//! | Record | Buffer | Count |
//! |--------|--------|-------|
//! | [`AgentRecord`] | agents (read/write) | own agents, then alien agents |
//! | [`FlockConfigRecord`] | config | 1 |
//! | [`FlockDrivesRecord`] | drives | 1 + alien flocks |
//! | [`ForceRecord`] | forces | one per force weight (min 1 allocated) |
//! | [`UpdateUniforms`] | uniforms | 1 |
//! | [`OrbitPoint`] | orbit points (read/write) | probes × orbit length |
//! | [`OrbitUniforms`] | uniforms | 1 |

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::agent::Agent;
use crate::flock::{Drives, Flock};
use boid_flocks_derive::GpuRecord;

/// A Rust record with a fixed WGSL layout.
///
/// Implemented by `#[derive(GpuRecord)]`.
pub trait GpuRecord: Sized {
    /// Padded `#[repr(C)]` mirror uploaded to the device.
    type Gpu: Pod + Zeroable + Copy + std::fmt::Debug;

    /// Struct name used in WGSL.
    const WGSL_NAME: &'static str;
    /// WGSL struct declaration.
    const WGSL_STRUCT: &'static str;
    /// Size in bytes, identical on both sides.
    const WGSL_SIZE: u32;
    /// `(field, byte offset)` of the Rust mirror, padding included.
    const GPU_FIELDS: &'static [(&'static str, u32)];

    fn to_gpu(&self) -> Self::Gpu;
    fn from_gpu(gpu: &Self::Gpu) -> Self;
}

/// One agent as seen by the update kernel.
///
/// `flock_index` is 0 for agents of the flock being updated and `k` for
/// agents of its `k`-th alien flock.
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct AgentRecord {
    pub flock_index: u32,
    pub position: Vec2,
    pub heading: Vec2,
    pub speed: f32,
}

impl AgentRecord {
    pub fn from_agent(agent: &Agent, flock_index: u32) -> Self {
        Self {
            flock_index,
            position: agent.position,
            heading: agent.heading,
            speed: agent.speed,
        }
    }
}

/// Static parameters of the flock being updated.
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct FlockConfigRecord {
    pub origin: Vec2,
    pub spawn_radius: f32,
    pub kill_radius: f32,
    pub survival_drive: f32,
    pub view_radius: f32,
    pub view_angle_tau: f32,
    pub avoid_radius: f32,
    pub avoid_angle_tau: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub max_acceleration: f32,
    pub max_angular_speed_tau: f32,
}

impl FlockConfigRecord {
    pub fn from_flock(flock: &Flock) -> Self {
        let params = flock.params();
        Self {
            origin: flock.origin,
            spawn_radius: params.spawn_radius,
            kill_radius: params.kill_radius,
            survival_drive: params.survival_drive,
            view_radius: params.view_radius,
            view_angle_tau: params.view_angle_tau,
            avoid_radius: params.avoid_radius,
            avoid_angle_tau: params.avoid_angle_tau,
            min_speed: params.min_speed,
            max_speed: params.max_speed,
            max_acceleration: params.max_acceleration,
            max_angular_speed_tau: params.max_angular_speed_tau,
        }
    }
}

/// Steering weights for one relationship (index 0 is the flock itself).
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct FlockDrivesRecord {
    pub alignment: f32,
    pub cohesion: f32,
    pub separation: f32,
}

impl From<Drives> for FlockDrivesRecord {
    fn from(drives: Drives) -> Self {
        Self {
            alignment: drives.alignment,
            cohesion: drives.cohesion,
            separation: drives.separation,
        }
    }
}

/// One force field as seen by a kernel. `kind` 0 contributes nothing.
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct ForceRecord {
    pub origin: Vec2,
    pub kind: u32,
    pub intensity: f32,
    pub spatial_scale: f32,
    pub temporal_scale: f32,
    pub falloff_power: f32,
}

/// Scalars for one update dispatch.
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct UpdateUniforms {
    pub boids_count: u32,
    pub forces_count: u32,
    pub time: f32,
    pub delta_time: f32,
}

/// One vertex of a probe polyline.
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct OrbitPoint {
    pub position: Vec2,
}

/// Scalars for one orbit dispatch.
#[derive(GpuRecord, Debug, Clone, Copy, PartialEq)]
pub struct OrbitUniforms {
    pub probes_count: u32,
    pub orbit_length: u32,
    pub forces_count: u32,
    pub time: f32,
    pub time_step: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBlueprint, FlockId};
    use crate::flock::{FlockParams, FlockSettings};

    #[test]
    fn test_record_sizes() {
        assert_eq!(AgentRecord::WGSL_SIZE, 32);
        assert_eq!(FlockConfigRecord::WGSL_SIZE, 64);
        assert_eq!(FlockDrivesRecord::WGSL_SIZE, 16);
        assert_eq!(ForceRecord::WGSL_SIZE, 32);
        assert_eq!(UpdateUniforms::WGSL_SIZE, 16);
        assert_eq!(OrbitPoint::WGSL_SIZE, 16);
        assert_eq!(OrbitUniforms::WGSL_SIZE, 32);
    }

    #[test]
    fn test_agent_record_layout() {
        assert_eq!(std::mem::offset_of!(AgentRecordGpu, flock_index), 0);
        assert_eq!(std::mem::offset_of!(AgentRecordGpu, position), 8);
        assert_eq!(std::mem::offset_of!(AgentRecordGpu, heading), 16);
        assert_eq!(std::mem::offset_of!(AgentRecordGpu, speed), 24);
    }

    #[test]
    fn test_gpu_fields_include_padding() {
        let names: Vec<&str> = AgentRecord::GPU_FIELDS.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["flock_index", "_pad0", "position", "heading", "speed", "_pad1"]);
        let offsets: Vec<u32> = AgentRecord::GPU_FIELDS.iter().map(|(_, offset)| *offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16, 24, 28]);
    }

    #[test]
    fn test_wgsl_struct_names_fields_in_order() {
        let wgsl = AgentRecord::WGSL_STRUCT;
        assert!(wgsl.starts_with("struct AgentRecord {"));
        let flock_index = wgsl.find("flock_index: u32").unwrap();
        let position = wgsl.find("position: vec2<f32>").unwrap();
        let speed = wgsl.find("speed: f32").unwrap();
        assert!(flock_index < position && position < speed);
    }

    #[test]
    fn test_gpu_round_trip_is_exact() {
        let record = AgentRecord {
            flock_index: 3,
            position: Vec2::new(0.1, -7.25),
            heading: Vec2::new(0.6, 0.8),
            speed: 2.2,
        };
        assert_eq!(AgentRecord::from_gpu(&record.to_gpu()), record);
    }

    #[test]
    fn test_config_record_from_flock() {
        let settings = FlockSettings::new("cfg")
            .with_origin(Vec2::new(1.0, -1.0))
            .with_blueprint(AgentBlueprint::new("boid"))
            .with_params(FlockParams::default().with_radii(3.0, 6.0));
        let flock = Flock::new(FlockId(0), settings).unwrap();
        let record = FlockConfigRecord::from_flock(&flock);
        assert_eq!(record.origin, Vec2::new(1.0, -1.0));
        assert_eq!(record.spawn_radius, 3.0);
        assert_eq!(record.kill_radius, 6.0);
        assert_eq!(record.survival_drive, 10.0);
    }
}
