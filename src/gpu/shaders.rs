//! WGSL sources for the update and orbit kernels.
//!
//! Each kernel is assembled from the record declarations generated by
//! `#[derive(GpuRecord)]`, the shared helpers below and a kernel body. The
//! math matches the host kernels in [`host`](super::host) statement for
//! statement.
//!
//! # Shared Helpers
//!
//! - `clamp_length(v, max_length)` - scale `v` down to at most `max_length`
//! - `force_at(f, position, time)` - field of one [`ForceRecord`]
//! - `survival_accel(config, position)` - pull towards the spawn/kill band
//! - `forces_accel(position, time, count)` - sum over the bound `forces`

use super::KernelKind;
use crate::records::{
    AgentRecord, FlockConfigRecord, FlockDrivesRecord, ForceRecord, GpuRecord, OrbitPoint, OrbitUniforms,
    UpdateUniforms,
};

/// Constants shared by every kernel.
pub const CONSTANTS_WGSL: &str = r#"
const PI: f32 = 3.14159265358979;
const TAU: f32 = 6.28318530717959;
const RADIAL_SOFTENING: f32 = 0.25;
const EPSILON: f32 = 0.000001;
const TINY: f32 = 1.1920929e-7;
"#;

/// Field evaluation. Requires a `forces` storage array in scope.
pub const FORCE_WGSL: &str = r#"
fn clamp_length(v: vec2<f32>, max_length: f32) -> vec2<f32> {
    let magnitude = length(v);
    if (magnitude > max_length && magnitude > 0.0) {
        return v / magnitude * max_length;
    }
    return v;
}

fn force_at(f: ForceRecord, position: vec2<f32>, time: f32) -> vec2<f32> {
    if (f.kind == 1u) {
        let rel = position - f.origin;
        let dist = length(rel);
        if (dist <= TINY) {
            return vec2<f32>(0.0);
        }
        let falloff = pow(max(dist, RADIAL_SOFTENING), f.falloff_power);
        return rel / dist * (f.intensity / falloff);
    }
    if (f.kind == 2u) {
        let p = (position - f.origin) * f.spatial_scale;
        let t = time * f.temporal_scale;
        let angle = (sin(p.x + t) + cos(p.y - t)) * PI;
        return vec2<f32>(cos(angle), sin(angle)) * f.intensity;
    }
    return vec2<f32>(0.0);
}

fn forces_accel(position: vec2<f32>, time: f32, count: u32) -> vec2<f32> {
    var total = vec2<f32>(0.0);
    let bound = min(count, arrayLength(&forces));
    for (var k = 0u; k < bound; k = k + 1u) {
        total = total + force_at(forces[k], position, time);
    }
    return total;
}
"#;

/// Survival steering. Takes the flock config by value.
pub const SURVIVAL_WGSL: &str = r#"
fn survival_accel(cfg: FlockConfigRecord, position: vec2<f32>) -> vec2<f32> {
    let rel = position - cfg.origin;
    let r = length(rel);
    if (r <= TINY) {
        return vec2<f32>(0.0);
    }
    let band = max(abs(cfg.kill_radius - cfg.spawn_radius), 0.001);
    let mid = 0.5 * (cfg.spawn_radius + cfg.kill_radius);
    return -(rel / r) * ((r - mid) / band) * cfg.survival_drive;
}
"#;

const UPDATE_BODY: &str = r#"
@group(0) @binding(0) var<storage, read_write> agents: array<AgentRecord>;
@group(0) @binding(1) var<storage, read> config: FlockConfigRecord;
@group(0) @binding(2) var<storage, read> drives: array<FlockDrivesRecord>;
@group(0) @binding(3) var<storage, read> forces: array<ForceRecord>;
@group(0) @binding(4) var<uniform> uniforms: UpdateUniforms;

@compute @workgroup_size(32)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= uniforms.boids_count || i >= arrayLength(&agents)) {
        return;
    }
    var me = agents[i];
    if (me.flock_index != 0u) {
        return;
    }
    let cfg = config;
    let dt = uniforms.delta_time;
    let view_cos = cos(cfg.view_angle_tau * PI);
    let avoid_cos = cos(cfg.avoid_angle_tau * PI);
    let drive_count = arrayLength(&drives);

    var separation = vec2<f32>(0.0);
    var alignment = vec2<f32>(0.0);
    var cohesion = vec2<f32>(0.0);
    var total_weight = 0.0;

    let others = min(uniforms.boids_count, arrayLength(&agents));
    for (var j = 0u; j < others; j = j + 1u) {
        if (j == i) {
            continue;
        }
        let other = agents[j];
        let d = other.position - me.position;
        let dist = length(d);
        if (dist < EPSILON || other.flock_index >= drive_count) {
            continue;
        }
        let dir = d / dist;
        let w = drives[other.flock_index];
        let facing = dot(me.heading, dir);
        if (dist < cfg.avoid_radius && facing >= avoid_cos) {
            separation = separation - dir / dist * w.separation;
        }
        if (dist < cfg.view_radius && facing >= view_cos) {
            let falloff = 1.0 - dist / cfg.view_radius;
            alignment = alignment + other.heading * falloff * w.alignment;
            cohesion = cohesion + d * falloff * w.cohesion;
            total_weight = total_weight + falloff;
        }
    }

    var accel = separation;
    if (total_weight > 0.0) {
        accel = accel + (alignment + cohesion) / total_weight;
    }
    accel = accel + survival_accel(cfg, me.position);
    accel = accel + forces_accel(me.position, uniforms.time, uniforms.forces_count);
    accel = clamp_length(accel, cfg.max_acceleration);

    let velocity = me.heading * me.speed + accel * dt;
    let speed = length(velocity);
    var heading = me.heading;
    if (speed > EPSILON) {
        let desired = velocity / speed;
        let turn = atan2(heading.x * desired.y - heading.y * desired.x, dot(heading, desired));
        let max_turn = cfg.max_angular_speed_tau * TAU * dt;
        let angle = clamp(turn, -max_turn, max_turn);
        let c = cos(angle);
        let s = sin(angle);
        heading = normalize(vec2<f32>(c * heading.x - s * heading.y, s * heading.x + c * heading.y));
    }
    me.heading = heading;
    me.speed = clamp(speed, cfg.min_speed, cfg.max_speed);
    me.position = me.position + heading * me.speed * dt;
    agents[i] = me;
}
"#;

const FLOCK_ORBITS_BODY: &str = r#"
@group(0) @binding(0) var<storage, read_write> points: array<OrbitPoint>;
@group(0) @binding(1) var<storage, read> config: FlockConfigRecord;
@group(0) @binding(2) var<storage, read> forces: array<ForceRecord>;
@group(0) @binding(3) var<uniform> uniforms: OrbitUniforms;

@compute @workgroup_size(32)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let probe = gid.x;
    if (probe >= uniforms.probes_count) {
        return;
    }
    let cfg = config;
    let base = probe * uniforms.orbit_length;
    if (base + uniforms.orbit_length > arrayLength(&points)) {
        return;
    }
    var position = points[base].position;
    var velocity = vec2<f32>(0.0);
    for (var k = 1u; k < uniforms.orbit_length; k = k + 1u) {
        let t = uniforms.time + f32(k) * uniforms.time_step;
        var accel = survival_accel(cfg, position);
        accel = accel + forces_accel(position, t, uniforms.forces_count);
        accel = clamp_length(accel, cfg.max_acceleration);
        velocity = clamp_length(velocity + accel * uniforms.time_step, cfg.max_speed);
        position = position + velocity * uniforms.time_step;
        points[base + k].position = position;
    }
}
"#;

const FORCE_ORBITS_BODY: &str = r#"
@group(0) @binding(0) var<storage, read_write> points: array<OrbitPoint>;
@group(0) @binding(1) var<storage, read> forces: array<ForceRecord>;
@group(0) @binding(2) var<uniform> uniforms: OrbitUniforms;

@compute @workgroup_size(32)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let probe = gid.x;
    if (probe >= uniforms.probes_count) {
        return;
    }
    let base = probe * uniforms.orbit_length;
    if (base + uniforms.orbit_length > arrayLength(&points)) {
        return;
    }
    var position = points[base].position;
    for (var k = 1u; k < uniforms.orbit_length; k = k + 1u) {
        let t = uniforms.time + f32(k) * uniforms.time_step;
        position = position + forces_accel(position, t, uniforms.forces_count) * uniforms.time_step;
        points[base + k].position = position;
    }
}
"#;

/// Steering kernel for [`KernelKind::FlockUpdate`].
pub fn update_source() -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        AgentRecord::WGSL_STRUCT,
        FlockConfigRecord::WGSL_STRUCT,
        FlockDrivesRecord::WGSL_STRUCT,
        ForceRecord::WGSL_STRUCT,
        UpdateUniforms::WGSL_STRUCT,
        CONSTANTS_WGSL,
        FORCE_WGSL,
        SURVIVAL_WGSL,
        UPDATE_BODY
    )
}

/// Probe kernel for [`KernelKind::FlockOrbits`].
pub fn flock_orbits_source() -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        OrbitPoint::WGSL_STRUCT,
        FlockConfigRecord::WGSL_STRUCT,
        ForceRecord::WGSL_STRUCT,
        OrbitUniforms::WGSL_STRUCT,
        CONSTANTS_WGSL,
        FORCE_WGSL,
        SURVIVAL_WGSL,
        FLOCK_ORBITS_BODY
    )
}

/// Probe kernel for [`KernelKind::ForceOrbits`].
pub fn force_orbits_source() -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        OrbitPoint::WGSL_STRUCT,
        ForceRecord::WGSL_STRUCT,
        OrbitUniforms::WGSL_STRUCT,
        CONSTANTS_WGSL,
        FORCE_WGSL,
        FORCE_ORBITS_BODY
    )
}

/// Source of the kernel `kind`.
pub fn source(kind: KernelKind) -> String {
    match kind {
        KernelKind::FlockUpdate => update_source(),
        KernelKind::FlockOrbits => flock_orbits_source(),
        KernelKind::ForceOrbits => force_orbits_source(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_declare_entry_point() {
        for kind in [KernelKind::FlockUpdate, KernelKind::FlockOrbits, KernelKind::ForceOrbits] {
            let src = source(kind);
            assert!(src.contains("@compute @workgroup_size(32)"), "{:?}", kind);
            assert!(src.contains("fn main("), "{:?}", kind);
        }
    }

    #[test]
    fn test_binding_count_matches_layout() {
        for kind in [KernelKind::FlockUpdate, KernelKind::FlockOrbits, KernelKind::ForceOrbits] {
            let src = source(kind);
            assert_eq!(src.matches("@binding(").count(), kind.layout().len(), "{:?}", kind);
        }
    }

    #[test]
    fn test_force_orbits_skip_flock_config() {
        assert!(!force_orbits_source().contains("struct FlockConfigRecord"));
        assert!(update_source().contains("struct FlockDrivesRecord"));
    }
}
