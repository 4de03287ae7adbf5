//! Point-source force fields.
//!
//! A [`Force`] has no agents of its own. Flocks reference it through
//! [`ForceWeight`](crate::flock::ForceWeight) entries and it is flattened
//! into one [`ForceRecord`] per referencing flock each tick.
//!
//! | Kind | Field | Parameters |
//! |------|-------|------------|
//! | `Radial` | push away from the origin (pull when intensity < 0) | `falloff_power` |
//! | `Turbulence` | direction from a moving sin/cos lattice | `spatial_scale`, `temporal_scale` |

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::agent::{ForceId, NodeId};
use crate::records::ForceRecord;

/// Distances below this are clamped when evaluating radial falloff.
pub const RADIAL_SOFTENING: f32 = 0.25;

/// Force type tag. The discriminant is the `kind` value seen by kernels;
/// `0` is reserved for an empty record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum ForceKind {
    #[default]
    Radial = 1,
    Turbulence = 2,
}

impl ForceKind {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Tunable parameters of a force.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParams {
    pub kind: ForceKind,
    pub intensity: f32,
    /// Radial only.
    pub falloff_power: f32,
    /// Turbulence only.
    pub spatial_scale: f32,
    /// Turbulence only.
    pub temporal_scale: f32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            kind: ForceKind::Radial,
            intensity: 1.0,
            falloff_power: 2.0,
            spatial_scale: 0.5,
            temporal_scale: 1.0,
        }
    }
}

impl ForceParams {
    /// Radial push with the given intensity and falloff.
    pub fn radial(intensity: f32, falloff_power: f32) -> Self {
        Self {
            kind: ForceKind::Radial,
            intensity,
            falloff_power,
            ..Self::default()
        }
    }

    /// Turbulence with the given intensity and scales.
    pub fn turbulence(intensity: f32, spatial_scale: f32, temporal_scale: f32) -> Self {
        Self {
            kind: ForceKind::Turbulence,
            intensity,
            spatial_scale,
            temporal_scale,
            ..Self::default()
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }
}

/// A placed force field.
#[derive(Debug, Clone, PartialEq)]
pub struct Force {
    id: ForceId,
    name: String,
    node: Option<NodeId>,
    pub origin: Vec2,
    /// Disabled forces flatten to zero intensity.
    pub enabled: bool,
    pub params: ForceParams,
}

impl Force {
    pub fn new(id: ForceId, name: impl Into<String>, origin: Vec2, params: ForceParams) -> Self {
        Self {
            id,
            name: name.into(),
            node: None,
            origin,
            enabled: true,
            params,
        }
    }

    pub fn id(&self) -> ForceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub(crate) fn set_node(&mut self, node: NodeId) {
        self.node = Some(node);
    }

    /// Intensity after the enabled flag is applied.
    pub fn effective_intensity(&self) -> f32 {
        if self.enabled {
            self.params.intensity
        } else {
            0.0
        }
    }

    /// Flatten into a kernel record, scaled by a per-flock weight.
    pub fn record(&self, weight: f32) -> ForceRecord {
        ForceRecord {
            origin: self.origin,
            kind: self.params.kind.as_u32(),
            intensity: self.effective_intensity() * weight,
            spatial_scale: self.params.spatial_scale,
            temporal_scale: self.params.temporal_scale,
            falloff_power: self.params.falloff_power,
        }
    }
}

impl ForceRecord {
    /// Record that contributes nothing, used for forces that no longer exist.
    pub fn empty() -> Self {
        Self {
            origin: Vec2::ZERO,
            kind: 0,
            intensity: 0.0,
            spatial_scale: 0.0,
            temporal_scale: 0.0,
            falloff_power: 0.0,
        }
    }

    /// Evaluate the field at `position` and `time`.
    ///
    /// Mirrors `force_at` in the WGSL kernels.
    pub fn sample(&self, position: Vec2, time: f32) -> Vec2 {
        match self.kind {
            1 => {
                let offset = position - self.origin;
                let distance = offset.length();
                if distance <= f32::EPSILON {
                    return Vec2::ZERO;
                }
                let falloff = distance.max(RADIAL_SOFTENING).powf(self.falloff_power);
                offset / distance * (self.intensity / falloff)
            }
            2 => {
                let p = (position - self.origin) * self.spatial_scale;
                let t = time * self.temporal_scale;
                let angle = ((p.x + t).sin() + (p.y - t).cos()) * PI;
                Vec2::from_angle(angle) * self.intensity
            }
            _ => Vec2::ZERO,
        }
    }
}
