//! Scene files.
//!
//! A scene is a JSON document listing domains, forces and flocks by name.
//! Every field except names has a default, so a minimal scene is short:
//!
//! ```json
//! {
//!   "seed": 7,
//!   "domains": ["meadow"],
//!   "forces": [{ "name": "wind", "domain": "meadow", "params": { "kind": "Turbulence" } }],
//!   "flocks": [
//!     {
//!       "name": "sparrows",
//!       "domain": "meadow",
//!       "blueprint": { "name": "sparrow" },
//!       "forces": [{ "force": "wind", "weight": 0.5 }]
//!     }
//!   ]
//! }
//! ```
//!
//! Load with [`SceneConfig::from_json_str`] or [`SceneConfig::load`] and
//! build with [`World::from_scene`](crate::world::World::from_scene).

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::agent::AgentBlueprint;
use crate::error::ConfigError;
use crate::flock::{Drives, FlockParams, FlockSettings};
use crate::force::ForceParams;

/// How `World::advance` treats configuration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    /// Log a warning and skip the offending flock for the tick.
    #[default]
    Interactive,
    /// Return the error.
    Simulation,
}

/// An interaction with another flock, by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionConfig {
    pub flock: String,
    #[serde(default)]
    pub drives: Drives,
}

/// A weighted force reference, by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceWeightConfig {
    pub force: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

fn default_capacity() -> usize {
    40
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlockConfig {
    pub name: String,
    /// Domain to place the flock under.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub origin: Vec2,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub pool_max: Option<usize>,
    #[serde(default)]
    pub blueprint: Option<AgentBlueprint>,
    #[serde(default)]
    pub params: FlockParams,
    #[serde(default)]
    pub interactions: Vec<InteractionConfig>,
    #[serde(default)]
    pub forces: Vec<ForceWeightConfig>,
}

impl FlockConfig {
    /// Settings for [`Flock::new`](crate::flock::Flock::new). Interactions and
    /// forces are resolved by the world once every object exists.
    pub fn settings(&self) -> FlockSettings {
        FlockSettings {
            name: self.name.clone(),
            origin: self.origin,
            capacity: self.capacity,
            pool_max: self.pool_max,
            blueprint: self.blueprint.clone(),
            params: self.params.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceConfig {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub origin: Vec2,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: ForceParams,
}

/// A whole scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Seed for spawn placement.
    pub seed: u64,
    pub mode: RunMode,
    pub domains: Vec<String>,
    pub forces: Vec<ForceConfig>,
    pub flocks: Vec<FlockConfig>,
}

impl SceneConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
