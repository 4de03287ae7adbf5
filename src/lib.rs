//! # boid-flocks
//!
//! Pooled boid flocks stepped by a compute kernel.
//!
//! Each tick every flock is flattened into a handful of plain buffers (its own
//! agents first, then the agents of the flocks it reacts to), one update
//! kernel runs per flock, and the results are written back to the agents.
//! Spawning and culling happen between ticks, with agent slots recycled from
//! a per-flock pool.
//!
//! ## Quick Start
//!
//! ```ignore
//! use boid_flocks::prelude::*;
//!
//! fn main() -> Result<(), SimulationError> {
//!     let backend = WgpuBackend::new_blocking()?;
//!     let mut world = World::new(backend).with_seed(42);
//!
//!     let meadow = world.create_domain("meadow")?;
//!     let wind = world.create_force(
//!         "wind",
//!         Vec2::ZERO,
//!         ForceParams::turbulence(1.5, 0.5, 1.0),
//!         Some(meadow),
//!     )?;
//!     let sparrows = world.create_flock(
//!         FlockSettings::new("sparrows")
//!             .with_capacity(64)
//!             .with_blueprint(AgentBlueprint::new("sparrow")),
//!         Some(meadow),
//!     )?;
//!     world.set_force_weight(sparrows, wind, 0.5)?;
//!
//!     for _ in 0..600 {
//!         world.advance(1.0 / 60.0)?;
//!     }
//!     println!("{}", world.describe_domain(meadow)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Flocks
//!
//! A [`Flock`] owns a fixed-capacity set of agents around an origin. Agents
//! spawn on a ring of `spawn_radius` and are culled once they cross
//! `kill_radius`. Steering mixes alignment, cohesion and separation against
//! the flock's own agents and against any flock it has an interaction with.
//! Interactions are one-way: hawks scattering sparrows does not make
//! sparrows chase hawks.
//!
//! ### Forces
//!
//! A [`Force`] is a radial or turbulent field. Flocks opt in with a weight.
//!
//! ### Domains and the scene tree
//!
//! Flocks, forces and agents each get a node in a [`SceneTree`]. An agent
//! belongs to the nearest flock above its node, a flock or force to the
//! nearest domain above its node. Moving nodes re-resolves ownership lazily
//! before the next use.
//!
//! ### Backends
//!
//! Kernels run through a [`ComputeBackend`]: [`WgpuBackend`] on a real
//! device, [`HostBackend`] on the CPU for tests and headless tools.
//!
//! ### Orbit previews
//!
//! [`World::request_flock_orbits`] integrates a grid of massless probes
//! through a flock's force field and returns one polyline per probe.

extern crate self as boid_flocks;

pub mod agent;
pub mod assembler;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod flock;
pub mod force;
pub mod gpu;
pub mod orbits;
pub mod pool;
pub mod records;
pub mod spawn;
pub mod time;
pub mod topology;
pub mod world;

pub use bytemuck;
pub use glam::Vec2;

pub use agent::{Agent, AgentBlueprint, AgentHandle, AgentId, DomainId, FlockId, ForceId, NodeId};
pub use config::{RunMode, SceneConfig};
pub use domain::Domain;
pub use error::{ConfigError, GpuError, LifecycleError, SimulationError};
pub use flock::{Drives, Flock, FlockParams, FlockSettings};
pub use force::{Force, ForceKind, ForceParams};
pub use gpu::{ComputeBackend, HostBackend, WgpuBackend};
pub use orbits::{OrbitSettings, Rect};
pub use boid_flocks_derive::GpuRecord;
pub use records::GpuRecord;
pub use time::SimClock;
pub use topology::SceneTree;
pub use world::{TickReport, World};

/// Everything needed to build and run a world.
pub mod prelude {
    pub use crate::agent::{AgentBlueprint, AgentHandle, DomainId, FlockId, ForceId};
    pub use crate::config::{RunMode, SceneConfig};
    pub use crate::error::{ConfigError, GpuError, LifecycleError, SimulationError};
    pub use crate::flock::{Drives, FlockParams, FlockSettings};
    pub use crate::force::{ForceKind, ForceParams};
    pub use crate::gpu::{ComputeBackend, HostBackend, WgpuBackend};
    pub use crate::orbits::{OrbitSettings, Rect};
    pub use crate::records::GpuRecord;
    pub use crate::world::{TickReport, World};
    pub use boid_flocks_derive::GpuRecord;
    pub use glam::Vec2;
}
