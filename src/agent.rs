//! Agent identity and state.
//!
//! An [`Agent`] is one pooled slot. Its [`AgentId`] never changes; each
//! activation bumps the slot's generation so an [`AgentHandle`] taken before
//! a kill cannot address the recycled slot.

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifies a flock within a world.
    FlockId,
    "flock"
);
id_type!(
    /// Identifies a force within a world.
    ForceId,
    "force"
);
id_type!(
    /// Identifies a domain within a world.
    DomainId,
    "domain"
);
id_type!(
    /// Identifies a node of the scene hierarchy.
    NodeId,
    "node"
);

/// Stable identity key of a pooled agent slot.
///
/// Ordered by flock, then by serial. Serials are handed out in construction
/// order and never reused within a flock, so sorting by `AgentId` gives the
/// stable enumeration order used for frame buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId {
    pub flock: FlockId,
    pub serial: u32,
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/agent#{}", self.flock, self.serial)
    }
}

/// One activation of an agent slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentHandle {
    pub id: AgentId,
    pub generation: u32,
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.generation)
    }
}

/// Template an agent slot is built from.
///
/// A flock without a blueprint cannot spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBlueprint {
    /// Name prefix for the scene nodes of constructed agents.
    pub name: String,
}

impl AgentBlueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A boid.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    id: AgentId,
    /// Owning flock while active, `None` while pooled.
    pub(crate) flock: Option<FlockId>,
    pub(crate) generation: u32,
    pub(crate) node: Option<NodeId>,
    /// World-space position.
    pub position: Vec2,
    /// Unit direction of travel.
    pub heading: Vec2,
    /// Scalar speed along `heading`.
    pub speed: f32,
}

impl Agent {
    pub(crate) fn new(id: AgentId) -> Self {
        Self {
            id,
            flock: None,
            generation: 0,
            node: None,
            position: Vec2::ZERO,
            heading: Vec2::Y,
            speed: 0.0,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Handle for the current activation.
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            id: self.id,
            generation: self.generation,
        }
    }

    /// Flock that currently owns this agent.
    pub fn flock(&self) -> Option<FlockId> {
        self.flock
    }

    pub fn is_active(&self) -> bool {
        self.flock.is_some()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Scene node created for this slot, if any.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Velocity vector (`heading * speed`).
    pub fn velocity(&self) -> Vec2 {
        self.heading * self.speed
    }
}
