//! Error types for boid-flocks.
//!
//! Four families: device failures ([`GpuError`]), bad configuration
//! ([`ConfigError`]), lifecycle contract violations ([`LifecycleError`]) and
//! the umbrella [`SimulationError`] returned by a tick.

use std::fmt;

use crate::agent::{AgentHandle, FlockId};

/// Errors that can occur while talking to a compute device.
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// A kernel was bound with a missing or mis-sized buffer.
    Binding(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::Binding(msg) => write!(f, "Invalid kernel binding: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors in flock, force or scene configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The flock has no agent blueprint to spawn from.
    MissingBlueprint(String),
    /// Capacity must be at least one.
    InvalidCapacity { flock: String, capacity: usize },
    /// Pool max size must be at least the flock capacity.
    PoolTooSmall { flock: String, capacity: usize, pool_max: usize },
    /// Capacity cannot drop below the number of active agents.
    CapacityBelowPopulation { flock: String, capacity: usize, active: usize },
    /// Spawn frequency must be finite and non-negative.
    InvalidSpawnFrequency { flock: String, frequency: f32 },
    /// An interaction or lookup names a flock that does not exist.
    UnknownFlock(String),
    /// A lookup names a force that does not exist.
    UnknownForce(String),
    /// A lookup names a domain that does not exist.
    UnknownDomain(String),
    /// A lookup names a scene node that does not exist.
    UnknownNode(u32),
    /// Re-parenting would make a node its own ancestor.
    CyclicParent { node: u32, parent: u32 },
    /// Two objects of the same kind share a name.
    DuplicateName(String),
    /// Scene JSON could not be parsed.
    Parse(serde_json::Error),
    /// Scene file could not be read.
    Io(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingBlueprint(flock) => {
                write!(f, "Flock '{}' has no agent blueprint. Use .with_blueprint() to set one.", flock)
            }
            ConfigError::InvalidCapacity { flock, capacity } => {
                write!(f, "Flock '{}' has invalid capacity {} (must be at least 1)", flock, capacity)
            }
            ConfigError::PoolTooSmall { flock, capacity, pool_max } => write!(
                f,
                "Flock '{}' pool max size {} is smaller than its capacity {}",
                flock, pool_max, capacity
            ),
            ConfigError::CapacityBelowPopulation { flock, capacity, active } => write!(
                f,
                "Flock '{}' cannot shrink capacity to {} while {} agents are active",
                flock, capacity, active
            ),
            ConfigError::InvalidSpawnFrequency { flock, frequency } => {
                write!(f, "Flock '{}' has invalid spawn frequency {} (must be finite and non-negative)", flock, frequency)
            }
            ConfigError::UnknownFlock(name) => write!(f, "Unknown flock: {}", name),
            ConfigError::UnknownForce(name) => write!(f, "Unknown force: {}", name),
            ConfigError::UnknownDomain(name) => write!(f, "Unknown domain: {}", name),
            ConfigError::UnknownNode(id) => write!(f, "Unknown scene node: {}", id),
            ConfigError::CyclicParent { node, parent } => {
                write!(f, "Cannot parent scene node {} under its descendant {}", node, parent)
            }
            ConfigError::DuplicateName(name) => write!(f, "Duplicate name: {}", name),
            ConfigError::Parse(e) => write!(f, "Failed to parse scene: {}", e),
            ConfigError::Io(e) => write!(f, "Failed to read scene file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Violations of the spawn/kill contract.
///
/// `PoolExhausted` is recoverable: the caller may retry once agents die.
/// `NotOwned` means some other code holds a stale or foreign handle and
/// should not be swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The flock is at capacity or its pool is at max size.
    PoolExhausted { flock: FlockId, capacity: usize },
    /// The handle does not name an active agent of this flock.
    NotOwned { flock: FlockId, handle: AgentHandle },
}

impl LifecycleError {
    /// Whether retrying later can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LifecycleError::PoolExhausted { .. })
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::PoolExhausted { flock, capacity } => {
                write!(f, "Flock {} pool exhausted (capacity {})", flock, capacity)
            }
            LifecycleError::NotOwned { flock, handle } => {
                write!(f, "Agent {} is not an active agent of flock {}", handle, flock)
            }
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Errors that can occur while advancing a simulation.
#[derive(Debug)]
pub enum SimulationError {
    /// Configuration was invalid at the point of use.
    Config(ConfigError),
    /// A spawn or kill was rejected.
    Lifecycle(LifecycleError),
    /// The compute device failed.
    Gpu(GpuError),
    /// Assembled buffers and kernel results disagree.
    Desync(String),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::Config(e) => write!(f, "Configuration error: {}", e),
            SimulationError::Lifecycle(e) => write!(f, "Lifecycle error: {}", e),
            SimulationError::Gpu(e) => write!(f, "GPU error: {}", e),
            SimulationError::Desync(msg) => write!(f, "Buffer desynchronization: {}", msg),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Config(e) => Some(e),
            SimulationError::Lifecycle(e) => Some(e),
            SimulationError::Gpu(e) => Some(e),
            SimulationError::Desync(_) => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(e: ConfigError) -> Self {
        SimulationError::Config(e)
    }
}

impl From<LifecycleError> for SimulationError {
    fn from(e: LifecycleError) -> Self {
        SimulationError::Lifecycle(e)
    }
}

impl From<GpuError> for SimulationError {
    fn from(e: GpuError) -> Self {
        SimulationError::Gpu(e)
    }
}
