//! Flocks: capacity-bounded agent populations and their lifecycle.
//!
//! A [`Flock`] owns an [`AgentPool`] plus three ordered id sets:
//!
//! | Set | Meaning |
//! |-----|---------|
//! | `live` | agents eligible for this tick's update |
//! | `pending_spawn` | activated since the last tick began, promoted next tick |
//! | `pending_kill` | deactivated but still in `live` until eviction |
//!
//! `live ∩ pending_spawn` is always empty and `pending_kill ⊆ live`.
//!
//! # Stray agents
//!
//! An agent is culled when `(distance < kill_radius) == (kill_radius < spawn_radius)`.
//! With `kill_radius > spawn_radius` this is a containment ring (agents
//! outside `kill_radius` die); with `kill_radius < spawn_radius` it is an
//! exclusion zone (agents inside `kill_radius` die). Equal radii make every
//! agent stray.
//!
//! # Example
//!
//! ```ignore
//! let settings = FlockSettings::new("sparrows")
//!     .with_capacity(40)
//!     .with_blueprint(AgentBlueprint::new("sparrow"))
//!     .with_params(FlockParams::default().with_spawn_frequency(3.0));
//! let mut flock = Flock::new(FlockId(0), settings)?;
//! let spawned = flock.spawn(&mut rng)?;
//! ```

use std::collections::BTreeSet;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentBlueprint, AgentHandle, AgentId, FlockId, ForceId, NodeId};
use crate::error::{ConfigError, LifecycleError, SimulationError};
use crate::pool::{AgentPool, Evicted};
use crate::spawn::{Placement, SpawnRng};

/// Alignment/cohesion/separation weights for one flock relationship.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Drives {
    pub alignment: f32,
    pub cohesion: f32,
    pub separation: f32,
}

impl Default for Drives {
    fn default() -> Self {
        Self {
            alignment: 3.0,
            cohesion: 4.0,
            separation: 2.0,
        }
    }
}

impl Drives {
    pub fn new(alignment: f32, cohesion: f32, separation: f32) -> Self {
        Self {
            alignment,
            cohesion,
            separation,
        }
    }
}

/// How this flock's agents react to the agents of another flock.
///
/// Relationships are one-way: A listing B says nothing about B's view of A.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlienFlockDrives {
    pub flock: FlockId,
    pub drives: Drives,
}

/// A force acting on this flock, scaled by `weight`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceWeight {
    pub force: ForceId,
    pub weight: f32,
}

/// Per-flock steering and spawn parameters.
///
/// Angles are fractions of a full turn (0.5 = half a turn).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockParams {
    /// Radius of the ring agents spawn on.
    pub spawn_radius: f32,
    /// Radius past (or inside) which agents are culled.
    pub kill_radius: f32,
    /// Spawns per second. Zero disables automatic spawning.
    pub spawn_frequency: f32,
    /// Automatic spawning stops at this many active agents.
    pub spawn_max_count: usize,
    /// Weights applied between agents of this flock.
    pub drives: Drives,
    /// Pull towards the region between the spawn and kill radii.
    pub survival_drive: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub max_acceleration: f32,
    /// Turns per second.
    pub max_angular_speed_tau: f32,
    pub view_radius: f32,
    pub view_angle_tau: f32,
    pub avoid_radius: f32,
    pub avoid_angle_tau: f32,
}

impl Default for FlockParams {
    fn default() -> Self {
        Self {
            spawn_radius: 7.0,
            kill_radius: 10.0,
            spawn_frequency: 3.0,
            spawn_max_count: 40,
            drives: Drives::default(),
            survival_drive: 10.0,
            min_speed: 0.1,
            max_speed: 3.0,
            max_acceleration: 2.0,
            max_angular_speed_tau: 0.5,
            view_radius: 4.0,
            view_angle_tau: 0.5,
            avoid_radius: 2.0,
            avoid_angle_tau: 0.8,
        }
    }
}

impl FlockParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set spawn and kill radii.
    pub fn with_radii(mut self, spawn_radius: f32, kill_radius: f32) -> Self {
        self.spawn_radius = spawn_radius;
        self.kill_radius = kill_radius;
        self
    }

    pub fn with_spawn_frequency(mut self, frequency: f32) -> Self {
        self.spawn_frequency = frequency;
        self
    }

    pub fn with_spawn_max_count(mut self, count: usize) -> Self {
        self.spawn_max_count = count;
        self
    }

    pub fn with_drives(mut self, drives: Drives) -> Self {
        self.drives = drives;
        self
    }

    pub fn with_survival_drive(mut self, drive: f32) -> Self {
        self.survival_drive = drive;
        self
    }

    /// Set the speed band spawned and updated agents stay within.
    pub fn with_speed(mut self, min_speed: f32, max_speed: f32) -> Self {
        self.min_speed = min_speed;
        self.max_speed = max_speed;
        self
    }

    pub fn with_max_acceleration(mut self, acceleration: f32) -> Self {
        self.max_acceleration = acceleration;
        self
    }

    pub fn with_max_angular_speed(mut self, turns_per_second: f32) -> Self {
        self.max_angular_speed_tau = turns_per_second;
        self
    }

    /// Set the perception cone used for alignment and cohesion.
    pub fn with_view(mut self, radius: f32, angle_tau: f32) -> Self {
        self.view_radius = radius;
        self.view_angle_tau = angle_tau;
        self
    }

    /// Set the perception cone used for separation.
    pub fn with_avoid(mut self, radius: f32, angle_tau: f32) -> Self {
        self.avoid_radius = radius;
        self.avoid_angle_tau = angle_tau;
        self
    }

    /// Minimum time between automatic spawns, in seconds.
    pub fn spawn_interval(&self) -> f64 {
        1.0 / self.spawn_frequency as f64
    }

    fn validate(&self, flock: &str) -> Result<(), ConfigError> {
        if !self.spawn_frequency.is_finite() || self.spawn_frequency < 0.0 {
            return Err(ConfigError::InvalidSpawnFrequency {
                flock: flock.to_string(),
                frequency: self.spawn_frequency,
            });
        }
        Ok(())
    }
}

/// Everything needed to build a [`Flock`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlockSettings {
    pub name: String,
    pub origin: Vec2,
    pub capacity: usize,
    /// Defaults to `capacity`.
    pub pool_max: Option<usize>,
    pub blueprint: Option<AgentBlueprint>,
    pub params: FlockParams,
}

impl FlockSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: Vec2::ZERO,
            capacity: 40,
            pool_max: None,
            blueprint: None,
            params: FlockParams::default(),
        }
    }

    pub fn with_origin(mut self, origin: Vec2) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_pool_max(mut self, pool_max: usize) -> Self {
        self.pool_max = Some(pool_max);
        self
    }

    pub fn with_blueprint(mut self, blueprint: AgentBlueprint) -> Self {
        self.blueprint = Some(blueprint);
        self
    }

    pub fn with_params(mut self, params: FlockParams) -> Self {
        self.params = params;
        self
    }
}

/// Result of a successful spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spawned {
    pub handle: AgentHandle,
    /// A new pool slot was constructed and needs a scene node.
    pub created: bool,
}

/// A capacity-bounded group of agents.
#[derive(Debug, Clone)]
pub struct Flock {
    id: FlockId,
    name: String,
    node: Option<NodeId>,
    /// Center of the spawn and kill rings.
    pub origin: Vec2,
    params: FlockParams,
    capacity: usize,
    blueprint: Option<AgentBlueprint>,
    pool: AgentPool,
    live: BTreeSet<AgentId>,
    pending_spawn: BTreeSet<AgentId>,
    pending_kill: BTreeSet<AgentId>,
    interactions: Vec<AlienFlockDrives>,
    forces: Vec<ForceWeight>,
    last_spawn_time: f64,
}

impl Flock {
    /// Build a flock, validating capacity, pool size and parameters.
    pub fn new(id: FlockId, settings: FlockSettings) -> Result<Self, ConfigError> {
        let FlockSettings {
            name,
            origin,
            capacity,
            pool_max,
            blueprint,
            params,
        } = settings;

        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity { flock: name, capacity });
        }
        let pool_max = pool_max.unwrap_or(capacity);
        if pool_max < capacity {
            return Err(ConfigError::PoolTooSmall {
                flock: name,
                capacity,
                pool_max,
            });
        }
        params.validate(&name)?;

        Ok(Self {
            id,
            name,
            node: None,
            origin,
            params,
            capacity,
            blueprint,
            pool: AgentPool::new(id, pool_max),
            live: BTreeSet::new(),
            pending_spawn: BTreeSet::new(),
            pending_kill: BTreeSet::new(),
            interactions: Vec::new(),
            forces: Vec::new(),
            last_spawn_time: f64::NEG_INFINITY,
        })
    }

    // ========== Identity & configuration ==========

    pub fn id(&self) -> FlockId {
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

    pub fn params(&self) -> &FlockParams {
        &self.params
    }

    /// Replace the parameters. Takes effect at the next buffer assembly.
    pub fn set_params(&mut self, params: FlockParams) -> Result<(), ConfigError> {
        params.validate(&self.name)?;
        self.params = params;
        Ok(())
    }

    pub fn blueprint(&self) -> Option<&AgentBlueprint> {
        self.blueprint.as_ref()
    }

    pub fn set_blueprint(&mut self, blueprint: Option<AgentBlueprint>) {
        self.blueprint = blueprint;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. The pool max grows to match if needed.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                flock: self.name.clone(),
                capacity,
            });
        }
        let active = self.len();
        if capacity < active {
            return Err(ConfigError::CapacityBelowPopulation {
                flock: self.name.clone(),
                capacity,
                active,
            });
        }
        if self.pool.max_size() < capacity {
            self.pool.set_max_size(capacity);
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Lower the pool max size and destroy surplus free slots.
    pub fn shrink_pool(&mut self, pool_max: usize) -> Result<Vec<Evicted>, ConfigError> {
        if pool_max < self.capacity {
            return Err(ConfigError::PoolTooSmall {
                flock: self.name.clone(),
                capacity: self.capacity,
                pool_max,
            });
        }
        Ok(self.pool.shrink_to(pool_max))
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    /// Inter-flock relationships in buffer order (index 1, 2, ...).
    pub fn interactions(&self) -> &[AlienFlockDrives] {
        &self.interactions
    }

    /// Add or replace the relationship with `flock`.
    pub fn set_interaction(&mut self, flock: FlockId, drives: Drives) {
        match self.interactions.iter_mut().find(|i| i.flock == flock) {
            Some(existing) => existing.drives = drives,
            None => self.interactions.push(AlienFlockDrives { flock, drives }),
        }
    }

    pub fn remove_interaction(&mut self, flock: FlockId) -> bool {
        let before = self.interactions.len();
        self.interactions.retain(|i| i.flock != flock);
        self.interactions.len() != before
    }

    pub fn forces(&self) -> &[ForceWeight] {
        &self.forces
    }

    /// Add or replace the weight of `force` on this flock.
    pub fn set_force_weight(&mut self, force: ForceId, weight: f32) {
        match self.forces.iter_mut().find(|f| f.force == force) {
            Some(existing) => existing.weight = weight,
            None => self.forces.push(ForceWeight { force, weight }),
        }
    }

    pub fn remove_force(&mut self, force: ForceId) -> bool {
        let before = self.forces.len();
        self.forces.retain(|f| f.force != force);
        self.forces.len() != before
    }

    // ========== Population ==========

    /// Number of active agents: live minus killed, plus pending spawns.
    pub fn len(&self) -> usize {
        self.live.len() - self.pending_kill.len() + self.pending_spawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active agent ids in stable order.
    pub fn active_ids(&self) -> Vec<AgentId> {
        let mut ids: BTreeSet<AgentId> = self.live.difference(&self.pending_kill).copied().collect();
        ids.extend(self.pending_spawn.iter().copied());
        ids.into_iter().collect()
    }

    /// Active agents in stable order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.active_ids().into_iter().filter_map(move |id| self.pool.get(id))
    }

    /// Agents eligible for this tick's update: live and not killed.
    ///
    /// Pending spawns are excluded until the next [`Flock::promote_spawns`].
    pub fn updatable(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.live
            .difference(&self.pending_kill)
            .filter_map(move |id| self.pool.get(*id))
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.pool.get(id)
    }

    pub(crate) fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.pool.get_mut(id)
    }

    /// Attach `node` to a slot, returning the node it replaced.
    pub(crate) fn set_agent_node(&mut self, id: AgentId, node: NodeId) -> Option<NodeId> {
        self.pool.get_mut(id).and_then(|agent| agent.node.replace(node))
    }

    /// Detach a slot's scene node, e.g. when the agent moves to another flock.
    pub(crate) fn take_agent_node(&mut self, id: AgentId) -> Option<NodeId> {
        self.pool.get_mut(id).and_then(|agent| agent.node.take())
    }

    /// Whether `handle` names a currently active agent of this flock.
    pub fn owns(&self, handle: AgentHandle) -> bool {
        self.pool
            .get(handle.id)
            .is_some_and(|a| a.flock == Some(self.id) && a.generation == handle.generation)
    }

    /// Whether `handle` may still receive kernel results this tick.
    pub fn accepts_results(&self, handle: AgentHandle) -> bool {
        self.owns(handle) && self.live.contains(&handle.id) && !self.pending_kill.contains(&handle.id)
    }

    pub fn pending_spawn_count(&self) -> usize {
        self.pending_spawn.len()
    }

    pub fn pending_kill_count(&self) -> usize {
        self.pending_kill.len()
    }

    // ========== Spawning ==========

    /// Activate one pooled agent on the spawn ring.
    ///
    /// The agent is queued as a pending spawn and joins the update set at
    /// the next [`Flock::promote_spawns`].
    pub fn spawn(&mut self, rng: &mut SpawnRng) -> Result<Spawned, SimulationError> {
        if self.blueprint.is_none() {
            return Err(ConfigError::MissingBlueprint(self.name.clone()).into());
        }
        if self.len() >= self.capacity {
            return Err(self.exhausted().into());
        }

        let placement = rng.placement(
            self.origin,
            self.params.spawn_radius,
            self.params.min_speed,
            self.params.max_speed,
        );
        Ok(self.activate(placement)?)
    }

    /// Take over an agent whose scene node moved under this flock, keeping
    /// its motion state.
    ///
    /// Queued as a pending spawn like [`Flock::spawn`]. No blueprint is
    /// needed since the agent already exists.
    pub fn adopt(&mut self, state: Placement) -> Result<Spawned, LifecycleError> {
        if self.len() >= self.capacity {
            return Err(self.exhausted());
        }
        self.activate(state)
    }

    fn exhausted(&self) -> LifecycleError {
        LifecycleError::PoolExhausted {
            flock: self.id,
            capacity: self.capacity,
        }
    }

    fn activate(&mut self, placement: Placement) -> Result<Spawned, LifecycleError> {
        let acquired = self.pool.acquire(placement).ok_or_else(|| self.exhausted())?;

        // A slot killed earlier this tick may come straight back.
        self.live.remove(&acquired.id);
        self.pending_kill.remove(&acquired.id);
        self.pending_spawn.insert(acquired.id);

        let generation = self.pool.get(acquired.id).map(Agent::generation).unwrap_or_default();
        Ok(Spawned {
            handle: AgentHandle {
                id: acquired.id,
                generation,
            },
            created: acquired.created,
        })
    }

    /// Spawn one agent if below the spawn max count and the spawn interval
    /// has elapsed since the last automatic spawn.
    pub fn spawn_if_needed(&mut self, now: f64, rng: &mut SpawnRng) -> Result<Option<Spawned>, SimulationError> {
        let limit = self.params.spawn_max_count.min(self.capacity);
        if self.len() >= limit {
            return Ok(None);
        }
        if !(now - self.last_spawn_time > self.params.spawn_interval()) {
            return Ok(None);
        }
        let spawned = self.spawn(rng)?;
        self.last_spawn_time = now;
        Ok(Some(spawned))
    }

    /// Time of the last successful automatic spawn (`-inf` before the first).
    pub fn last_spawn_time(&self) -> f64 {
        self.last_spawn_time
    }

    // ========== Killing ==========

    /// Deactivate an agent and return its slot to the pool.
    ///
    /// A pending spawn is dropped outright; a live agent stays in `live` as a
    /// pending kill until [`Flock::evict_killed`].
    pub fn kill(&mut self, handle: AgentHandle) -> Result<(), LifecycleError> {
        if !self.owns(handle) {
            return Err(LifecycleError::NotOwned { flock: self.id, handle });
        }
        self.pool.release(handle.id);
        if !self.pending_spawn.remove(&handle.id) {
            self.pending_kill.insert(handle.id);
        }
        Ok(())
    }

    /// Whether `agent` is outside the band this flock keeps alive.
    pub fn is_stray(&self, agent: &Agent) -> bool {
        is_stray(
            agent.position.distance(self.origin),
            self.params.spawn_radius,
            self.params.kill_radius,
        )
    }

    /// Kill every active agent (live or pending) that is stray and passes
    /// `include`.
    ///
    /// The world passes the same ownership filter it assembles with, so
    /// orphaned agents are neither simulated nor culled.
    pub fn kill_stray_agents(&mut self, include: impl Fn(&Agent) -> bool) -> Vec<AgentHandle> {
        let strays: Vec<AgentHandle> = self
            .agents()
            .filter(|agent| include(*agent) && self.is_stray(agent))
            .map(Agent::handle)
            .collect();
        for handle in &strays {
            let killed = self.kill(*handle);
            debug_assert!(killed.is_ok(), "stray {} not owned by {}", handle, self.id);
        }
        strays
    }

    // ========== Tick boundaries ==========

    /// Merge pending spawns into the live set.
    pub fn promote_spawns(&mut self) -> usize {
        let promoted = self.pending_spawn.len();
        self.live.append(&mut self.pending_spawn);
        promoted
    }

    /// Drop pending kills from the live set.
    pub fn evict_killed(&mut self) -> usize {
        let evicted = self.pending_kill.len();
        for id in std::mem::take(&mut self.pending_kill) {
            self.live.remove(&id);
        }
        evicted
    }

    /// Destroy every slot. Used when the flock itself is removed.
    pub fn dispose(&mut self) -> Vec<Evicted> {
        self.live.clear();
        self.pending_spawn.clear();
        self.pending_kill.clear();
        self.pool.dispose()
    }
}

/// The stray predicate on raw distances.
#[inline]
pub fn is_stray(distance: f32, spawn_radius: f32, kill_radius: f32) -> bool {
    (distance < kill_radius) == (kill_radius < spawn_radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flock_with(capacity: usize, params: FlockParams) -> Flock {
        let settings = FlockSettings::new("test")
            .with_capacity(capacity)
            .with_blueprint(AgentBlueprint::new("boid"))
            .with_params(params);
        Flock::new(FlockId(0), settings).unwrap()
    }

    fn assert_integrity(flock: &Flock) {
        assert!(flock.len() <= flock.capacity());
        assert_eq!(flock.len(), flock.pool().active_count());
        for agent in flock.agents() {
            assert_eq!(agent.flock(), Some(flock.id()));
        }
        for agent in flock.pool().slots() {
            if agent.flock() == Some(flock.id()) {
                assert!(flock.active_ids().contains(&agent.id()));
            }
        }
    }

    // ========== Construction ==========

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Flock::new(FlockId(0), FlockSettings::new("empty").with_capacity(0));
        assert!(matches!(result, Err(ConfigError::InvalidCapacity { .. })));
    }

    #[test]
    fn test_pool_smaller_than_capacity_rejected() {
        let settings = FlockSettings::new("small").with_capacity(4).with_pool_max(2);
        assert!(matches!(
            Flock::new(FlockId(0), settings),
            Err(ConfigError::PoolTooSmall { .. })
        ));
    }

    #[test]
    fn test_negative_spawn_frequency_rejected() {
        let settings = FlockSettings::new("neg").with_params(FlockParams::default().with_spawn_frequency(-1.0));
        assert!(matches!(
            Flock::new(FlockId(0), settings),
            Err(ConfigError::InvalidSpawnFrequency { .. })
        ));
    }

    // ========== Spawn ==========

    #[test]
    fn test_spawn_without_blueprint_fails() {
        let mut flock = Flock::new(FlockId(0), FlockSettings::new("bare")).unwrap();
        let mut rng = SpawnRng::new(0);
        let err = flock.spawn(&mut rng).unwrap_err();
        assert!(matches!(err, SimulationError::Config(ConfigError::MissingBlueprint(_))));
    }

    #[test]
    fn test_spawn_is_pending_until_promoted() {
        let mut flock = flock_with(4, FlockParams::default());
        let mut rng = SpawnRng::new(1);
        let spawned = flock.spawn(&mut rng).unwrap();
        assert!(spawned.created);
        assert_eq!(flock.len(), 1);
        assert_eq!(flock.updatable().count(), 0);

        assert_eq!(flock.promote_spawns(), 1);
        assert_eq!(flock.updatable().count(), 1);
        assert_integrity(&flock);
    }

    #[test]
    fn test_spawn_places_agent_on_ring() {
        let params = FlockParams::default().with_radii(5.0, 10.0).with_speed(1.0, 2.0);
        let mut flock = flock_with(4, params);
        flock.origin = Vec2::new(2.0, 3.0);
        let mut rng = SpawnRng::new(9);
        let spawned = flock.spawn(&mut rng).unwrap();
        let agent = flock.agent(spawned.handle.id).unwrap();
        assert!((agent.position.distance(flock.origin) - 5.0).abs() < 1e-4);
        assert!(agent.speed >= 1.0 && agent.speed < 2.0);
        assert!((agent.heading.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_spawn_beyond_capacity_is_recoverable() {
        let mut flock = flock_with(2, FlockParams::default());
        let mut rng = SpawnRng::new(2);
        flock.spawn(&mut rng).unwrap();
        flock.spawn(&mut rng).unwrap();
        match flock.spawn(&mut rng) {
            Err(SimulationError::Lifecycle(e)) => assert!(e.is_recoverable()),
            other => panic!("expected pool exhaustion, got {:?}", other),
        }
        assert_integrity(&flock);
    }

    #[test]
    fn test_spawn_rate_gating() {
        let params = FlockParams::default().with_spawn_frequency(2.0).with_spawn_max_count(40);
        let mut flock = flock_with(40, params);
        let mut rng = SpawnRng::new(3);
        let mut spawns = 0;
        for step in 1..=10 {
            let now = step as f64 * 0.1;
            if flock.spawn_if_needed(now, &mut rng).unwrap().is_some() {
                spawns += 1;
            }
        }
        assert_eq!(spawns, 2);
    }

    #[test]
    fn test_spawn_max_count_caps_population() {
        let params = FlockParams::default().with_spawn_frequency(10.0).with_spawn_max_count(2);
        let mut flock = flock_with(2, params);
        let mut rng = SpawnRng::new(4);
        let mut now = 0.0;
        for _ in 0..4 {
            now += 0.1;
            flock.spawn_if_needed(now, &mut rng).unwrap();
            flock.promote_spawns();
        }
        assert_eq!(flock.len(), 2);
    }

    #[test]
    fn test_zero_frequency_never_spawns() {
        let params = FlockParams::default().with_spawn_frequency(0.0);
        let mut flock = flock_with(4, params);
        let mut rng = SpawnRng::new(5);
        for step in 0..20 {
            assert!(flock.spawn_if_needed(step as f64, &mut rng).unwrap().is_none());
        }
    }

    #[test]
    fn test_failed_spawn_keeps_interval_open() {
        let settings = FlockSettings::new("bare")
            .with_capacity(4)
            .with_params(FlockParams::default().with_spawn_frequency(1.0));
        let mut flock = Flock::new(FlockId(0), settings).unwrap();
        let mut rng = SpawnRng::new(13);

        assert!(flock.spawn_if_needed(5.0, &mut rng).is_err());
        assert_eq!(flock.last_spawn_time(), f64::NEG_INFINITY);

        // Fixing the flock lets the very next check spawn.
        flock.set_blueprint(Some(AgentBlueprint::new("boid")));
        assert!(flock.spawn_if_needed(5.0, &mut rng).unwrap().is_some());
        assert_eq!(flock.last_spawn_time(), 5.0);
        assert!(flock.spawn_if_needed(5.5, &mut rng).unwrap().is_none());
    }

    #[test]
    fn test_adopt_keeps_motion_state() {
        let mut flock = Flock::new(FlockId(1), FlockSettings::new("bare").with_capacity(1)).unwrap();
        let state = Placement {
            position: Vec2::new(4.0, -2.0),
            heading: Vec2::X,
            speed: 1.5,
        };
        let adopted = flock.adopt(state).unwrap();
        assert_eq!(adopted.handle.id.flock, FlockId(1));
        assert_eq!(flock.pending_spawn_count(), 1);
        let agent = flock.agent(adopted.handle.id).unwrap();
        assert_eq!((agent.position, agent.heading, agent.speed), (state.position, state.heading, state.speed));

        assert!(matches!(flock.adopt(state), Err(LifecycleError::PoolExhausted { .. })));
        assert_integrity(&flock);
    }

    // ========== Kill ==========

    #[test]
    fn test_kill_pending_spawn_drops_it() {
        let mut flock = flock_with(2, FlockParams::default());
        let mut rng = SpawnRng::new(6);
        let spawned = flock.spawn(&mut rng).unwrap();
        flock.kill(spawned.handle).unwrap();
        assert_eq!(flock.len(), 0);
        assert_eq!(flock.pending_kill_count(), 0);
        assert_integrity(&flock);
    }

    #[test]
    fn test_kill_live_defers_eviction() {
        let mut flock = flock_with(2, FlockParams::default());
        let mut rng = SpawnRng::new(7);
        let spawned = flock.spawn(&mut rng).unwrap();
        flock.promote_spawns();
        flock.kill(spawned.handle).unwrap();

        assert_eq!(flock.len(), 0);
        assert_eq!(flock.pending_kill_count(), 1);
        assert!(!flock.accepts_results(spawned.handle));
        assert_eq!(flock.evict_killed(), 1);
        assert_eq!(flock.pending_kill_count(), 0);
        assert_integrity(&flock);
    }

    #[test]
    fn test_kill_foreign_or_stale_handle_rejected() {
        let mut flock = flock_with(2, FlockParams::default());
        let mut rng = SpawnRng::new(8);
        let spawned = flock.spawn(&mut rng).unwrap();
        flock.kill(spawned.handle).unwrap();

        let err = flock.kill(spawned.handle).unwrap_err();
        assert!(!err.is_recoverable());

        let foreign = AgentHandle {
            id: AgentId { flock: FlockId(9), serial: 0 },
            generation: 1,
        };
        assert!(matches!(flock.kill(foreign), Err(LifecycleError::NotOwned { .. })));
    }

    #[test]
    fn test_recycled_slot_gets_new_generation() {
        let mut flock = flock_with(1, FlockParams::default());
        let mut rng = SpawnRng::new(10);
        let first = flock.spawn(&mut rng).unwrap();
        flock.promote_spawns();
        flock.kill(first.handle).unwrap();

        let second = flock.spawn(&mut rng).unwrap();
        assert!(!second.created);
        assert_eq!(second.handle.id, first.handle.id);
        assert_ne!(second.handle.generation, first.handle.generation);
        assert!(!flock.owns(first.handle));
        assert_eq!(flock.pending_kill_count(), 0);
        assert_integrity(&flock);
    }

    // ========== Strays ==========

    #[test]
    fn test_stray_containment_ring() {
        assert!(is_stray(12.0, 5.0, 10.0));
        assert!(!is_stray(3.0, 5.0, 10.0));
    }

    #[test]
    fn test_stray_exclusion_ring() {
        assert!(is_stray(3.0, 10.0, 5.0));
        assert!(!is_stray(12.0, 10.0, 5.0));
    }

    #[test]
    fn test_stray_equal_radii_kills_everything() {
        for distance in [0.0, 2.5, 5.0, 7.5, 100.0] {
            assert!(is_stray(distance, 5.0, 5.0));
        }
    }

    #[test]
    fn test_kill_stray_agents_covers_pending() {
        let params = FlockParams::default().with_radii(5.0, 10.0);
        let mut flock = flock_with(3, params);
        let mut rng = SpawnRng::new(12);
        let a = flock.spawn(&mut rng).unwrap();
        let b = flock.spawn(&mut rng).unwrap();
        flock.promote_spawns();
        let c = flock.spawn(&mut rng).unwrap();

        flock.agent_mut(a.handle.id).unwrap().position = Vec2::new(12.0, 0.0);
        flock.agent_mut(c.handle.id).unwrap().position = Vec2::new(0.0, -11.0);

        let killed = flock.kill_stray_agents(|_| true);
        assert_eq!(killed, vec![a.handle, c.handle]);
        assert_eq!(flock.active_ids(), vec![b.handle.id]);
        assert_integrity(&flock);
    }

    #[test]
    fn test_kill_stray_agents_skips_excluded() {
        let params = FlockParams::default().with_radii(5.0, 10.0);
        let mut flock = flock_with(2, params);
        let mut rng = SpawnRng::new(14);
        let kept = flock.spawn(&mut rng).unwrap();
        let culled = flock.spawn(&mut rng).unwrap();
        flock.promote_spawns();
        for spawned in [kept, culled] {
            flock.agent_mut(spawned.handle.id).unwrap().position = Vec2::new(50.0, 0.0);
        }

        let killed = flock.kill_stray_agents(|agent| agent.id() != kept.handle.id);
        assert_eq!(killed, vec![culled.handle]);
        assert!(flock.owns(kept.handle));
        assert_integrity(&flock);
    }

    // ========== Capacity ==========

    #[test]
    fn test_set_capacity_checks_population() {
        let mut flock = flock_with(3, FlockParams::default());
        let mut rng = SpawnRng::new(13);
        flock.spawn(&mut rng).unwrap();
        flock.spawn(&mut rng).unwrap();
        assert!(matches!(
            flock.set_capacity(1),
            Err(ConfigError::CapacityBelowPopulation { .. })
        ));
        assert!(matches!(flock.set_capacity(0), Err(ConfigError::InvalidCapacity { .. })));
        flock.set_capacity(8).unwrap();
        assert_eq!(flock.pool().max_size(), 8);
    }

    #[test]
    fn test_shrink_pool_respects_capacity() {
        let mut flock = flock_with(2, FlockParams::default());
        assert!(flock.shrink_pool(1).is_err());
        assert!(flock.shrink_pool(2).unwrap().is_empty());
    }

    #[test]
    fn test_agents_in_stable_order() {
        let mut flock = flock_with(5, FlockParams::default());
        let mut rng = SpawnRng::new(14);
        for _ in 0..5 {
            flock.spawn(&mut rng).unwrap();
        }
        flock.promote_spawns();
        let first: Vec<_> = flock.agents().map(Agent::id).collect();
        let second: Vec<_> = flock.agents().map(Agent::id).collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }
}
