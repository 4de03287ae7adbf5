//! The simulation world: flocks, forces, domains and the tick loop.
//!
//! # Tick order
//!
//! [`World::advance`] runs, single-threaded:
//!
//! 1. advance the clock
//! 2. promote last tick's spawns into the live sets
//! 3. reconcile the topology if anything marked it dirty
//! 4. assemble one [`FrameBuffers`] per flock
//! 5. submit every flock's update pass
//! 6. fetch and write back every pass
//! 7. lifecycle per flock: kill strays, spawn if needed, evict killed
//! 8. attach scene nodes to newly constructed agents and reconcile again
//!
//! Agents spawned during step 7 join the buffers of the next tick. Agents
//! killed at any point stop receiving results immediately.
//!
//! An agent whose scene node is moved under another flock's node changes
//! flock at the next reconcile: its old slot is killed and the new flock
//! adopts it, node and motion state included. Like a spawn it rejoins the
//! buffers at the following tick.
//!
//! # Example
//!
//! ```ignore
//! use boid_flocks::prelude::*;
//!
//! let mut world = World::new(HostBackend::new()).with_seed(7);
//! let meadow = world.create_domain("meadow")?;
//! let sparrows = world.create_flock(
//!     FlockSettings::new("sparrows").with_blueprint(AgentBlueprint::new("sparrow")),
//!     Some(meadow),
//! )?;
//! for _ in 0..100 {
//!     world.advance(1.0 / 60.0)?;
//! }
//! let (count, capacity) = world.population(sparrows)?;
//! ```

use std::collections::BTreeMap;

use glam::Vec2;

use crate::agent::{Agent, AgentHandle, AgentId, DomainId, FlockId, ForceId, NodeId};
use crate::assembler::{apply_results, assemble_update, FrameBuffers};
use crate::config::{RunMode, SceneConfig};
use crate::dispatch::{Submission, UpdatePass};
use crate::domain::{self, Domain};
use crate::error::{ConfigError, GpuError, LifecycleError, SimulationError};
use crate::flock::{Drives, Flock, FlockSettings, Spawned};
use crate::force::{Force, ForceParams};
use crate::gpu::ComputeBackend;
use crate::orbits::{FlockOrbits, ForceOrbits, OrbitSettings, Rect};
use crate::pool::Evicted;
use crate::spawn::{Placement, SpawnRng};
use crate::time::SimClock;
use crate::topology::{Member, ReconcileReport, RegistrationState, SceneTree, Topology, TopologyInputs, TopologyLevel};

/// Summary of one [`World::advance`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub frame: u64,
    /// Clock time after the advance.
    pub time: f64,
    /// Update passes that dispatched a kernel.
    pub dispatched: usize,
    /// Agents that received kernel results.
    pub updated: usize,
    /// Flocks skipped this tick because of a configuration error.
    pub skipped: Vec<FlockId>,
    pub spawned: Vec<AgentHandle>,
    pub killed: Vec<AgentHandle>,
}

/// Every flock, force and domain of one simulation plus the device they run on.
pub struct World<B: ComputeBackend> {
    backend: B,
    mode: RunMode,
    clock: SimClock,
    rng: SpawnRng,
    scene: SceneTree,
    topology: Topology,
    domains: BTreeMap<DomainId, Domain>,
    flocks: BTreeMap<FlockId, Flock>,
    forces: BTreeMap<ForceId, Force>,
    passes: BTreeMap<FlockId, UpdatePass<B>>,
    flock_orbits: Option<FlockOrbits<B>>,
    force_orbits: Option<ForceOrbits<B>>,
    next_domain: u32,
    next_flock: u32,
    next_force: u32,
}

impl<B: ComputeBackend> World<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            mode: RunMode::default(),
            clock: SimClock::new(),
            rng: SpawnRng::new(0),
            scene: SceneTree::new(),
            topology: Topology::new(),
            domains: BTreeMap::new(),
            flocks: BTreeMap::new(),
            forces: BTreeMap::new(),
            passes: BTreeMap::new(),
            flock_orbits: None,
            force_orbits: None,
            next_domain: 0,
            next_flock: 0,
            next_force: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SpawnRng::new(seed);
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build a world from a parsed scene.
    ///
    /// Names are resolved after every object exists, so flocks may reference
    /// flocks declared later in the file.
    pub fn from_scene(backend: B, scene: SceneConfig) -> Result<Self, ConfigError> {
        let mut world = World::new(backend).with_seed(scene.seed).with_mode(scene.mode);

        for name in &scene.domains {
            world.create_domain(name.clone())?;
        }
        for force in &scene.forces {
            let domain = world.lookup_domain(force.domain.as_deref())?;
            let id = world.create_force(force.name.clone(), force.origin, force.params, domain)?;
            world.set_force_enabled(id, force.enabled)?;
        }
        let mut created = Vec::with_capacity(scene.flocks.len());
        for flock in &scene.flocks {
            let domain = world.lookup_domain(flock.domain.as_deref())?;
            created.push(world.create_flock(flock.settings(), domain)?);
        }

        for (id, flock) in created.into_iter().zip(&scene.flocks) {
            for interaction in &flock.interactions {
                let other = world
                    .flock_by_name(&interaction.flock)
                    .ok_or_else(|| ConfigError::UnknownFlock(interaction.flock.clone()))?;
                world.set_interaction(id, other, interaction.drives)?;
            }
            for weight in &flock.forces {
                let force = world
                    .force_by_name(&weight.force)
                    .ok_or_else(|| ConfigError::UnknownForce(weight.force.clone()))?;
                world.set_force_weight(id, force, weight.weight)?;
            }
        }

        tracing::info!(
            domains = world.domains.len(),
            flocks = world.flocks.len(),
            forces = world.forces.len(),
            "loaded scene"
        );
        Ok(world)
    }

    fn lookup_domain(&self, name: Option<&str>) -> Result<Option<DomainId>, ConfigError> {
        match name {
            None => Ok(None),
            Some(name) => self
                .domains
                .values()
                .find(|d| d.name() == name)
                .map(|d| Some(d.id()))
                .ok_or_else(|| ConfigError::UnknownDomain(name.to_string())),
        }
    }

    // ========== Tick ==========

    /// Advance the simulation by `dt` seconds.
    pub fn advance(&mut self, dt: f32) -> Result<TickReport, SimulationError> {
        let delta = self.clock.advance(dt);
        let time = self.clock.elapsed_f32();
        let mut report = TickReport {
            frame: self.clock.frame(),
            time: self.clock.elapsed(),
            ..TickReport::default()
        };

        for flock in self.flocks.values_mut() {
            flock.promote_spawns();
        }
        self.reconcile();

        // Assemble
        let mut frames: Vec<FrameBuffers> = Vec::with_capacity(self.flocks.len());
        for flock in self.flocks.values() {
            let topology = &self.topology;
            let assembled = assemble_update(flock, &self.flocks, &self.forces, |agent: &Agent| {
                owned_by_flock(topology, agent)
            });
            match assembled {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    self.tolerate(flock.id(), err)?;
                    report.skipped.push(flock.id());
                }
            }
        }

        // Submit everything before reading anything back
        for frame in &frames {
            if !self.passes.contains_key(&frame.flock) {
                let pass = UpdatePass::new(&self.backend, format!("Flock {}", frame.flock.0))?;
                self.passes.insert(frame.flock, pass);
            }
            if let Some(pass) = self.passes.get_mut(&frame.flock) {
                if let Submission::Dispatched { .. } = pass.submit(&self.backend, frame, time, delta)? {
                    report.dispatched += 1;
                }
            }
        }

        // Fetch and write back
        for frame in &frames {
            let Some(pass) = self.passes.get_mut(&frame.flock) else {
                continue;
            };
            let results = pass.fetch(&self.backend)?;
            if let Some(flock) = self.flocks.get_mut(&frame.flock) {
                report.updated += apply_results(flock, frame, &results)?;
            }
        }

        // Lifecycle
        let now = self.clock.elapsed();
        let ids: Vec<FlockId> = self.flocks.keys().copied().collect();
        for id in ids {
            let Some(flock) = self.flocks.get_mut(&id) else {
                continue;
            };
            let topology = &self.topology;
            report
                .killed
                .extend(flock.kill_stray_agents(|agent| owned_by_flock(topology, agent)));
            let spawned = match flock.spawn_if_needed(now, &mut self.rng) {
                Ok(spawned) => spawned,
                Err(SimulationError::Lifecycle(err)) if err.is_recoverable() => {
                    tracing::debug!(flock = %id, error = %err, "spawn deferred");
                    None
                }
                Err(SimulationError::Config(err)) => {
                    self.tolerate(id, err)?;
                    None
                }
                Err(err) => return Err(err),
            };
            if let Some(flock) = self.flocks.get_mut(&id) {
                flock.evict_killed();
            }
            if let Some(spawned) = spawned {
                self.attach_spawned(id, spawned)?;
                report.spawned.push(spawned.handle);
            }
        }
        self.reconcile();

        tracing::trace!(
            frame = report.frame,
            dispatched = report.dispatched,
            updated = report.updated,
            spawned = report.spawned.len(),
            killed = report.killed.len(),
            "tick"
        );
        Ok(report)
    }

    /// Apply the run-mode policy to a configuration failure.
    fn tolerate(&self, flock: FlockId, err: ConfigError) -> Result<(), SimulationError> {
        match self.mode {
            RunMode::Interactive => {
                tracing::warn!(flock = %flock, error = %err, "skipping flock this tick");
                Ok(())
            }
            RunMode::Simulation => Err(err.into()),
        }
    }

    fn reconcile(&mut self) -> ReconcileReport {
        if !self.topology.is_dirty() {
            return ReconcileReport::default();
        }
        let inputs = self.topology_inputs();
        let report = self.topology.reconcile(&self.scene, &inputs);
        if report.agents_rebuilt && self.adopt_moved_agents() > 0 {
            let inputs = self.topology_inputs();
            self.topology.reconcile(&self.scene, &inputs);
        }
        report
    }

    /// Hand every active agent whose node now sits under another flock's
    /// node over to that flock. Returns how many changed flock.
    ///
    /// An agent the new flock has no room for stays where it is and is
    /// treated as an orphan.
    fn adopt_moved_agents(&mut self) -> usize {
        let mut moved: Vec<(AgentHandle, FlockId)> = Vec::new();
        for flock in self.flocks.values() {
            for agent in flock.agents() {
                match self.topology.agent_parent(agent.id()) {
                    Some(owner) if owner != flock.id() => moved.push((agent.handle(), owner)),
                    _ => {}
                }
            }
        }

        let mut adopted = 0;
        for (handle, owner) in moved {
            match self.transfer_agent(handle, owner) {
                Ok(new_handle) => {
                    tracing::debug!(from = %handle, to = %new_handle, "agent changed flock");
                    adopted += 1;
                }
                Err(err) => {
                    tracing::warn!(agent = %handle, flock = %owner, error = %err, "agent left without a flock");
                }
            }
        }
        adopted
    }

    fn transfer_agent(&mut self, handle: AgentHandle, owner: FlockId) -> Result<AgentHandle, LifecycleError> {
        let from = handle.id.flock;
        let not_owned = || LifecycleError::NotOwned { flock: from, handle };
        let agent = self
            .flocks
            .get(&from)
            .and_then(|f| f.agent(handle.id))
            .filter(|a| a.is_active())
            .ok_or_else(not_owned)?;
        let state = Placement {
            position: agent.position,
            heading: agent.heading,
            speed: agent.speed,
        };

        let target = self.flocks.get_mut(&owner).ok_or_else(not_owned)?;
        let adopted = target.adopt(state)?;
        let new_id = adopted.handle.id;

        let source = self.flocks.get_mut(&from).ok_or_else(not_owned)?;
        source.kill(handle)?;
        let node = source.take_agent_node(handle.id);
        self.topology.untrack_agent(handle.id);

        let stale = node.and_then(|node| {
            self.flocks
                .get_mut(&owner)
                .and_then(|target| target.set_agent_node(new_id, node))
        });
        if let Some(stale) = stale {
            self.remove_node(stale);
        }
        self.topology.track_agent(new_id);
        Ok(adopted.handle)
    }

    fn topology_inputs(&self) -> TopologyInputs {
        let mut inputs = TopologyInputs::default();
        for flock in self.flocks.values() {
            for agent in flock.pool().slots() {
                if let Some(node) = agent.node() {
                    inputs.agent_nodes.insert(agent.id(), node);
                }
            }
            if let Some(node) = flock.node() {
                inputs.flock_nodes.push((flock.id(), node));
                inputs.member_nodes.insert(Member::Flock(flock.id()), node);
            }
        }
        for force in self.forces.values() {
            if let Some(node) = force.node() {
                inputs.member_nodes.insert(Member::Force(force.id()), node);
            }
        }
        for domain in self.domains.values() {
            inputs.domain_nodes.push((domain.id(), domain.node()));
        }
        inputs
    }

    /// Give a spawned agent slot a scene node if it has none yet.
    ///
    /// Recycled slots keep their node unless it left with an agent that
    /// changed flock.
    fn attach_spawned(&mut self, flock_id: FlockId, spawned: Spawned) -> Result<(), ConfigError> {
        let flock = self
            .flocks
            .get_mut(&flock_id)
            .ok_or_else(|| ConfigError::UnknownFlock(flock_id.to_string()))?;
        if flock.agent(spawned.handle.id).and_then(Agent::node).is_some() {
            return Ok(());
        }
        let prefix = flock.blueprint().map(|b| b.name.clone()).unwrap_or_else(|| "agent".to_string());
        let id = spawned.handle.id;
        let node = self.scene.create(format!("{}#{}", prefix, id.serial), flock.node())?;
        flock.set_agent_node(id, node);
        self.topology.track_agent(id);
        Ok(())
    }

    fn drop_evicted(&mut self, evicted: Vec<Evicted>) {
        for slot in evicted {
            if let Some(node) = slot.node {
                self.remove_node(node);
            }
            self.topology.untrack_agent(slot.id);
        }
    }

    /// Remove an agent's scene node. A node already gone is only logged.
    fn remove_node(&mut self, node: NodeId) {
        if let Err(err) = self.scene.remove(node) {
            tracing::warn!(node = %node, error = %err, "agent node already removed");
        }
    }

    // ========== Structure ==========

    pub fn create_domain(&mut self, name: impl Into<String>) -> Result<DomainId, ConfigError> {
        let name = name.into();
        if self.domains.values().any(|d| d.name() == name) {
            return Err(ConfigError::DuplicateName(name));
        }
        let id = DomainId(self.next_domain);
        self.next_domain += 1;
        let node = self.scene.create(name.clone(), None)?;
        self.domains.insert(id, Domain::new(id, name, node));
        self.topology.mark_dirty(TopologyLevel::MembersUnderDomains);
        tracing::debug!(domain = %id, "created domain");
        Ok(id)
    }

    /// Remove a domain. Its members stay in the world without a domain.
    pub fn destroy_domain(&mut self, id: DomainId) -> Result<(), ConfigError> {
        let domain = self
            .domains
            .remove(&id)
            .ok_or_else(|| ConfigError::UnknownDomain(id.to_string()))?;
        self.scene.remove(domain.node())?;
        self.topology.mark_dirty(TopologyLevel::MembersUnderDomains);
        Ok(())
    }

    /// Create a flock, placing its node under `domain` if given.
    pub fn create_flock(&mut self, settings: FlockSettings, domain: Option<DomainId>) -> Result<FlockId, ConfigError> {
        if self.flocks.values().any(|f| f.name() == settings.name) {
            return Err(ConfigError::DuplicateName(settings.name));
        }
        let parent = self.domain_node(domain)?;
        let id = FlockId(self.next_flock);
        let mut flock = Flock::new(id, settings)?;
        self.next_flock += 1;

        let node = self.scene.create(flock.name().to_string(), parent)?;
        flock.set_node(node);
        self.flocks.insert(id, flock);
        self.topology.track_member(Member::Flock(id));
        self.topology.mark_dirty(TopologyLevel::AgentsUnderFlocks);
        tracing::debug!(flock = %id, "created flock");
        Ok(id)
    }

    /// Remove a flock with all its agents, pooled ones included.
    ///
    /// Flocks that still list it as an interaction fail assembly until the
    /// interaction is removed.
    pub fn destroy_flock(&mut self, id: FlockId) -> Result<(), ConfigError> {
        let mut flock = self
            .flocks
            .remove(&id)
            .ok_or_else(|| ConfigError::UnknownFlock(id.to_string()))?;
        let evicted = flock.dispose();
        self.drop_evicted(evicted);
        if let Some(node) = flock.node() {
            self.scene.remove(node)?;
        }
        self.passes.remove(&id);
        self.topology.untrack_member(Member::Flock(id));
        self.topology.mark_dirty(TopologyLevel::AgentsUnderFlocks);
        tracing::debug!(flock = %id, "destroyed flock");
        Ok(())
    }

    pub fn create_force(
        &mut self,
        name: impl Into<String>,
        origin: Vec2,
        params: ForceParams,
        domain: Option<DomainId>,
    ) -> Result<ForceId, ConfigError> {
        let name = name.into();
        if self.forces.values().any(|f| f.name() == name) {
            return Err(ConfigError::DuplicateName(name));
        }
        let parent = self.domain_node(domain)?;
        let id = ForceId(self.next_force);
        self.next_force += 1;

        let mut force = Force::new(id, name, origin, params);
        let node = self.scene.create(force.name().to_string(), parent)?;
        force.set_node(node);
        self.forces.insert(id, force);
        self.topology.track_member(Member::Force(id));
        tracing::debug!(force = %id, "created force");
        Ok(id)
    }

    /// Remove a force. Flocks still weighting it see an empty field.
    pub fn destroy_force(&mut self, id: ForceId) -> Result<(), ConfigError> {
        let force = self
            .forces
            .remove(&id)
            .ok_or_else(|| ConfigError::UnknownForce(id.to_string()))?;
        if let Some(node) = force.node() {
            self.scene.remove(node)?;
        }
        self.topology.untrack_member(Member::Force(id));
        Ok(())
    }

    fn domain_node(&self, domain: Option<DomainId>) -> Result<Option<NodeId>, ConfigError> {
        match domain {
            None => Ok(None),
            Some(id) => self
                .domains
                .get(&id)
                .map(|d| Some(d.node()))
                .ok_or_else(|| ConfigError::UnknownDomain(id.to_string())),
        }
    }

    /// Add a free-standing scene node, e.g. to group objects.
    pub fn create_node(&mut self, name: impl Into<String>, parent: Option<NodeId>) -> Result<NodeId, ConfigError> {
        self.scene.create(name, parent)
    }

    /// Move a scene node. Both ownership levels are re-resolved lazily.
    pub fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), ConfigError> {
        self.scene.reparent(node, parent)?;
        self.topology.mark_dirty(TopologyLevel::AgentsUnderFlocks);
        self.topology.mark_dirty(TopologyLevel::MembersUnderDomains);
        Ok(())
    }

    // ========== Agents ==========

    /// Spawn one agent immediately, ignoring the spawn rate.
    ///
    /// The agent joins the update set at the next tick.
    pub fn spawn(&mut self, flock: FlockId) -> Result<AgentHandle, SimulationError> {
        let spawned = self
            .flocks
            .get_mut(&flock)
            .ok_or_else(|| ConfigError::UnknownFlock(flock.to_string()))?
            .spawn(&mut self.rng)?;
        self.attach_spawned(flock, spawned)?;
        Ok(spawned.handle)
    }

    pub fn kill(&mut self, handle: AgentHandle) -> Result<(), SimulationError> {
        self.flock_entry(handle.id.flock)?.kill(handle)?;
        Ok(())
    }

    /// Whether the agent is outside its flock's survival band.
    pub fn is_stray(&self, handle: AgentHandle) -> Result<bool, SimulationError> {
        let flock = self.flock_ref(handle.id.flock)?;
        if !flock.owns(handle) {
            return Err(LifecycleError::NotOwned {
                flock: flock.id(),
                handle,
            }
            .into());
        }
        Ok(flock.agent(handle.id).map(|a| flock.is_stray(a)).unwrap_or(false))
    }

    /// Active agents of `flock` in stable order.
    pub fn agents(&self, flock: FlockId) -> Result<Vec<&Agent>, ConfigError> {
        Ok(self.flock_ref(flock)?.agents().collect())
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.flocks.get(&id.flock).and_then(|f| f.agent(id)).filter(|a| a.is_active())
    }

    /// `(active count, capacity)`.
    pub fn population(&self, flock: FlockId) -> Result<(usize, usize), ConfigError> {
        let flock = self.flock_ref(flock)?;
        Ok((flock.len(), flock.capacity()))
    }

    /// Ownership state of an agent slot as seen by the last rebuild.
    ///
    /// A slot resolved under a flock other than its own (one that had no
    /// room to adopt it) counts as orphaned.
    pub fn agent_state(&self, id: AgentId) -> RegistrationState {
        match self.topology.agent_state(id) {
            RegistrationState::Resolved if self.topology.agent_parent(id) != Some(id.flock) => {
                RegistrationState::Orphaned
            }
            state => state,
        }
    }

    /// Destroy pooled slots above `pool_max`, dropping their scene nodes.
    pub fn shrink_flock_pool(&mut self, flock: FlockId, pool_max: usize) -> Result<usize, ConfigError> {
        let evicted = self.flock_entry(flock)?.shrink_pool(pool_max)?;
        let count = evicted.len();
        self.drop_evicted(evicted);
        Ok(count)
    }

    // ========== Parameters ==========

    /// Mutable access to a flock. Changes apply at the next assembly.
    pub fn flock_mut(&mut self, id: FlockId) -> Option<&mut Flock> {
        self.flocks.get_mut(&id)
    }

    pub fn force_mut(&mut self, id: ForceId) -> Option<&mut Force> {
        self.forces.get_mut(&id)
    }

    pub fn set_flock_origin(&mut self, id: FlockId, origin: Vec2) -> Result<(), ConfigError> {
        self.flock_entry(id)?.origin = origin;
        Ok(())
    }

    pub fn set_force_origin(&mut self, id: ForceId, origin: Vec2) -> Result<(), ConfigError> {
        self.force_entry(id)?.origin = origin;
        Ok(())
    }

    pub fn set_force_enabled(&mut self, id: ForceId, enabled: bool) -> Result<(), ConfigError> {
        self.force_entry(id)?.enabled = enabled;
        Ok(())
    }

    /// Set how `flock` reacts to `other`. One-way.
    pub fn set_interaction(&mut self, flock: FlockId, other: FlockId, drives: Drives) -> Result<(), ConfigError> {
        self.flock_ref(other)?;
        self.flock_entry(flock)?.set_interaction(other, drives);
        Ok(())
    }

    pub fn set_force_weight(&mut self, flock: FlockId, force: ForceId, weight: f32) -> Result<(), ConfigError> {
        if !self.forces.contains_key(&force) {
            return Err(ConfigError::UnknownForce(force.to_string()));
        }
        self.flock_entry(flock)?.set_force_weight(force, weight);
        Ok(())
    }

    fn flock_ref(&self, id: FlockId) -> Result<&Flock, ConfigError> {
        self.flocks.get(&id).ok_or_else(|| ConfigError::UnknownFlock(id.to_string()))
    }

    fn flock_entry(&mut self, id: FlockId) -> Result<&mut Flock, ConfigError> {
        self.flocks
            .get_mut(&id)
            .ok_or_else(|| ConfigError::UnknownFlock(id.to_string()))
    }

    fn force_entry(&mut self, id: ForceId) -> Result<&mut Force, ConfigError> {
        self.forces
            .get_mut(&id)
            .ok_or_else(|| ConfigError::UnknownForce(id.to_string()))
    }

    // ========== Queries ==========

    pub fn flock(&self, id: FlockId) -> Option<&Flock> {
        self.flocks.get(&id)
    }

    pub fn force(&self, id: ForceId) -> Option<&Force> {
        self.forces.get(&id)
    }

    pub fn domain(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(&id)
    }

    pub fn flocks(&self) -> impl Iterator<Item = &Flock> + '_ {
        self.flocks.values()
    }

    pub fn forces(&self) -> impl Iterator<Item = &Force> + '_ {
        self.forces.values()
    }

    pub fn flock_by_name(&self, name: &str) -> Option<FlockId> {
        self.flocks.values().find(|f| f.name() == name).map(Flock::id)
    }

    pub fn force_by_name(&self, name: &str) -> Option<ForceId> {
        self.forces.values().find(|f| f.name() == name).map(Force::id)
    }

    /// Flocks under `domain`, resolving the topology first if needed.
    pub fn domain_flocks(&mut self, domain: DomainId) -> Vec<FlockId> {
        self.reconcile();
        self.topology
            .domain_members(domain)
            .into_iter()
            .filter_map(|m| match m {
                Member::Flock(id) => Some(id),
                Member::Force(_) => None,
            })
            .collect()
    }

    /// Forces under `domain`, resolving the topology first if needed.
    pub fn domain_forces(&mut self, domain: DomainId) -> Vec<ForceId> {
        self.reconcile();
        self.topology
            .domain_members(domain)
            .into_iter()
            .filter_map(|m| match m {
                Member::Force(id) => Some(id),
                Member::Flock(_) => None,
            })
            .collect()
    }

    pub fn domain_of(&mut self, member: Member) -> Option<DomainId> {
        self.reconcile();
        self.topology.member_domain(member)
    }

    /// Indented listing of a domain's contents.
    pub fn describe_domain(&mut self, id: DomainId) -> Result<String, ConfigError> {
        let flocks = self.domain_flocks(id);
        let forces = self.domain_forces(id);
        let domain = self
            .domains
            .get(&id)
            .ok_or_else(|| ConfigError::UnknownDomain(id.to_string()))?;
        Ok(domain::describe(
            domain,
            flocks.iter().filter_map(|f| self.flocks.get(f)),
            forces.iter().filter_map(|f| self.forces.get(f)),
        ))
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn scene(&self) -> &SceneTree {
        &self.scene
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    // ========== Orbit previews ==========

    /// Time used for previews: the clock while running, 0 before the first tick.
    pub fn orbit_time(&self) -> f32 {
        if self.clock.is_running() {
            self.clock.elapsed_f32()
        } else {
            0.0
        }
    }

    /// Request probe polylines through `flock`'s field. Returns `false` while
    /// the previous flock preview is unfetched.
    pub fn request_flock_orbits(
        &mut self,
        flock: FlockId,
        rect: Rect,
        settings: &OrbitSettings,
    ) -> Result<bool, SimulationError> {
        let time = self.orbit_time();
        if self.flock_orbits.is_none() {
            self.flock_orbits = Some(FlockOrbits::new(&self.backend)?);
        }
        let target = self
            .flocks
            .get(&flock)
            .ok_or_else(|| ConfigError::UnknownFlock(flock.to_string()))?;
        match self.flock_orbits.as_mut() {
            Some(orbits) => Ok(orbits.request(&self.backend, target, &self.forces, rect, settings, time)?),
            None => Ok(false),
        }
    }

    pub fn fetch_flock_orbits(&mut self) -> Result<Option<Vec<Vec<Vec2>>>, GpuError> {
        match self.flock_orbits.as_mut() {
            Some(orbits) => orbits.fetch(&self.backend),
            None => Ok(None),
        }
    }

    /// Request probe polylines through a single force. Returns `false` while
    /// the previous force preview is unfetched.
    pub fn request_force_orbits(
        &mut self,
        force: ForceId,
        rect: Rect,
        settings: &OrbitSettings,
    ) -> Result<bool, SimulationError> {
        let time = self.orbit_time();
        if self.force_orbits.is_none() {
            self.force_orbits = Some(ForceOrbits::new(&self.backend)?);
        }
        let target = self
            .forces
            .get(&force)
            .ok_or_else(|| ConfigError::UnknownForce(force.to_string()))?;
        match self.force_orbits.as_mut() {
            Some(orbits) => Ok(orbits.request(&self.backend, target, rect, settings, time)?),
            None => Ok(false),
        }
    }

    pub fn fetch_force_orbits(&mut self) -> Result<Option<Vec<Vec<Vec2>>>, GpuError> {
        match self.force_orbits.as_mut() {
            Some(orbits) => orbits.fetch(&self.backend),
            None => Ok(None),
        }
    }
}

/// Whether `agent` sits under its own flock's node. Agents failing this are
/// neither simulated nor culled.
fn owned_by_flock(topology: &Topology, agent: &Agent) -> bool {
    agent.flock().is_some() && topology.agent_parent(agent.id()) == agent.flock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentBlueprint;
    use crate::flock::FlockParams;
    use crate::gpu::HostBackend;
    use crate::topology::Hierarchy;

    fn world() -> World<HostBackend> {
        World::new(HostBackend::new()).with_seed(11)
    }

    fn settings(name: &str) -> FlockSettings {
        FlockSettings::new(name).with_blueprint(AgentBlueprint::new("boid"))
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut world = world();
        world.create_domain("d").unwrap();
        assert!(matches!(world.create_domain("d"), Err(ConfigError::DuplicateName(_))));
        world.create_flock(settings("a"), None).unwrap();
        assert!(matches!(
            world.create_flock(settings("a"), None),
            Err(ConfigError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_spawn_creates_node_under_flock() {
        let mut world = world();
        let flock = world.create_flock(settings("a"), None).unwrap();
        let handle = world.spawn(flock).unwrap();
        let node = world.agent(handle.id).unwrap().node().unwrap();
        assert_eq!(world.scene().parent(node), world.flock(flock).unwrap().node());
        assert_eq!(world.scene().name(node), Some("boid#0"));
    }

    #[test]
    fn test_spawned_agent_updated_from_next_tick() {
        let mut world = world();
        let params = FlockParams::default().with_spawn_frequency(0.0);
        let flock = world.create_flock(settings("a").with_params(params), None).unwrap();
        let handle = world.spawn(flock).unwrap();
        let before = world.agent(handle.id).unwrap().position;
        let report = world.advance(0.1).unwrap();
        assert_eq!(report.updated, 1);
        assert_ne!(world.agent(handle.id).unwrap().position, before);
    }

    #[test]
    fn test_kill_stale_handle_rejected() {
        let mut world = world();
        let flock = world.create_flock(settings("a"), None).unwrap();
        let handle = world.spawn(flock).unwrap();
        world.kill(handle).unwrap();
        assert!(matches!(
            world.kill(handle),
            Err(SimulationError::Lifecycle(LifecycleError::NotOwned { .. }))
        ));
        assert!(world.is_stray(handle).is_err());
    }

    #[test]
    fn test_domain_membership_follows_reparent() {
        let mut world = world();
        let d1 = world.create_domain("one").unwrap();
        let d2 = world.create_domain("two").unwrap();
        let flock = world.create_flock(settings("a"), Some(d1)).unwrap();
        assert_eq!(world.domain_flocks(d1), vec![flock]);

        let node = world.flock(flock).unwrap().node().unwrap();
        let target = world.domain(d2).unwrap().node();
        world.reparent(node, Some(target)).unwrap();
        assert_eq!(world.domain_of(Member::Flock(flock)), Some(d2));
        assert!(world.domain_flocks(d1).is_empty());
    }

    #[test]
    fn test_orbit_time_zero_before_first_tick() {
        let mut world = world();
        assert_eq!(world.orbit_time(), 0.0);
        world.advance(0.25).unwrap();
        assert_eq!(world.orbit_time(), 0.25);
    }

    #[test]
    fn test_destroy_flock_removes_nodes() {
        let mut world = world();
        let flock = world.create_flock(settings("a"), None).unwrap();
        world.spawn(flock).unwrap();
        world.spawn(flock).unwrap();
        assert_eq!(world.scene().len(), 3);
        world.destroy_flock(flock).unwrap();
        assert!(world.scene().is_empty());
        assert!(world.flock(flock).is_none());
        assert!(world.population(flock).is_err());
    }

    #[test]
    fn test_destroy_flock_tolerates_missing_agent_node() {
        let mut world = world();
        let flock = world.create_flock(settings("a"), None).unwrap();
        let handle = world.spawn(flock).unwrap();
        let node = world.agent(handle.id).unwrap().node().unwrap();
        world.scene.remove(node).unwrap();

        world.destroy_flock(flock).unwrap();
        assert!(world.scene().is_empty());
    }

    #[test]
    fn test_recycled_slot_regains_node_after_agent_left() {
        let mut world = world();
        let quiet = FlockParams::default().with_spawn_frequency(0.0);
        let a = world
            .create_flock(settings("a").with_capacity(1).with_params(quiet.clone()), None)
            .unwrap();
        let b = world.create_flock(settings("b").with_params(quiet), None).unwrap();
        let first = world.spawn(a).unwrap();
        let moved_node = world.agent(first.id).unwrap().node().unwrap();
        let b_node = world.flock(b).unwrap().node();
        world.reparent(moved_node, b_node).unwrap();
        world.advance(0.1).unwrap();
        assert_eq!(world.population(b).unwrap().0, 1);

        let again = world.spawn(a).unwrap();
        assert_eq!(again.id, first.id);
        let node = world.agent(again.id).unwrap().node().unwrap();
        assert_ne!(node, moved_node);
        assert_eq!(world.scene().parent(node), world.flock(a).unwrap().node());
        world.advance(0.1).unwrap();
        assert_eq!(world.agent_state(again.id), RegistrationState::Resolved);
    }

    #[test]
    fn test_full_flock_leaves_moved_agent_orphaned() {
        let mut world = world();
        let quiet = FlockParams::default().with_spawn_frequency(0.0);
        let a = world.create_flock(settings("a").with_params(quiet.clone()), None).unwrap();
        let b = world
            .create_flock(settings("b").with_capacity(1).with_params(quiet), None)
            .unwrap();
        let stuck = world.spawn(a).unwrap();
        world.spawn(b).unwrap();
        let node = world.agent(stuck.id).unwrap().node().unwrap();
        let b_node = world.flock(b).unwrap().node();
        world.reparent(node, b_node).unwrap();

        let report = world.advance(0.1).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(world.population(a).unwrap().0, 1);
        assert_eq!(world.population(b).unwrap().0, 1);
        assert_eq!(world.agent_state(stuck.id), RegistrationState::Orphaned);
    }
}
