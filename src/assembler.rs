//! Frame buffer assembly and result write-back.
//!
//! Every tick each flock is flattened into a [`FrameBuffers`]: its own
//! updatable agents tagged `flock_index = 0`, followed by the agents of each
//! alien flock in interaction-list order tagged `1, 2, …`. After the kernel
//! runs, [`apply_results`] writes the own-agent prefix back in the same order.

use std::collections::BTreeMap;

use crate::agent::{Agent, AgentHandle, FlockId, ForceId};
use crate::error::{ConfigError, SimulationError};
use crate::flock::{Flock, ForceWeight};
use crate::force::Force;
use crate::records::{AgentRecord, FlockConfigRecord, FlockDrivesRecord, ForceRecord};

/// Flat inputs of one update dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffers {
    pub flock: FlockId,
    /// Own agents first, then alien agents.
    pub agents: Vec<AgentRecord>,
    /// Handles of the own-agent prefix of `agents`, in the same order.
    pub own: Vec<AgentHandle>,
    pub config: FlockConfigRecord,
    /// `[self, alien 1, alien 2, …]`
    pub drives: Vec<FlockDrivesRecord>,
    pub forces: Vec<ForceRecord>,
}

impl FrameBuffers {
    pub fn own_count(&self) -> usize {
        self.own.len()
    }

    pub fn alien_count(&self) -> usize {
        self.agents.len() - self.own.len()
    }
}

/// Flatten `flock` and its neighbourhood into kernel inputs.
///
/// `include` filters agents of every flock; the world uses it to drop agents
/// whose scene node is not resolved under their owning flock.
pub fn assemble_update(
    flock: &Flock,
    flocks: &BTreeMap<FlockId, Flock>,
    forces: &BTreeMap<ForceId, Force>,
    include: impl Fn(&Agent) -> bool,
) -> Result<FrameBuffers, ConfigError> {
    let mut agents = Vec::with_capacity(flock.len());
    let mut own = Vec::with_capacity(flock.len());

    for agent in flock.updatable().filter(|a| include(a)) {
        agents.push(AgentRecord::from_agent(agent, 0));
        own.push(agent.handle());
    }

    let mut drives = Vec::with_capacity(flock.interactions().len() + 1);
    drives.push(FlockDrivesRecord::from(flock.params().drives));

    for (k, interaction) in flock.interactions().iter().enumerate() {
        let alien = flocks
            .get(&interaction.flock)
            .ok_or_else(|| ConfigError::UnknownFlock(interaction.flock.to_string()))?;
        let index = k as u32 + 1;
        agents.extend(
            alien
                .updatable()
                .filter(|a| include(a))
                .map(|a| AgentRecord::from_agent(a, index)),
        );
        drives.push(FlockDrivesRecord::from(interaction.drives));
    }

    Ok(FrameBuffers {
        flock: flock.id(),
        agents,
        own,
        config: FlockConfigRecord::from_flock(flock),
        drives,
        forces: force_records(flock.forces(), forces),
    })
}

/// One record per weight. Forces that no longer exist contribute nothing.
pub fn force_records(weights: &[ForceWeight], forces: &BTreeMap<ForceId, Force>) -> Vec<ForceRecord> {
    weights
        .iter()
        .map(|w| match forces.get(&w.force) {
            Some(force) => force.record(w.weight),
            None => ForceRecord::empty(),
        })
        .collect()
}

/// Write kernel results back to the agents they were assembled from.
///
/// Agents killed or recycled since assembly are skipped. Returns the number
/// of agents written.
pub fn apply_results(flock: &mut Flock, frame: &FrameBuffers, results: &[AgentRecord]) -> Result<usize, SimulationError> {
    if frame.flock != flock.id() {
        return Err(SimulationError::Desync(format!(
            "frame for {} applied to {}",
            frame.flock,
            flock.id()
        )));
    }
    if results.len() != frame.agents.len() {
        return Err(SimulationError::Desync(format!(
            "{}: expected {} records, got {}",
            frame.flock,
            frame.agents.len(),
            results.len()
        )));
    }

    let own = frame.own.len();
    if let Some(i) = results[..own].iter().position(|r| r.flock_index != 0) {
        return Err(SimulationError::Desync(format!(
            "{}: record {} of {} own agents has flock index {}",
            frame.flock, i, own, results[i].flock_index
        )));
    }
    if let Some(first_alien) = results.get(own) {
        if first_alien.flock_index == 0 {
            return Err(SimulationError::Desync(format!(
                "{}: more own records than the {} assembled",
                frame.flock, own
            )));
        }
    }

    let mut written = 0;
    for (handle, record) in frame.own.iter().zip(results) {
        if !flock.accepts_results(*handle) {
            continue;
        }
        if let Some(agent) = flock.agent_mut(handle.id) {
            agent.position = record.position;
            agent.heading = record.heading;
            agent.speed = record.speed;
            written += 1;
        }
    }
    Ok(written)
}
