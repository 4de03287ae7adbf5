//! Free-list pool of agent slots.
//!
//! Slots are constructed lazily up to `max_size` and recycled through an
//! explicit free list. State transitions go through three hooks:
//!
//! | Hook | When | Effect |
//! |------|------|--------|
//! | [`on_activate`] | slot leaves the free list | owner set, generation bumped, placement applied |
//! | [`on_deactivate`] | slot returns to the free list | owner cleared |
//! | [`on_evict`] | slot is destroyed by a shrink or dispose | scene node detached |

use std::collections::BTreeMap;

use crate::agent::{Agent, AgentId, FlockId, NodeId};
use crate::spawn::Placement;

/// Activate a pooled slot for `flock`.
pub fn on_activate(agent: &mut Agent, flock: FlockId, placement: Placement) {
    agent.flock = Some(flock);
    agent.generation = agent.generation.wrapping_add(1);
    agent.position = placement.position;
    agent.heading = placement.heading;
    agent.speed = placement.speed;
}

/// Return an active slot to the pool.
pub fn on_deactivate(agent: &mut Agent) {
    agent.flock = None;
}

/// Tear a slot down before it is dropped, yielding its scene node.
pub fn on_evict(agent: &mut Agent) -> Option<NodeId> {
    agent.flock = None;
    agent.node.take()
}

/// Result of [`AgentPool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub id: AgentId,
    /// A new slot was constructed rather than recycled.
    pub created: bool,
}

/// An evicted slot and the scene node it was attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct Evicted {
    pub id: AgentId,
    pub node: Option<NodeId>,
}

/// Agent slots owned by one flock.
#[derive(Debug, Clone)]
pub struct AgentPool {
    flock: FlockId,
    slots: BTreeMap<u32, Agent>,
    free: Vec<u32>,
    max_size: usize,
    next_serial: u32,
}

impl AgentPool {
    pub fn new(flock: FlockId, max_size: usize) -> Self {
        Self {
            flock,
            slots: BTreeMap::new(),
            free: Vec::new(),
            max_size,
            next_serial: 0,
        }
    }

    /// Take a slot from the free list, or construct one if the pool is below
    /// its max size. Returns `None` when the pool is exhausted.
    pub fn acquire(&mut self, placement: Placement) -> Option<Acquired> {
        let (serial, created) = match self.free.pop() {
            Some(serial) => (serial, false),
            None => {
                if self.slots.len() >= self.max_size {
                    return None;
                }
                let serial = self.next_serial;
                self.next_serial += 1;
                let id = AgentId { flock: self.flock, serial };
                self.slots.insert(serial, Agent::new(id));
                (serial, true)
            }
        };

        let agent = self.slots.get_mut(&serial)?;
        on_activate(agent, self.flock, placement);
        Some(Acquired { id: agent.id(), created })
    }

    /// Deactivate a slot and push it onto the free list.
    ///
    /// Returns `false` if the slot is unknown or already inactive.
    pub fn release(&mut self, id: AgentId) -> bool {
        if id.flock != self.flock {
            return false;
        }
        match self.slots.get_mut(&id.serial) {
            Some(agent) if agent.is_active() => {
                on_deactivate(agent);
                self.free.push(id.serial);
                true
            }
            _ => false,
        }
    }

    /// Lower the max size and destroy free slots beyond it.
    ///
    /// Active slots are never evicted; the owner keeps `max_size` at or above
    /// its capacity.
    pub fn shrink_to(&mut self, max_size: usize) -> Vec<Evicted> {
        self.max_size = max_size;
        let mut evicted = Vec::new();
        // Oldest free slots go first so recently recycled ones stay warm.
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        while self.slots.len() > self.max_size {
            let Some(serial) = self.free.pop() else {
                break;
            };
            if let Some(mut agent) = self.slots.remove(&serial) {
                let node = on_evict(&mut agent);
                evicted.push(Evicted { id: agent.id(), node });
            }
        }
        evicted
    }

    /// Destroy every slot, active or not.
    pub fn dispose(&mut self) -> Vec<Evicted> {
        self.free.clear();
        std::mem::take(&mut self.slots)
            .into_values()
            .map(|mut agent| {
                let node = on_evict(&mut agent);
                Evicted { id: agent.id(), node }
            })
            .collect()
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        if id.flock != self.flock {
            return None;
        }
        self.slots.get(&id.serial)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        if id.flock != self.flock {
            return None;
        }
        self.slots.get_mut(&id.serial)
    }

    /// All constructed slots in serial order.
    pub fn slots(&self) -> impl Iterator<Item = &Agent> {
        self.slots.values()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    /// Number of constructed slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
