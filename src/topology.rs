//! Ownership resolution through the scene hierarchy.
//!
//! Which flock an agent belongs to, and which domain a flock or force
//! belongs to, is decided by where their scene nodes sit: the nearest
//! ancestor node that belongs to a candidate owner wins. [`Topology`] keeps
//! both associations cached and rebuilds a level only after something marked
//! it dirty.
//!
//! ```text
//! AgentsUnderFlocks ──changed──▶ MembersUnderDomains
//! ```
//!
//! Per object the registration state moves
//! `Unregistered → Tracked → (Resolved | Orphaned)`. Orphans stay tracked and
//! are picked up again by the next rebuild once re-parented.

use std::collections::BTreeMap;
use std::fmt;

use crate::agent::{AgentId, DomainId, FlockId, ForceId, NodeId};
use crate::error::ConfigError;

/// Parent links of a scene hierarchy.
///
/// Ownership resolution only asks [`Hierarchy::is_descendant_of`]; override
/// it when the hierarchy can answer faster than walking parents.
pub trait Hierarchy {
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Whether `ancestor` lies strictly above `node`.
    fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Minimal named node tree used as the world's hierarchy.
#[derive(Debug, Clone, Default)]
pub struct SceneTree {
    nodes: BTreeMap<NodeId, SceneNode>,
    next_id: u32,
}

impl SceneTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under `parent` (or at the root).
    pub fn create(&mut self, name: impl Into<String>, parent: Option<NodeId>) -> Result<NodeId, ConfigError> {
        if let Some(p) = parent {
            self.check(p)?;
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            SceneNode {
                name: name.into(),
                parent,
                children: Vec::new(),
            },
        );
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Move `node` under `parent` (or to the root).
    pub fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), ConfigError> {
        self.check(node)?;
        if let Some(p) = parent {
            self.check(p)?;
            if p == node || self.is_descendant_of(p, node) {
                return Err(ConfigError::CyclicParent { node: node.0, parent: p.0 });
            }
        }
        self.detach(node);
        if let Some(n) = self.nodes.get_mut(&node) {
            n.parent = parent;
        }
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.push(node);
        }
        Ok(())
    }

    /// Remove `node`. Its children move up to its parent.
    pub fn remove(&mut self, node: NodeId) -> Result<(), ConfigError> {
        self.check(node)?;
        self.detach(node);
        let Some(removed) = self.nodes.remove(&node) else {
            return Ok(());
        };
        for child in &removed.children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = removed.parent;
            }
        }
        if let Some(p) = removed.parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.extend(removed.children.iter().copied());
        }
        Ok(())
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.name.as_str())
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(&node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check(&self, node: NodeId) -> Result<(), ConfigError> {
        if self.nodes.contains_key(&node) {
            Ok(())
        } else {
            Err(ConfigError::UnknownNode(node.0))
        }
    }

    fn detach(&mut self, node: NodeId) {
        let parent = self.nodes.get(&node).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != node);
        }
    }
}

impl Hierarchy for SceneTree {
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }
}

// ========== Ownership index ==========

/// Resolved owner of one child. Both fields are `None` for an orphan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership<P> {
    pub parent: Option<P>,
    /// Position among the owner's children, in child order.
    pub index: Option<usize>,
}

impl<P> Membership<P> {
    fn orphan() -> Self {
        Self {
            parent: None,
            index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// Tracked but not resolved by a rebuild yet.
    Tracked,
    Resolved,
    Orphaned,
}

/// Child → owner map rebuilt from the hierarchy.
#[derive(Debug, Clone)]
pub struct OwnershipIndex<C, P> {
    entries: BTreeMap<C, Option<Membership<P>>>,
}

impl<C, P> Default for OwnershipIndex<C, P> {
    fn default() -> Self {
        Self { entries: BTreeMap::new() }
    }
}

impl<C: Ord + Copy, P: Ord + Copy> OwnershipIndex<C, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `child`. Returns false if it already was.
    pub fn track(&mut self, child: C) -> bool {
        if self.entries.contains_key(&child) {
            return false;
        }
        self.entries.insert(child, None);
        true
    }

    pub fn untrack(&mut self, child: C) -> bool {
        self.entries.remove(&child).is_some()
    }

    /// Reassign every tracked child to its nearest candidate ancestor.
    ///
    /// Children without a node, or with no candidate above them, become
    /// orphans. Returns whether any association changed.
    pub fn rebuild(
        &mut self,
        node_of: impl Fn(C) -> Option<NodeId>,
        candidates: &[(P, NodeId)],
        hierarchy: &impl Hierarchy,
    ) -> bool {
        let mut next: BTreeMap<C, Option<Membership<P>>> = BTreeMap::new();
        let mut counts: BTreeMap<P, usize> = BTreeMap::new();
        for child in self.entries.keys().copied() {
            // Candidates above one node all sit on its ancestor chain, so the
            // nearest is the one below every other.
            let owner = node_of(child).and_then(|node| {
                candidates
                    .iter()
                    .filter(|(_, at)| hierarchy.is_descendant_of(node, *at))
                    .reduce(|nearest, candidate| {
                        if hierarchy.is_descendant_of(candidate.1, nearest.1) {
                            candidate
                        } else {
                            nearest
                        }
                    })
                    .map(|(p, _)| *p)
            });
            let membership = match owner {
                Some(p) => {
                    let slot = counts.entry(p).or_insert(0);
                    let index = *slot;
                    *slot += 1;
                    Membership {
                        parent: Some(p),
                        index: Some(index),
                    }
                }
                None => Membership::orphan(),
            };
            next.insert(child, Some(membership));
        }

        let changed = next != self.entries;
        self.entries = next;
        changed
    }

    pub fn membership(&self, child: C) -> Option<Membership<P>> {
        self.entries.get(&child).copied().flatten()
    }

    pub fn parent_of(&self, child: C) -> Option<P> {
        self.membership(child).and_then(|m| m.parent)
    }

    pub fn state(&self, child: C) -> RegistrationState {
        match self.entries.get(&child) {
            None => RegistrationState::Unregistered,
            Some(None) => RegistrationState::Tracked,
            Some(Some(m)) if m.parent.is_some() => RegistrationState::Resolved,
            Some(Some(_)) => RegistrationState::Orphaned,
        }
    }

    /// Children resolved under `parent`, in child order.
    pub fn children_of(&self, parent: P) -> Vec<C> {
        self.entries
            .iter()
            .filter(|(_, m)| m.and_then(|m| m.parent) == Some(parent))
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn orphans(&self) -> Vec<C> {
        self.entries
            .iter()
            .filter(|(_, m)| matches!(m, Some(m) if m.parent.is_none()))
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ========== Topology ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyLevel {
    AgentsUnderFlocks,
    MembersUnderDomains,
}

/// Anything a domain can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Member {
    Flock(FlockId),
    Force(ForceId),
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Flock(id) => write!(f, "{}", id),
            Member::Force(id) => write!(f, "{}", id),
        }
    }
}

/// Scene nodes of every tracked object, gathered by the world.
#[derive(Debug, Clone, Default)]
pub struct TopologyInputs {
    pub agent_nodes: BTreeMap<AgentId, NodeId>,
    pub flock_nodes: Vec<(FlockId, NodeId)>,
    pub member_nodes: BTreeMap<Member, NodeId>,
    pub domain_nodes: Vec<(DomainId, NodeId)>,
}

/// What a [`Topology::reconcile`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub agents_rebuilt: bool,
    pub agents_changed: bool,
    pub members_rebuilt: bool,
    pub members_changed: bool,
}

impl ReconcileReport {
    pub fn rebuilt_anything(&self) -> bool {
        self.agents_rebuilt || self.members_rebuilt
    }
}

/// Two-level ownership cache with dirty tracking.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    agents: OwnershipIndex<AgentId, FlockId>,
    members: OwnershipIndex<Member, DomainId>,
    agents_dirty: bool,
    members_dirty: bool,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, level: TopologyLevel) {
        let flag = match level {
            TopologyLevel::AgentsUnderFlocks => &mut self.agents_dirty,
            TopologyLevel::MembersUnderDomains => &mut self.members_dirty,
        };
        if !*flag {
            tracing::debug!(?level, "topology marked dirty");
        }
        *flag = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.agents_dirty || self.members_dirty
    }

    pub fn is_level_dirty(&self, level: TopologyLevel) -> bool {
        match level {
            TopologyLevel::AgentsUnderFlocks => self.agents_dirty,
            TopologyLevel::MembersUnderDomains => self.members_dirty,
        }
    }

    pub fn track_agent(&mut self, id: AgentId) {
        self.agents.track(id);
        self.mark_dirty(TopologyLevel::AgentsUnderFlocks);
    }

    pub fn untrack_agent(&mut self, id: AgentId) {
        if self.agents.untrack(id) {
            self.mark_dirty(TopologyLevel::AgentsUnderFlocks);
        }
    }

    pub fn track_member(&mut self, member: Member) {
        self.members.track(member);
        self.mark_dirty(TopologyLevel::MembersUnderDomains);
    }

    pub fn untrack_member(&mut self, member: Member) {
        if self.members.untrack(member) {
            self.mark_dirty(TopologyLevel::MembersUnderDomains);
        }
    }

    /// Rebuild dirty levels, child level first. Clean levels are untouched.
    pub fn reconcile(&mut self, hierarchy: &impl Hierarchy, inputs: &TopologyInputs) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if self.agents_dirty {
            let before = self.agents.orphans().len();
            report.agents_changed = self
                .agents
                .rebuild(|id| inputs.agent_nodes.get(&id).copied(), &inputs.flock_nodes, hierarchy);
            report.agents_rebuilt = true;
            self.agents_dirty = false;
            let orphans = self.agents.orphans().len();
            if orphans > before {
                tracing::warn!(orphans, "agents without an owning flock are excluded from updates");
            }
            if report.agents_changed {
                self.mark_dirty(TopologyLevel::MembersUnderDomains);
            }
        }

        if self.members_dirty {
            report.members_changed = self.members.rebuild(
                |m| inputs.member_nodes.get(&m).copied(),
                &inputs.domain_nodes,
                hierarchy,
            );
            report.members_rebuilt = true;
            self.members_dirty = false;
        }

        if report.rebuilt_anything() {
            tracing::debug!(
                agents_changed = report.agents_changed,
                members_changed = report.members_changed,
                "topology rebuilt"
            );
        }
        report
    }

    pub fn agent_parent(&self, id: AgentId) -> Option<FlockId> {
        self.agents.parent_of(id)
    }

    pub fn agent_state(&self, id: AgentId) -> RegistrationState {
        self.agents.state(id)
    }

    pub fn member_domain(&self, member: Member) -> Option<DomainId> {
        self.members.parent_of(member)
    }

    pub fn member_state(&self, member: Member) -> RegistrationState {
        self.members.state(member)
    }

    /// Members resolved under `domain`, flocks before forces.
    pub fn domain_members(&self, domain: DomainId) -> Vec<Member> {
        self.members.children_of(domain)
    }

    pub fn agents(&self) -> &OwnershipIndex<AgentId, FlockId> {
        &self.agents
    }
}
