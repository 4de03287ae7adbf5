//! Domains: optional groupings of flocks and forces.

use std::fmt::Write;

use crate::agent::{DomainId, NodeId};
use crate::flock::Flock;
use crate::force::Force;

/// A named scene subtree. Flocks and forces whose nodes sit below it belong
/// to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    id: DomainId,
    name: String,
    node: NodeId,
}

impl Domain {
    pub fn new(id: DomainId, name: impl Into<String>, node: NodeId) -> Self {
        Self {
            id,
            name: name.into(),
            node,
        }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Indented listing of a domain's flocks, their agents and its forces.
///
/// ```text
/// domain 'meadow'
///   flock 'sparrows' (2/40)
///     flock#0/agent#0 at (7.00, 0.00)
///     flock#0/agent#1 at (-3.10, 6.27)
///   force 'wind' (Turbulence, intensity 1.50)
/// ```
pub fn describe<'a>(
    domain: &Domain,
    flocks: impl IntoIterator<Item = &'a Flock>,
    forces: impl IntoIterator<Item = &'a Force>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "domain '{}'", domain.name);
    for flock in flocks {
        let _ = writeln!(out, "  flock '{}' ({}/{})", flock.name(), flock.len(), flock.capacity());
        for agent in flock.agents() {
            let _ = writeln!(
                out,
                "    {} at ({:.2}, {:.2})",
                agent.id(),
                agent.position.x,
                agent.position.y
            );
        }
    }
    for force in forces {
        let state = if force.enabled { "" } else { ", disabled" };
        let _ = writeln!(
            out,
            "  force '{}' ({:?}, intensity {:.2}{})",
            force.name(),
            force.params.kind,
            force.params.intensity,
            state
        );
    }
    out
}
