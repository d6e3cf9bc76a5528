// conversation/roles.rs - Role Binding Table

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::acl_message::AgentId;

/// Mapping from symbolic role names to the concrete agent identities
/// bound to them within one conversation instance.
///
/// Roles follow bind-once semantics: an unbound role adopts the
/// identities of the first accepted message that exercises it, and every
/// later message for that role is compared against the bound set. The
/// table is part of a machine's per-conversation state; cloning the
/// machine clones the table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTable {
    bindings: BTreeMap<String, Vec<AgentId>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role name without binding it to any identity.
    pub fn register(&mut self, role: &str) {
        self.bindings.entry(role.to_string()).or_default();
    }

    /// Bind `agents` to an unbound role. Returns false (and leaves the
    /// table untouched) if the role already holds identities.
    pub fn bind(&mut self, role: &str, agents: Vec<AgentId>) -> bool {
        let slot = self.bindings.entry(role.to_string()).or_default();
        if !slot.is_empty() {
            return false;
        }
        debug!(role, agents = ?agents.iter().map(|a| &a.name).collect::<Vec<_>>(), "role bound");
        for agent in agents {
            if !slot.iter().any(|a| a.name == agent.name) {
                slot.push(agent);
            }
        }
        true
    }

    /// The identities bound to `role`; empty while the role is unbound.
    pub fn agents_for(&self, role: &str) -> &[AgentId] {
        self.bindings.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_bound(&self, role: &str) -> bool {
        !self.agents_for(role).is_empty()
    }

    /// Whether `agent` is one of the identities bound to `role`,
    /// compared by name.
    pub fn contains_agent(&self, role: &str, agent: &AgentId) -> bool {
        self.agents_for(role).iter().any(|a| a.name == agent.name)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}
