//! Topology snapshots delivered by heartbeat responses.

use std::collections::HashMap;

use mesh_primitives::{AgentDescriptor, AgentId, CapabilityDescriptor};

/// The registry's current view of all agents and capabilities.
///
/// Snapshots are immutable once built and applied wholesale; the resolver
/// never patches an old snapshot in place.
#[derive(Clone, Debug, Default)]
pub struct TopologySnapshot {
    version: u64,
    agents: HashMap<AgentId, AgentDescriptor>,
    capabilities: Vec<CapabilityDescriptor>,
}

impl TopologySnapshot {
    /// Builds a snapshot from registry data.
    #[must_use]
    pub fn new(
        version: u64,
        agents: Vec<AgentDescriptor>,
        capabilities: Vec<CapabilityDescriptor>,
    ) -> Self {
        let agents = agents
            .into_iter()
            .map(|agent| (agent.agent_id(), agent))
            .collect();
        Self {
            version,
            agents,
            capabilities,
        }
    }

    /// Returns the monotonic snapshot version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Looks up an agent descriptor.
    #[must_use]
    pub fn agent(&self, agent_id: AgentId) -> Option<&AgentDescriptor> {
        self.agents.get(&agent_id)
    }

    /// Iterates all known agents.
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    /// Returns every known capability descriptor.
    #[must_use]
    pub fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    /// Returns the capability descriptors whose owning agents may still be
    /// offered to the matcher. Capabilities owned by `Offline` or
    /// `Deregistered` agents, or by agents missing from the snapshot, are
    /// excluded.
    #[must_use]
    pub fn routable_capabilities(&self) -> Vec<&CapabilityDescriptor> {
        self.capabilities
            .iter()
            .filter(|capability| {
                self.agents
                    .get(&capability.agent_id())
                    .is_some_and(|agent| agent.health_state().is_routable())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_primitives::{
        AgentDescriptorBuilder, CapabilityDescriptorBuilder, Endpoint, HealthState, Scheme,
    };

    fn agent(state: HealthState) -> AgentDescriptor {
        let descriptor = AgentDescriptor::builder(AgentId::random())
            .name("a")
            .and_then(|b| b.version("1"))
            .map(|b| b.endpoint(Endpoint::new(Scheme::Http, "localhost", 80).expect("endpoint")))
            .and_then(AgentDescriptorBuilder::build)
            .expect("agent");
        descriptor.with_health_state(state)
    }

    fn capability(owner: AgentId) -> CapabilityDescriptor {
        CapabilityDescriptor::builder("cap", owner)
            .function_name("f")
            .and_then(|b| b.version("1.0"))
            .and_then(CapabilityDescriptorBuilder::build)
            .expect("capability")
    }

    #[test]
    fn offline_owners_are_not_routable() {
        let healthy = agent(HealthState::Healthy);
        let offline = agent(HealthState::Offline);
        let capabilities = vec![capability(healthy.agent_id()), capability(offline.agent_id())];
        let snapshot = TopologySnapshot::new(1, vec![healthy.clone(), offline], capabilities);

        let routable = snapshot.routable_capabilities();
        assert_eq!(routable.len(), 1);
        assert_eq!(routable[0].agent_id(), healthy.agent_id());
    }

    #[test]
    fn unknown_owner_is_excluded() {
        let snapshot = TopologySnapshot::new(1, Vec::new(), vec![capability(AgentId::random())]);
        assert!(snapshot.routable_capabilities().is_empty());
    }
}
