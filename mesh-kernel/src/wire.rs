//! Wire-level payloads exchanged with the mesh registry and between agents.

use chrono::{DateTime, Utc};
use mesh_primitives::{AgentDescriptor, AgentId, CapabilityDescriptor, Endpoint, HealthRecord};
use mesh_resolve::TopologySnapshot;
use serde::{Deserialize, Serialize};

/// Registration payload announcing an agent and everything it offers.
///
/// Capability dependencies ride along in declaration order; the registry
/// redistributes them verbatim so every peer resolves against the same
/// ordered specs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// The agent being announced, endpoint included.
    pub agent: AgentDescriptor,
    /// Capabilities the agent offers.
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// Registration acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Indicates whether the registration succeeded.
    pub success: bool,
    /// Agent identifier acknowledged by the registry.
    pub agent_id: AgentId,
    /// Informational message.
    #[serde(default)]
    pub message: String,
}

/// Heartbeat payload carrying the agent's health self-report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Identifier of the agent sending the heartbeat.
    pub agent_id: AgentId,
    /// The agent's current view of its own health.
    pub health: HealthRecord,
}

/// Heartbeat acknowledgement bundling the registry's topology view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Indicates whether the heartbeat was accepted.
    pub success: bool,
    /// Signals that the registry no longer knows this agent and it must
    /// re-register before the next heartbeat.
    #[serde(default)]
    pub needs_register: bool,
    /// Registry timestamp recorded for the heartbeat.
    pub timestamp: DateTime<Utc>,
    /// The registry's current topology, if it changed or was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologyUpdate>,
}

/// Serialized topology as distributed by the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyUpdate {
    /// Monotonic topology version.
    pub version: u64,
    /// Every agent the registry knows about.
    pub agents: Vec<AgentDescriptor>,
    /// Every capability the registry knows about.
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl TopologyUpdate {
    /// Converts the wire form into an immutable snapshot.
    #[must_use]
    pub fn into_snapshot(self) -> TopologySnapshot {
        TopologySnapshot::new(self.version, self.agents, self.capabilities)
    }
}

/// Endpoint correction sent when the listener binds a divergent port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointUpdateRequest {
    /// Agent whose advertised endpoint changed.
    pub agent_id: AgentId,
    /// The endpoint peers should use from now on.
    pub endpoint: Endpoint,
}

/// Error payload used for protocol error responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable error message.
    pub error: String,
    /// Machine readable error code.
    #[serde(default)]
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_primitives::{
        AgentDescriptorBuilder, CapabilityDescriptorBuilder, DependencySpec, Scheme, TagExpr,
    };

    #[test]
    fn register_request_preserves_dependency_order() {
        let owner = AgentId::random();
        let capability = CapabilityDescriptor::builder("report", owner)
            .function_name("report")
            .and_then(|b| b.version("1.0"))
            .map(|b| {
                b.add_dependency(DependencySpec::new("student_lookup").unwrap())
                    .add_dependency(DependencySpec::new("schedule_lookup").unwrap())
            })
            .and_then(CapabilityDescriptorBuilder::build)
            .unwrap();
        let agent = AgentDescriptor::builder(owner)
            .name("reporter")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.endpoint(Endpoint::new(Scheme::Http, "localhost", 8080).unwrap()))
            .and_then(AgentDescriptorBuilder::build)
            .unwrap();

        let request = RegisterRequest {
            agent,
            capabilities: vec![capability],
        };
        let json = serde_json::to_string(&request).unwrap();
        let decoded: RegisterRequest = serde_json::from_str(&json).unwrap();

        let deps: Vec<_> = decoded.capabilities[0]
            .dependencies()
            .iter()
            .map(DependencySpec::capability)
            .collect();
        assert_eq!(deps, ["student_lookup", "schedule_lookup"]);
    }

    #[test]
    fn heartbeat_response_topology_is_optional() {
        let json = r#"{"success":true,"timestamp":"2026-01-01T00:00:00Z"}"#;
        let response: HeartbeatResponse = serde_json::from_str(json).unwrap();
        assert!(response.success);
        assert!(!response.needs_register);
        assert!(response.topology.is_none());
    }

    #[test]
    fn tag_expressions_survive_the_wire() {
        let owner = AgentId::random();
        let tags = TagExpr::default()
            .tag("python")
            .and_then(|t| t.any_of(vec![vec!["fast"], vec!["+typescript"]]))
            .unwrap();
        let spec = DependencySpec::new("addition").unwrap().with_tags(tags);
        let capability = CapabilityDescriptor::builder("math", owner)
            .function_name("math")
            .and_then(|b| b.version("2.0"))
            .map(|b| b.add_dependency(spec.clone()))
            .and_then(CapabilityDescriptorBuilder::build)
            .unwrap();

        let json = serde_json::to_value(&capability).unwrap();
        let decoded: CapabilityDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.dependencies()[0], spec);
    }
}
