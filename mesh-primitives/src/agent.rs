//! Agent descriptors advertised to the registry.

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::health::HealthState;
use crate::ids::AgentId;

/// Identity and location of one agent in the mesh.
///
/// The local health monitor owns the descriptor for the local agent; remote
/// descriptors are read-only mirrors replaced wholesale on each topology
/// snapshot. Field-by-field mutation is deliberately not offered.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    agent_id: AgentId,
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    endpoint: Endpoint,
    health_state: HealthState,
}

impl AgentDescriptor {
    /// Starts building a descriptor for the given agent.
    #[must_use]
    pub fn builder(agent_id: AgentId) -> AgentDescriptorBuilder {
        AgentDescriptorBuilder {
            agent_id,
            name: None,
            version: None,
            namespace: None,
            tags: Vec::new(),
            endpoint: None,
        }
    }

    /// Returns the agent identifier.
    #[must_use]
    pub const fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the agent build version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the namespace, if one was declared.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the agent-level tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the endpoint the agent is reachable at.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the last known health state.
    #[must_use]
    pub const fn health_state(&self) -> HealthState {
        self.health_state
    }

    /// Returns a copy with the endpoint replaced (port-correction path).
    #[must_use]
    pub fn with_endpoint(&self, endpoint: Endpoint) -> Self {
        let mut next = self.clone();
        next.endpoint = endpoint;
        next
    }

    /// Returns a copy with the health state replaced.
    #[must_use]
    pub fn with_health_state(&self, state: HealthState) -> Self {
        let mut next = self.clone();
        next.health_state = state;
        next
    }
}

/// Builder for [`AgentDescriptor`].
#[derive(Debug)]
pub struct AgentDescriptorBuilder {
    agent_id: AgentId,
    name: Option<String>,
    version: Option<String>,
    namespace: Option<String>,
    tags: Vec<String>,
    endpoint: Option<Endpoint>,
}

impl AgentDescriptorBuilder {
    /// Sets the human-readable agent name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when the name is empty.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "agent name cannot be empty".into(),
            });
        }
        self.name = Some(name);
        Ok(self)
    }

    /// Sets the agent build version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when the version is empty.
    pub fn version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "agent version cannot be empty".into(),
            });
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Sets the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds an agent-level tag.
    #[must_use]
    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Finalises the descriptor. Newly built agents start in
    /// [`HealthState::Registering`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when mandatory fields are
    /// missing.
    pub fn build(self) -> Result<AgentDescriptor> {
        let name = self.name.ok_or_else(|| Error::InvalidCapability {
            reason: "agent name must be provided".into(),
        })?;
        let version = self.version.ok_or_else(|| Error::InvalidCapability {
            reason: "agent version must be provided".into(),
        })?;
        let endpoint = self.endpoint.ok_or_else(|| Error::InvalidCapability {
            reason: "agent endpoint must be provided".into(),
        })?;

        Ok(AgentDescriptor {
            agent_id: self.agent_id,
            name,
            version,
            namespace: self.namespace,
            tags: self.tags,
            endpoint,
            health_state: HealthState::Registering,
        })
    }
}
