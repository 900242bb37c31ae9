//! Registry backend abstraction.

use async_trait::async_trait;
use mesh_primitives::AgentId;
use thiserror::Error;

use crate::scheduler::SchedulerError;
use crate::wire::{
    EndpointUpdateRequest, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
};

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by registry integration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Kernel configuration was invalid.
    #[error("invalid kernel configuration: {0}")]
    InvalidConfig(&'static str),
    /// Scheduler rejected a task submission.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// Registry backend failure.
    #[error("registry backend error: {reason}")]
    Backend {
        /// Human-readable context provided by the backend.
        reason: String,
    },
    /// The registry answered but refused the request.
    #[error("registry rejected the request: {reason}")]
    Rejected {
        /// Reason reported by the registry.
        reason: String,
    },
}

impl RegistryError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Convenience helper to construct rejection errors.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Trait implemented by mesh registry backends.
///
/// The production backend speaks HTTP; tests and single-process demos plug
/// in in-memory implementations.
#[async_trait]
pub trait MeshRegistry: Send + Sync {
    /// Announces an agent and its capabilities to the mesh.
    async fn register(&self, request: &RegisterRequest) -> RegistryResult<RegisterResponse>;

    /// Sends a heartbeat, receiving the registry's topology view back.
    async fn heartbeat(&self, request: &HeartbeatRequest) -> RegistryResult<HeartbeatResponse>;

    /// Publishes a corrected endpoint for an already registered agent.
    async fn update_endpoint(&self, request: &EndpointUpdateRequest) -> RegistryResult<()>;

    /// Removes the agent from the registry.
    async fn deregister(&self, agent_id: AgentId) -> RegistryResult<()>;
}
