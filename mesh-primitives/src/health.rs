//! Agent health states and records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AgentId;

/// Liveness state of an agent as tracked by its health monitor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Process started, first heartbeat round-trip not yet completed.
    Registering,
    /// Heartbeats are succeeding.
    Healthy,
    /// A small number of consecutive heartbeats failed.
    Degraded,
    /// The failure threshold was crossed; excluded from resolution.
    Offline,
    /// Explicitly shut down. Terminal.
    Deregistered,
}

impl HealthState {
    /// Returns `true` when capabilities owned by an agent in this state may
    /// still be offered to the matcher.
    #[must_use]
    pub const fn is_routable(self) -> bool {
        matches!(self, Self::Registering | Self::Healthy | Self::Degraded)
    }

    /// Returns `true` once the agent has left the mesh for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deregistered)
    }
}

/// Point-in-time health self-report for a single agent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Agent the record describes.
    pub agent_id: AgentId,
    /// Consecutive heartbeat tick failures observed.
    pub consecutive_failures: u32,
    /// Current state.
    pub state: HealthState,
    /// Last successful heartbeat, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl HealthRecord {
    /// Creates a fresh record for a newly started agent.
    #[must_use]
    pub const fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            consecutive_failures: 0,
            state: HealthState::Registering,
            last_heartbeat_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routability() {
        assert!(HealthState::Registering.is_routable());
        assert!(HealthState::Healthy.is_routable());
        assert!(HealthState::Degraded.is_routable());
        assert!(!HealthState::Offline.is_routable());
        assert!(!HealthState::Deregistered.is_routable());
        assert!(HealthState::Deregistered.is_terminal());
    }
}
