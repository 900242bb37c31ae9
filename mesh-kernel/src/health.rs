//! Health state machine driven by heartbeat outcomes.

use mesh_primitives::{AgentId, HealthRecord, HealthState};
use thiserror::Error;
use tracing::debug;

/// Consecutive-failure counts at which health degrades and then goes offline.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    degraded_after: u32,
    offline_after: u32,
}

impl HealthThresholds {
    /// Creates thresholds from explicit failure counts.
    #[must_use]
    pub const fn new(degraded_after: u32, offline_after: u32) -> Self {
        Self {
            degraded_after,
            offline_after,
        }
    }

    /// Returns the failure count at which the agent reports `Degraded`.
    #[must_use]
    pub const fn degraded_after(self) -> u32 {
        self.degraded_after
    }

    /// Returns the failure count at which the agent reports `Offline`.
    #[must_use]
    pub const fn offline_after(self) -> u32 {
        self.offline_after
    }

    /// Validates the thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`HealthConfigError`] when the degraded threshold is zero or
    /// does not precede the offline threshold.
    pub const fn validate(self) -> Result<(), HealthConfigError> {
        if self.degraded_after == 0 {
            return Err(HealthConfigError::ZeroDegradedThreshold);
        }
        if self.offline_after <= self.degraded_after {
            return Err(HealthConfigError::ThresholdsOutOfOrder);
        }
        Ok(())
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::new(2, 5)
    }
}

/// Errors produced by threshold validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthConfigError {
    /// The degraded threshold must be at least one failure.
    #[error("degraded threshold must be greater than zero")]
    ZeroDegradedThreshold,
    /// Offline must require strictly more failures than degraded.
    #[error("offline threshold must exceed the degraded threshold")]
    ThresholdsOutOfOrder,
}

/// Events the heartbeat worker feeds into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// A registration round-trip completed. Liveness has not been proven
    /// by a heartbeat yet, so no heartbeat timestamp is recorded.
    Registered,
    /// A heartbeat round-trip completed.
    HeartbeatSucceeded,
    /// A heartbeat tick exhausted its retries.
    HeartbeatFailed,
    /// The agent is shutting down for good.
    Deregister,
}

/// Tracks the local agent's health from heartbeat outcomes.
///
/// Between successes the failure count only grows, so the derived state
/// moves monotonically `Healthy -> Degraded -> Offline`. A single success
/// resets the count and returns the agent to `Healthy`. `Deregistered` is
/// terminal; no event leaves it.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    record: HealthRecord,
    thresholds: HealthThresholds,
}

impl HealthTracker {
    /// Creates a tracker for a freshly started agent.
    #[must_use]
    pub const fn new(agent_id: AgentId, thresholds: HealthThresholds) -> Self {
        Self {
            record: HealthRecord::new(agent_id),
            thresholds,
        }
    }

    /// Returns the current health record.
    #[must_use]
    pub const fn record(&self) -> &HealthRecord {
        &self.record
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> HealthState {
        self.record.state
    }

    /// Applies an event, returning the resulting state.
    pub fn apply(&mut self, event: HealthEvent) -> HealthState {
        let next = match (self.record.state, event) {
            (HealthState::Deregistered, _) => HealthState::Deregistered,
            (_, HealthEvent::Deregister) => HealthState::Deregistered,
            (_, HealthEvent::Registered) => {
                self.record.consecutive_failures = 0;
                HealthState::Healthy
            }
            (_, HealthEvent::HeartbeatSucceeded) => {
                self.record.consecutive_failures = 0;
                self.record.last_heartbeat_at = Some(chrono::Utc::now());
                HealthState::Healthy
            }
            // Registration has not completed yet; failures are counted but
            // the agent stays in its startup state until the first success.
            (HealthState::Registering, HealthEvent::HeartbeatFailed) => {
                self.record.consecutive_failures += 1;
                HealthState::Registering
            }
            (_, HealthEvent::HeartbeatFailed) => {
                self.record.consecutive_failures += 1;
                if self.record.consecutive_failures >= self.thresholds.offline_after() {
                    HealthState::Offline
                } else if self.record.consecutive_failures >= self.thresholds.degraded_after() {
                    HealthState::Degraded
                } else {
                    HealthState::Healthy
                }
            }
        };

        if next != self.record.state {
            debug!(
                agent_id = %self.record.agent_id,
                from = ?self.record.state,
                to = ?next,
                failures = self.record.consecutive_failures,
                "health transition"
            );
            self.record.state = next;
        }

        self.record.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(AgentId::random(), HealthThresholds::new(2, 4))
    }

    #[test]
    fn first_success_leaves_registering() {
        let mut tracker = tracker();
        assert_eq!(tracker.state(), HealthState::Registering);
        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatSucceeded),
            HealthState::Healthy
        );
        assert!(tracker.record().last_heartbeat_at.is_some());
    }

    #[test]
    fn failures_degrade_then_go_offline_without_skipping() {
        let mut tracker = tracker();
        tracker.apply(HealthEvent::HeartbeatSucceeded);

        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatFailed),
            HealthState::Healthy
        );
        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatFailed),
            HealthState::Degraded
        );
        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatFailed),
            HealthState::Degraded
        );
        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatFailed),
            HealthState::Offline
        );
    }

    #[test]
    fn success_resets_failures_and_restores_healthy() {
        let mut tracker = tracker();
        tracker.apply(HealthEvent::HeartbeatSucceeded);
        tracker.apply(HealthEvent::HeartbeatFailed);
        tracker.apply(HealthEvent::HeartbeatFailed);
        assert_eq!(tracker.state(), HealthState::Degraded);

        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatSucceeded),
            HealthState::Healthy
        );
        assert_eq!(tracker.record().consecutive_failures, 0);
    }

    #[test]
    fn deregistered_is_terminal() {
        let mut tracker = tracker();
        tracker.apply(HealthEvent::Deregister);
        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatSucceeded),
            HealthState::Deregistered
        );
        assert_eq!(
            tracker.apply(HealthEvent::HeartbeatFailed),
            HealthState::Deregistered
        );
    }

    #[test]
    fn registration_restores_healthy_without_stamping_a_heartbeat() {
        let mut tracker = tracker();
        tracker.apply(HealthEvent::HeartbeatFailed);
        assert_eq!(tracker.apply(HealthEvent::Registered), HealthState::Healthy);
        assert_eq!(tracker.record().consecutive_failures, 0);
        assert!(tracker.record().last_heartbeat_at.is_none());

        // A real heartbeat is what stamps the timestamp.
        tracker.apply(HealthEvent::HeartbeatSucceeded);
        assert!(tracker.record().last_heartbeat_at.is_some());
    }

    #[test]
    fn registering_failures_do_not_degrade() {
        let mut tracker = tracker();
        for _ in 0..6 {
            assert_eq!(
                tracker.apply(HealthEvent::HeartbeatFailed),
                HealthState::Registering
            );
        }
    }

    #[test]
    fn thresholds_validate() {
        assert!(HealthThresholds::new(2, 5).validate().is_ok());
        assert_eq!(
            HealthThresholds::new(0, 5).validate(),
            Err(HealthConfigError::ZeroDegradedThreshold)
        );
        assert_eq!(
            HealthThresholds::new(3, 3).validate(),
            Err(HealthConfigError::ThresholdsOutOfOrder)
        );
    }
}
