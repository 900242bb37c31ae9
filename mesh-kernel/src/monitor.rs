//! Registration and heartbeat maintenance against the mesh registry.
//!
//! One background worker owns the whole lifecycle: register with backoff,
//! reconcile a divergent listener port once, heartbeat on an interval, and
//! fall back to re-registration when the registry forgets the agent or the
//! offline threshold is crossed. Topology snapshots riding on heartbeat
//! acknowledgements are handed to the resolver.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mesh_primitives::{AgentDescriptor, CapabilityDescriptor, HealthRecord, HealthState};
use mesh_resolve::SnapshotSink;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{debug, info, warn};

use crate::health::{HealthEvent, HealthThresholds, HealthTracker};
use crate::port_bridge::PortBridge;
use crate::registry::{MeshRegistry, RegistryError, RegistryResult};
use crate::scheduler::TaskScheduler;
use crate::wire::{EndpointUpdateRequest, HeartbeatRequest, HeartbeatResponse, RegisterRequest};

/// Configuration for registration and heartbeat maintenance.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    interval: Duration,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
    thresholds: HealthThresholds,
    port_wait: Duration,
    attempts_per_tick: u32,
}

impl HeartbeatConfig {
    /// Creates a new configuration.
    #[must_use]
    pub const fn new(
        interval: Duration,
        initial_retry_delay: Duration,
        max_retry_delay: Duration,
        thresholds: HealthThresholds,
        port_wait: Duration,
        attempts_per_tick: u32,
    ) -> Self {
        Self {
            interval,
            initial_retry_delay,
            max_retry_delay,
            thresholds,
            port_wait,
            attempts_per_tick,
        }
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub const fn interval(self) -> Duration {
        self.interval
    }

    /// Returns the initial registration retry delay.
    #[must_use]
    pub const fn initial_retry_delay(self) -> Duration {
        self.initial_retry_delay
    }

    /// Returns the registration retry delay cap.
    #[must_use]
    pub const fn max_retry_delay(self) -> Duration {
        self.max_retry_delay
    }

    /// Returns the degraded/offline failure thresholds.
    #[must_use]
    pub const fn thresholds(self) -> HealthThresholds {
        self.thresholds
    }

    /// Returns how long registration waits for a divergent listener port.
    #[must_use]
    pub const fn port_wait(self) -> Duration {
        self.port_wait
    }

    /// Returns how many transport attempts a single heartbeat tick may
    /// spend before the tick counts as failed.
    #[must_use]
    pub const fn attempts_per_tick(self) -> u32 {
        self.attempts_per_tick
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when any duration is zero,
    /// the retry delay bounds are inconsistent, the health thresholds are
    /// out of order, or the per-tick attempt budget is zero.
    pub fn validate(self) -> RegistryResult<()> {
        if self.interval.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "heartbeat interval must be greater than zero",
            ));
        }
        if self.initial_retry_delay.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "initial retry delay must be greater than zero",
            ));
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(RegistryError::InvalidConfig(
                "initial retry delay cannot exceed max retry delay",
            ));
        }
        if self.thresholds.validate().is_err() {
            return Err(RegistryError::InvalidConfig(
                "health thresholds must satisfy 0 < degraded < offline",
            ));
        }
        if self.attempts_per_tick == 0 {
            return Err(RegistryError::InvalidConfig(
                "heartbeat attempts per tick must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            thresholds: HealthThresholds::default(),
            port_wait: Duration::from_secs(2),
            attempts_per_tick: 3,
        }
    }
}

struct MonitorShared {
    registry: Arc<dyn MeshRegistry>,
    sink: Arc<dyn SnapshotSink>,
    bridge: Arc<PortBridge>,
    config: HeartbeatConfig,
    tracker: Mutex<HealthTracker>,
    shutdown: AtomicBool,
    // The advertised descriptor; rewritten once if the listener binds a
    // divergent port so re-registrations announce the corrected endpoint.
    agent: Mutex<AgentDescriptor>,
}

impl MonitorShared {
    fn lock_tracker(&self) -> MutexGuard<'_, HealthTracker> {
        match self.tracker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_agent(&self) -> MutexGuard<'_, AgentDescriptor> {
        match self.agent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn on_registered(&self) -> HealthState {
        self.lock_tracker().apply(HealthEvent::Registered)
    }

    fn on_success(&self) -> HealthState {
        self.lock_tracker().apply(HealthEvent::HeartbeatSucceeded)
    }

    fn on_failure(&self) -> HealthState {
        self.lock_tracker().apply(HealthEvent::HeartbeatFailed)
    }
}

/// Maintains the agent's registration and liveness with the registry.
pub struct HealthMonitor {
    shared: Arc<MonitorShared>,
    capabilities: Vec<CapabilityDescriptor>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("agent_id", &self.shared.lock_agent().agent_id())
            .field("capabilities", &self.capabilities.len())
            .field("worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Creates a monitor for the given agent and its capabilities.
    #[must_use]
    pub fn new(
        registry: Arc<dyn MeshRegistry>,
        agent: AgentDescriptor,
        capabilities: Vec<CapabilityDescriptor>,
        sink: Arc<dyn SnapshotSink>,
        bridge: Arc<PortBridge>,
        config: HeartbeatConfig,
    ) -> Self {
        let tracker = HealthTracker::new(agent.agent_id(), config.thresholds());
        Self {
            shared: Arc::new(MonitorShared {
                registry,
                sink,
                bridge,
                config,
                tracker: Mutex::new(tracker),
                shutdown: AtomicBool::new(false),
                agent: Mutex::new(agent),
            }),
            capabilities,
            worker: None,
        }
    }

    /// Returns the agent's current health self-report.
    #[must_use]
    pub fn health(&self) -> HealthRecord {
        self.shared.lock_tracker().record().clone()
    }

    /// Returns the currently advertised descriptor.
    #[must_use]
    pub fn advertised_agent(&self) -> AgentDescriptor {
        self.shared.lock_agent().clone()
    }

    /// Starts the background worker. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] for a bad configuration or
    /// [`RegistryError::Scheduler`] when the scheduler is closed.
    pub fn start(&mut self, scheduler: &TaskScheduler) -> RegistryResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.shared.config.validate()?;

        let shared = Arc::clone(&self.shared);
        let capabilities = self.capabilities.clone();
        let handle = scheduler.spawn(async move {
            run_monitor_loop(shared, capabilities).await;
        })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Stops the worker and deregisters the agent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Scheduler`] when the deregistration task
    /// cannot be spawned.
    pub fn stop(&mut self, scheduler: &TaskScheduler) -> RegistryResult<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared
            .lock_tracker()
            .apply(HealthEvent::Deregister);

        let registry = Arc::clone(&self.shared.registry);
        let agent_id = self.shared.lock_agent().agent_id();
        scheduler.spawn(async move {
            if let Err(err) = registry.deregister(agent_id).await {
                warn!(error = %err, "deregistration failed");
            } else {
                info!(%agent_id, "agent deregistered");
            }
        })?;

        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
        Ok(())
    }
}

async fn run_monitor_loop(shared: Arc<MonitorShared>, capabilities: Vec<CapabilityDescriptor>) {
    let mut retry_delay = shared.config.initial_retry_delay();

    loop {
        if shared.is_shutdown() {
            break;
        }

        let request = RegisterRequest {
            agent: shared.lock_agent().clone(),
            capabilities: capabilities.clone(),
        };
        match shared.registry.register(&request).await {
            Ok(ack) => {
                info!(agent_id = %ack.agent_id, "registered with mesh registry");
                retry_delay = shared.config.initial_retry_delay();
                shared.on_registered();
                reconcile_endpoint(&shared).await;
                if !run_heartbeat_loop(&shared).await {
                    continue;
                }
                break;
            }
            Err(err) => {
                warn!(error = %err, "registration failed; retrying");
                shared.on_failure();
                sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(shared.config.max_retry_delay());
            }
        }
    }
}

/// Waits a bounded time for the listener to report a divergent port and
/// publishes a single endpoint correction if it does.
///
/// The bridge consumes its signal on delivery, so a monitor that loops back
/// through registration cannot publish the correction twice.
async fn reconcile_endpoint(shared: &MonitorShared) {
    let Some(port) = shared.bridge.wait_divergent(shared.config.port_wait()).await else {
        return;
    };

    let (agent_id, endpoint) = {
        let agent = shared.lock_agent();
        (agent.agent_id(), agent.endpoint().with_port(port))
    };
    let request = EndpointUpdateRequest {
        agent_id,
        endpoint: endpoint.clone(),
    };
    match shared.registry.update_endpoint(&request).await {
        Ok(()) => {
            info!(%agent_id, port, "published corrected endpoint");
            let mut agent = shared.lock_agent();
            *agent = agent.with_endpoint(endpoint);
        }
        Err(err) => {
            warn!(error = %err, port, "endpoint correction failed");
        }
    }
}

/// Runs heartbeat ticks until shutdown (returns `true`) or until the agent
/// must re-register (returns `false`).
async fn run_heartbeat_loop(shared: &MonitorShared) -> bool {
    let mut interval = tokio::time::interval(shared.config.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !shared.is_shutdown() {
        interval.tick().await;
        if shared.is_shutdown() {
            break;
        }

        let request = {
            let tracker = shared.lock_tracker();
            HeartbeatRequest {
                agent_id: tracker.record().agent_id,
                health: tracker.record().clone(),
            }
        };
        match exchange_heartbeat(shared, &request).await {
            Ok(ack) => {
                shared.on_success();
                if let Some(topology) = ack.topology {
                    shared.sink.apply_snapshot(topology.into_snapshot());
                }
                if ack.needs_register {
                    info!("registry requested re-registration");
                    return false;
                }
            }
            Err(err) => {
                let state = shared.on_failure();
                warn!(error = %err, ?state, "heartbeat tick failed");
                if state == HealthState::Offline {
                    warn!("offline threshold reached; attempting re-registration");
                    return false;
                }
            }
        }
    }

    true
}

/// Sends one heartbeat, retrying transport failures with backoff up to the
/// configured per-tick attempt budget. Only an exhausted budget counts as a
/// tick failure.
async fn exchange_heartbeat(
    shared: &MonitorShared,
    request: &HeartbeatRequest,
) -> RegistryResult<HeartbeatResponse> {
    let mut delay = shared.config.initial_retry_delay();
    let mut attempt = 1;
    loop {
        match shared.registry.heartbeat(request).await {
            Ok(ack) => return Ok(ack),
            Err(err) => {
                if attempt >= shared.config.attempts_per_tick() || shared.is_shutdown() {
                    return Err(err);
                }
                debug!(error = %err, attempt, "heartbeat attempt failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(shared.config.max_retry_delay());
                attempt += 1;
            }
        }
    }
}
