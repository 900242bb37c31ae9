//! Mesh lifecycle kernel.
//!
//! Wires the dependency resolver, capability dispatch, health monitoring,
//! and port publication into one per-agent runtime. An agent declares its
//! capabilities and handlers, activates the kernel, and from then on the
//! kernel keeps the registry informed and the dependency slots current.

#![warn(missing_docs, clippy::pedantic)]

mod config;
mod dispatch;
mod health;
mod http_client;
mod http_registry;
mod monitor;
mod port_bridge;
mod proxy;
mod registry;
mod scheduler;
mod wire;

use std::fmt;
use std::sync::{Arc, Mutex};

use mesh_primitives::{AgentDescriptor, AgentId, CapabilityDescriptor, DependencySpec, HealthRecord};
use mesh_resolve::{DependencyResolver, DiscoveryMode, SnapshotSink, discover};
use mesh_trace::{HeaderAllowlist, TraceContext};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

pub use config::{
    CALL_ATTEMPTS_ENV, CALL_TIMEOUT_ENV, FALLBACK_MODE_ENV, FORWARD_HEADERS_ENV,
    HEARTBEAT_INTERVAL_ENV, KernelConfig, MAX_CONCURRENCY_ENV, REGISTRY_URL_ENV,
};
pub use dispatch::{CallContext, CapabilityHandler, HandlerError, HandlerResult, LocalDispatcher};
pub use health::{HealthConfigError, HealthEvent, HealthThresholds, HealthTracker};
pub use http_registry::{HttpMeshRegistry, HttpRegistryConfig};
pub use monitor::{HealthMonitor, HeartbeatConfig};
pub use port_bridge::PortBridge;
pub use proxy::{CallBudget, HttpCapabilityProxy, KernelProxyFactory, LocalCapabilityProxy};
pub use registry::{MeshRegistry, RegistryError, RegistryResult};
pub use scheduler::{SchedulerError, SchedulerResult, TaskScheduler};
pub use wire::{
    EndpointUpdateRequest, ErrorResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest,
    RegisterResponse, TopologyUpdate,
};

/// Errors raised while assembling or driving a kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Invalid descriptors or dependency declarations.
    #[error(transparent)]
    Descriptor(#[from] mesh_primitives::Error),
    /// Registry or configuration failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Handler binding failure.
    #[error(transparent)]
    Dispatch(#[from] HandlerError),
}

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Builder collecting everything a kernel needs before it can join a mesh.
pub struct MeshKernelBuilder {
    agent: AgentDescriptor,
    config: KernelConfig,
    registry: Option<Arc<dyn MeshRegistry>>,
    capabilities: Vec<CapabilityDescriptor>,
    handlers: Vec<(String, Arc<dyn CapabilityHandler>)>,
}

impl fmt::Debug for MeshKernelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshKernelBuilder")
            .field("agent_id", &self.agent.agent_id())
            .field("capabilities", &self.capabilities.len())
            .finish_non_exhaustive()
    }
}

impl MeshKernelBuilder {
    /// Supplies a registry backend, replacing the default HTTP client.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn MeshRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Declares a capability together with its handler.
    #[must_use]
    pub fn capability(
        mut self,
        descriptor: CapabilityDescriptor,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Self {
        self.handlers
            .push((descriptor.capability().to_owned(), handler));
        self.capabilities.push(descriptor);
        self
    }

    /// Assembles the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] when the configuration is invalid, the
    /// capability declarations fail validation, or a handler binding is
    /// rejected.
    pub fn build(self) -> KernelResult<MeshKernel> {
        self.config.validate()?;
        let agent_id = self.agent.agent_id();

        let factory = Arc::new(KernelProxyFactory::new(
            agent_id,
            self.config.call_budget(),
        ));
        let resolver = Arc::new(DependencyResolver::new(
            agent_id,
            self.capabilities.clone(),
            Arc::clone(&factory) as Arc<dyn mesh_resolve::ProxyFactory>,
        )?);
        let dispatcher = Arc::new(LocalDispatcher::new(
            Arc::clone(&resolver),
            self.config.fallback(),
        ));
        for (capability, handler) in self.handlers {
            dispatcher.bind(capability, handler)?;
        }
        dispatcher.ensure_complete()?;
        factory.attach_dispatcher(Arc::clone(&dispatcher));

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(HttpMeshRegistry::new(HttpRegistryConfig::new(
                self.config.registry_url(),
            )?)),
        };

        let bridge = Arc::new(PortBridge::new(self.agent.endpoint().port()));
        let monitor = HealthMonitor::new(
            registry,
            self.agent,
            self.capabilities,
            Arc::clone(&resolver) as Arc<dyn SnapshotSink>,
            Arc::clone(&bridge),
            self.config.heartbeat(),
        );

        Ok(MeshKernel {
            agent_id,
            resolver,
            dispatcher,
            monitor: Mutex::new(monitor),
            bridge,
            scheduler: TaskScheduler::new(self.config.max_concurrency()),
            allowlist: HeaderAllowlist::new(self.config.forward_header_prefixes()),
        })
    }
}

/// Per-agent mesh runtime.
pub struct MeshKernel {
    agent_id: AgentId,
    resolver: Arc<DependencyResolver>,
    dispatcher: Arc<LocalDispatcher>,
    monitor: Mutex<HealthMonitor>,
    bridge: Arc<PortBridge>,
    scheduler: TaskScheduler,
    allowlist: HeaderAllowlist,
}

impl fmt::Debug for MeshKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshKernel")
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

impl MeshKernel {
    /// Starts building a kernel for the given agent and configuration.
    #[must_use]
    pub fn builder(agent: AgentDescriptor, config: KernelConfig) -> MeshKernelBuilder {
        MeshKernelBuilder {
            agent,
            config,
            registry: None,
            capabilities: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Returns the local agent identifier.
    #[must_use]
    pub const fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Returns the dependency resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    /// Returns the port bridge the transport listener reports into.
    #[must_use]
    pub fn port_bridge(&self) -> Arc<PortBridge> {
        Arc::clone(&self.bridge)
    }

    /// Returns the kernel's task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Returns the agent's current health self-report.
    ///
    /// # Panics
    ///
    /// Panics if the monitor mutex is poisoned.
    #[must_use]
    pub fn health(&self) -> HealthRecord {
        self.monitor.lock().expect("monitor poisoned").health()
    }

    /// Joins the mesh: registers and starts heartbeat maintenance.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Registry`] when the configuration is invalid
    /// or the scheduler is closed.
    ///
    /// # Panics
    ///
    /// Panics if the monitor mutex is poisoned.
    pub fn activate(&self) -> KernelResult<()> {
        info!(agent_id = %self.agent_id, "activating mesh kernel");
        self.monitor
            .lock()
            .expect("monitor poisoned")
            .start(&self.scheduler)?;
        Ok(())
    }

    /// Leaves the mesh: stops heartbeats and deregisters.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Registry`] when the deregistration task
    /// cannot be spawned.
    ///
    /// # Panics
    ///
    /// Panics if the monitor mutex is poisoned.
    pub fn shutdown(&self) -> KernelResult<()> {
        info!(agent_id = %self.agent_id, "shutting down mesh kernel");
        self.monitor
            .lock()
            .expect("monitor poisoned")
            .stop(&self.scheduler)?;
        // The deregistration task is already queued; closing only rejects
        // new submissions.
        self.scheduler.close();
        Ok(())
    }

    /// Handles an inbound capability call on the current task.
    ///
    /// Trace identifiers are extracted from the supplied headers (a fresh
    /// root is minted when none are present) and allow-listed headers are
    /// captured for forwarding on every outbound hop the handler makes.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] for malformed trace headers, unknown
    /// capabilities, or handler failures.
    pub async fn handle_call(
        &self,
        capability: &str,
        args: Value,
        headers: &[(String, String)],
    ) -> HandlerResult {
        dispatch_with_headers(&self.dispatcher, &self.allowlist, capability, args, headers).await
    }

    /// Enqueues an inbound capability call on the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler has been
    /// closed.
    pub fn schedule_call(
        &self,
        capability: String,
        args: Value,
        headers: Vec<(String, String)>,
    ) -> SchedulerResult<JoinHandle<HandlerResult>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let allowlist = self.allowlist.clone();
        self.scheduler.spawn(async move {
            dispatch_with_headers(&dispatcher, &allowlist, &capability, args, &headers).await
        })
    }

    /// Queries the current topology for capabilities matching the filters.
    #[must_use]
    pub fn discover(
        &self,
        filters: &[DependencySpec],
        mode: DiscoveryMode,
    ) -> Vec<CapabilityDescriptor> {
        let snapshot = self.resolver.snapshot();
        discover(&snapshot.routable_capabilities(), filters, mode)
    }
}

async fn dispatch_with_headers(
    dispatcher: &LocalDispatcher,
    allowlist: &HeaderAllowlist,
    capability: &str,
    args: Value,
    headers: &[(String, String)],
) -> HandlerResult {
    let pairs = || headers.iter().map(|(name, value)| (name.as_str(), value.as_str()));
    let trace = match TraceContext::from_headers(pairs()) {
        Ok(Some(trace)) => trace,
        Ok(None) => TraceContext::new_root(),
        Err(err) => return Err(HandlerError::failed(err.to_string())),
    };
    let forwarded = allowlist.capture(pairs());
    dispatcher.dispatch(capability, args, trace, forwarded).await
}
