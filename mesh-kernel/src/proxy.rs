//! Proxy construction for resolved dependencies.
//!
//! The factory hands the resolver an HTTP-backed proxy for remote owners
//! and a dispatcher-backed proxy when the owner is the local agent, so a
//! self-dependency never leaves the process yet still flows through the
//! same injection path as a remote call.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use hyper::Uri;
use mesh_primitives::{AgentId, CapabilityDescriptor, Endpoint};
use mesh_resolve::{CallError, CallResult, CapabilityProxy, ProxyFactory};
use mesh_trace::{ForwardedHeaders, TraceContext};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::LocalDispatcher;
use crate::http_client::{self, HyperClient, SendError};
use crate::wire::ErrorResponse;

/// Call budget applied to every outbound dependency invocation.
#[derive(Clone, Copy, Debug)]
pub struct CallBudget {
    timeout: Duration,
    attempts: u32,
}

impl CallBudget {
    /// Creates a budget with a per-attempt timeout and a transport retry
    /// count. Zero attempts are clamped to one.
    #[must_use]
    pub const fn new(timeout: Duration, attempts: u32) -> Self {
        Self {
            timeout,
            attempts: if attempts == 0 { 1 } else { attempts },
        }
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub const fn timeout(self) -> Duration {
        self.timeout
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub const fn attempts(self) -> u32 {
        self.attempts
    }
}

impl Default for CallBudget {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 2)
    }
}

/// Invokes a remote capability over HTTP.
pub struct HttpCapabilityProxy {
    client: HyperClient,
    url: String,
    capability: String,
    target: AgentId,
    budget: CallBudget,
}

impl fmt::Debug for HttpCapabilityProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCapabilityProxy")
            .field("url", &self.url)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl HttpCapabilityProxy {
    fn new(
        client: HyperClient,
        descriptor: &CapabilityDescriptor,
        endpoint: &Endpoint,
        budget: CallBudget,
    ) -> Self {
        Self {
            client,
            url: format!("{}/call/{}", endpoint.base_url(), descriptor.capability()),
            capability: descriptor.capability().to_owned(),
            target: descriptor.agent_id(),
            budget,
        }
    }

    async fn attempt(
        &self,
        uri: Uri,
        headers: &[(&str, String)],
        body: &[u8],
    ) -> CallResult<Value> {
        let (status, bytes) =
            http_client::post_json(&self.client, uri, headers, body.to_vec(), self.budget.timeout())
                .await
                .map_err(|err| match err {
                    SendError::TimedOut => CallError::Timeout {
                        capability: self.capability.clone(),
                    },
                    SendError::Failed(reason) => CallError::Transport { reason },
                })?;

        if !status.is_success() {
            let reason = serde_json::from_slice::<ErrorResponse>(&bytes)
                .map_or_else(|_| String::from_utf8_lossy(&bytes).to_string(), |e| e.error);
            return Err(CallError::Remote {
                reason: format!("{status}: {reason}"),
            });
        }

        serde_json::from_slice(&bytes).map_err(|err| CallError::Remote {
            reason: format!("failed to decode response: {err}"),
        })
    }
}

#[async_trait]
impl CapabilityProxy for HttpCapabilityProxy {
    fn target(&self) -> AgentId {
        self.target
    }

    async fn invoke(
        &self,
        args: Value,
        trace: &TraceContext,
        forwarded: &ForwardedHeaders,
    ) -> CallResult<Value> {
        let uri: Uri = self.url.parse().map_err(|_| CallError::Transport {
            reason: format!("invalid target URL `{}`", self.url),
        })?;
        let body = serde_json::to_vec(&args).map_err(|err| CallError::Transport {
            reason: format!("failed to encode arguments: {err}"),
        })?;

        let mut headers: Vec<(&str, String)> = trace.to_headers();
        headers.extend(
            forwarded
                .iter()
                .map(|(name, value)| (name, value.to_owned())),
        );

        let mut last_transport = None;
        for attempt in 1..=self.budget.attempts() {
            match self.attempt(uri.clone(), &headers, &body).await {
                Ok(value) => return Ok(value),
                // Only transport failures are safe to retry blindly; the
                // remote may have executed a timed-out or rejected call.
                Err(CallError::Transport { reason }) => {
                    debug!(
                        capability = %self.capability,
                        attempt,
                        %reason,
                        "transport failure invoking dependency"
                    );
                    last_transport = Some(reason);
                }
                Err(err) => return Err(err),
            }
        }

        Err(CallError::Transport {
            reason: last_transport.unwrap_or_else(|| "no attempts made".to_owned()),
        })
    }
}

/// Routes a self-dependency through the local dispatcher.
pub struct LocalCapabilityProxy {
    dispatcher: Arc<LocalDispatcher>,
    capability: String,
    target: AgentId,
}

impl fmt::Debug for LocalCapabilityProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCapabilityProxy")
            .field("capability", &self.capability)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CapabilityProxy for LocalCapabilityProxy {
    fn target(&self) -> AgentId {
        self.target
    }

    async fn invoke(
        &self,
        args: Value,
        trace: &TraceContext,
        forwarded: &ForwardedHeaders,
    ) -> CallResult<Value> {
        self.dispatcher
            .dispatch(&self.capability, args, *trace, forwarded.clone())
            .await
            .map_err(|err| CallError::Remote {
                reason: err.to_string(),
            })
    }
}

/// The kernel's proxy factory.
///
/// The dispatcher is attached after construction because the resolver that
/// owns this factory is itself an input to the dispatcher.
pub struct KernelProxyFactory {
    local_agent: AgentId,
    client: HyperClient,
    budget: CallBudget,
    dispatcher: RwLock<Option<Arc<LocalDispatcher>>>,
}

impl fmt::Debug for KernelProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelProxyFactory")
            .field("local_agent", &self.local_agent)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl KernelProxyFactory {
    /// Creates a factory for the given local agent.
    #[must_use]
    pub fn new(local_agent: AgentId, budget: CallBudget) -> Self {
        Self {
            local_agent,
            client: http_client::build_client(),
            budget,
            dispatcher: RwLock::new(None),
        }
    }

    /// Attaches the dispatcher used for self-dependency routing.
    pub fn attach_dispatcher(&self, dispatcher: Arc<LocalDispatcher>) {
        let mut slot = match self.dispatcher.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(dispatcher);
    }

    fn local_dispatcher(&self) -> Option<Arc<LocalDispatcher>> {
        match self.dispatcher.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProxyFactory for KernelProxyFactory {
    fn proxy_for(
        &self,
        descriptor: &CapabilityDescriptor,
        endpoint: &Endpoint,
    ) -> Arc<dyn CapabilityProxy> {
        if descriptor.agent_id() == self.local_agent {
            if let Some(dispatcher) = self.local_dispatcher() {
                return Arc::new(LocalCapabilityProxy {
                    dispatcher,
                    capability: descriptor.capability().to_owned(),
                    target: self.local_agent,
                });
            }
        }

        Arc::new(HttpCapabilityProxy::new(
            self.client.clone(),
            descriptor,
            endpoint,
            self.budget,
        ))
    }
}
