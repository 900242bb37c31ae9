//! Callable proxies and the dependency slot model.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_primitives::{AgentId, CapabilityDescriptor, Endpoint};
use mesh_trace::{ForwardedHeaders, TraceContext};
use serde_json::Value;
use thiserror::Error;

/// Result alias for proxy invocations.
pub type CallResult<T> = Result<T, CallError>;

/// Errors surfaced by dependency invocation.
#[derive(Debug, Error)]
pub enum CallError {
    /// The dependency is currently unresolved; raised in strict mode only.
    #[error("dependency `{capability}` is unresolved")]
    Unresolved {
        /// Capability that has no provider.
        capability: String,
    },
    /// The call exceeded its timeout budget.
    #[error("call to `{capability}` timed out")]
    Timeout {
        /// Capability that was being invoked.
        capability: String,
    },
    /// Transport-level failure reaching the target.
    #[error("transport failure: {reason}")]
    Transport {
        /// Human-readable failure context.
        reason: String,
    },
    /// The target returned a structured error.
    #[error("remote error: {reason}")]
    Remote {
        /// Error detail reported by the target.
        reason: String,
    },
    /// No dependency is declared at the requested index.
    #[error("no dependency declared at index {dep_index}")]
    NoSuchIndex {
        /// The out-of-range index.
        dep_index: usize,
    },
}

/// A callable standing in for a resolved remote (or self) capability.
///
/// Implementations transport the supplied hop context verbatim; span
/// derivation for the hop happens before `invoke` is reached.
#[async_trait]
pub trait CapabilityProxy: Send + Sync {
    /// Returns the agent this proxy targets.
    fn target(&self) -> AgentId;

    /// Invokes the target capability with JSON arguments.
    async fn invoke(
        &self,
        args: Value,
        trace: &TraceContext,
        forwarded: &ForwardedHeaders,
    ) -> CallResult<Value>;
}

/// Builds proxies for matched descriptors.
///
/// The kernel supplies a factory that returns an HTTP-backed proxy for
/// remote owners and a local-dispatch proxy when the owner is the local
/// agent, so self-dependencies route through the wrapped entry point.
pub trait ProxyFactory: Send + Sync {
    /// Creates a proxy for the given descriptor reachable at `endpoint`.
    fn proxy_for(
        &self,
        descriptor: &CapabilityDescriptor,
        endpoint: &Endpoint,
    ) -> Arc<dyn CapabilityProxy>;
}

/// Policy applied when an absent or failing dependency is invoked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FallbackMode {
    /// Invoking an absent dependency raises [`CallError::Unresolved`] and
    /// call failures propagate.
    #[default]
    Strict,
    /// Absent dependencies and call failures degrade to
    /// [`CallOutcome::Unavailable`].
    Graceful,
}

/// Caller-visible result of invoking a dependency slot.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    /// The dependency produced a value.
    Value(Value),
    /// The dependency was absent or failed, and graceful fallback applied.
    Unavailable {
        /// Capability that was unavailable.
        capability: String,
    },
}

/// One successful resolution of a dependency spec.
///
/// Lifetime bounded by the snapshot that produced it; a later resolution
/// pass supersedes the whole value rather than mutating it.
pub struct ResolvedDependency {
    dep_index: usize,
    capability: String,
    target_agent_id: AgentId,
    target_endpoint: Endpoint,
    matched_tags: BTreeSet<String>,
    proxy: Arc<dyn CapabilityProxy>,
    resolved_at: DateTime<Utc>,
}

impl fmt::Debug for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDependency")
            .field("dep_index", &self.dep_index)
            .field("target_agent_id", &self.target_agent_id)
            .field("target_endpoint", &self.target_endpoint)
            .field("matched_tags", &self.matched_tags)
            .field("resolved_at", &self.resolved_at)
            .finish_non_exhaustive()
    }
}

impl ResolvedDependency {
    /// Creates a resolution record stamped with the current time.
    #[must_use]
    pub fn new(
        dep_index: usize,
        capability: impl Into<String>,
        target_agent_id: AgentId,
        target_endpoint: Endpoint,
        matched_tags: BTreeSet<String>,
        proxy: Arc<dyn CapabilityProxy>,
    ) -> Self {
        Self {
            dep_index,
            capability: capability.into(),
            target_agent_id,
            target_endpoint,
            matched_tags,
            proxy,
            resolved_at: Utc::now(),
        }
    }

    /// Returns the positional index of the dependency this resolves.
    #[must_use]
    pub const fn dep_index(&self) -> usize {
        self.dep_index
    }

    /// Returns the required capability name this resolution satisfies.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Returns the agent providing the capability.
    #[must_use]
    pub const fn target_agent_id(&self) -> AgentId {
        self.target_agent_id
    }

    /// Returns the endpoint the provider is reachable at.
    #[must_use]
    pub const fn target_endpoint(&self) -> &Endpoint {
        &self.target_endpoint
    }

    /// Returns the tags that participated in the match.
    #[must_use]
    pub const fn matched_tags(&self) -> &BTreeSet<String> {
        &self.matched_tags
    }

    /// Returns when this resolution was produced.
    #[must_use]
    pub const fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Returns the callable proxy.
    #[must_use]
    pub fn proxy(&self) -> &Arc<dyn CapabilityProxy> {
        &self.proxy
    }
}

/// The injected value at one `dep_index`.
///
/// Every index yields a slot on every resolution pass; `Absent` is a real
/// value, never an omission, so parameter positions cannot shift.
#[derive(Clone)]
pub enum DependencySlot {
    /// The dependency resolved to a callable target.
    Resolved(Arc<ResolvedDependency>),
    /// No candidate survived the matcher for this index.
    Absent {
        /// Capability that failed to resolve.
        capability: String,
    },
}

impl fmt::Debug for DependencySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(resolved) => f.debug_tuple("Resolved").field(resolved).finish(),
            Self::Absent { capability } => f
                .debug_struct("Absent")
                .field("capability", capability)
                .finish(),
        }
    }
}

impl DependencySlot {
    /// Returns `true` when the slot holds a resolved target.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Returns the required capability name.
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::Resolved(resolved) => resolved.capability(),
            Self::Absent { capability } => capability,
        }
    }

    /// Invokes the dependency, deriving a fresh child span for the hop.
    ///
    /// # Errors
    ///
    /// In [`FallbackMode::Strict`], absent slots raise
    /// [`CallError::Unresolved`] and call failures propagate. In
    /// [`FallbackMode::Graceful`], both degrade to
    /// [`CallOutcome::Unavailable`].
    pub async fn call(
        &self,
        args: Value,
        trace: &TraceContext,
        forwarded: &ForwardedHeaders,
        mode: FallbackMode,
    ) -> CallResult<CallOutcome> {
        match self {
            Self::Absent { capability } => match mode {
                FallbackMode::Graceful => Ok(CallOutcome::Unavailable {
                    capability: capability.clone(),
                }),
                FallbackMode::Strict => Err(CallError::Unresolved {
                    capability: capability.clone(),
                }),
            },
            Self::Resolved(resolved) => {
                let hop = trace.child();
                match resolved.proxy.invoke(args, &hop, forwarded).await {
                    Ok(value) => Ok(CallOutcome::Value(value)),
                    Err(err) => match mode {
                        FallbackMode::Graceful => {
                            tracing::debug!(
                                capability = resolved.capability(),
                                error = %err,
                                "dependency call degraded to unavailable"
                            );
                            Ok(CallOutcome::Unavailable {
                                capability: resolved.capability().to_owned(),
                            })
                        }
                        FallbackMode::Strict => Err(err),
                    },
                }
            }
        }
    }
}
