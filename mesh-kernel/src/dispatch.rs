//! Local capability dispatch.
//!
//! Handlers are bound to declared capability names and invoked through a
//! [`CallContext`] that carries the current dependency slots, the hop's
//! trace context, and the forwarded headers. The dispatcher is the single
//! entry point for both inbound HTTP calls and self-dependency proxies, so
//! a capability calling a capability on its own agent still flows through
//! dependency injection.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use mesh_resolve::{
    CallError, CallOutcome, DependencyResolver, DependencySlot, FallbackMode,
};
use mesh_trace::{ForwardedHeaders, TraceContext};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Result alias for handler execution.
pub type HandlerResult = Result<Value, HandlerError>;

/// Errors surfaced by dispatch and handler execution.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No local capability with this name is declared.
    #[error("unknown capability `{capability}`")]
    UnknownCapability {
        /// Name that failed to dispatch.
        capability: String,
    },
    /// The capability is declared but no handler was bound.
    #[error("no handler bound for capability `{capability}`")]
    Unbound {
        /// Capability missing its handler.
        capability: String,
    },
    /// A handler was already bound for this capability.
    #[error("handler already bound for capability `{capability}`")]
    DuplicateBinding {
        /// Capability with the conflicting binding.
        capability: String,
    },
    /// The handler ran and failed.
    #[error("handler failed: {reason}")]
    Failed {
        /// Failure context reported by the handler.
        reason: String,
    },
    /// A dependency call raised in strict mode.
    #[error(transparent)]
    Call(#[from] CallError),
}

impl HandlerError {
    /// Convenience helper to construct execution failures.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Per-call context handed to capability handlers.
///
/// Dependency slots are positional: the slot at index `i` corresponds to
/// the `i`-th declared dependency of the capability, resolved or not.
#[derive(Clone)]
pub struct CallContext {
    capability: String,
    slots: Arc<Vec<DependencySlot>>,
    trace: TraceContext,
    forwarded: ForwardedHeaders,
    fallback: FallbackMode,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("capability", &self.capability)
            .field("dependencies", &self.slots.len())
            .field("trace", &self.trace)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl CallContext {
    /// Returns the capability being executed.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Returns the trace context for this call.
    #[must_use]
    pub const fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Returns the headers captured from the inbound call.
    #[must_use]
    pub const fn forwarded(&self) -> &ForwardedHeaders {
        &self.forwarded
    }

    /// Returns the number of declared dependencies.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot at a declared dependency index.
    #[must_use]
    pub fn dependency(&self, dep_index: usize) -> Option<&DependencySlot> {
        self.slots.get(dep_index)
    }

    /// Invokes the dependency at `dep_index` under the kernel's fallback
    /// mode, deriving a fresh child span for the hop.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NoSuchIndex`] for an out-of-range index; absent
    /// slots and call failures follow the fallback mode.
    pub async fn call_dependency(
        &self,
        dep_index: usize,
        args: Value,
    ) -> Result<CallOutcome, CallError> {
        let Some(slot) = self.slots.get(dep_index) else {
            return Err(CallError::NoSuchIndex { dep_index });
        };
        slot.call(args, &self.trace, &self.forwarded, self.fallback)
            .await
    }
}

/// A bound capability implementation.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Executes the capability with JSON arguments.
    async fn handle(&self, args: Value, ctx: CallContext) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> CapabilityHandler for F
where
    F: Fn(Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, args: Value, ctx: CallContext) -> HandlerResult {
        (self)(args, ctx).await
    }
}

/// Routes inbound calls to bound handlers with dependencies injected.
pub struct LocalDispatcher {
    resolver: Arc<DependencyResolver>,
    fallback: FallbackMode,
    handlers: RwLock<HashMap<String, Arc<dyn CapabilityHandler>>>,
}

impl fmt::Debug for LocalDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDispatcher")
            .field("agent_id", &self.resolver.local_agent())
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl LocalDispatcher {
    /// Creates a dispatcher over the agent's resolver.
    #[must_use]
    pub fn new(resolver: Arc<DependencyResolver>, fallback: FallbackMode) -> Self {
        Self {
            resolver,
            fallback,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a handler to a declared capability.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownCapability`] when no declared
    /// capability carries this name and [`HandlerError::DuplicateBinding`]
    /// when the capability already has a handler.
    pub fn bind(
        &self,
        capability: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), HandlerError> {
        let capability = capability.into();
        if !self
            .resolver
            .local_capabilities()
            .iter()
            .any(|descriptor| descriptor.capability() == capability)
        {
            return Err(HandlerError::UnknownCapability { capability });
        }

        let mut handlers = self.lock_write();
        if handlers.contains_key(&capability) {
            return Err(HandlerError::DuplicateBinding { capability });
        }
        debug!(capability = %capability, "capability handler bound");
        handlers.insert(capability, handler);
        Ok(())
    }

    /// Verifies every declared capability has a handler.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Unbound`] naming the first capability with
    /// no handler.
    pub fn ensure_complete(&self) -> Result<(), HandlerError> {
        let handlers = self.lock_read();
        for descriptor in self.resolver.local_capabilities() {
            if !handlers.contains_key(descriptor.capability()) {
                return Err(HandlerError::Unbound {
                    capability: descriptor.capability().to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Executes a capability with the current dependency slots injected.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownCapability`] or
    /// [`HandlerError::Unbound`] when dispatch fails, or whatever the
    /// handler itself raises.
    pub async fn dispatch(
        &self,
        capability: &str,
        args: Value,
        trace: TraceContext,
        forwarded: ForwardedHeaders,
    ) -> HandlerResult {
        let Some(slots) = self.resolver.slots_for(capability) else {
            return Err(HandlerError::UnknownCapability {
                capability: capability.to_owned(),
            });
        };

        let handler = {
            let handlers = self.lock_read();
            handlers.get(capability).cloned()
        };
        let Some(handler) = handler else {
            return Err(HandlerError::Unbound {
                capability: capability.to_owned(),
            });
        };

        let ctx = CallContext {
            capability: capability.to_owned(),
            slots,
            trace,
            forwarded,
            fallback: self.fallback,
        };
        handler.handle(args, ctx).await
    }

    fn lock_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn CapabilityHandler>>> {
        match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn CapabilityHandler>>> {
        match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
