//! Trace context values.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifiers correlating one call tree across agents.
///
/// Entry-point calls get a fresh root context; every outbound hop derives a
/// child carrying the same `trace_id`, a new `span_id`, and the caller's
/// span as `parent_span_id`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    trace_id: Uuid,
    span_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<Uuid>,
}

impl TraceContext {
    /// Creates a root context for an externally-initiated call.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
        }
    }

    /// Reconstructs a context from transported identifiers.
    #[must_use]
    pub const fn from_parts(trace_id: Uuid, span_id: Uuid, parent_span_id: Option<Uuid>) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
        }
    }

    /// Derives the context for one outbound hop: same trace, fresh span,
    /// this span as the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
        }
    }

    /// Returns the trace identifier shared by the whole call tree.
    #[must_use]
    pub const fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Returns the span identifier of this hop.
    #[must_use]
    pub const fn span_id(&self) -> Uuid {
        self.span_id
    }

    /// Returns the parent span, if this is not a root.
    #[must_use]
    pub const fn parent_span_id(&self) -> Option<Uuid> {
        self.parent_span_id
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent() {
        let root = TraceContext::new_root();
        assert!(root.parent_span_id().is_none());
    }

    #[test]
    fn child_links_lineage() {
        let root = TraceContext::new_root();
        let hop = root.child();
        assert_eq!(hop.trace_id(), root.trace_id());
        assert_eq!(hop.parent_span_id(), Some(root.span_id()));
        assert_ne!(hop.span_id(), root.span_id());
    }

    #[test]
    fn siblings_share_parent_but_not_span() {
        let root = TraceContext::new_root();
        let left = root.child();
        let right = root.child();
        assert_eq!(left.trace_id(), right.trace_id());
        assert_eq!(left.parent_span_id(), right.parent_span_id());
        assert_ne!(left.span_id(), right.span_id());
    }
}
