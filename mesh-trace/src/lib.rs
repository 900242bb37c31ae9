//! Trace propagation for inter-agent calls.
//!
//! A trace context is a per-call value: it is copied into every hop, never
//! shared mutably, so concurrent fan-out calls cannot corrupt each other's
//! span lineage. Alongside the trace headers, a configurable allowlist
//! selects which inbound request headers are forwarded verbatim on outbound
//! calls.

#![warn(missing_docs, clippy::pedantic)]

mod context;
mod headers;

/// Per-call trace identifiers.
pub use context::TraceContext;
/// Trace header names, injection/extraction, and the forwarding allowlist.
pub use headers::{
    ForwardedHeaders, HeaderAllowlist, TraceError, PARENT_SPAN_ID_HEADER, SPAN_ID_HEADER,
    TRACE_ID_HEADER,
};
