//! Capability mesh runtime SDK facade.
//!
//! Depend on this crate via `cargo add capmesh`. It bundles the internal
//! runtime crates behind feature flags so agents can pull in only the
//! layers they need: descriptors alone, the resolver, or the full kernel.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared descriptor primitives for convenience.
pub use mesh_primitives as primitives;

/// Trace propagation and header forwarding (enabled by `trace` feature).
#[cfg(feature = "trace")]
pub use mesh_trace as trace;

/// Capability matching and dependency resolution (enabled by `resolve`
/// feature).
#[cfg(feature = "resolve")]
pub use mesh_resolve as resolve;

/// Lifecycle kernel: registration, heartbeats, and dispatch (enabled by
/// `kernel` feature).
#[cfg(feature = "kernel")]
pub use mesh_kernel as kernel;
