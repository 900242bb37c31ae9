//! Dependency resolution engine for the capmesh runtime.
//!
//! The matcher is a pure function from a dependency spec and a candidate
//! set to a ranked resolution. The resolver holds the last-applied topology
//! snapshot and keeps one positional slot array per local capability,
//! swapping entire arrays on every snapshot so readers never observe a torn
//! resolution pass.

#![warn(missing_docs, clippy::pedantic)]

mod matcher;
mod proxy;
mod resolver;
mod snapshot;

/// Pure capability matching and discovery modes.
pub use matcher::{discover, rank, resolve, DiscoveryMode, Resolution};
/// Callable proxies, dependency slots, and call outcome policy.
pub use proxy::{
    CallError, CallOutcome, CallResult, CapabilityProxy, DependencySlot, FallbackMode,
    ProxyFactory, ResolvedDependency,
};
/// The stateful per-agent resolver.
pub use resolver::{DependencyResolver, SnapshotSink};
/// Wholesale-replaced topology snapshots.
pub use snapshot::TopologySnapshot;
