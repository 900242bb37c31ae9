//! Core descriptor model shared across the capmesh runtime.
//!
//! Everything in this crate is an immutable value type: agent and capability
//! descriptors, tag expressions, dependency specs, endpoints, and health
//! records. Mutation happens by replacement higher up the stack, never by
//! patching these types in place.

#![warn(missing_docs, clippy::pedantic)]

mod agent;
mod capability;
mod dependency;
mod endpoint;
mod error;
mod health;
mod ids;
mod tags;

/// Agent descriptors advertised to and mirrored from the registry.
pub use agent::{AgentDescriptor, AgentDescriptorBuilder};
/// Capability descriptors and their validating builder.
pub use capability::{CapabilityDescriptor, CapabilityDescriptorBuilder};
/// Typed, tag-qualified dependency declarations.
pub use dependency::DependencySpec;
/// Network endpoints agents are reachable at.
pub use endpoint::{Endpoint, Scheme};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Agent health states and per-agent health records.
pub use health::{HealthRecord, HealthState};
/// Unique identifier for agents within the mesh.
pub use ids::AgentId;
/// Tag expressions: hard requirements, ordered alternatives, preference markers.
pub use tags::{Tag, TagExpr, TagGroup};
