//! Shared error definitions for the descriptor model.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the mesh runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing or validating descriptor values.
///
/// All of these are configuration errors: they surface at declaration or
/// registration time and are fatal to startup, never to a running mesh.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided agent identifier could not be parsed.
    #[error("invalid agent id: {source}")]
    InvalidAgentId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Capability descriptor failed validation.
    #[error("invalid capability: {reason}")]
    InvalidCapability {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Dependency spec failed validation.
    #[error("invalid dependency spec: {reason}")]
    InvalidDependency {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tag failed validation.
    #[error("invalid tag `{tag}`: {reason}")]
    InvalidTag {
        /// The offending tag text.
        tag: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Endpoint failed validation.
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
