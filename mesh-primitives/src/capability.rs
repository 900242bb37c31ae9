//! Capability descriptors: the invocable units agents expose.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dependency::DependencySpec;
use crate::error::{Error, Result};
use crate::ids::AgentId;

const MAX_NAME_LEN: usize = 96;

/// Describes one invocable capability exposed by an agent.
///
/// Created at declaration time and immutable thereafter. Many agents may
/// expose capabilities sharing the same name; tags and versions
/// disambiguate at resolution time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    capability: String,
    agent_id: AgentId,
    function_name: String,
    version: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<DependencySpec>,
}

impl CapabilityDescriptor {
    /// Starts building a descriptor for the named capability.
    #[must_use]
    pub fn builder(capability: impl Into<String>, agent_id: AgentId) -> CapabilityDescriptorBuilder {
        CapabilityDescriptorBuilder {
            capability: capability.into(),
            agent_id,
            function_name: None,
            version: None,
            tags: BTreeSet::new(),
            dependencies: Vec::new(),
        }
    }

    /// Returns the capability name.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Returns the owning agent.
    #[must_use]
    pub const fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Returns the name of the function backing this capability.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Returns the semantic version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the declared tag set.
    #[must_use]
    pub const fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns `true` when the descriptor carries the named tag.
    #[must_use]
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains(name)
    }

    /// Returns the declared dependencies in `dep_index` order.
    #[must_use]
    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }
}

/// Builder for [`CapabilityDescriptor`].
#[derive(Debug)]
pub struct CapabilityDescriptorBuilder {
    capability: String,
    agent_id: AgentId,
    function_name: Option<String>,
    version: Option<String>,
    tags: BTreeSet<String>,
    dependencies: Vec<DependencySpec>,
}

impl CapabilityDescriptorBuilder {
    /// Sets the backing function name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when the name is empty.
    pub fn function_name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "function name cannot be empty".into(),
            });
        }
        self.function_name = Some(name);
        Ok(self)
    }

    /// Sets the version string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when the version is empty.
    pub fn version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "version cannot be empty".into(),
            });
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Adds a tag label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when the tag is empty.
    pub fn add_tag(mut self, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "tag cannot be empty".into(),
            });
        }
        self.tags.insert(tag);
        Ok(self)
    }

    /// Appends a dependency declaration; its `dep_index` is its position in
    /// insertion order.
    #[must_use]
    pub fn add_dependency(mut self, spec: DependencySpec) -> Self {
        self.dependencies.push(spec);
        self
    }

    /// Finalises the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when the capability name fails
    /// validation or mandatory fields are missing.
    pub fn build(self) -> Result<CapabilityDescriptor> {
        validate_capability_name(&self.capability)?;
        let function_name = self
            .function_name
            .ok_or_else(|| Error::InvalidCapability {
                reason: "function name must be provided".into(),
            })?;
        let version = self.version.ok_or_else(|| Error::InvalidCapability {
            reason: "version must be provided".into(),
        })?;

        Ok(CapabilityDescriptor {
            capability: self.capability,
            agent_id: self.agent_id,
            function_name,
            version,
            tags: self.tags,
            dependencies: self.dependencies,
        })
    }
}

fn validate_capability_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidCapability {
            reason: "capability name cannot be empty".into(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidCapability {
            reason: format!("capability name length must be <= {MAX_NAME_LEN}"),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::InvalidCapability {
            reason: "capability name must contain alphanumeric, dash, underscore, or dot".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_descriptor() {
        let descriptor = CapabilityDescriptor::builder("math_operations", AgentId::random())
            .function_name("add")
            .and_then(|b| b.version("1.2.0"))
            .and_then(|b| b.add_tag("math"))
            .and_then(|b| b.add_tag("addition"))
            .map(|b| b.add_dependency(DependencySpec::new("logger").expect("spec")))
            .and_then(CapabilityDescriptorBuilder::build)
            .expect("descriptor");

        assert_eq!(descriptor.capability(), "math_operations");
        assert!(descriptor.has_tag("addition"));
        assert_eq!(descriptor.dependencies().len(), 1);
    }

    #[test]
    fn empty_capability_name_rejected() {
        let err = CapabilityDescriptor::builder("", AgentId::random())
            .function_name("f")
            .and_then(|b| b.version("1.0"))
            .and_then(CapabilityDescriptorBuilder::build)
            .expect_err("should fail");
        assert!(matches!(err, Error::InvalidCapability { .. }));
    }

    #[test]
    fn function_name_required() {
        let result = CapabilityDescriptor::builder("cap", AgentId::random())
            .version("1.0")
            .and_then(CapabilityDescriptorBuilder::build);
        assert!(result.is_err());
    }
}
