//! Dependency declarations.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tags::TagExpr;

/// Declares that a capability requires another capability, optionally
/// qualified by a tag expression.
///
/// The position of a spec inside its owner's dependency list is its
/// `dep_index`: the invariant contract between declaration and the injected
/// parameter slot. The index never shifts, even when an earlier dependency
/// fails to resolve.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    capability: String,
    #[serde(default, skip_serializing_if = "TagExpr::is_empty")]
    tags: TagExpr,
}

impl DependencySpec {
    /// Creates a spec requiring the named capability with no tag
    /// qualification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDependency`] when the capability name is
    /// empty.
    pub fn new(capability: impl Into<String>) -> Result<Self> {
        let capability = capability.into();
        if capability.trim().is_empty() {
            return Err(Error::InvalidDependency {
                reason: "capability name cannot be empty".into(),
            });
        }
        Ok(Self {
            capability,
            tags: TagExpr::new(),
        })
    }

    /// Replaces the tag expression.
    #[must_use]
    pub fn with_tags(mut self, tags: TagExpr) -> Self {
        self.tags = tags;
        self
    }

    /// Returns the required capability name.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Returns the qualifying tag expression.
    #[must_use]
    pub const fn tags(&self) -> &TagExpr {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_capability_rejected() {
        assert!(DependencySpec::new("").is_err());
        assert!(DependencySpec::new("  ").is_err());
    }

    #[test]
    fn wire_form_omits_empty_tags() {
        let spec = DependencySpec::new("student_lookup").expect("spec");
        let json = serde_json::to_value(&spec).expect("encode");
        assert_eq!(json, serde_json::json!({"capability": "student_lookup"}));
    }

    #[test]
    fn wire_form_keeps_tag_expression() {
        let spec = DependencySpec::new("math_operations")
            .expect("spec")
            .with_tags(
                TagExpr::new()
                    .tag("addition")
                    .and_then(|e| e.any_of([vec!["python"], vec!["+typescript"]]))
                    .expect("tags"),
            );
        let json = serde_json::to_value(&spec).expect("encode");
        let back: DependencySpec = serde_json::from_value(json).expect("decode");
        assert_eq!(back, spec);
    }
}
