//! Tag expressions used to qualify dependency declarations.
//!
//! A tag expression is an ordered list of groups. A plain tag is a hard
//! requirement; a tag carrying the leading `+` marker is preferred but not
//! required and only influences ranking. A nested alternative group lists
//! tag conjunctions tried in declared order, where the first satisfiable
//! alternative wins outright (fallback, not union).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PREFERENCE_MARKER: char = '+';
const MAX_TAG_LEN: usize = 64;

/// A single tag, optionally carrying the preference marker.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag {
    name: String,
    preferred: bool,
}

impl Tag {
    /// Parses a tag from its textual form, honouring a leading `+`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTag`] when the name is empty, too long, or
    /// contains unsupported characters.
    pub fn parse(text: &str) -> Result<Self> {
        let (name, preferred) = match text.strip_prefix(PREFERENCE_MARKER) {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        validate_tag_name(text, name)?;
        Ok(Self {
            name: name.to_owned(),
            preferred,
        })
    }

    /// Returns the tag name without the preference marker.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when this tag is preferred rather than required.
    #[must_use]
    pub const fn is_preferred(&self) -> bool {
        self.preferred
    }
}

fn validate_tag_name(raw: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidTag {
            tag: raw.to_owned(),
            reason: "tag name cannot be empty".into(),
        });
    }
    if name.len() > MAX_TAG_LEN {
        return Err(Error::InvalidTag {
            tag: raw.to_owned(),
            reason: format!("tag name length must be <= {MAX_TAG_LEN}"),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(Error::InvalidTag {
            tag: raw.to_owned(),
            reason: "tag name must contain alphanumeric, dash, underscore, dot, or colon".into(),
        });
    }
    Ok(())
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.preferred {
            write!(f, "{PREFERENCE_MARKER}{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> Self {
        value.to_string()
    }
}

/// One element of a tag expression.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagGroup {
    /// A single tag; required unless it carries the preference marker.
    Required(Tag),
    /// Alternatives tried in declared order. Each alternative is a
    /// conjunction of tags; the first satisfiable one becomes the active
    /// requirement for this group.
    AnyOf(Vec<Vec<Tag>>),
}

/// Ordered list of tag groups qualifying a dependency.
///
/// The empty expression matches on capability name alone.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagExpr(Vec<TagGroup>);

impl TagExpr {
    /// Creates an empty expression.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a single-tag group, consuming and returning the expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTag`] when the tag text fails validation.
    pub fn tag(mut self, text: &str) -> Result<Self> {
        self.0.push(TagGroup::Required(Tag::parse(text)?));
        Ok(self)
    }

    /// Appends an alternative group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDependency`] when no alternatives are given
    /// or an alternative is empty, and [`Error::InvalidTag`] when any tag
    /// fails validation.
    pub fn any_of<I, A, S>(mut self, alternatives: I) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for alternative in alternatives {
            let tags: Vec<Tag> = alternative
                .into_iter()
                .map(|text| Tag::parse(text.as_ref()))
                .collect::<Result<_>>()?;
            if tags.is_empty() {
                return Err(Error::InvalidDependency {
                    reason: "alternative in a tag group cannot be empty".into(),
                });
            }
            parsed.push(tags);
        }
        if parsed.is_empty() {
            return Err(Error::InvalidDependency {
                reason: "alternative tag group must list at least one alternative".into(),
            });
        }
        self.0.push(TagGroup::AnyOf(parsed));
        Ok(self)
    }

    /// Returns the groups in declaration order.
    #[must_use]
    pub fn groups(&self) -> &[TagGroup] {
        &self.0
    }

    /// Returns `true` when the expression carries no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_preference_marker() {
        let tag = Tag::parse("+typescript").expect("tag");
        assert_eq!(tag.name(), "typescript");
        assert!(tag.is_preferred());
        assert_eq!(tag.to_string(), "+typescript");
    }

    #[test]
    fn plain_tag_round_trip() {
        let tag: Tag = "addition".parse().expect("tag");
        assert!(!tag.is_preferred());
        assert_eq!(tag.to_string(), "addition");
    }

    #[test]
    fn rejects_bare_marker_and_bad_chars() {
        assert!(Tag::parse("+").is_err());
        assert!(Tag::parse("no spaces").is_err());
        assert!(Tag::parse("").is_err());
    }

    #[test]
    fn expression_builder() {
        let expr = TagExpr::new()
            .tag("addition")
            .and_then(|e| e.any_of([vec!["python"], vec!["+typescript"]]))
            .expect("expr");
        assert_eq!(expr.groups().len(), 2);
        assert!(matches!(expr.groups()[0], TagGroup::Required(_)));
        assert!(matches!(expr.groups()[1], TagGroup::AnyOf(_)));
    }

    #[test]
    fn empty_alternative_rejected() {
        let empty: Vec<Vec<&str>> = vec![vec![]];
        assert!(TagExpr::new().any_of(empty).is_err());
    }

    #[test]
    fn wire_form_preserves_structure() {
        let expr = TagExpr::new()
            .tag("addition")
            .and_then(|e| e.any_of([vec!["python"], vec!["+typescript"]]))
            .expect("expr");
        let json = serde_json::to_value(&expr).expect("encode");
        assert_eq!(
            json,
            serde_json::json!(["addition", [["python"], ["+typescript"]]])
        );
        let back: TagExpr = serde_json::from_value(json).expect("decode");
        assert_eq!(back, expr);
    }
}
