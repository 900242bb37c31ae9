//! Pure capability matching.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use mesh_primitives::{AgentId, CapabilityDescriptor, DependencySpec, Tag, TagGroup};

/// One ranked match produced by the matcher.
#[derive(Clone, Debug)]
pub struct Resolution {
    descriptor: CapabilityDescriptor,
    matched_tags: BTreeSet<String>,
    preferred_hits: usize,
}

impl Resolution {
    /// Returns the matched capability descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    /// Returns the tags that participated in the match: the active hard
    /// requirements plus the preferred tags this descriptor carries.
    #[must_use]
    pub const fn matched_tags(&self) -> &BTreeSet<String> {
        &self.matched_tags
    }

    /// Returns how many preferred tags the descriptor satisfied.
    #[must_use]
    pub const fn preferred_hits(&self) -> usize {
        self.preferred_hits
    }
}

/// Ranks every candidate satisfying the spec, best first.
///
/// Groups of the tag expression are evaluated left to right. Plain tags are
/// hard requirements. Alternative groups try their alternatives in declared
/// order and commit to the first one whose required tags are satisfied by
/// at least one surviving candidate; alternatives are never merged.
/// Preferred tags never filter, they only raise a candidate's rank.
#[must_use]
pub fn rank(spec: &DependencySpec, candidates: &[&CapabilityDescriptor]) -> Vec<Resolution> {
    let mut survivors: Vec<&CapabilityDescriptor> = candidates
        .iter()
        .copied()
        .filter(|candidate| candidate.capability() == spec.capability())
        .collect();
    if survivors.is_empty() {
        return Vec::new();
    }

    let mut required: Vec<String> = Vec::new();
    let mut scoring: Vec<String> = Vec::new();

    for group in spec.tags().groups() {
        match group {
            TagGroup::Required(tag) => {
                if tag.is_preferred() {
                    scoring.push(tag.name().to_owned());
                } else {
                    survivors.retain(|candidate| candidate.has_tag(tag.name()));
                    if survivors.is_empty() {
                        return Vec::new();
                    }
                    required.push(tag.name().to_owned());
                }
            }
            TagGroup::AnyOf(alternatives) => {
                let Some(active) = pick_alternative(&survivors, alternatives) else {
                    return Vec::new();
                };
                for tag in active {
                    if tag.is_preferred() {
                        scoring.push(tag.name().to_owned());
                    } else {
                        survivors.retain(|candidate| candidate.has_tag(tag.name()));
                        required.push(tag.name().to_owned());
                    }
                }
            }
        }
    }

    let mut ranked: Vec<Resolution> = survivors
        .into_iter()
        .map(|descriptor| {
            let preferred_hits = scoring
                .iter()
                .filter(|name| descriptor.has_tag(name))
                .count();
            let matched_tags = required
                .iter()
                .chain(scoring.iter().filter(|name| descriptor.has_tag(name)))
                .cloned()
                .collect();
            Resolution {
                descriptor: descriptor.clone(),
                matched_tags,
                preferred_hits,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.preferred_hits
            .cmp(&a.preferred_hits)
            .then_with(|| compare_versions(b.descriptor.version(), a.descriptor.version()))
            .then_with(|| {
                a.descriptor
                    .agent_id()
                    .to_string()
                    .cmp(&b.descriptor.agent_id().to_string())
            })
    });
    ranked
}

/// Resolves a spec to its single best candidate, or `None` when no
/// candidate survives.
#[must_use]
pub fn resolve(spec: &DependencySpec, candidates: &[&CapabilityDescriptor]) -> Option<Resolution> {
    rank(spec, candidates).into_iter().next()
}

/// Picks the first alternative whose non-preferred tags are satisfied by at
/// least one surviving candidate.
fn pick_alternative<'a>(
    survivors: &[&CapabilityDescriptor],
    alternatives: &'a [Vec<Tag>],
) -> Option<&'a [Tag]> {
    alternatives
        .iter()
        .find(|alternative| {
            survivors.iter().any(|candidate| {
                alternative
                    .iter()
                    .filter(|tag| !tag.is_preferred())
                    .all(|tag| candidate.has_tag(tag.name()))
            })
        })
        .map(Vec::as_slice)
}

/// Aggregation mode used by multi-filter consumers such as tool discovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiscoveryMode {
    /// Union of every filter's surviving candidates, deduplicated by
    /// capability and owning agent.
    All,
    /// Exactly the top-ranked candidate per filter.
    BestMatch,
    /// Every known descriptor; filters are ignored.
    Wildcard,
}

/// Runs the matcher once per filter and aggregates per the mode.
#[must_use]
pub fn discover(
    candidates: &[&CapabilityDescriptor],
    filters: &[DependencySpec],
    mode: DiscoveryMode,
) -> Vec<CapabilityDescriptor> {
    let mut seen: HashSet<(String, AgentId)> = HashSet::new();
    let mut out = Vec::new();
    let mut push = |descriptor: &CapabilityDescriptor| {
        let key = (descriptor.capability().to_owned(), descriptor.agent_id());
        if seen.insert(key) {
            out.push(descriptor.clone());
        }
    };

    match mode {
        DiscoveryMode::Wildcard => {
            for descriptor in candidates {
                push(descriptor);
            }
        }
        DiscoveryMode::All => {
            for filter in filters {
                for resolution in rank(filter, candidates) {
                    push(&resolution.descriptor);
                }
            }
        }
        DiscoveryMode::BestMatch => {
            for filter in filters {
                if let Some(resolution) = resolve(filter, candidates) {
                    push(&resolution.descriptor);
                }
            }
        }
    }
    out
}

/// Compares dotted version strings segment-wise; numeric segments compare
/// numerically, anything else lexically, missing segments count as zero.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    for index in 0..left.len().max(right.len()) {
        let l = left.get(index).copied().unwrap_or("0");
        let r = right.get(index).copied().unwrap_or("0");
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
