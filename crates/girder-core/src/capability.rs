//! Capability tags and subset matching.
//!
//! A capability is a string tag declaring what kind of work a worker can
//! perform or a task requires. Matching is subset-based: a worker may
//! claim a task only when the task's capability set is a subset of the
//! worker's advertised set. All matching goes through
//! [`CapabilitySet::is_satisfied_by`] so the rule exists in one place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single capability tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub const BUILD_CONTROL_V1: &'static str = "build_control_v1";
    pub const GIT_CHECKOUT_V1: &'static str = "git_checkout_v1";
    pub const EXECUTE_SHELL_V1: &'static str = "execute_shell_v1";
    pub const PUBLISH_ARTIFACTS_V1: &'static str = "publish_artifacts_v1";
    pub const COPY_ARTIFACTS_V1: &'static str = "copy_artifacts_v1";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Capability carried by execute-shell workers pinned to a node
    /// label, and required by steps that request that label.
    pub fn node_label(label: &str) -> Self {
        Self(format!("nodelabel_{label}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An unordered set of capability tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    /// True when every capability required by `self` is advertised by
    /// `worker`. The empty requirement is satisfied by any worker.
    pub fn is_satisfied_by(&self, worker: &CapabilitySet) -> bool {
        self.0.is_subset(&worker.0)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(Capability::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_requirement_matches() {
        let worker: CapabilitySet = ["execute_shell_v1", "nodelabel_linux"].into_iter().collect();
        let task: CapabilitySet = ["execute_shell_v1"].into_iter().collect();
        assert!(task.is_satisfied_by(&worker));
    }

    #[test]
    fn missing_node_label_does_not_match() {
        let worker: CapabilitySet = ["execute_shell_v1"].into_iter().collect();
        let task: CapabilitySet = ["execute_shell_v1", "nodelabel_gpu"].into_iter().collect();
        assert!(!task.is_satisfied_by(&worker));
    }

    #[test]
    fn empty_requirement_matches_any_worker() {
        let worker: CapabilitySet = ["git_checkout_v1"].into_iter().collect();
        assert!(CapabilitySet::new().is_satisfied_by(&worker));
    }

    #[test]
    fn node_label_constructor_prefixes() {
        assert_eq!(Capability::node_label("gpu").as_str(), "nodelabel_gpu");
    }
}
