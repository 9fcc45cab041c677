//! Shared reference and selector types.
//!
//! These mirror the Kubernetes `ObjectReference` and `LabelSelector` shapes,
//! trimmed to the fields the cluster lifecycle kinds use.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another Kubernetes object (infrastructure, bootstrap, node).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Equality-based label selector.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels an object must carry to match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Returns true when every selector label is present with the same value.
    ///
    /// An empty selector matches nothing, the same way the workload
    /// controllers treat an empty `matchLabels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.match_labels.is_empty()
            && self
                .match_labels
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    /// Renders the selector in `key=value,key=value` form for status fields.
    pub fn to_selector_string(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Labels and annotations stamped onto objects created from a template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    /// Labels for created objects
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations for created objects
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_selector_matches_subset() {
        let selector = LabelSelector {
            match_labels: labels(&[("pool", "workers")]),
        };
        assert!(selector.matches(&labels(&[("pool", "workers"), ("zone", "a")])));
        assert!(!selector.matches(&labels(&[("pool", "masters")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        let selector = LabelSelector::default();
        assert!(!selector.matches(&labels(&[("pool", "workers")])));
    }

    #[test]
    fn test_selector_string_is_sorted() {
        let selector = LabelSelector {
            match_labels: labels(&[("zone", "a"), ("pool", "workers")]),
        };
        assert_eq!(selector.to_selector_string(), "pool=workers,zone=a");
    }
}
