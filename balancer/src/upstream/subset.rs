use crate::config::{FallbackPolicy, LbSubsetConfig};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Immutable view over a cluster's subset load balancing policy.
///
/// Built once from configuration and never mutated. Subset selectors with
/// an empty key set carry no information and are discarded; the feature is
/// considered enabled only when at least one selector survives. Host-group
/// indexing over the subsets happens outside this crate.
pub struct SubsetInfo {
    enabled: bool,
    fallback_policy: FallbackPolicy,
    default_subset: HashMap<String, Value>,
    subset_keys: Vec<BTreeSet<String>>,
}

impl SubsetInfo {
    pub fn new(config: &LbSubsetConfig) -> Self {
        let subset_keys: Vec<BTreeSet<String>> = config
            .subset_selectors
            .iter()
            .filter(|selector| !selector.keys.is_empty())
            .map(|selector| selector.keys.iter().cloned().collect())
            .collect();
        Self {
            enabled: !subset_keys.is_empty(),
            fallback_policy: config.fallback_policy,
            default_subset: config.default_subset.clone(),
            subset_keys,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.fallback_policy
    }

    pub fn default_subset(&self) -> &HashMap<String, Value> {
        &self.default_subset
    }

    pub fn subset_keys(&self) -> &[BTreeSet<String>] {
        &self.subset_keys
    }
}
