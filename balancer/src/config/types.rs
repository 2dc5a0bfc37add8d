use crate::error::BalancerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative cluster configuration.
///
/// A pure serde struct describing *what* a cluster should look like; the
/// live counterpart holding runtime state is `upstream::Cluster`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,

    /// Selection discipline applied after the priority/zone decision.
    #[serde(default)]
    pub lb_policy: LbPolicy,

    /// Subset load balancing policy. Only the configuration shape lives
    /// here; subset matching itself is performed by selectors outside
    /// this crate.
    #[serde(default)]
    pub subset: LbSubsetConfig,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lb_policy: LbPolicy::default(),
            subset: LbSubsetConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), BalancerError> {
        if self.name.is_empty() {
            return Err(BalancerError::Config("empty cluster name".to_string()));
        }
        for selector in &self.subset.subset_selectors {
            if selector.keys.iter().any(|k| k.is_empty()) {
                return Err(BalancerError::Config(format!(
                    "cluster {}: subset selector contains an empty key",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LbPolicy {
    #[default]
    RoundRobin,
    LeastRequest,
    Random,
}

/// Subset load balancing configuration shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LbSubsetConfig {
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,

    /// Metadata record used when `fallback_policy` is `DefaultSubset`.
    #[serde(default)]
    pub default_subset: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub subset_selectors: Vec<SubsetSelectorConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsetSelectorConfig {
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    NoFallback,
    AnyEndpoint,
    DefaultSubset,
}
