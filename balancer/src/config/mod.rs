mod types;

pub use types::{
    ClusterConfig, FallbackPolicy, LbPolicy, LbSubsetConfig, SubsetSelectorConfig,
};
