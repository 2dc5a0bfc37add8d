//! Priority- and zone-aware upstream load balancing.
//!
//! The crate answers one question per request: given the current membership
//! and health of a logical upstream cluster, which host should serve it?
//! Membership discovery and active health checking live outside; they feed
//! host snapshots in through [`upstream::PrioritySet`] / [`upstream::Cluster`]
//! and the selectors read those snapshots without blocking.

pub mod config;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod stats;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{ClusterConfig, FallbackPolicy, LbPolicy, LbSubsetConfig, SubsetSelectorConfig};
pub use error::BalancerError;
pub use runtime::{RandomSource, RuntimeSettings, StaticRuntime, ThreadLocalRandom};
pub use stats::LbStats;
pub use upstream::{
    ActiveRequestGuard, CallbackHandle, Cluster, ClusterStore, Host, HostRef, HostSet,
    HostSetSnapshot, LbContext, LeastRequestLoadBalancer, LoadBalancer, PrioritySet,
    RandomLoadBalancer, RoundRobinLoadBalancer, SubsetInfo,
};
