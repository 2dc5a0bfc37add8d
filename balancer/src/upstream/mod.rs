pub mod cluster;
pub mod host;
pub mod loadbalance;
pub mod subset;

pub use cluster::{Cluster, ClusterStore};
pub use host::{
    ActiveRequestGuard, CallbackHandle, Host, HostRef, HostSet, HostSetSnapshot, PrioritySet,
};
pub use loadbalance::least_request::LeastRequestLoadBalancer;
pub use loadbalance::random::RandomLoadBalancer;
pub use loadbalance::round_robin::RoundRobinLoadBalancer;
pub use loadbalance::{LbContext, LoadBalancer};
pub use subset::SubsetInfo;
