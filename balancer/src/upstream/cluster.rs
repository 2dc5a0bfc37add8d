use crate::config::{ClusterConfig, LbPolicy};
use crate::error::BalancerError;
use crate::runtime::{RandomSource, RuntimeSettings};
use crate::stats::LbStats;
use crate::upstream::host::{ActiveRequestGuard, HostRef, HostSetSnapshot, PrioritySet};
use crate::upstream::loadbalance::least_request::LeastRequestLoadBalancer;
use crate::upstream::loadbalance::random::RandomLoadBalancer;
use crate::upstream::loadbalance::round_robin::RoundRobinLoadBalancer;
use crate::upstream::loadbalance::{LbContext, LoadBalancer};
use crate::upstream::subset::SubsetInfo;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Runtime representation of an upstream cluster.
///
/// The "live" counterpart of [`ClusterConfig`]: it owns the priority set,
/// the per-cluster stats, and the configured selector. Membership updates
/// from the discovery side come in through [`Cluster::update_hosts`];
/// request handling goes out through [`Cluster::select_host`].
#[derive(Clone)]
pub struct Cluster {
    config: Arc<ClusterConfig>,
    priority_set: Arc<PrioritySet>,
    stats: Arc<LbStats>,
    subset_info: Arc<SubsetInfo>,
    lb: Arc<dyn LoadBalancer>,
}

impl Cluster {
    /// Build a cluster from its declarative config.
    ///
    /// `local_priority_set` describes the caller's own fleet and enables
    /// zone aware routing when present; priority 0 is the only tier read
    /// from it.
    pub fn new(
        config: ClusterConfig,
        local_priority_set: Option<Arc<PrioritySet>>,
        settings: Arc<dyn RuntimeSettings>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, BalancerError> {
        config.validate()?;

        let priority_set = Arc::new(PrioritySet::new());
        let stats = Arc::new(LbStats::new(&config.name));
        let subset_info = Arc::new(SubsetInfo::new(&config.subset));

        let lb: Arc<dyn LoadBalancer> = match config.lb_policy {
            LbPolicy::RoundRobin => Arc::new(RoundRobinLoadBalancer::new(
                Arc::clone(&priority_set),
                local_priority_set,
                Arc::clone(&stats),
                settings,
                random,
            )),
            LbPolicy::LeastRequest => Arc::new(LeastRequestLoadBalancer::new(
                Arc::clone(&priority_set),
                local_priority_set,
                Arc::clone(&stats),
                settings,
                random,
            )),
            LbPolicy::Random => Arc::new(RandomLoadBalancer::new(
                Arc::clone(&priority_set),
                local_priority_set,
                Arc::clone(&stats),
                settings,
                random,
            )),
        };

        Ok(Self {
            config: Arc::new(config),
            priority_set,
            stats,
            subset_info,
            lb,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn stats(&self) -> &LbStats {
        &self.stats
    }

    pub fn priority_set(&self) -> &Arc<PrioritySet> {
        &self.priority_set
    }

    pub fn subset_info(&self) -> &SubsetInfo {
        &self.subset_info
    }

    /// Pick a host and account for the request until the guard drops.
    pub fn select_host(&self, context: Option<&LbContext>) -> Option<ActiveRequestGuard> {
        self.lb.choose_host(context).map(ActiveRequestGuard::new)
    }

    /// Publish a membership view for one priority tier.
    ///
    /// The healthy projections are derived from each host's health flag, so
    /// health transitions are applied by flipping the flag and republishing
    /// the same lists. Also refreshes the cluster-wide max-host-weight
    /// gauge read by the least-request selector.
    pub fn update_hosts(
        &self,
        priority: u32,
        hosts: Vec<HostRef>,
        hosts_per_locality: Vec<Vec<HostRef>>,
    ) {
        let tier = self.priority_set.host_set(priority);

        let previous = tier.snapshot();
        let old_addresses: HashSet<&str> =
            previous.hosts.iter().map(|h| h.address()).collect();
        let new_addresses: HashSet<&str> = hosts.iter().map(|h| h.address()).collect();
        let added: Vec<HostRef> = hosts
            .iter()
            .filter(|h| !old_addresses.contains(h.address()))
            .cloned()
            .collect();
        let removed: Vec<HostRef> = previous
            .hosts
            .iter()
            .filter(|h| !new_addresses.contains(h.address()))
            .cloned()
            .collect();

        debug!(
            cluster = self.name(),
            priority,
            hosts = hosts.len(),
            added = added.len(),
            removed = removed.len(),
            "membership update"
        );

        let snapshot = HostSetSnapshot::from_hosts(hosts, hosts_per_locality);
        tier.update_hosts(snapshot, &added, &removed);
        self.refresh_max_host_weight();
    }

    fn refresh_max_host_weight(&self) {
        let max = self
            .priority_set
            .host_sets()
            .iter()
            .flat_map(|set| set.snapshot().hosts.clone())
            .map(|host| host.weight() as u64)
            .max()
            .unwrap_or(0);
        self.stats.set_max_host_weight(max);
    }
}

/// Central registry of live clusters. Thread-safe, cheaply cloneable.
#[derive(Clone, Default)]
pub struct ClusterStore {
    clusters: Arc<DashMap<String, Cluster>>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Cluster> {
        self.clusters.get(name).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, cluster: Cluster) {
        self.clusters.insert(cluster.name().to_string(), cluster);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.clusters.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Iterate over all clusters. The callback receives (name, cluster).
    pub fn for_each(&self, mut f: impl FnMut(&str, &Cluster)) {
        for entry in self.clusters.iter() {
            f(entry.key(), entry.value());
        }
    }
}
