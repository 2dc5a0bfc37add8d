use crate::runtime::{RandomSource, RuntimeSettings};
use crate::stats::LbStats;
use crate::upstream::host::{HostRef, PrioritySet};
use crate::upstream::loadbalance::{LbContext, LoadBalancer, LoadBalancerBase};
use std::sync::Arc;

/// Uniform random selection over the effective host list.
pub struct RandomLoadBalancer {
    base: LoadBalancerBase,
}

impl RandomLoadBalancer {
    pub fn new(
        priority_set: Arc<PrioritySet>,
        local_priority_set: Option<Arc<PrioritySet>>,
        stats: Arc<LbStats>,
        settings: Arc<dyn RuntimeSettings>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            base: LoadBalancerBase::new(priority_set, local_priority_set, stats, settings, random),
        }
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn choose_host(&self, _context: Option<&LbContext>) -> Option<HostRef> {
        let selection = self.base.hosts_to_use()?;
        let hosts = selection.hosts();
        if hosts.is_empty() {
            return None;
        }
        let index = (self.base.random().next() % hosts.len() as u64) as usize;
        Some(Arc::clone(&hosts[index]))
    }
}
