use crate::runtime::{self, RandomSource, RuntimeSettings};
use crate::stats::LbStats;
use crate::upstream::host::{CallbackHandle, HostRef, PrioritySet};
use crate::upstream::loadbalance::{LbContext, LoadBalancer, LoadBalancerBase};
use std::sync::{Arc, Mutex};

/// Weighted least-request selection.
///
/// With uniform weights this is power-of-two-choices over active request
/// counts: sample two hosts, keep the less loaded one. When any host
/// carries a weight above 1 (and the runtime does not disable weighting),
/// selection switches to a sticky mode that picks a random host and
/// returns it for `max_host_weight` consecutive selections. The sticky
/// approximation biases traffic by selection frequency without scanning
/// every host; it is acceptable for short requests only.
pub struct LeastRequestLoadBalancer {
    base: LoadBalancerBase,
    sticky: Arc<Mutex<StickyState>>,
    _reset_cb: CallbackHandle,
}

#[derive(Default)]
struct StickyState {
    last_host: Option<HostRef>,
    hits_left: u64,
}

impl LeastRequestLoadBalancer {
    pub fn new(
        priority_set: Arc<PrioritySet>,
        local_priority_set: Option<Arc<PrioritySet>>,
        stats: Arc<LbStats>,
        settings: Arc<dyn RuntimeSettings>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let sticky = Arc::new(Mutex::new(StickyState::default()));
        // Any membership change invalidates the sticky choice.
        let reset_cb = priority_set.add_member_update_cb({
            let sticky = Arc::clone(&sticky);
            move |_priority, _added, _removed| {
                let mut sticky = sticky.lock().unwrap();
                sticky.last_host = None;
                sticky.hits_left = 0;
            }
        });
        Self {
            base: LoadBalancerBase::new(priority_set, local_priority_set, stats, settings, random),
            sticky,
            _reset_cb: reset_cb,
        }
    }
}

impl LoadBalancer for LeastRequestLoadBalancer {
    fn choose_host(&self, _context: Option<&LbContext>) -> Option<HostRef> {
        let selection = self.base.hosts_to_use()?;
        let hosts = selection.hosts();
        if hosts.is_empty() {
            return None;
        }

        let max_host_weight = self.base.stats().max_host_weight();
        let weighted = max_host_weight > 1
            && self
                .base
                .settings()
                .integer(runtime::WEIGHT_ENABLED, runtime::DEFAULT_WEIGHT_ENABLED)
                != 0;

        if weighted {
            let mut sticky = self.sticky.lock().unwrap();
            if sticky.hits_left > 0 {
                if let Some(last) = sticky.last_host.clone() {
                    if hosts.iter().any(|h| Arc::ptr_eq(h, &last)) {
                        sticky.hits_left -= 1;
                        return Some(last);
                    }
                }
            }
            let index = (self.base.random().next() % hosts.len() as u64) as usize;
            let host = Arc::clone(&hosts[index]);
            sticky.last_host = Some(Arc::clone(&host));
            sticky.hits_left = max_host_weight - 1;
            return Some(host);
        }

        if hosts.len() == 1 {
            return Some(Arc::clone(&hosts[0]));
        }

        // Two independent draws; they may land on the same host.
        let len = hosts.len() as u64;
        let first = &hosts[(self.base.random().next() % len) as usize];
        let second = &hosts[(self.base.random().next() % len) as usize];
        if second.active_requests() < first.active_requests() {
            Some(Arc::clone(second))
        } else {
            // Ties go to the first sample.
            Some(Arc::clone(first))
        }
    }
}
