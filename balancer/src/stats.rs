use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-cluster load balancing statistics.
///
/// Counters are plain atomics so tests and admin surfaces can read them
/// back directly; every increment is mirrored to the global `metrics`
/// recorder with a `cluster` label (no-op when no recorder is installed).
pub struct LbStats {
    cluster: Arc<str>,
    healthy_panic: AtomicU64,
    zone_cluster_too_small: AtomicU64,
    zone_number_differs: AtomicU64,
    zone_routing_all_directly: AtomicU64,
    zone_routing_sampled: AtomicU64,
    zone_routing_cross_zone: AtomicU64,
    zone_no_capacity_left: AtomicU64,
    local_cluster_not_ok: AtomicU64,
    /// Maximum host weight across the whole cluster, maintained by the
    /// membership side and read by the least-request balancer.
    max_host_weight: AtomicU64,
}

macro_rules! counter_pair {
    ($inc:ident, $get:ident, $field:ident, $metric:literal) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            metrics::counter!($metric, "cluster" => self.cluster.to_string()).increment(1);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl LbStats {
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: Arc::from(cluster),
            healthy_panic: AtomicU64::new(0),
            zone_cluster_too_small: AtomicU64::new(0),
            zone_number_differs: AtomicU64::new(0),
            zone_routing_all_directly: AtomicU64::new(0),
            zone_routing_sampled: AtomicU64::new(0),
            zone_routing_cross_zone: AtomicU64::new(0),
            zone_no_capacity_left: AtomicU64::new(0),
            local_cluster_not_ok: AtomicU64::new(0),
            max_host_weight: AtomicU64::new(0),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    counter_pair!(inc_healthy_panic, healthy_panic, healthy_panic, "lb_healthy_panic_total");
    counter_pair!(
        inc_zone_cluster_too_small,
        zone_cluster_too_small,
        zone_cluster_too_small,
        "lb_zone_cluster_too_small_total"
    );
    counter_pair!(
        inc_zone_number_differs,
        zone_number_differs,
        zone_number_differs,
        "lb_zone_number_differs_total"
    );
    counter_pair!(
        inc_zone_routing_all_directly,
        zone_routing_all_directly,
        zone_routing_all_directly,
        "lb_zone_routing_all_directly_total"
    );
    counter_pair!(
        inc_zone_routing_sampled,
        zone_routing_sampled,
        zone_routing_sampled,
        "lb_zone_routing_sampled_total"
    );
    counter_pair!(
        inc_zone_routing_cross_zone,
        zone_routing_cross_zone,
        zone_routing_cross_zone,
        "lb_zone_routing_cross_zone_total"
    );
    counter_pair!(
        inc_zone_no_capacity_left,
        zone_no_capacity_left,
        zone_no_capacity_left,
        "lb_zone_no_capacity_left_total"
    );
    counter_pair!(
        inc_local_cluster_not_ok,
        local_cluster_not_ok,
        local_cluster_not_ok,
        "lb_local_cluster_not_ok_total"
    );

    pub fn set_max_host_weight(&self, weight: u64) {
        self.max_host_weight.store(weight, Ordering::Relaxed);
        metrics::gauge!("lb_max_host_weight", "cluster" => self.cluster.to_string())
            .set(weight as f64);
    }

    pub fn max_host_weight(&self) -> u64 {
        self.max_host_weight.load(Ordering::Relaxed)
    }
}
