use crate::runtime::{RandomSource, RuntimeSettings};
use crate::stats::LbStats;
use crate::upstream::host::{HostRef, PrioritySet};
use crate::upstream::loadbalance::{LbContext, LoadBalancer, LoadBalancerBase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin selection over the effective host list.
///
/// The cursor survives panic transitions and membership changes on purpose:
/// it indexes whatever list the engine hands back, so a tier recovering
/// from panic continues the rotation instead of restarting it.
pub struct RoundRobinLoadBalancer {
    base: LoadBalancerBase,
    cursor: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new(
        priority_set: Arc<PrioritySet>,
        local_priority_set: Option<Arc<PrioritySet>>,
        stats: Arc<LbStats>,
        settings: Arc<dyn RuntimeSettings>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            base: LoadBalancerBase::new(priority_set, local_priority_set, stats, settings, random),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn choose_host(&self, _context: Option<&LbContext>) -> Option<HostRef> {
        let selection = self.base.hosts_to_use()?;
        let hosts = selection.hosts();
        if hosts.is_empty() {
            return None;
        }
        // Wrap-around on overflow is fine; only the modulus matters.
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % hosts.len();
        Some(Arc::clone(&hosts[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{self, StaticRuntime};
    use crate::test_util::{all_healthy, all_healthy_zoned, host, hosts, publish, SequenceRandom};
    use crate::upstream::host::HostSetSnapshot;
    use std::collections::HashSet;

    struct Setup {
        priority_set: Arc<PrioritySet>,
        local_priority_set: Arc<PrioritySet>,
        stats: Arc<LbStats>,
        settings: Arc<StaticRuntime>,
        random: Arc<SequenceRandom>,
    }

    impl Setup {
        fn new() -> Self {
            Self {
                priority_set: Arc::new(PrioritySet::new()),
                local_priority_set: Arc::new(PrioritySet::new()),
                stats: Arc::new(LbStats::new("test")),
                settings: Arc::new(StaticRuntime::new()),
                random: SequenceRandom::new(),
            }
        }

        fn lb(&self, with_local: bool) -> RoundRobinLoadBalancer {
            let local = if with_local {
                // Materialize priority 0 of the local set up front, the way
                // the membership side would.
                self.local_priority_set.host_set(0);
                Some(Arc::clone(&self.local_priority_set))
            } else {
                None
            };
            RoundRobinLoadBalancer::new(
                Arc::clone(&self.priority_set),
                local,
                Arc::clone(&self.stats),
                Arc::clone(&self.settings) as Arc<dyn RuntimeSettings>,
                Arc::clone(&self.random) as Arc<dyn RandomSource>,
            )
        }
    }

    #[test]
    fn no_host_sets_returns_none() {
        let setup = Setup::new();
        let lb = setup.lb(false);
        assert!(lb.choose_host(None).is_none());
    }

    #[test]
    fn empty_tier_returns_none() {
        let setup = Setup::new();
        publish(&setup.priority_set, 0, HostSetSnapshot::default());
        let lb = setup.lb(false);
        assert!(lb.choose_host(None).is_none());
        assert_eq!(setup.stats.healthy_panic(), 0);
    }

    #[test]
    fn single_host() {
        let setup = Setup::new();
        let h = host("127.0.0.1:80");
        publish(&setup.priority_set, 0, all_healthy(&[Arc::clone(&h)]));
        let lb = setup.lb(false);
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h));
    }

    #[test]
    fn cycles_over_healthy_hosts() {
        let setup = Setup::new();
        let list = hosts(&["127.0.0.1:80", "127.0.0.1:81", "127.0.0.1:82"]);
        publish(&setup.priority_set, 0, all_healthy(&list));
        let lb = setup.lb(false);

        // Any window of N consecutive picks visits each host exactly once.
        for _ in 0..3 {
            let window: HashSet<String> = (0..3)
                .map(|_| lb.choose_host(None).unwrap().address().to_string())
                .collect();
            assert_eq!(window.len(), 3);
        }
    }

    #[test]
    fn basic_failover_to_next_tier() {
        let setup = Setup::new();
        let h80 = host("127.0.0.1:80");
        let h82 = host("127.0.0.1:82");
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h80)],
                healthy_hosts: vec![],
                ..Default::default()
            },
        );
        publish(&setup.priority_set, 1, all_healthy(&[Arc::clone(&h82)]));

        let lb = setup.lb(false);
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h82));
    }

    #[test]
    fn priority_updates_move_the_effective_tier() {
        let setup = Setup::new();
        let h80 = host("127.0.0.1:80");
        let h81 = host("127.0.0.1:81");
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h80)],
                healthy_hosts: vec![],
                ..Default::default()
            },
        );
        publish(
            &setup.priority_set,
            1,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h81)],
                healthy_hosts: vec![],
                ..Default::default()
            },
        );
        let lb = setup.lb(false);

        // Both tiers fully unhealthy: tier 0 in panic serves its full list.
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h80));
        assert_eq!(setup.stats.healthy_panic(), 1);

        // A new healthy tier appears below: it becomes the effective tier.
        let h82 = host("127.0.0.1:82");
        publish(&setup.priority_set, 2, all_healthy(&[Arc::clone(&h82)]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h82));

        // Tier 0 turns healthy: immediately preferred again.
        publish(&setup.priority_set, 0, all_healthy(&[Arc::clone(&h80)]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h80));

        // And back out.
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h80)],
                healthy_hosts: vec![],
                ..Default::default()
            },
        );
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h82));
    }

    #[test]
    fn panic_mode_uses_all_hosts_and_preserves_cursor() {
        let setup = Setup::new();
        let list = hosts(&[
            "127.0.0.1:80",
            "127.0.0.1:81",
            "127.0.0.1:82",
            "127.0.0.1:83",
            "127.0.0.1:84",
            "127.0.0.1:85",
        ]);
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: list.clone(),
                healthy_hosts: list[..2].to_vec(),
                ..Default::default()
            },
        );
        let lb = setup.lb(false);

        // 2/6 healthy is below the 50% default threshold.
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[1]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[2]));
        assert_eq!(setup.stats.healthy_panic(), 3);

        // Back above the threshold: the cursor keeps going over the now
        // healthy list instead of resetting.
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: list.clone(),
                healthy_hosts: list[..4].to_vec(),
                ..Default::default()
            },
        );
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[3]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert_eq!(setup.stats.healthy_panic(), 3);
    }

    fn three_zone_upstream(setup: &Setup) -> (Vec<HostRef>, Vec<Vec<HostRef>>) {
        let list = hosts(&["127.0.0.1:80", "127.0.0.1:81", "127.0.0.1:82"]);
        let per_locality = vec![
            vec![Arc::clone(&list[1])],
            vec![Arc::clone(&list[0])],
            vec![Arc::clone(&list[2])],
        ];
        publish(
            &setup.priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );
        (list, per_locality)
    }

    #[test]
    fn zone_routing_skipped_for_small_cluster() {
        let setup = Setup::new();
        let (list, per_locality) = three_zone_upstream(&setup);
        let lb = setup.lb(true);

        // 3 healthy hosts < default min_cluster_size of 6.
        publish(
            &setup.local_priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[1]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[2]));
        // Counted once, at structure regeneration, not per selection.
        assert_eq!(setup.stats.zone_cluster_too_small(), 1);

        // Lower the bar and trigger a reload: direct zone routing kicks in.
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 1);
        publish(
            &setup.local_priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );
        assert!(Arc::ptr_eq(
            &lb.choose_host(None).unwrap(),
            &per_locality[0][0]
        ));
        assert_eq!(setup.stats.zone_routing_all_directly(), 1);
    }

    #[test]
    fn zone_routing_skipped_when_zone_counts_differ() {
        let setup = Setup::new();
        let (list, _) = three_zone_upstream(&setup);
        let lb = setup.lb(true);

        // Local fleet only spans two of the three zones.
        let local_per_locality = vec![vec![Arc::clone(&list[1])], vec![Arc::clone(&list[0])]];
        publish(
            &setup.local_priority_set,
            0,
            all_healthy_zoned(&list, &local_per_locality),
        );

        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert_eq!(setup.stats.zone_number_differs(), 1);
        assert_eq!(setup.stats.zone_cluster_too_small(), 0);
    }

    #[test]
    fn zone_routing_direct_and_runtime_kill_switch() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 3);
        let (list, per_locality) = three_zone_upstream(&setup);
        let lb = setup.lb(true);
        publish(
            &setup.local_priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );

        // Equal splits on both sides: everything goes to the local zone.
        assert!(Arc::ptr_eq(
            &lb.choose_host(None).unwrap(),
            &per_locality[0][0]
        ));
        assert_eq!(setup.stats.zone_routing_all_directly(), 1);
        assert!(Arc::ptr_eq(
            &lb.choose_host(None).unwrap(),
            &per_locality[0][0]
        ));
        assert_eq!(setup.stats.zone_routing_all_directly(), 2);

        // Kill switch flips mid-flight, with no membership event.
        setup.settings.set(runtime::ZONE_ROUTING_ENABLED, 0);
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[2]));
    }

    #[test]
    fn zone_routing_residual_sampling() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 5);

        let upstream = hosts(&[
            "127.0.0.1:80",
            "127.0.0.1:81",
            "127.0.0.1:82",
            "127.0.0.1:83",
            "127.0.0.1:84",
        ]);
        let upstream_per_locality = vec![
            vec![Arc::clone(&upstream[1])],
            vec![Arc::clone(&upstream[0]), Arc::clone(&upstream[2])],
            vec![Arc::clone(&upstream[3]), Arc::clone(&upstream[4])],
        ];
        publish(
            &setup.priority_set,
            0,
            all_healthy_zoned(&upstream, &upstream_per_locality),
        );

        let lb = setup.lb(true);

        let local = hosts(&["10.0.0.1:0", "10.0.0.2:0", "10.0.0.3:0"]);
        let local_per_locality = vec![
            vec![Arc::clone(&local[0])],
            vec![Arc::clone(&local[1])],
            vec![Arc::clone(&local[2])],
        ];
        publish(
            &setup.local_priority_set,
            0,
            all_healthy_zoned(&local, &local_per_locality),
        );

        // local 33.33% vs upstream 20% in zone 0:
        // local_percent_to_route = 10000 * 2000 / 3333 = 6000,
        // residual capacity = [0, 667, 667].
        setup.random.feed(&[100]);
        assert!(Arc::ptr_eq(
            &lb.choose_host(None).unwrap(),
            &upstream_per_locality[0][0]
        ));
        assert_eq!(setup.stats.zone_routing_sampled(), 1);

        // Force the request out of the local zone: 9999 misses the 6000
        // sample, 2 lands in the first locality with residual capacity.
        setup.random.feed(&[9999, 2]);
        assert!(Arc::ptr_eq(
            &lb.choose_host(None).unwrap(),
            &upstream_per_locality[1][1]
        ));
        assert_eq!(setup.stats.zone_routing_cross_zone(), 1);
        assert_eq!(setup.random.remaining(), 0);
    }

    #[test]
    fn residual_rounding_can_leave_no_capacity() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 1);

        // Zone routing is driven entirely by the per-zone lists; reuse one
        // host to keep the large vectors cheap.
        let h = host("127.0.0.1:80");
        let upstream_per_locality = vec![vec![Arc::clone(&h); 44999], vec![Arc::clone(&h); 55001]];
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h)],
                healthy_hosts: vec![Arc::clone(&h)],
                hosts_per_locality: upstream_per_locality.clone(),
                healthy_hosts_per_locality: upstream_per_locality,
            },
        );

        let lb = setup.lb(true);

        let local = host("10.0.0.1:0");
        let local_per_locality = vec![vec![Arc::clone(&local); 45000], vec![Arc::clone(&local); 55000]];
        publish(
            &setup.local_priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&local)],
                healthy_hosts: vec![Arc::clone(&local)],
                hosts_per_locality: local_per_locality.clone(),
                healthy_hosts_per_locality: local_per_locality,
            },
        );

        // local_percent_to_route floors to 9997; residual capacity rounds
        // to zero everywhere, so the miss falls back to the healthy list.
        setup.random.feed(&[9999]);
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h));
        assert_eq!(setup.stats.zone_no_capacity_left(), 1);
        assert_eq!(setup.stats.zone_routing_cross_zone(), 0);
        assert_eq!(setup.random.remaining(), 0);
    }

    #[test]
    fn one_zone_cluster_skips_zone_routing() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 1);
        let h80 = host("127.0.0.1:80");
        let h81 = host("127.0.0.1:81");
        let per_locality = vec![vec![Arc::clone(&h81)]];
        publish(
            &setup.priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h80)],
                healthy_hosts: vec![Arc::clone(&h80)],
                hosts_per_locality: per_locality.clone(),
                healthy_hosts_per_locality: per_locality.clone(),
            },
        );
        let lb = setup.lb(true);
        publish(
            &setup.local_priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&h80)],
                healthy_hosts: vec![Arc::clone(&h80)],
                hosts_per_locality: per_locality.clone(),
                healthy_hosts_per_locality: per_locality,
            },
        );

        // One locality on both sides: the healthy list wins, not the zone
        // list.
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &h80));
    }

    #[test]
    fn unhealthy_local_zone_skips_zone_routing() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 1);
        let list = hosts(&["127.0.0.1:80", "127.0.0.2:80"]);
        let per_locality = vec![vec![], list.clone()];
        publish(
            &setup.priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );
        let lb = setup.lb(true);
        publish(
            &setup.local_priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );

        // The local zone has no healthy upstreams: regular routing.
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[1]));
        assert_eq!(setup.stats.zone_routing_all_directly(), 0);
    }

    #[test]
    fn empty_local_fleet_counts_not_ok_at_selection() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 1);
        let list = hosts(&["127.0.0.1:80", "127.0.0.1:81"]);
        let per_locality = vec![vec![Arc::clone(&list[0])], vec![Arc::clone(&list[1])]];
        publish(
            &setup.priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );
        let lb = setup.lb(true);

        // The local fleet is present but empty: routing structures still
        // regenerate (all-zero local percentages make the local zone look
        // directly routable), and the selection path bails out instead.
        publish(
            &setup.local_priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![],
                healthy_hosts: vec![],
                hosts_per_locality: vec![vec![], vec![]],
                healthy_hosts_per_locality: vec![vec![], vec![]],
            },
        );

        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert_eq!(setup.stats.local_cluster_not_ok(), 1);
        assert_eq!(setup.stats.healthy_panic(), 0);
        assert_eq!(setup.stats.zone_routing_all_directly(), 0);
    }

    #[test]
    fn local_fleet_with_no_healthy_hosts_counts_not_ok() {
        let setup = Setup::new();
        setup.settings.set(runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE, 1);
        let list = hosts(&["127.0.0.1:80", "127.0.0.1:81"]);
        let per_locality = vec![vec![Arc::clone(&list[0])], vec![Arc::clone(&list[1])]];
        publish(
            &setup.priority_set,
            0,
            all_healthy_zoned(&list, &per_locality),
        );
        let lb = setup.lb(true);

        // The local fleet exists but every member is unhealthy; routing
        // structures regenerate, then the selection path bails out.
        let local = host("10.0.0.1:0");
        publish(
            &setup.local_priority_set,
            0,
            HostSetSnapshot {
                hosts: vec![Arc::clone(&local)],
                healthy_hosts: vec![],
                hosts_per_locality: vec![vec![Arc::clone(&local)], vec![]],
                healthy_hosts_per_locality: vec![vec![], vec![]],
            },
        );

        assert!(Arc::ptr_eq(&lb.choose_host(None).unwrap(), &list[0]));
        assert_eq!(setup.stats.local_cluster_not_ok(), 1);
        assert_eq!(setup.stats.healthy_panic(), 0);
    }
}
