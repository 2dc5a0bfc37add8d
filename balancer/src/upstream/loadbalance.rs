pub mod least_request;
pub mod random;
pub mod round_robin;

use crate::runtime::{self, RandomSource, RuntimeSettings};
use crate::stats::LbStats;
use crate::upstream::host::{CallbackHandle, HostRef, HostSetSnapshot, PrioritySet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Opaque request context handed through to selectors.
///
/// The disciplines in this crate ignore it; subset-matching selectors built
/// on top use the metadata to narrow the host set.
#[derive(Debug, Clone, Default)]
pub struct LbContext {
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A load balancer picks one upstream host per request, or `None` when the
/// effective host list is empty.
pub trait LoadBalancer: Send + Sync {
    fn choose_host(&self, context: Option<&LbContext>) -> Option<HostRef>;
}

/// Whether a tier is so unhealthy that health should be ignored entirely.
///
/// Integer arithmetic on purpose — the decision must be reproducible across
/// platforms. An empty tier is not panic; it is simply empty.
pub(crate) fn is_global_panic(snapshot: &HostSetSnapshot, settings: &dyn RuntimeSettings) -> bool {
    let threshold = settings
        .integer(
            runtime::HEALTHY_PANIC_THRESHOLD,
            runtime::DEFAULT_HEALTHY_PANIC_THRESHOLD,
        )
        .clamp(0, 100) as u64;
    let total = snapshot.hosts.len() as u64;
    if total == 0 {
        return false;
    }
    let healthy_percent = 100 * snapshot.healthy_hosts.len() as u64 / total;
    healthy_percent < threshold
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalityRoutingState {
    /// Locality based routing is off for this tier.
    NoLocalityRouting,
    /// The local locality can absorb all of this fleet's share of traffic.
    LocalityDirect,
    /// The local locality cannot absorb everything; the remainder is spread
    /// across other localities in proportion to their residual capacity.
    LocalityResidual,
}

/// Derived routing state for one upstream priority tier.
///
/// Percentages are integers scaled by 10000. `residual_capacity[i]` holds
/// the per-locality slack for non-local localities; index 0 is always 0.
#[derive(Clone)]
struct PerPriorityState {
    locality_routing_state: LocalityRoutingState,
    local_percent_to_route: u64,
    residual_capacity: Vec<u64>,
}

impl Default for PerPriorityState {
    fn default() -> Self {
        Self {
            locality_routing_state: LocalityRoutingState::NoLocalityRouting,
            local_percent_to_route: 0,
            residual_capacity: Vec::new(),
        }
    }
}

struct EngineState {
    /// Lowest priority tier with a healthy host, or 0 when every tier is
    /// fully unhealthy. Refreshed on membership events, not per selection.
    best_priority: usize,
    /// Indexed by priority. Grows when tiers appear; never shrinks.
    per_priority: Vec<PerPriorityState>,
}

/// Shared routing state engine behind every selector.
///
/// Owned via `Arc` by both the selector and the membership-change callbacks
/// it registers, so callbacks can recompute derived state without touching
/// the selector itself.
struct EngineCore {
    priority_set: Arc<PrioritySet>,
    local_priority_set: Option<Arc<PrioritySet>>,
    stats: Arc<LbStats>,
    settings: Arc<dyn RuntimeSettings>,
    state: Mutex<EngineState>,
}

impl EngineCore {
    fn local_snapshot(&self) -> Option<Arc<HostSetSnapshot>> {
        // Only priority 0 of the local set is meaningful.
        let local = self.local_priority_set.as_ref()?;
        let host_set = local.host_sets().first().cloned()?;
        Some(host_set.snapshot())
    }

    fn best_available(sets: &[Arc<super::host::HostSet>]) -> usize {
        sets.iter()
            .position(|set| !set.snapshot().healthy_hosts.is_empty())
            .unwrap_or(0)
    }

    fn ensure_per_priority(state: &mut EngineState, len: usize) {
        if state.per_priority.len() < len {
            state.per_priority.resize(len, PerPriorityState::default());
        }
    }

    fn on_upstream_update(&self, priority: u32) {
        let sets = self.priority_set.host_sets();
        let mut state = self.state.lock().unwrap();
        Self::ensure_per_priority(&mut state, sets.len());
        if (priority as usize) < sets.len() {
            self.regenerate_locality_routing(priority as usize, &sets, &mut state);
        }
        state.best_priority = Self::best_available(&sets);
    }

    fn on_local_update(&self) {
        // Local percentages feed every tier's routing structures.
        let sets = self.priority_set.host_sets();
        let mut state = self.state.lock().unwrap();
        Self::ensure_per_priority(&mut state, sets.len());
        for priority in 0..sets.len() {
            self.regenerate_locality_routing(priority, &sets, &mut state);
        }
        state.best_priority = Self::best_available(&sets);
    }

    /// Recompute the locality routing structures for one tier.
    ///
    /// The tier stays at `NoLocalityRouting` unless every precondition
    /// holds; the next membership change re-evaluates from scratch.
    fn regenerate_locality_routing(
        &self,
        priority: usize,
        sets: &[Arc<super::host::HostSet>],
        state: &mut EngineState,
    ) {
        state.per_priority[priority] = PerPriorityState::default();

        // Only structural absence of the local set disables locality
        // routing here; an empty local fleet is handled at selection time
        // by the local-cluster-not-ok short-circuit.
        let local = match self.local_snapshot() {
            Some(local) => local,
            None => return,
        };
        let upstream = sets[priority].snapshot();

        // A single locality means there is nothing to route across.
        if upstream.healthy_hosts_per_locality.len() < 2 {
            return;
        }
        // No healthy upstreams in the local locality.
        if upstream.healthy_hosts_per_locality[0].is_empty() {
            return;
        }
        if upstream.healthy_hosts_per_locality.len() != local.healthy_hosts_per_locality.len() {
            self.stats.inc_zone_number_differs();
            return;
        }
        let min_cluster_size = self
            .settings
            .integer(
                runtime::ZONE_ROUTING_MIN_CLUSTER_SIZE,
                runtime::DEFAULT_ZONE_ROUTING_MIN_CLUSTER_SIZE,
            )
            .max(0) as u64;
        if (upstream.healthy_hosts.len() as u64) < min_cluster_size {
            self.stats.inc_zone_cluster_too_small();
            return;
        }
        if !self.settings.feature_enabled(
            runtime::ZONE_ROUTING_ENABLED,
            runtime::DEFAULT_ZONE_ROUTING_ENABLED,
        ) {
            return;
        }

        let local_pct = locality_percentages(&local.healthy_hosts_per_locality);
        let upstream_pct = locality_percentages(&upstream.healthy_hosts_per_locality);
        let pps = &mut state.per_priority[priority];

        // The upstream fleet has at least our share of capacity in the
        // local locality: everything can go there.
        if upstream_pct[0] >= local_pct[0] {
            pps.locality_routing_state = LocalityRoutingState::LocalityDirect;
            debug!(
                cluster = self.stats.cluster(),
                priority, "locality routing: direct"
            );
            return;
        }

        // local_pct[0] > upstream_pct[0] >= 0, so the divisor is non-zero.
        pps.locality_routing_state = LocalityRoutingState::LocalityResidual;
        pps.local_percent_to_route = 10000 * upstream_pct[0] / local_pct[0];
        pps.residual_capacity = vec![0; upstream_pct.len()];
        for i in 1..upstream_pct.len() {
            pps.residual_capacity[i] = upstream_pct[i].saturating_sub(local_pct[i]);
        }
        debug!(
            cluster = self.stats.cluster(),
            priority,
            local_percent_to_route = pps.local_percent_to_route,
            "locality routing: residual"
        );
    }
}

/// Share of hosts per locality, scaled by 10000 and floored. An empty total
/// yields all zeroes.
fn locality_percentages(per_locality: &[Vec<HostRef>]) -> Vec<u64> {
    let total: u64 = per_locality.iter().map(|l| l.len() as u64).sum();
    per_locality
        .iter()
        .map(|l| {
            if total > 0 {
                10000 * l.len() as u64 / total
            } else {
                0
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum HostSource {
    All,
    Healthy,
    Locality(usize),
}

/// One list out of a host set snapshot, without copying it.
///
/// Holding the snapshot keeps every referenced host alive even if the tier
/// is updated mid-selection.
pub(crate) struct HostSelection {
    snapshot: Arc<HostSetSnapshot>,
    source: HostSource,
}

impl HostSelection {
    pub(crate) fn hosts(&self) -> &[HostRef] {
        match self.source {
            HostSource::All => &self.snapshot.hosts,
            HostSource::Healthy => &self.snapshot.healthy_hosts,
            HostSource::Locality(i) => self
                .snapshot
                .healthy_hosts_per_locality
                .get(i)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        }
    }
}

/// Common base for all selectors: reacts to membership changes on the
/// upstream (and optional local) priority set and produces the effective
/// host list for each selection.
pub(crate) struct LoadBalancerBase {
    core: Arc<EngineCore>,
    random: Arc<dyn RandomSource>,
    _upstream_cb: CallbackHandle,
    _local_cb: Option<CallbackHandle>,
}

impl LoadBalancerBase {
    pub(crate) fn new(
        priority_set: Arc<PrioritySet>,
        local_priority_set: Option<Arc<PrioritySet>>,
        stats: Arc<LbStats>,
        settings: Arc<dyn RuntimeSettings>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let core = Arc::new(EngineCore {
            priority_set: Arc::clone(&priority_set),
            local_priority_set: local_priority_set.clone(),
            stats,
            settings,
            state: Mutex::new(EngineState {
                best_priority: 0,
                per_priority: Vec::new(),
            }),
        });

        {
            let sets = core.priority_set.host_sets();
            let mut state = core.state.lock().unwrap();
            EngineCore::ensure_per_priority(&mut state, sets.len());
            state.best_priority = EngineCore::best_available(&sets);
        }

        // Callbacks hold a weak reference so the engine is torn down with
        // the balancer even though the priority sets outlive it; the
        // handles below unregister on drop.
        let upstream_cb = priority_set.add_member_update_cb({
            let core = Arc::downgrade(&core);
            move |priority, _added, _removed| {
                if let Some(core) = core.upgrade() {
                    core.on_upstream_update(priority);
                }
            }
        });
        let local_cb = local_priority_set.as_ref().map(|local| {
            local.add_member_update_cb({
                let core = Arc::downgrade(&core);
                move |_priority, _added, _removed| {
                    if let Some(core) = core.upgrade() {
                        core.on_local_update();
                    }
                }
            })
        });

        Self {
            core,
            random,
            _upstream_cb: upstream_cb,
            _local_cb: local_cb,
        }
    }

    pub(crate) fn stats(&self) -> &LbStats {
        &self.core.stats
    }

    pub(crate) fn settings(&self) -> &dyn RuntimeSettings {
        self.core.settings.as_ref()
    }

    pub(crate) fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }

    /// Pick the host list to use for one selection.
    pub(crate) fn hosts_to_use(&self) -> Option<HostSelection> {
        let core = &self.core;
        let sets = core.priority_set.host_sets();
        if sets.is_empty() {
            return None;
        }

        let mut state = core.state.lock().unwrap();
        EngineCore::ensure_per_priority(&mut state, sets.len());
        let best = state.best_priority.min(sets.len() - 1);
        let snapshot = sets[best].snapshot();

        if is_global_panic(&snapshot, core.settings.as_ref()) {
            core.stats.inc_healthy_panic();
            return Some(HostSelection {
                snapshot,
                source: HostSource::All,
            });
        }

        let pps = &state.per_priority[best];
        if pps.locality_routing_state == LocalityRoutingState::NoLocalityRouting {
            return Some(HostSelection {
                snapshot,
                source: HostSource::Healthy,
            });
        }

        // Locality routing is latched on, so a local set exists. If its
        // fleet currently has no healthy members the percentages are
        // meaningless; do regular routing.
        match core.local_snapshot() {
            Some(local) if !local.healthy_hosts.is_empty() => {}
            _ => {
                core.stats.inc_local_cluster_not_ok();
                return Some(HostSelection {
                    snapshot,
                    source: HostSource::Healthy,
                });
            }
        }

        // The runtime flag can turn zone routing off between regenerations.
        if !core.settings.feature_enabled(
            runtime::ZONE_ROUTING_ENABLED,
            runtime::DEFAULT_ZONE_ROUTING_ENABLED,
        ) {
            return Some(HostSelection {
                snapshot,
                source: HostSource::Healthy,
            });
        }

        Some(self.try_choose_local_locality_hosts(snapshot, pps))
    }

    /// Pick a locality within the effective tier.
    ///
    /// Consumes one random draw in the direct-or-sampled-local branches and
    /// two when traffic crosses localities.
    fn try_choose_local_locality_hosts(
        &self,
        snapshot: Arc<HostSetSnapshot>,
        pps: &PerPriorityState,
    ) -> HostSelection {
        let stats = &self.core.stats;

        if pps.locality_routing_state == LocalityRoutingState::LocalityDirect {
            stats.inc_zone_routing_all_directly();
            return HostSelection {
                snapshot,
                source: HostSource::Locality(0),
            };
        }

        debug_assert_eq!(
            pps.locality_routing_state,
            LocalityRoutingState::LocalityResidual
        );

        if self.random.next() % 10000 < pps.local_percent_to_route {
            stats.inc_zone_routing_sampled();
            return HostSelection {
                snapshot,
                source: HostSource::Locality(0),
            };
        }

        // Possible due to rounding in the scaled percentages: every
        // non-local locality ended up with zero slack.
        let total_capacity: u64 = pps.residual_capacity.iter().sum();
        if total_capacity == 0 {
            stats.inc_zone_no_capacity_left();
            return HostSelection {
                snapshot,
                source: HostSource::Healthy,
            };
        }

        let threshold = self.random.next() % total_capacity;
        let mut locality = 1;
        let mut prefix = pps.residual_capacity[1];
        while prefix <= threshold {
            locality += 1;
            prefix += pps.residual_capacity[locality];
        }

        stats.inc_zone_routing_cross_zone();
        HostSelection {
            snapshot,
            source: HostSource::Locality(locality),
        }
    }
}
