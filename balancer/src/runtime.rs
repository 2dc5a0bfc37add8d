use dashmap::DashMap;
use rand::Rng;

/// Panic threshold: below this healthy percentage the balancer routes to
/// all hosts regardless of health.
pub const HEALTHY_PANIC_THRESHOLD: &str = "upstream.healthy_panic_threshold";
pub const DEFAULT_HEALTHY_PANIC_THRESHOLD: i64 = 50;

/// Global kill switch for zone aware routing, as an enable percentage.
pub const ZONE_ROUTING_ENABLED: &str = "upstream.zone_routing.enabled";
pub const DEFAULT_ZONE_ROUTING_ENABLED: i64 = 100;

/// Zone aware routing is skipped for upstream tiers smaller than this.
pub const ZONE_ROUTING_MIN_CLUSTER_SIZE: &str = "upstream.zone_routing.min_cluster_size";
pub const DEFAULT_ZONE_ROUTING_MIN_CLUSTER_SIZE: i64 = 6;

/// Toggles the weighted-sticky mode of the least-request balancer.
pub const WEIGHT_ENABLED: &str = "upstream.weight_enabled";
pub const DEFAULT_WEIGHT_ENABLED: i64 = 1;

/// Read-only view over runtime-tunable settings.
///
/// The persistence/refresh side lives outside this crate; the balancer only
/// reads. Implementations must be cheap — `integer` is consulted on the
/// selection hot path.
pub trait RuntimeSettings: Send + Sync {
    /// Integer setting, or `default` when the key is not set.
    fn integer(&self, key: &str, default: i64) -> i64;

    /// Percentage-gated feature flag. The stored value (or
    /// `default_percent`) is an enable percentage in [0, 100].
    fn feature_enabled(&self, key: &str, default_percent: i64) -> bool;
}

/// In-memory [`RuntimeSettings`] with mutable overrides.
///
/// The default implementation for embedders without a runtime store, and
/// the way tests pin settings. Feature percentages of 0 and 100 are
/// deterministic; anything in between is sampled per call.
#[derive(Default)]
pub struct StaticRuntime {
    values: DashMap<String, i64>,
}

impl StaticRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: i64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn clear(&self, key: &str) {
        self.values.remove(key);
    }
}

impl RuntimeSettings for StaticRuntime {
    fn integer(&self, key: &str, default: i64) -> i64 {
        self.values.get(key).map(|v| *v.value()).unwrap_or(default)
    }

    fn feature_enabled(&self, key: &str, default_percent: i64) -> bool {
        let percent = self.integer(key, default_percent).clamp(0, 100);
        match percent {
            100 => true,
            0 => false,
            p => rand::thread_rng().gen_range(0..100) < p,
        }
    }
}

/// Source of randomness for sampling decisions.
///
/// Kept behind a trait so tests can feed exact draw sequences — the zone
/// sampling path consumes one or two draws per decision depending on the
/// branch taken.
pub trait RandomSource: Send + Sync {
    fn next(&self) -> u64;
}

/// Default [`RandomSource`] backed by the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLocalRandom;

impl RandomSource for ThreadLocalRandom {
    fn next(&self) -> u64 {
        rand::thread_rng().gen()
    }
}
