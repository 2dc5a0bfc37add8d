use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros used by
/// [`crate::stats::LbStats`] are recorded; the `PrometheusHandle` is
/// retained solely for rendering a scrape endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called **once** at startup, by the embedder
    /// that owns the process-wide recorder.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "lb_healthy_panic_total",
            Unit::Count,
            "Selections served in panic mode (health ignored)"
        );
        describe_counter!(
            "lb_zone_cluster_too_small_total",
            Unit::Count,
            "Zone routing skipped: upstream tier below min cluster size"
        );
        describe_counter!(
            "lb_zone_number_differs_total",
            Unit::Count,
            "Zone routing skipped: local and upstream zone counts differ"
        );
        describe_counter!(
            "lb_zone_routing_all_directly_total",
            Unit::Count,
            "Selections routed to the local zone without sampling"
        );
        describe_counter!(
            "lb_zone_routing_sampled_total",
            Unit::Count,
            "Selections routed to the local zone by residual sampling"
        );
        describe_counter!(
            "lb_zone_routing_cross_zone_total",
            Unit::Count,
            "Selections routed to a non-local zone"
        );
        describe_counter!(
            "lb_zone_no_capacity_left_total",
            Unit::Count,
            "Residual sampling found no cross-zone capacity"
        );
        describe_counter!(
            "lb_local_cluster_not_ok_total",
            Unit::Count,
            "Zone routing skipped: local cluster has no healthy hosts"
        );
        describe_gauge!(
            "lb_max_host_weight",
            Unit::Count,
            "Maximum host weight across the cluster"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
