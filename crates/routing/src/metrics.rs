//! Routing metrics

use metrics::Counter;

/// Coordinator-wide metrics.
#[derive(Clone, Debug)]
pub(crate) struct RoutingMetrics {
    /// Backend calls issued by routed operations
    pub(crate) fanout_total: Counter,
    /// Backend calls that failed
    pub(crate) host_failures_total: Counter,
    /// Hashes no online backend covered
    pub(crate) no_matching_servers_total: Counter,
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self {
            fanout_total: metrics::counter!("routing.fanout_total"),
            host_failures_total: metrics::counter!("routing.host_failures_total"),
            no_matching_servers_total: metrics::counter!("routing.no_matching_servers_total"),
        }
    }
}

impl RoutingMetrics {
    pub(crate) fn record_fanout(&self, calls: usize) {
        self.fanout_total.increment(calls as u64);
    }

    pub(crate) fn inc_host_failures(&self) {
        self.host_failures_total.increment(1);
    }

    pub(crate) fn inc_no_matching_servers(&self) {
        self.no_matching_servers_total.increment(1);
    }
}
